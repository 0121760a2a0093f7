//! wraith-vt: terminal emulation engine for wraith.
//!
//! Decodes a byte stream of mixed text and ANSI/VT control sequences into
//! typed tokens and maintains a versioned grid of terminal cells reflecting
//! their cumulative effect. The crate is pure state: no I/O, no threads, no
//! global singletons. Scheduling and transport live in `wraith-pipe`.
//!
//! Two properties hold throughout:
//!
//! - **Losslessness** — re-serializing the token stream reproduces the input
//!   byte-for-byte, regardless of chunk boundaries or malformed sequences.
//! - **Versioning** — every cell mutation bumps a strictly increasing
//!   per-cell stamp with a reading from an injected clock, so consumers can
//!   detect change without a dirty-rect structure.

pub mod cell;
pub mod clock;
pub mod grid;
pub mod parser;
pub mod token;

pub use cell::{Cell, CellFlags, Rgb};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use grid::{CellGrid, Cursor, GridError, GridSnapshot, ScrollRegion};
pub use parser::Parser;
pub use token::{CsiParams, DcsPayload, OscString, Token};
