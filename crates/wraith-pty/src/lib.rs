//! wraith-pty: a PTY-backed workload for wraith pipelines.
//!
//! Pairs a real child process on a pseudo-terminal with the workload
//! contract from `wraith-pipe`, so a pipeline can sit between a shell and
//! any presentation endpoint.
//!
//! - [`PtyHandle`] — low-level PTY process management (spawn, read, write,
//!   resize).
//! - [`PtyWorkload`] — a `WorkloadAdapter` that bridges the PTY's blocking
//!   reads onto a dedicated thread.
//! - [`ConsolePresentation`] — a `PresentationAdapter` over a platform
//!   [`ConsoleDriver`].

pub mod console;
pub mod pty;
pub mod workload;

pub use console::{ConsoleDriver, ConsolePresentation};
pub use pty::{PtyError, PtyHandle};
pub use workload::PtyWorkload;
