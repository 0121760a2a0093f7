//! Capability contracts for the two ends of a pipeline.
//!
//! The pipeline consumes these interfaces but never implements them; a
//! concrete transport (a PTY child process, a network bridge, a nested
//! virtual terminal, a test double) satisfies the contract it sits on.
//!
//! Methods take `&self`: one adapter is shared by both pipeline flows (the
//! output flow reads workload output while the input flow writes workload
//! input), so implementations keep their read and write halves behind their
//! own interior mutability rather than requiring a split step.

use async_trait::async_trait;

/// Errors from adapter I/O.
///
/// The pipeline treats any of these as end-of-stream for the affected flow;
/// they never crash a session.
#[derive(Debug)]
pub enum AdapterError {
    Io(std::io::Error),
    /// The peer is gone (process exited, connection dropped).
    Disconnected,
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::Io(err) => write!(f, "adapter I/O error: {err}"),
            AdapterError::Disconnected => write!(f, "adapter disconnected"),
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdapterError::Io(err) => Some(err),
            AdapterError::Disconnected => None,
        }
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::Io(err)
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Feature set negotiated with a presentation endpoint at construction.
/// Not renegotiated at runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_mouse: bool,
    pub supports_true_color: bool,
    pub supports_256_colors: bool,
    pub supports_alternate_screen: bool,
    pub supports_bracketed_paste: bool,
}

/// The side producing terminal output and consuming input — a child
/// process, an embedded virtual terminal, a test harness.
#[async_trait]
pub trait WorkloadAdapter: Send + Sync {
    /// Wait for the next chunk of output. `Ok(None)` means end-of-stream.
    async fn read_output(&self) -> AdapterResult<Option<Vec<u8>>>;

    /// Whether a `read_output` call would return without suspending.
    ///
    /// The pipeline uses this to detect frame boundaries: a drain ends when
    /// no further output is immediately available.
    fn output_ready(&self) -> bool;

    /// Deliver input bytes to the workload.
    async fn write_input(&self, data: &[u8]) -> AdapterResult<()>;

    /// Propagate a geometry change to the workload.
    fn resize(&self, cols: u16, rows: u16) -> AdapterResult<()>;
}

/// The side rendering output and producing user input — a real console, a
/// remote bridge, another embedded terminal.
#[async_trait]
pub trait PresentationAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Render a chunk of output bytes.
    async fn write_output(&self, data: &[u8]) -> AdapterResult<()>;

    /// Wait for the next chunk of user input. `Ok(None)` means end-of-stream.
    async fn read_input(&self) -> AdapterResult<Option<Vec<u8>>>;

    /// Set up the endpoint for a live session (raw mode, alternate screen);
    /// the concrete work is delegated to whatever driver backs the adapter.
    async fn enter_interactive_mode(&self) -> AdapterResult<()>;

    async fn exit_interactive_mode(&self) -> AdapterResult<()>;
}
