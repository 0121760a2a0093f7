//! A workload adapter backed by a real PTY child process.
//!
//! PTY reads block, so a dedicated OS thread drains the PTY and feeds a
//! channel the async side awaits. That keeps `read_output` cancellation-safe
//! (the pipeline's shutdown interrupts the channel wait, never a blocked
//! `read(2)`), and makes `output_ready` a cheap channel-occupancy check.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wraith_pipe::{AdapterError, AdapterResult, WorkloadAdapter};

use crate::pty::{PtyError, PtyHandle};

impl From<PtyError> for AdapterError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::Io(err) => AdapterError::Io(err),
            other => AdapterError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

/// Chunks queued between the reader thread and the async side. Small on
/// purpose: a stalled consumer applies backpressure to the PTY instead of
/// buffering unboundedly.
const OUTPUT_QUEUE: usize = 64;

/// A child process on a PTY, exposed through the workload contract.
pub struct PtyWorkload {
    output: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    writer: Mutex<Box<dyn Write + Send>>,
    handle: Mutex<PtyHandle>,
}

impl PtyWorkload {
    /// Spawn a shell and start the reader thread.
    ///
    /// `None` uses the user's default shell.
    pub fn spawn(shell: Option<&str>, cols: u16, rows: u16) -> Result<Self, PtyError> {
        let mut handle = PtyHandle::spawn(shell, cols, rows)?;
        let reader = handle
            .take_reader()
            .ok_or_else(|| PtyError::Spawn("PTY reader unavailable".to_string()))?;
        let writer = handle
            .take_writer()
            .ok_or_else(|| PtyError::Spawn("PTY writer unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE);
        std::thread::Builder::new()
            .name("wraith-pty-io".to_string())
            .spawn(move || pump_output(reader, tx))?;

        Ok(Self {
            output: tokio::sync::Mutex::new(rx),
            writer: Mutex::new(writer),
            handle: Mutex::new(handle),
        })
    }

    /// Exit code of the child if it has exited.
    pub fn exit_code(&self) -> Option<u32> {
        self.handle.lock().unwrap().try_wait()
    }

    /// Whether the child process is still running.
    pub fn is_alive(&self) -> bool {
        self.exit_code().is_none()
    }
}

#[async_trait]
impl WorkloadAdapter for PtyWorkload {
    async fn read_output(&self) -> AdapterResult<Option<Vec<u8>>> {
        // The channel closes when the reader thread sees EOF, which the
        // pipeline treats as the workload disconnecting.
        Ok(self.output.lock().await.recv().await)
    }

    fn output_ready(&self) -> bool {
        self.output
            .try_lock()
            .map(|rx| !rx.is_empty())
            .unwrap_or(false)
    }

    async fn write_input(&self, data: &[u8]) -> AdapterResult<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> AdapterResult<()> {
        self.handle.lock().unwrap().resize(cols, rows)?;
        Ok(())
    }
}

/// Blocking read loop on the dedicated PTY thread.
fn pump_output(mut reader: Box<dyn std::io::Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            // EOF or error: the child is gone. Dropping the sender closes
            // the channel and surfaces end-of-stream to the pipeline.
            Ok(0) => return,
            Err(err) => {
                log::debug!("PTY read ended: {err}");
                return;
            }
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    // Receiver dropped; the session is gone.
                    return;
                }
            }
        }
    }
}
