//! A presentation adapter over a raw-mode console driver.
//!
//! The driver contract abstracts the platform-specific console work —
//! entering and leaving raw mode, blocking reads, geometry queries — so the
//! adapter (and everything above it) never touches an OS API directly.
//! Geometry changes detected by the driver (e.g. from an OS resize signal)
//! are the host's to wire up: deliver them to the running session's
//! `resize`, which propagates to the grid, the workload, and the filters.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use wraith_pipe::{AdapterResult, Capabilities, PresentationAdapter};

/// Platform console contract.
///
/// Methods take `&self`; a driver manages its own interior mutability so the
/// adapter can read input on a dedicated thread while writing output from
/// the pipeline. `read` blocks until input arrives and returns `Ok(0)` at
/// end-of-stream or when the driver is cancelled.
pub trait ConsoleDriver: Send + Sync {
    fn width(&self) -> u16;
    fn height(&self) -> u16;

    /// Switch the console to raw mode. When `preserve_output_processing` is
    /// set, output post-processing (e.g. LF -> CRLF translation) stays on.
    fn enter_raw_mode(&self, preserve_output_processing: bool) -> io::Result<()>;
    fn exit_raw_mode(&self) -> io::Result<()>;

    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&self, data: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;

    /// Discard any input queued before the session started.
    fn drain_pending_input(&self) -> io::Result<()>;
}

/// A real console as the presentation end of a pipeline.
///
/// Input is pumped off the driver's blocking `read` on a dedicated thread,
/// keeping `read_input` cancellation-safe for the pipeline's shutdown.
pub struct ConsolePresentation {
    driver: Arc<dyn ConsoleDriver>,
    capabilities: Capabilities,
    input: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    pump_started: AtomicBool,
    pump_tx: Mutex<Option<(Arc<dyn ConsoleDriver>, mpsc::Sender<Vec<u8>>)>>,
}

impl ConsolePresentation {
    /// Wrap a driver with the capability set negotiated for this console.
    pub fn new(driver: Arc<dyn ConsoleDriver>, capabilities: Capabilities) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            driver: driver.clone(),
            capabilities,
            input: tokio::sync::Mutex::new(rx),
            pump_started: AtomicBool::new(false),
            pump_tx: Mutex::new(Some((driver, tx))),
        }
    }

    /// Current console geometry, for sizing the session at start.
    pub fn driver_size(&self) -> (u16, u16) {
        (self.driver.width(), self.driver.height())
    }

    /// The input thread starts with the session, not at construction, so a
    /// console is not consumed before the session owns it.
    fn start_pump(&self) {
        if self.pump_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((driver, tx)) = self.pump_tx.lock().unwrap().take() {
            std::thread::Builder::new()
                .name("wraith-console-in".to_string())
                .spawn(move || pump_input(driver, tx))
                .ok();
        }
    }
}

#[async_trait]
impl PresentationAdapter for ConsolePresentation {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn write_output(&self, data: &[u8]) -> AdapterResult<()> {
        self.driver.write(data)?;
        self.driver.flush()?;
        Ok(())
    }

    async fn read_input(&self) -> AdapterResult<Option<Vec<u8>>> {
        Ok(self.input.lock().await.recv().await)
    }

    async fn enter_interactive_mode(&self) -> AdapterResult<()> {
        self.driver.enter_raw_mode(false)?;
        self.driver.drain_pending_input()?;
        self.start_pump();
        Ok(())
    }

    async fn exit_interactive_mode(&self) -> AdapterResult<()> {
        self.driver.exit_raw_mode()?;
        Ok(())
    }
}

fn pump_input(driver: Arc<dyn ConsoleDriver>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 1024];
    loop {
        match driver.read(&mut buf) {
            Ok(0) => return,
            Err(err) => {
                log::debug!("console read ended: {err}");
                return;
            }
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Scripted driver: serves queued input chunks, then end-of-stream.
    struct FakeDriver {
        script: Mutex<VecDeque<Vec<u8>>>,
        written: Mutex<Vec<u8>>,
        raw_entries: AtomicUsize,
        raw_exits: AtomicUsize,
        drains: AtomicUsize,
    }

    impl FakeDriver {
        fn new(script: Vec<&[u8]>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().map(|c| c.to_vec()).collect()),
                written: Mutex::new(Vec::new()),
                raw_entries: AtomicUsize::new(0),
                raw_exits: AtomicUsize::new(0),
                drains: AtomicUsize::new(0),
            })
        }
    }

    impl ConsoleDriver for FakeDriver {
        fn width(&self) -> u16 {
            80
        }
        fn height(&self) -> u16 {
            24
        }
        fn enter_raw_mode(&self, _preserve_output_processing: bool) -> io::Result<()> {
            self.raw_entries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn exit_raw_mode(&self) -> io::Result<()> {
            self.raw_exits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.lock().unwrap().pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
        fn write(&self, data: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
        fn drain_pending_input(&self) -> io::Result<()> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_interactive_mode_drives_raw_mode() {
        let driver = FakeDriver::new(vec![]);
        let console = ConsolePresentation::new(driver.clone(), Capabilities::default());
        assert_eq!(console.driver_size(), (80, 24));
        console.enter_interactive_mode().await.unwrap();
        console.exit_interactive_mode().await.unwrap();
        assert_eq!(driver.raw_entries.load(Ordering::SeqCst), 1);
        assert_eq!(driver.raw_exits.load(Ordering::SeqCst), 1);
        assert_eq!(driver.drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_output_reaches_driver() {
        let driver = FakeDriver::new(vec![]);
        let console = ConsolePresentation::new(driver.clone(), Capabilities::default());
        console.write_output(b"\x1b[2Jhello").await.unwrap();
        assert_eq!(*driver.written.lock().unwrap(), b"\x1b[2Jhello");
    }

    #[tokio::test]
    async fn test_scripted_input_then_end_of_stream() {
        let driver = FakeDriver::new(vec![b"ab", b"cd"]);
        let console = ConsolePresentation::new(driver, Capabilities::default());
        console.enter_interactive_mode().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), console.read_input())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, Some(b"ab".to_vec()));
        let second = tokio::time::timeout(Duration::from_secs(1), console.read_input())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, Some(b"cd".to_vec()));
        let done = tokio::time::timeout(Duration::from_secs(1), console.read_input())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done, None);
    }
}
