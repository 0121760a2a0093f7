//! Low-level PTY process management over `portable-pty`.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    Spawn(String),
    Io(std::io::Error),
    Resize(String),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::Spawn(msg) => write!(f, "failed to spawn PTY: {msg}"),
            PtyError::Io(err) => write!(f, "PTY I/O error: {err}"),
            PtyError::Resize(msg) => write!(f, "failed to resize PTY: {msg}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::Io(err)
    }
}

/// Owns a PTY master/child pair plus its reader and writer ends.
///
/// The reader and writer can each be taken out once, so blocking reads can
/// run on a dedicated thread while writes happen elsewhere.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn a shell in a fresh PTY with the given dimensions.
    ///
    /// `None` uses the user's default shell (`$SHELL`, falling back to
    /// `/bin/sh`).
    pub fn spawn(shell: Option<&str>, cols: u16, rows: u16) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(format!("openpty: {e}")))?;

        let cmd = match shell {
            Some(s) => CommandBuilder::new(s),
            None => CommandBuilder::new(default_shell()),
        };

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(format!("spawn command: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(format!("clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(format!("take writer: {e}")))?;

        Ok(Self {
            master: pair.master,
            reader: Some(reader),
            writer: Some(writer),
            child,
        })
    }

    /// Take the read end. Returns `None` if it was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Take the write end. Returns `None` if it was already taken.
    pub fn take_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.writer.take()
    }

    /// Resize the PTY.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Resize(format!("{e}")))
    }

    /// Exit code of the child if it has exited, `None` while running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Whether the child process is still running.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }
}

/// The user's default shell, falling back to `/bin/sh`.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_spawn_shell() {
        let handle = PtyHandle::spawn(Some("/bin/sh"), 80, 24);
        assert!(handle.is_ok(), "spawn failed: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(handle.is_alive());
    }

    #[test]
    fn test_echo_roundtrip() {
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), 80, 24).unwrap();
        let mut reader = handle.take_reader().unwrap();
        let mut writer = handle.take_writer().unwrap();

        writer.write_all(b"echo WRAITH_PTY_OK\n").unwrap();
        writer.flush().unwrap();
        thread::sleep(Duration::from_millis(300));

        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&collected).contains("WRAITH_PTY_OK") {
                        break;
                    }
                }
            }
        }
        assert!(
            String::from_utf8_lossy(&collected).contains("WRAITH_PTY_OK"),
            "echo output not observed: {:?}",
            String::from_utf8_lossy(&collected)
        );
    }

    #[test]
    fn test_reader_can_be_taken_once() {
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), 80, 24).unwrap();
        assert!(handle.take_reader().is_some());
        assert!(handle.take_reader().is_none());
    }

    #[test]
    fn test_resize() {
        let handle = PtyHandle::spawn(Some("/bin/sh"), 80, 24).unwrap();
        assert!(handle.resize(120, 40).is_ok());
    }

    #[test]
    fn test_default_shell_is_absolute() {
        let shell = default_shell();
        assert!(shell.starts_with('/'), "expected absolute path: {shell}");
    }
}
