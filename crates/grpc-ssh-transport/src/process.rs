//! Child process lifecycle for duplex streams

use crate::duplex::{Lifecycle, PipeReader, PipeWriter};
use crate::TransportError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs a [`Command`] whose stdout/stdin become the stream's pipes.
///
/// Standard error is forwarded line by line to the log and never mixed into
/// the data stream.
pub struct ProcessLifecycle {
    id: Uuid,
    label: &'static str,
    command: Option<Command>,
    child: Mutex<Option<Child>>,
    shutdown: CancellationToken,
}

impl ProcessLifecycle {
    /// Wrap a command that has not been spawned yet
    pub fn new(id: Uuid, mut command: Command) -> Self {
        command.stderr(Stdio::piped()).kill_on_drop(true);
        Self {
            id,
            label: "process",
            command: Some(command),
            child: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the label attached to forwarded stderr lines
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    fn command(&mut self) -> Result<&mut Command, TransportError> {
        self.command
            .as_mut()
            .ok_or_else(|| TransportError::Session("process already started".to_string()))
    }
}

#[async_trait]
impl Lifecycle for ProcessLifecycle {
    fn read_pipe(&mut self) -> Result<PipeReader, TransportError> {
        let (tx, rx) = pipe::pipe()?;
        self.command()?.stdout(tx.into_blocking_fd()?);
        Ok(Box::new(rx))
    }

    fn write_pipe(&mut self) -> Result<PipeWriter, TransportError> {
        let (tx, rx) = pipe::pipe()?;
        self.command()?.stdin(rx.into_blocking_fd()?);
        Ok(Box::new(tx))
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        let mut command = self
            .command
            .take()
            .ok_or_else(|| TransportError::Session("process already started".to_string()))?;

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Session(format!("failed to start command: {e}")))?;
        // The command still owns the child's ends of the pipes
        drop(command);

        debug!(stream = %self.id, pid = ?child.id(), "Process started");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(self.id, self.label, stderr));
        }

        *self.child.get_mut() = Some(child);
        Ok(())
    }

    async fn wait(&self) -> Result<(), TransportError> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = self.shutdown.cancelled() => {
                debug!(stream = %self.id, "Terminating process");
                if let Err(e) = child.start_kill() {
                    warn!(stream = %self.id, error = %e, "Failed to kill process");
                }
                child.wait().await?
            }
        };

        debug!(stream = %self.id, %status, "Process exited");
        if status.success() {
            Ok(())
        } else {
            Err(TransportError::CommandFailed {
                code: status.code().unwrap_or(-1),
                message: status.to_string(),
            })
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        Ok(())
    }
}

/// Log every line a process writes to its standard error
pub(crate) async fn forward_stderr<R>(id: Uuid, label: &'static str, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(stream = %id, instance = label, output = "ssh-stderr", "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(stream = %id, instance = label, error = %e, "Stopped reading stderr");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DuplexStream;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_cat_echoes_through_pipes() {
        let lifecycle = ProcessLifecycle::new(Uuid::new_v4(), Command::new("cat"));
        let mut stream = DuplexStream::open(lifecycle).await.unwrap();

        stream.write_all(b"hello over pipes").await.unwrap();
        let mut buf = [0u8; 16];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello over pipes");

        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let lifecycle = ProcessLifecycle::new(
            Uuid::new_v4(),
            Command::new("/nonexistent/grpc-ssh-test-binary"),
        );
        let err = DuplexStream::open(lifecycle).await.unwrap_err();
        assert!(matches!(err, TransportError::Session(_)));
    }

    #[tokio::test]
    async fn test_close_terminates_running_process() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let lifecycle = ProcessLifecycle::new(Uuid::new_v4(), command);
        let mut stream = DuplexStream::open(lifecycle).await.unwrap();

        stream.close().await.unwrap();

        let mut buf = [0u8; 1];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_process_exit_closes_stream() {
        let mut command = Command::new("sh");
        command.args(["-c", "printf done; echo oops >&2; exit 3"]);
        let lifecycle = ProcessLifecycle::new(Uuid::new_v4(), command);
        let stream = DuplexStream::open(lifecycle).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !stream.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("exited process did not close the stream");
    }
}
