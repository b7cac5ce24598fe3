//! External `ssh` client backend with connection multiplexing
//!
//! One long-lived control master authenticates against the remote host and
//! every dial spawns a short `ssh` invocation that multiplexes over the
//! master's control socket instead of authenticating again.

use crate::process::{forward_stderr, ProcessLifecycle};
use crate::transport::{ConnectionInfo, Transport, TransportType};
use crate::{DuplexStream, SshTarget, TransportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::runtime::RuntimeFlavor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Temporary directory bases longer than this risk overflowing the
/// Unix socket path limit once the `%C` hash is appended.
const MAX_TMPDIR_LEN: usize = 20;

/// Locate the external `ssh` executable on the search path
pub fn locate_ssh_client() -> Result<PathBuf, TransportError> {
    which::which("ssh").map_err(|e| TransportError::ClientNotFound(e.to_string()))
}

/// Base directory for the control socket directory
fn control_dir_base() -> PathBuf {
    let tmp = std::env::temp_dir();
    if tmp.as_os_str().len() > MAX_TMPDIR_LEN {
        PathBuf::from("/tmp")
    } else {
        tmp
    }
}

/// SSH transport driving the external `ssh` client
pub struct SubprocessTransport {
    /// SSH target
    target: SshTarget,
    /// Path of the `ssh` executable
    ssh_path: PathBuf,
    /// `ControlPath` value shared by the master and every client
    control_path: String,
    /// Directory holding the control socket, removed on drop
    socket_dir: TempDir,
    /// Number of dials performed so far
    dials: AtomicU64,
    /// Whether the master has been stopped
    closed: AtomicBool,
}

impl SubprocessTransport {
    /// Locate `ssh` and start a control master for `target`
    pub async fn connect(target: SshTarget) -> Result<Self, TransportError> {
        let ssh_path = locate_ssh_client()?;
        Self::connect_with_client(target, ssh_path).await
    }

    /// Start a control master for `target` using the given `ssh` executable
    pub async fn connect_with_client(
        target: SshTarget,
        ssh_path: PathBuf,
    ) -> Result<Self, TransportError> {
        let socket_dir = tempfile::Builder::new()
            .prefix("grpcsshctrl")
            .tempdir_in(control_dir_base())
            .map_err(|e| {
                TransportError::Setup(format!(
                    "unable to create tmpdir for ssh control sockets: {e}"
                ))
            })?;

        let transport = Self::new(target, ssh_path, socket_dir);
        if let Err(e) = transport.start_master().await {
            // No master to stop
            transport.closed.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(transport)
    }

    fn new(target: SshTarget, ssh_path: PathBuf, socket_dir: TempDir) -> Self {
        let control_path = format!("{}/%C", socket_dir.path().display());
        Self {
            target,
            ssh_path,
            control_path,
            socket_dir,
            dials: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Directory holding the control socket
    pub fn socket_dir(&self) -> &Path {
        self.socket_dir.path()
    }

    /// Arguments shared by the master, client and stop invocations
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-x".to_string(),
            "-oBatchMode=yes".to_string(),
            "-oClearAllForwardings=yes".to_string(),
            format!("-oControlPath={}", self.control_path),
        ];

        if !self.target.enable_agent {
            args.push("-a".to_string());
            args.push("-oIdentityAgent=none".to_string());
        }

        if let Some(user) = &self.target.user {
            args.push(format!("-oUser={user}"));
        }

        if self.target.port != 22 {
            args.push(format!("-oPort={}", self.target.port));
        }

        args
    }

    fn master_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-N".to_string(),
            "-f".to_string(),
            "-oControlMaster=auto".to_string(),
            self.target.hostname.clone(),
        ]);
        args
    }

    fn client_args(&self, address: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-T".to_string(),
            "-oControlMaster=no".to_string(),
            self.target.hostname.clone(),
            self.target.remote_invocation(address),
        ]);
        args
    }

    fn stop_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-O".to_string(),
            "stop".to_string(),
            self.target.hostname.clone(),
        ]);
        args
    }

    async fn start_master(&self) -> Result<(), TransportError> {
        info!(host = %self.target.hostname, "Starting ssh control master");

        let mut master = Command::new(&self.ssh_path)
            .args(self.master_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::ControlMaster(format!("failed to start ssh master: {e}")))?;

        // With -f the master keeps stderr open after backgrounding itself,
        // so it is drained independently of the exit status.
        if let Some(stderr) = master.stderr.take() {
            tokio::spawn(forward_stderr(Uuid::nil(), "master", stderr));
        }

        let status = master
            .wait()
            .await
            .map_err(|e| TransportError::ControlMaster(format!("failed to start ssh master: {e}")))?;

        if !status.success() {
            return Err(TransportError::ControlMaster(format!(
                "failed to start ssh master: {status}"
            )));
        }

        debug!(control_path = %self.control_path, "ssh control master running");
        Ok(())
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn dial(
        &self,
        cancel: &CancellationToken,
        address: &str,
    ) -> Result<DuplexStream, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let dial_id = Uuid::new_v4();
        let n = self.dials.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(stream = %dial_id, n, address, "Dialing through ssh client");

        let mut command = Command::new(&self.ssh_path);
        command.args(self.client_args(address));

        let lifecycle = ProcessLifecycle::new(dial_id, command).with_label("client");
        DuplexStream::open_with_id(dial_id, lifecycle).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(host = %self.target.hostname, "Stopping ssh control master");
        let output = Command::new(&self.ssh_path)
            .args(self.stop_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransportError::ControlMaster(format!("unable to stop ssh master: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::ControlMaster(format!(
                "unable to stop ssh master: {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            host: self.target.hostname.clone(),
            port: self.target.port,
            username: self.target.user.clone(),
            transport_type: TransportType::Subprocess,
        }
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        // The socket directory is about to be removed; stop the master first.
        // This blocks on `ssh -O stop`, so on a multi-threaded runtime the
        // worker is handed off while it runs.
        warn!(host = %self.target.hostname, "Transport dropped without close, stopping ssh master");
        let stop = || {
            std::process::Command::new(&self.ssh_path)
                .args(self.stop_args())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
        };

        let status = match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(stop)
            }
            _ => stop(),
        };
        if let Err(e) = status {
            debug!(host = %self.target.hostname, error = %e, "Failed to stop ssh master on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(target: SshTarget) -> SubprocessTransport {
        let socket_dir = tempfile::Builder::new()
            .prefix("grpcsshctrl")
            .tempdir()
            .unwrap();
        let mut transport = SubprocessTransport::new(target, PathBuf::from("/usr/bin/ssh"), socket_dir);
        // Nothing was started, keep Drop from invoking ssh
        *transport.closed.get_mut() = true;
        transport
    }

    #[test]
    fn test_common_args_defaults() {
        let t = transport(SshTarget::new("example.com"));
        let args = t.common_args();

        assert_eq!(&args[..3], ["-x", "-oBatchMode=yes", "-oClearAllForwardings=yes"]);
        assert_eq!(args[3], format!("-oControlPath={}/%C", t.socket_dir().display()));
        assert!(args.contains(&"-a".to_string()));
        assert!(args.contains(&"-oIdentityAgent=none".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-oUser=")));
        assert!(!args.iter().any(|a| a.starts_with("-oPort=")));
    }

    #[test]
    fn test_common_args_with_user_port_and_agent() {
        let t = transport(
            SshTarget::new("example.com")
                .user("deploy")
                .port(2222)
                .enable_agent(true),
        );
        let args = t.common_args();

        assert!(args.contains(&"-oUser=deploy".to_string()));
        assert!(args.contains(&"-oPort=2222".to_string()));
        assert!(!args.contains(&"-a".to_string()));
        assert!(!args.contains(&"-oIdentityAgent=none".to_string()));
    }

    #[test]
    fn test_master_client_and_stop_share_control_path() {
        let t = transport(SshTarget::new("example.com"));
        let control = format!("-oControlPath={}", t.control_path);

        let master = t.master_args();
        assert!(master.contains(&control));
        assert!(master.ends_with(&[
            "-N".to_string(),
            "-f".to_string(),
            "-oControlMaster=auto".to_string(),
            "example.com".to_string(),
        ]));

        let client = t.client_args("helloworld");
        assert!(client.contains(&control));
        assert!(client.ends_with(&[
            "-T".to_string(),
            "-oControlMaster=no".to_string(),
            "example.com".to_string(),
            "grpc-ssh-broker client helloworld".to_string(),
        ]));

        let stop = t.stop_args();
        assert!(stop.contains(&control));
        assert!(stop.ends_with(&["-O".to_string(), "stop".to_string(), "example.com".to_string()]));
    }

    #[test]
    fn test_control_dir_base_is_short() {
        let base = control_dir_base();
        assert!(base.as_os_str().len() <= MAX_TMPDIR_LEN || base == Path::new("/tmp"));
    }

    #[test]
    fn test_connection_info() {
        let t = transport(SshTarget::new("example.com").user("deploy").port(2200));
        let info = t.connection_info();
        assert_eq!(info.host, "example.com");
        assert_eq!(info.port, 2200);
        assert_eq!(info.username.as_deref(), Some("deploy"));
        assert_eq!(info.transport_type, TransportType::Subprocess);
    }

    #[tokio::test]
    async fn test_missing_executable_fails_master_start() {
        let result = SubprocessTransport::connect_with_client(
            SshTarget::new("example.com"),
            PathBuf::from("/nonexistent/ssh"),
        )
        .await;
        assert!(matches!(result, Err(TransportError::ControlMaster(_))));
    }

    #[tokio::test]
    async fn test_dial_after_close_is_rejected() {
        let t = transport(SshTarget::new("example.com"));
        let err = t.dial(&CancellationToken::new(), "svc").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    /// Transport whose `ssh` records its arguments into `log`
    fn recording_transport(dir: &Path, log: &Path) -> SubprocessTransport {
        use std::os::unix::fs::PermissionsExt;

        let ssh = dir.join("ssh");
        std::fs::write(&ssh, format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display())).unwrap();
        std::fs::set_permissions(&ssh, std::fs::Permissions::from_mode(0o755)).unwrap();

        let socket_dir = tempfile::Builder::new()
            .prefix("grpcsshctrl")
            .tempdir()
            .unwrap();
        SubprocessTransport::new(SshTarget::new("example.com"), ssh, socket_dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_stops_master_on_multi_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("invocations");

        drop(recording_transport(dir.path(), &log));

        let invocations = std::fs::read_to_string(&log).unwrap();
        assert!(invocations.trim_end().ends_with("-O stop example.com"), "{invocations}");
    }

    #[tokio::test]
    async fn test_drop_stops_master_on_current_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("invocations");

        drop(recording_transport(dir.path(), &log));

        let invocations = std::fs::read_to_string(&log).unwrap();
        assert!(invocations.trim_end().ends_with("-O stop example.com"), "{invocations}");
    }

    #[tokio::test]
    async fn test_cancelled_dial_starts_nothing() {
        let mut t = transport(SshTarget::new("example.com"));
        *t.closed.get_mut() = false;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = t.dial(&cancel, "svc").await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(t.dials.load(Ordering::Relaxed), 0);
        *t.closed.get_mut() = true;
    }
}
