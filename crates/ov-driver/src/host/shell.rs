//! Remote command execution on the provisioned host.

use std::fmt;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tracing::debug;

use crate::error::{DriverError, Result};

/// Where and as whom to run a command.
#[derive(Clone, PartialEq, Eq)]
pub struct ShellTarget {
    /// Host address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for ShellTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for ShellTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Runs commands on a remote host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command`, succeeding only on exit status 0 within `timeout`.
    async fn exec(&self, target: &ShellTarget, command: &str, timeout: Duration) -> Result<()>;
}

/// [`RemoteShell`] over libssh2 with password authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssh2Shell;

impl Ssh2Shell {
    fn exec_blocking(target: &ShellTarget, command: &str, timeout: Duration) -> Result<()> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| DriverError::Shell(format!("cannot resolve {}", target.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;

        let mut session = Session::new().map_err(ssh_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(ssh_error)?;
        session
            .userauth_password(&target.user, &target.password)
            .map_err(ssh_error)?;
        if !session.authenticated() {
            return Err(DriverError::Shell(format!(
                "authentication failed for {target}"
            )));
        }

        let mut channel = session.channel_session().map_err(ssh_error)?;
        channel.exec(command).map_err(ssh_error)?;
        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.send_eof().map_err(ssh_error)?;
        channel.wait_eof().map_err(ssh_error)?;
        channel.wait_close().map_err(ssh_error)?;
        let status = channel.exit_status().map_err(ssh_error)?;
        // Best effort; the TCP stream is closed on drop either way.
        let _ = session.disconnect(None, "done", None);

        if status == 0 {
            Ok(())
        } else {
            Err(DriverError::Shell(format!(
                "command on {target} exited with status {status}: {}",
                output.trim()
            )))
        }
    }
}

fn ssh_error(e: ssh2::Error) -> DriverError {
    DriverError::Shell(e.to_string())
}

#[async_trait]
impl RemoteShell for Ssh2Shell {
    async fn exec(&self, target: &ShellTarget, command: &str, timeout: Duration) -> Result<()> {
        debug!(host = %target, timeout_secs = timeout.as_secs(), "Running remote command");
        let owned_target = target.clone();
        let owned_command = command.to_string();
        let task = tokio::task::spawn_blocking(move || {
            Self::exec_blocking(&owned_target, &owned_command, timeout)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(DriverError::Shell(format!("ssh task failed: {join}"))),
            Err(_) => Err(DriverError::Shell(format!(
                "command on {target} did not finish within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ShellTarget {
        ShellTarget {
            host: "127.0.0.1".into(),
            port: 1,
            user: "root".into(),
            password: "hunter2".into(),
        }
    }

    #[test]
    fn test_target_formatting_hides_password() {
        let target = target();
        assert_eq!(target.to_string(), "root@127.0.0.1:1");
        assert!(!format!("{target:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_exec_against_closed_port_fails() {
        let err = Ssh2Shell
            .exec(&target(), "echo hello", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Io(_) | DriverError::Shell(_)));
    }
}
