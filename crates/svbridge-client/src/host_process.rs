//! The 32-bit helper process and the connection it dialled back on.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use svbridge_core::BridgeConfig;
use svbridge_core::config::HOST_EXECUTABLE;
use svbridge_ipc::{
    AuthKey, ChannelError, FrameReceiver, FrameSender, accept_authenticated, bind_loopback,
};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::error::ClientError;

/// Grace period between SIGTERM and kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Program and leading arguments used to start the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Find the helper: the configured override first, then the executable
/// shipped in `addon_dir`.
pub fn resolve_host_command(
    host_command: Option<&str>,
    addon_dir: &Path,
) -> Result<HostCommand, ClientError> {
    if let Some(command) = host_command {
        let mut words = command.split_whitespace().map(str::to_string);
        if let Some(program) = words.next() {
            return Ok(HostCommand {
                program: PathBuf::from(program),
                args: words.collect(),
            });
        }
    }

    let bundled = addon_dir.join(HOST_EXECUTABLE);
    if bundled.is_file() {
        return Ok(HostCommand {
            program: bundled,
            args: Vec::new(),
        });
    }
    Err(ClientError::HostNotFound {
        looked_for: bundled,
    })
}

/// A running helper with its authenticated channel.
///
/// The child, the write half of the channel and the listener are torn down
/// together by [`HostProcess::shutdown`].
pub struct HostProcess {
    child: Child,
    channel: FrameSender,
    listener: TcpListener,
}

impl HostProcess {
    /// Start the helper and wait for it to connect back.
    ///
    /// Returns the read half separately; it belongs to the receiver task.
    pub async fn spawn(
        config: &BridgeConfig,
        addon_dir: &Path,
    ) -> Result<(Self, FrameReceiver), ClientError> {
        let host = resolve_host_command(config.host_command.as_deref(), addon_dir)?;
        let key = AuthKey::generate()?;
        let listener = bind_loopback().await?;
        let port = listener.local_addr().map_err(ChannelError::from)?.port();

        let mut command = Command::new(&host.program);
        command
            .args(&host.args)
            .arg("--address")
            .arg(format!("127.0.0.1:{port}"))
            .arg("--authkey")
            .arg(key.to_hex())
            .arg("--log-dir")
            .arg(addon_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let program = host.program.display().to_string();
        let mut child = command.spawn().map_err(|source| ClientError::Spawn {
            program: program.clone(),
            source,
        })?;
        tracing::info!(program = %program, pid = ?child.id(), port, "Helper started");

        let connect_timeout = config.command_timeout();
        let accepted = tokio::select! {
            accepted = tokio::time::timeout(connect_timeout, accept_authenticated(&listener, &key)) => {
                match accepted {
                    Ok(result) => result.map_err(ClientError::from),
                    Err(_) => Err(ClientError::Timeout {
                        command: "connect",
                        after: connect_timeout,
                    }),
                }
            }
            status = child.wait() => {
                tracing::error!(status = ?status, "Helper exited before connecting");
                Err(ClientError::ConnectionClosed)
            }
        };

        match accepted {
            Ok((channel, receiver)) => Ok((
                Self {
                    child,
                    channel,
                    listener,
                },
                receiver,
            )),
            Err(e) => {
                tracing::error!(error = %e, "Helper did not connect");
                if let Err(kill) = shutdown_child(child).await {
                    tracing::warn!(error = %kill, "Failed to stop helper");
                }
                Err(e)
            }
        }
    }

    /// Write half of the channel.
    pub fn sender(&self) -> FrameSender {
        self.channel.clone()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Close the channel and the listener, then stop the child.
    pub async fn shutdown(self) -> io::Result<ExitStatus> {
        let Self {
            child,
            channel,
            listener,
        } = self;
        channel.close().await;
        drop(listener);
        let status = shutdown_child(child).await;
        match &status {
            Ok(status) => tracing::info!(%status, "Helper exited"),
            Err(e) => tracing::warn!(error = %e, "Failed to reap helper"),
        }
        status
    }
}

impl std::fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProcess")
            .field("pid", &self.child.id())
            .field("listener", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

/// Stop a child: SIGTERM, a short grace period, then kill, then reap.
///
/// Windows has no SIGTERM equivalent, so the child is killed outright.
pub async fn shutdown_child(mut child: Child) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        terminate_unix(&mut child).await
    }

    #[cfg(not(unix))]
    {
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn terminate_unix(child: &mut Child) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return child.wait().await;
    };
    let pid = i32::try_from(pid).map_err(io::Error::other)?;

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        return result;
    }

    tracing::warn!(pid, "Helper ignored SIGTERM, killing");
    child.kill().await?;
    child.wait().await
}
