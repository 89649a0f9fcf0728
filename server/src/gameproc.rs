//! Supervisor owning the lifecycle of the single game subprocess
//!
//! At most one child is ever live. Every operation and the death watcher
//! serialize on one async mutex around the child handle, so the two ways a
//! start epoch can end — an operator `stop()` or the child dying on its own
//! — can never both observe the same child. Exactly one of them reaps it.

use log::{debug, info, warn};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// How often the stop loop and the death watcher poll for child exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Supervisor misuse and spawn failures.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("the game is already running")]
    AlreadyRunning,
    #[error("the game is not running")]
    NotRunning,
    #[error("game process error: {0}")]
    Io(#[from] std::io::Error),
}

/// Posted to the server loop when the child terminates outside of `stop()`.
#[derive(Debug)]
pub struct GameEnded;

struct Inner {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

/// Handle to the supervised game subprocess.
pub struct GameProcess {
    program: String,
    extra_args: Vec<String>,
    inner: Arc<Mutex<Inner>>,
    watcher: JoinHandle<()>,
}

impl GameProcess {
    /// Creates an idle supervisor for the given program.
    ///
    /// `events` receives one `GameEnded` per child that terminates without
    /// going through `stop()`. The internal watcher task polls for that
    /// under the same mutex every supervisor entry point holds.
    pub fn new(
        program: impl Into<String>,
        extra_args: Vec<String>,
        events: mpsc::UnboundedSender<GameEnded>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            child: None,
            stdin: None,
        }));

        let watcher = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(POLL_INTERVAL);
                loop {
                    interval.tick().await;
                    let mut guard = inner.lock().await;
                    let exited = match guard.child.as_mut() {
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => {
                                info!("game process exited: {}", status);
                                true
                            }
                            Ok(None) => false,
                            Err(e) => {
                                warn!("failed to poll game process: {}", e);
                                false
                            }
                        },
                        None => false,
                    };
                    if exited {
                        guard.child = None;
                        guard.stdin = None;
                        if events.send(GameEnded).is_err() {
                            break;
                        }
                    }
                }
            })
        };

        Self {
            program: program.into(),
            extra_args,
            inner,
            watcher,
        }
    }

    /// Starts the game process, optionally on a named map.
    ///
    /// The mutex is held from the liveness check through the spawn, so the
    /// death watcher cannot slip between "decide to start" and "child
    /// recorded."
    pub async fn start(&self, map: Option<&str>) -> Result<(), GameError> {
        let mut guard = self.inner.lock().await;
        if guard.child.is_some() {
            return Err(GameError::AlreadyRunning);
        }

        let mut command = Command::new(&self.program);
        if let Some(map) = map {
            command.arg("-g").arg(map);
        }
        command.args(&self.extra_args);
        // The child reads its moves from our private pipe; its screen
        // output stays on the server's own stdout/stderr. Descriptors
        // other than the stdio trio are close-on-exec and do not leak.
        command.stdin(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn()?;
        info!(
            "started game process {} (pid {:?}, map {:?})",
            self.program,
            child.id(),
            map
        );
        guard.stdin = child.stdin.take();
        guard.child = Some(child);
        Ok(())
    }

    /// Stops the game process and waits for it to exit.
    ///
    /// Sends SIGCONT first in case the child is paused, then SIGINT, then
    /// polls non-blockingly. The child may be sitting at its own
    /// "really quit?" prompt, so each poll tick pipes in a `y` answer —
    /// a best-effort nudge, not a handshake. Expect this to take a few
    /// hundred milliseconds for a well-behaved child.
    pub async fn stop(&self) -> Result<(), GameError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let child = inner.child.as_mut().ok_or(GameError::NotRunning)?;

        if let Some(pid) = child.id() {
            let _ = send_signal(pid, libc::SIGCONT);
            send_signal(pid, libc::SIGINT)?;
        }

        loop {
            match child.try_wait()? {
                Some(status) => {
                    info!("game process stopped: {}", status);
                    break;
                }
                None => {
                    if let Some(stdin) = inner.stdin.as_mut() {
                        // The child may already have closed its end.
                        let _ = stdin.write_all(b"y").await;
                        let _ = stdin.flush().await;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        inner.child = None;
        inner.stdin = None;
        Ok(())
    }

    /// Pauses the game process with SIGSTOP.
    pub async fn pause(&self) -> Result<(), GameError> {
        self.signal_child(libc::SIGSTOP).await
    }

    /// Resumes a paused game process with SIGCONT.
    pub async fn resume(&self) -> Result<(), GameError> {
        self.signal_child(libc::SIGCONT).await
    }

    async fn signal_child(&self, signum: libc::c_int) -> Result<(), GameError> {
        let mut guard = self.inner.lock().await;
        let child = guard.child.as_mut().ok_or(GameError::NotRunning)?;
        match child.id() {
            Some(pid) => {
                send_signal(pid, signum)?;
                debug!("sent signal {} to game process {}", signum, pid);
                Ok(())
            }
            None => Err(GameError::NotRunning),
        }
    }

    /// Writes one line of input to the game process.
    pub async fn send(&self, line: &str) -> Result<(), GameError> {
        let mut guard = self.inner.lock().await;
        let stdin = guard.stdin.as_mut().ok_or(GameError::NotRunning)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Whether a child is currently live.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.child.is_some()
    }
}

impl Drop for GameProcess {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Delivers a signal to a process by pid.
fn send_signal(pid: u32, signum: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill only delivers a signal; pid came from a child we spawned
    // and still hold un-reaped, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signum) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
