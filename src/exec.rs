//! Process execution
//!
//! Launches node (or `npx node@N` for another major) with inherited stdio
//! and hands back the child's exit code unchanged.

use crate::config::schema::RuntimeConfig;
use crate::engine::RuntimeTarget;
use crate::error::{ScrunError, ScrunResult};
use std::ffi::OsString;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Everything needed to start the final process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionDescriptor {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment
    pub env: Vec<(String, OsString)>,
}

impl ExecutionDescriptor {
    /// Run `args` under the node selected by `target`
    pub fn node(runtime: &RuntimeConfig, target: &RuntimeTarget, args: Vec<String>) -> Self {
        match target {
            RuntimeTarget::Current => Self {
                program: runtime.node.clone(),
                args,
                env: Vec::new(),
            },
            RuntimeTarget::Version(version) => {
                let mut full = vec!["--yes".to_string(), format!("node@{}", version)];
                full.extend(args);
                Self {
                    program: runtime.npx.clone(),
                    args: full,
                    env: Vec::new(),
                }
            }
        }
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, OsString)>) -> Self {
        self.env.extend(env);
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

/// Spawn the process, forward interrupts to it and return its exit code
pub async fn run(descriptor: &ExecutionDescriptor) -> ScrunResult<i32> {
    debug!(program = %descriptor.program, args = ?descriptor.args, "Launching");

    let mut child = descriptor
        .command()
        .spawn()
        .map_err(|e| ScrunError::launch(&descriptor.program, e))?;

    let pid = child.id();
    let status = supervise(pid, child.wait()).await?.value;
    let code = exit_code(status);
    debug!("{} exited with {}", descriptor.program, code);
    Ok(code)
}

/// Result of a supervised child, plus the first signal forwarded to it
#[derive(Debug)]
pub struct Supervised<T> {
    pub value: T,
    pub signal: Option<i32>,
}

impl<T> Supervised<T> {
    /// Fail with [`ScrunError::Interrupted`] if a signal was forwarded
    pub fn uninterrupted(self) -> ScrunResult<T> {
        match self.signal {
            Some(signal) => Err(ScrunError::Interrupted { signal }),
            None => Ok(self.value),
        }
    }
}

/// Await `wait` while forwarding SIGINT and SIGTERM to the child `pid`
///
/// Every subprocess scrun starts goes through here, so an interrupt reaches
/// whatever is running: npm, a version probe or the script itself.
#[cfg(unix)]
pub async fn supervise<T>(
    pid: Option<u32>,
    wait: impl Future<Output = std::io::Result<T>>,
) -> ScrunResult<Supervised<T>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| ScrunError::io("installing SIGINT handler", e))?;
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| ScrunError::io("installing SIGTERM handler", e))?;

    tokio::pin!(wait);
    let mut received = None;
    loop {
        let forwarded = tokio::select! {
            result = &mut wait => {
                let value = result.map_err(|e| ScrunError::io("waiting for child process", e))?;
                return Ok(Supervised { value, signal: received });
            }
            _ = interrupt.recv() => libc::SIGINT,
            _ = terminate.recv() => libc::SIGTERM,
        };
        if received.is_none() {
            received = Some(forwarded);
        }
        forward(pid, forwarded);
    }
}

#[cfg(unix)]
fn forward(pid: Option<u32>, signal: libc::c_int) {
    if let Some(pid) = pid {
        debug!("Forwarding signal {} to {}", signal, pid);
        // SAFETY: the pid belongs to our child, which has not been reaped yet
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}

#[cfg(not(unix))]
pub async fn supervise<T>(
    _pid: Option<u32>,
    wait: impl Future<Output = std::io::Result<T>>,
) -> ScrunResult<Supervised<T>> {
    // Console interrupts reach the whole process group on Windows
    tokio::pin!(wait);
    let mut received = None;
    loop {
        tokio::select! {
            result = &mut wait => {
                let value = result.map_err(|e| ScrunError::io("waiting for child process", e))?;
                return Ok(Supervised { value, signal: received });
            }
            _ = tokio::signal::ctrl_c() => {
                if received.is_none() {
                    received = Some(2);
                }
            }
        }
    }
}

/// Exit code of a finished child; signals map to `128 + signal`
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
