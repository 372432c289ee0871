use std::{
    env,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::Mutex,
    time::Duration,
};

use tokio::{net::TcpStream, time::Instant};

use crate::{backend_config::Endpoint, logging, BACKEND_CMD_ENV, BACKEND_CWD_ENV};

const BACKEND_PING_TIMEOUT: Duration = Duration::from_millis(800);
const BACKEND_POLL_INTERVAL: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LaunchPlan {
    pub(crate) cmd: String,
    pub(crate) args: Vec<String>,
    pub(crate) cwd: Option<PathBuf>,
}

pub(crate) fn resolve_launch_plan(
    custom_cmd: Option<&str>,
    cwd_override: Option<&str>,
) -> Result<Option<LaunchPlan>, String> {
    let Some(custom_cmd) = custom_cmd.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };

    let mut pieces = shlex::split(custom_cmd)
        .ok_or_else(|| format!("Invalid {BACKEND_CMD_ENV}: {custom_cmd}"))?;
    if pieces.is_empty() {
        return Err(format!("{BACKEND_CMD_ENV} is empty."));
    }

    let cmd = pieces.remove(0);
    let cwd = cwd_override
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);

    Ok(Some(LaunchPlan {
        cmd,
        args: pieces,
        cwd,
    }))
}

pub(crate) fn resolve_launch_plan_from_env() -> Result<Option<LaunchPlan>, String> {
    resolve_launch_plan(
        env::var(BACKEND_CMD_ENV).ok().as_deref(),
        env::var(BACKEND_CWD_ENV).ok().as_deref(),
    )
}

pub(crate) fn build_debug_command(plan: &LaunchPlan) -> Vec<String> {
    let mut parts = vec![plan.cmd.clone()];
    parts.extend(plan.args.clone());
    parts
}

/// Backend process spawned by the shell, if any.
#[derive(Debug, Default)]
pub(crate) struct BackendProcess {
    child: Mutex<Option<Child>>,
}

impl BackendProcess {
    pub(crate) fn start(&self, plan: &LaunchPlan, log_path: Option<&Path>) -> Result<(), String> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| "Backend process lock poisoned.".to_string())?;
        if guard.is_some() {
            return Ok(());
        }

        let mut command = Command::new(&plan.cmd);
        command.args(&plan.args).stdin(Stdio::null());
        if let Some(cwd) = &plan.cwd {
            command.current_dir(cwd);
        }

        match log_path {
            Some(log_path) => {
                let stdout_file = logging::open_log_file(log_path)?;
                let stderr_file = stdout_file
                    .try_clone()
                    .map_err(|error| format!("Failed to clone backend log handle: {error}"))?;
                command.stdout(Stdio::from(stdout_file));
                command.stderr(Stdio::from(stderr_file));
            }
            None => {
                command.stdout(Stdio::null());
                command.stderr(Stdio::null());
            }
        }

        let child = command.spawn().map_err(|error| {
            format!(
                "Failed to spawn backend process with command {:?}: {}",
                build_debug_command(plan),
                error
            )
        })?;
        *guard = Some(child);
        Ok(())
    }

    /// Reaps the child if it has exited. `Ok(None)` means it is still running.
    pub(crate) fn poll_exit(&self) -> Result<Option<ExitStatus>, String> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| "Backend process lock poisoned.".to_string())?;
        let Some(child) = guard.as_mut() else {
            return Err("Backend process is not running.".to_string());
        };
        match child.try_wait() {
            Ok(None) => Ok(None),
            Ok(Some(status)) => {
                *guard = None;
                Ok(Some(status))
            }
            Err(error) => {
                *guard = None;
                Err(format!("Failed to poll backend process status: {error}"))
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(self.poll_exit(), Ok(None))
    }

    pub(crate) fn stop(&self) {
        let mut child = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(process) = child.as_mut() {
            stop_child_process(process);
        }
    }
}

pub(crate) async fn ping_backend(endpoint: &Endpoint, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(endpoint.socket_address())).await,
        Ok(Ok(_))
    )
}

/// Polls until `endpoint` accepts connections, giving up early if the
/// launched backend exits and after `timeout` otherwise.
pub(crate) async fn wait_for_backend(
    process: &BackendProcess,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<(), String> {
    let started = Instant::now();
    loop {
        if ping_backend(endpoint, BACKEND_PING_TIMEOUT).await {
            return Ok(());
        }

        if let Some(status) = process.poll_exit()? {
            return Err(format!(
                "Backend process exited before becoming reachable: {status}"
            ));
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "Timed out after {}ms waiting for backend startup.",
                timeout.as_millis()
            ));
        }
        tokio::time::sleep(BACKEND_POLL_INTERVAL.min(timeout - elapsed)).await;
    }
}

fn stop_child_process(child: &mut Child) {
    #[cfg(target_os = "windows")]
    {
        let _ = Command::new("taskkill")
            .args(["/pid", &child.id().to_string(), "/t", "/f"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .status();
        let _ = child.wait();
    }

    #[cfg(not(target_os = "windows"))]
    {
        let _ = child.kill();
        let _ = child.wait();
    }
}
