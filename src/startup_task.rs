use std::{path::PathBuf, time::Duration};

use serde_json::Value;
use tauri::{AppHandle, Manager};

use crate::{
    append_rpc_log,
    backend_config::{self, Endpoint},
    backend_launch::{self, BackendProcess},
    rpc_client::{InvocationResult, RpcClient},
    runtime_paths, ShellState, BACKEND_LOG_FILE, STARTUP_ARGUMENT, STARTUP_PROCEDURE,
};

pub(crate) fn describe_invocation_result(procedure: &str, result: &InvocationResult) -> String {
    match result {
        Ok(reply) => format!("{procedure} returned {} (more={})", reply.value, reply.more),
        Err(error) => format!("{procedure} failed: {error}"),
    }
}

/// Fires the startup invocation and logs its result when it arrives.
///
/// With `timeout` unset the invocation waits for as long as the backend
/// takes.
pub(crate) fn issue_startup_invocation(client: &RpcClient, timeout: Option<Duration>) {
    let args = vec![Value::from(STARTUP_ARGUMENT)];
    let report = |result: InvocationResult| {
        append_rpc_log(&describe_invocation_result(STARTUP_PROCEDURE, &result));
    };

    match timeout {
        None => client.invoke(STARTUP_PROCEDURE, args, report),
        Some(limit) => {
            let pending = client.invoke_pending(STARTUP_PROCEDURE, args);
            tauri::async_runtime::spawn(async move {
                report(pending.wait_with_timeout(Some(limit)).await);
            });
        }
    }
}

/// Returns whether a backend process was started.
fn launch_backend_if_configured<F>(state: &ShellState, root_dir: Option<PathBuf>, log: F) -> bool
where
    F: Fn(&str),
{
    let plan = match backend_launch::resolve_launch_plan_from_env() {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            log("no backend command configured; expecting an external backend");
            return false;
        }
        Err(error) => {
            log(&format!("backend launch skipped: {error}"));
            return false;
        }
    };

    let log_path = runtime_paths::log_file_path(root_dir.as_deref(), BACKEND_LOG_FILE);
    match state.backend.start(&plan, Some(&log_path)) {
        Ok(()) => {
            log(&format!(
                "backend started: {:?} (log: {})",
                backend_launch::build_debug_command(&plan),
                log_path.display()
            ));
            true
        }
        Err(error) => {
            log(&format!("failed to start backend: {error}"));
            false
        }
    }
}

/// Holds the startup invocation back until a launched backend listens.
/// A failed wait is logged and the invocation still goes out.
async fn wait_for_launched_backend<F>(process: &BackendProcess, endpoint: &str, log: &F)
where
    F: Fn(&str),
{
    let endpoint = match Endpoint::parse(endpoint) {
        Ok(endpoint) => endpoint,
        Err(error) => {
            log(&format!("skipping backend readiness check: {error}"));
            return;
        }
    };

    let timeout = backend_config::resolve_backend_startup_timeout();
    log(&format!(
        "waiting up to {}ms for backend {endpoint}",
        timeout.as_millis()
    ));
    match backend_launch::wait_for_backend(process, &endpoint, timeout).await {
        Ok(()) => log(&format!("backend {endpoint} is reachable")),
        Err(error) => log(&format!("backend readiness check failed: {error}")),
    }
}

pub(crate) fn spawn_startup_task<F>(app_handle: AppHandle, root_dir: Option<PathBuf>, log: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    tauri::async_runtime::spawn(async move {
        let state = app_handle.state::<ShellState>();
        let launched = launch_backend_if_configured(&state, root_dir, &log);

        let endpoint = backend_config::resolve_backend_endpoint();
        if launched {
            wait_for_launched_backend(&state.backend, &endpoint, &log).await;
        }
        let timeout = backend_config::resolve_rpc_timeout();
        log(&format!(
            "connecting to backend {endpoint} (invoke timeout: {})",
            timeout
                .map(|limit| format!("{}ms", limit.as_millis()))
                .unwrap_or_else(|| "none".to_string())
        ));

        let client = match RpcClient::connect(&endpoint) {
            Ok(client) => client,
            Err(error) => {
                log(&format!("failed to create rpc client: {error}"));
                return;
            }
        };

        log(&format!("rpc client for {} created", client.endpoint()));
        issue_startup_invocation(&client, timeout);
        if !state.install_rpc_client(client) {
            log("rpc client already installed; dropping duplicate connection");
        }
    });
}
