use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};
use tauri::WebviewWindow;

use crate::{
    append_lifecycle_log,
    backend_launch::BackendProcess,
    rpc_client::RpcClient,
    window_lifecycle::{LifecycleController, QuitPolicy, WindowSpec},
};

/// Process-wide state managed by Tauri.
pub(crate) struct ShellState {
    pub(crate) lifecycle: Mutex<LifecycleController<WebviewWindow>>,
    pub(crate) rpc_client: Mutex<Option<RpcClient>>,
    pub(crate) backend: BackendProcess,
    is_quitting: AtomicBool,
}

impl ShellState {
    pub(crate) fn new(quit_policy: QuitPolicy) -> Self {
        Self {
            lifecycle: Mutex::new(LifecycleController::new(
                quit_policy,
                WindowSpec::main_window(),
                append_lifecycle_log,
            )),
            rpc_client: Mutex::new(None),
            backend: BackendProcess::default(),
            is_quitting: AtomicBool::new(false),
        }
    }

    pub(crate) fn mark_quitting(&self) {
        self.is_quitting.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_quitting(&self) -> bool {
        self.is_quitting.load(Ordering::Relaxed)
    }

    /// Keeps `client` for the rest of the process. Returns `false` if a
    /// client was already installed.
    pub(crate) fn install_rpc_client(&self, client: RpcClient) -> bool {
        let Ok(mut guard) = self.rpc_client.lock() else {
            return false;
        };
        if guard.is_some() {
            return false;
        }
        *guard = Some(client);
        true
    }
}
