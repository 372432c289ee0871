#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app_constants;
mod app_runtime;
mod app_types;
mod backend_config;
mod backend_launch;
mod logging;
mod main_window;
mod rpc_client;
mod rpc_protocol;
mod runtime_paths;
mod startup_task;
mod window_lifecycle;

pub(crate) use app_constants::*;
pub(crate) use app_types::ShellState;
pub(crate) use logging::{
    append_desktop_log, append_lifecycle_log, append_rpc_log, append_shutdown_log,
    append_startup_log,
};

fn main() {
    app_runtime::run();
}
