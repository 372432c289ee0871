use tauri::{AppHandle, Manager, RunEvent, WindowEvent};

use crate::{
    append_lifecycle_log, append_shutdown_log, append_startup_log, logging, main_window,
    runtime_paths, startup_task,
    window_lifecycle::{LifecycleSignal, QuitPolicy},
    ShellState, DESKTOP_LOG_FILE, MAIN_WINDOW_LABEL,
};

fn dispatch_lifecycle_signal(app_handle: &AppHandle, signal: LifecycleSignal) {
    let state = app_handle.state::<ShellState>();
    let result = match state.lifecycle.lock() {
        Ok(mut controller) => {
            let mut host = main_window::TauriWindowHost::new(app_handle);
            controller.handle_signal(&mut host, signal)
        }
        Err(_) => {
            append_lifecycle_log(&format!("lifecycle lock poisoned; dropping {signal:?}"));
            return;
        }
    };

    if let Err(error) = result {
        append_startup_log(&format!("fatal lifecycle error: {error}"));
        state.mark_quitting();
        app_handle.exit(1);
    }
}

pub(crate) fn run() {
    let root_dir = runtime_paths::default_root_dir();
    let log_path = runtime_paths::log_file_path(root_dir.as_deref(), DESKTOP_LOG_FILE);
    logging::init_logging(&log_path);

    append_startup_log("desktop process starting");
    append_startup_log(&format!("desktop log path: {}", log_path.display()));

    let quit_policy = QuitPolicy::for_current_platform();
    append_startup_log(&format!("quit policy: {quit_policy:?}"));

    tauri::Builder::default()
        .manage(ShellState::new(quit_policy))
        .on_window_event(|window, event| {
            if window.label() != MAIN_WINDOW_LABEL {
                return;
            }

            if let WindowEvent::Destroyed = event {
                dispatch_lifecycle_signal(window.app_handle(), LifecycleSignal::WindowClosed);
            }
        })
        .setup(move |app| {
            startup_task::spawn_startup_task(app.handle().clone(), root_dir, append_startup_log);
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app_handle, event| match event {
            RunEvent::Ready => dispatch_lifecycle_signal(app_handle, LifecycleSignal::Ready),
            RunEvent::ExitRequested { code: None, api, .. } => {
                let state = app_handle.state::<ShellState>();
                if state.is_quitting() {
                    return;
                }

                // The controller decides whether a windowless process exits.
                api.prevent_exit();
                dispatch_lifecycle_signal(app_handle, LifecycleSignal::AllWindowsClosed);
            }
            RunEvent::ExitRequested { .. } => {
                app_handle.state::<ShellState>().mark_quitting();
            }
            #[cfg(target_os = "macos")]
            RunEvent::Reopen {
                has_visible_windows,
                ..
            } => {
                if !has_visible_windows {
                    dispatch_lifecycle_signal(app_handle, LifecycleSignal::Activate);
                }
            }
            RunEvent::Exit => {
                let state = app_handle.state::<ShellState>();
                state.mark_quitting();
                if state.backend.is_running() {
                    state.backend.stop();
                    append_shutdown_log("backend process stopped");
                }
                append_shutdown_log("desktop process exiting");
            }
            _ => {}
        });
}
