use std::path::PathBuf;

use tauri::{AppHandle, WebviewUrl, WebviewWindow, WebviewWindowBuilder};

use crate::{
    append_shutdown_log,
    window_lifecycle::{DocumentLoadOptions, WindowHost, WindowSpec},
};

const LOAD_OPTIONS_GLOBAL: &str = "__HYMN_LOAD_OPTIONS__";

/// Script that exposes the load options to the document before it runs.
pub(crate) fn load_options_script(options: &DocumentLoadOptions) -> Result<String, String> {
    let serialized = serde_json::to_string(options)
        .map_err(|error| format!("Failed to serialize document load options: {error}"))?;
    Ok(format!(
        "window.{LOAD_OPTIONS_GLOBAL} = Object.freeze({serialized});"
    ))
}

/// Opens windows through the Tauri webview and quits through the app handle.
pub(crate) struct TauriWindowHost<'a> {
    app_handle: &'a AppHandle,
}

impl<'a> TauriWindowHost<'a> {
    pub(crate) fn new(app_handle: &'a AppHandle) -> Self {
        Self { app_handle }
    }
}

impl WindowHost for TauriWindowHost<'_> {
    type Window = WebviewWindow;

    fn open_window(&mut self, spec: &WindowSpec) -> Result<WebviewWindow, String> {
        let init_script = load_options_script(&spec.load_options)?;
        WebviewWindowBuilder::new(
            self.app_handle,
            spec.label.as_str(),
            WebviewUrl::App(PathBuf::from(&spec.document_path)),
        )
        .title(spec.title.as_str())
        .inner_size(spec.width, spec.height)
        .visible(true)
        .initialization_script(init_script.as_str())
        .build()
        .map_err(|error| format!("Failed to build window '{}': {error}", spec.label))
    }

    fn request_quit(&mut self) {
        append_shutdown_log("last window closed, exiting desktop process");
        self.app_handle.exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_options_script_exposes_frozen_camel_case_options() {
        let script = load_options_script(&WindowSpec::main_window().load_options)
            .expect("serialize options");
        assert_eq!(
            script,
            r#"window.__HYMN_LOAD_OPTIONS__ = Object.freeze({"mode":"text","scriptPath":"./"});"#
        );
    }
}
