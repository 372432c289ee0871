use serde::Serialize;
use thiserror::Error;

use crate::{
    DOCUMENT_MODE, DOCUMENT_SCRIPT_PATH, MAIN_DOCUMENT_PATH, MAIN_WINDOW_HEIGHT,
    MAIN_WINDOW_LABEL, MAIN_WINDOW_TITLE, MAIN_WINDOW_WIDTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleState {
    NoWindow,
    WindowOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleSignal {
    Ready,
    WindowClosed,
    AllWindowsClosed,
    Activate,
}

/// What the process does once its last window is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuitPolicy {
    TerminateOnLastWindowClosed,
    StayResident,
}

impl QuitPolicy {
    pub(crate) fn for_current_platform() -> Self {
        Self::for_target_os(std::env::consts::OS)
    }

    pub(crate) fn for_target_os(target_os: &str) -> Self {
        if target_os == "macos" {
            Self::StayResident
        } else {
            Self::TerminateOnLastWindowClosed
        }
    }
}

/// Options handed to the rendering surface together with the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DocumentLoadOptions {
    pub(crate) mode: String,
    pub(crate) script_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WindowSpec {
    pub(crate) label: String,
    pub(crate) title: String,
    pub(crate) width: f64,
    pub(crate) height: f64,
    pub(crate) document_path: String,
    pub(crate) load_options: DocumentLoadOptions,
}

impl WindowSpec {
    pub(crate) fn main_window() -> Self {
        Self {
            label: MAIN_WINDOW_LABEL.to_string(),
            title: MAIN_WINDOW_TITLE.to_string(),
            width: MAIN_WINDOW_WIDTH,
            height: MAIN_WINDOW_HEIGHT,
            document_path: MAIN_DOCUMENT_PATH.to_string(),
            load_options: DocumentLoadOptions {
                mode: DOCUMENT_MODE.to_string(),
                script_path: DOCUMENT_SCRIPT_PATH.to_string(),
            },
        }
    }
}

/// Platform side of the lifecycle: opens windows and ends the process.
pub(crate) trait WindowHost {
    type Window;

    /// Creates a visible window sized per `spec` and loads `spec.document_path`
    /// into it.
    fn open_window(&mut self, spec: &WindowSpec) -> Result<Self::Window, String>;

    fn request_quit(&mut self);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum LifecycleError {
    #[error("failed to create window '{label}': {reason}")]
    WindowCreation { label: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleOutcome {
    WindowCreated,
    WindowCleared,
    QuitRequested,
    StayedResident,
    Ignored,
}

pub(crate) struct LifecycleController<W> {
    quit_policy: QuitPolicy,
    spec: WindowSpec,
    window: Option<W>,
    quit_requested: bool,
    log: fn(&str),
}

impl<W> LifecycleController<W> {
    pub(crate) fn new(quit_policy: QuitPolicy, spec: WindowSpec, log: fn(&str)) -> Self {
        Self {
            quit_policy,
            spec,
            window: None,
            quit_requested: false,
            log,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        if self.window.is_some() {
            LifecycleState::WindowOpen
        } else {
            LifecycleState::NoWindow
        }
    }

    pub(crate) fn handle_signal<H>(
        &mut self,
        host: &mut H,
        signal: LifecycleSignal,
    ) -> Result<LifecycleOutcome, LifecycleError>
    where
        H: WindowHost<Window = W>,
    {
        let state = self.state();
        let outcome = match (signal, state) {
            (LifecycleSignal::Ready | LifecycleSignal::Activate, LifecycleState::NoWindow) => {
                self.open_window(host)?
            }
            (LifecycleSignal::WindowClosed, LifecycleState::WindowOpen) => {
                self.window = None;
                LifecycleOutcome::WindowCleared
            }
            (LifecycleSignal::AllWindowsClosed, _) => match self.quit_policy {
                QuitPolicy::StayResident => LifecycleOutcome::StayedResident,
                QuitPolicy::TerminateOnLastWindowClosed if self.quit_requested => {
                    LifecycleOutcome::Ignored
                }
                QuitPolicy::TerminateOnLastWindowClosed => {
                    self.quit_requested = true;
                    host.request_quit();
                    LifecycleOutcome::QuitRequested
                }
            },
            _ => LifecycleOutcome::Ignored,
        };

        (self.log)(&format!(
            "lifecycle {signal:?}: {state:?} -> {:?} ({outcome:?})",
            self.state()
        ));
        Ok(outcome)
    }

    fn open_window<H>(&mut self, host: &mut H) -> Result<LifecycleOutcome, LifecycleError>
    where
        H: WindowHost<Window = W>,
    {
        let window = host.open_window(&self.spec).map_err(|reason| {
            (self.log)(&format!(
                "window creation for '{}' failed: {reason}",
                self.spec.label
            ));
            LifecycleError::WindowCreation {
                label: self.spec.label.clone(),
                reason,
            }
        })?;
        self.window = Some(window);
        Ok(LifecycleOutcome::WindowCreated)
    }
}
