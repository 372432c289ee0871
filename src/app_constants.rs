pub(crate) const DEFAULT_BACKEND_ENDPOINT: &str = "tcp://127.0.0.1:4242";
pub(crate) const BACKEND_ENDPOINT_ENV: &str = "HYMN_BACKEND_ENDPOINT";
pub(crate) const RPC_TIMEOUT_ENV: &str = "HYMN_RPC_TIMEOUT_MS";
pub(crate) const BACKEND_TIMEOUT_ENV: &str = "HYMN_BACKEND_TIMEOUT_MS";
pub(crate) const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 20_000;
pub(crate) const BACKEND_CMD_ENV: &str = "HYMN_BACKEND_CMD";
pub(crate) const BACKEND_CWD_ENV: &str = "HYMN_BACKEND_CWD";
pub(crate) const ROOT_DIR_ENV: &str = "HYMN_ROOT";

pub(crate) const STARTUP_PROCEDURE: &str = "hello";
pub(crate) const STARTUP_ARGUMENT: &str = "RPC";

pub(crate) const MAIN_WINDOW_LABEL: &str = "main";
pub(crate) const MAIN_WINDOW_TITLE: &str = "Hymn";
pub(crate) const MAIN_WINDOW_WIDTH: f64 = 800.0;
pub(crate) const MAIN_WINDOW_HEIGHT: f64 = 600.0;
pub(crate) const MAIN_DOCUMENT_PATH: &str = "index.html";
pub(crate) const DOCUMENT_MODE: &str = "text";
pub(crate) const DOCUMENT_SCRIPT_PATH: &str = "./";

pub(crate) const DESKTOP_LOG_FILE: &str = "desktop.log";
pub(crate) const BACKEND_LOG_FILE: &str = "backend.log";
