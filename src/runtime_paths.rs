use std::{
    env,
    path::{Path, PathBuf},
};

use crate::ROOT_DIR_ENV;

pub(crate) fn root_dir_from(
    override_value: Option<&str>,
    home_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(root) = override_value.map(str::trim).filter(|root| !root.is_empty()) {
        return Some(PathBuf::from(root));
    }
    home_dir.map(|home| home.join(".hymn"))
}

pub(crate) fn default_root_dir() -> Option<PathBuf> {
    root_dir_from(env::var(ROOT_DIR_ENV).ok().as_deref(), home::home_dir())
}

pub(crate) fn log_file_path(root_dir: Option<&Path>, file_name: &str) -> PathBuf {
    match root_dir {
        Some(root) => root.join("logs").join(file_name),
        None => env::temp_dir().join("hymn").join("logs").join(file_name),
    }
}
