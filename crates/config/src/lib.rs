//! Configuration for hoard repositories.
//!
//! Loaded with [`ConfigLoader`] from layered JSON files and the environment,
//! checked with [`Config::validate()`], and written by `hoard init` with
//! [`Config::save()`].

pub mod error;
mod loader;
mod model;

pub use crate::loader::{CONFIG_FILE, ConfigLoader, ENV_PREFIX, REPOS_DIR, repo_config_path, user_config_dir};
pub use crate::model::{Config, S3Config, StoreKind};
