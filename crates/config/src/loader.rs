//! Layered configuration loading.
//!
//! Lowest to highest precedence:
//!
//! 1. built-in defaults ([`Config::default()`]),
//! 2. the user configuration, `<config dir>/config.json`,
//! 3. the repository configuration, kept per work directory under
//!    `<config dir>/repos/` (see [`repo_config_path()`]),
//! 4. `HOARD_*` environment variables, nested keys separated by `__`
//!    (`HOARD_S3__REGION` sets `s3.region`).
//!
//! Missing files are skipped. Nothing is read from inside the work
//! directory, so the configuration is never part of a snapshot.

use crate::error::{ErrorKind, Result};
use crate::model::Config;
use directories::ProjectDirs;
use exn::OptionExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use std::path::{Component, Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
/// Directory under the user configuration directory holding one
/// configuration per work directory.
pub const REPOS_DIR: &str = "repos";
pub const ENV_PREFIX: &str = "HOARD_";

/// Platform configuration directory for hoard, e.g. `~/.config/hoard` on Linux.
pub fn user_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "hoard").map(|dirs| dirs.config_dir().to_path_buf())
}

/// `<config_dir>/repos/<work_dir without its root>/config.json`.
///
/// `work_dir` should be absolute; `.` and `..` components are dropped.
///
/// ```
/// use hoard_config::repo_config_path;
/// use std::path::Path;
///
/// let path = repo_config_path(Path::new("/home/me/.config/hoard"), Path::new("/srv/photos"));
/// assert_eq!(path, Path::new("/home/me/.config/hoard/repos/srv/photos/config.json"));
/// ```
pub fn repo_config_path(config_dir: &Path, work_dir: &Path) -> PathBuf {
    let mut path = config_dir.join(REPOS_DIR);
    for component in work_dir.components() {
        match component {
            // `C:` becomes `C`
            Component::Prefix(prefix) => path.push(prefix.as_os_str().to_string_lossy().replace(':', "")),
            Component::Normal(part) => path.push(part),
            Component::RootDir | Component::CurDir | Component::ParentDir => {},
        }
    }
    path.join(CONFIG_FILE)
}

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    work_dir: PathBuf,
    user_config_dir: Option<PathBuf>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// A loader for `work_dir`, made absolute against the current directory.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            work_dir: std::path::absolute(&work_dir).unwrap_or(work_dir),
            user_config_dir: user_config_dir(),
            env_prefix: Some(ENV_PREFIX.to_string()),
        }
    }

    /// Read the user configuration from `dir` instead of the platform default.
    pub fn with_user_config_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.user_config_dir = dir;
        self
    }

    /// Read environment variables with this prefix; `None` ignores the
    /// environment entirely.
    pub fn with_env_prefix(mut self, prefix: Option<&str>) -> Self {
        self.env_prefix = prefix.map(str::to_string);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Where the repository configuration for this work directory lives.
    pub fn repo_config_path(&self) -> Result<PathBuf> {
        let config_dir = self.user_config_dir.as_deref().ok_or_raise(|| ErrorKind::NoConfigDir)?;
        Ok(repo_config_path(config_dir, &self.work_dir))
    }

    pub fn figment(&self) -> Figment {
        // `work_dir` is skipped when serializing, so it gets its own default.
        let mut figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Serialized::default("work_dir", &self.work_dir));
        if let Some(dir) = &self.user_config_dir {
            figment = figment
                .merge(Json::file(dir.join(CONFIG_FILE)))
                .merge(Json::file(repo_config_path(dir, &self.work_dir)));
        }
        if let Some(prefix) = &self.env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }
        figment
    }

    /// Merge every layer into a [`Config`]. Does not validate.
    pub fn load(&self) -> Result<Config> {
        let config: Config = self.figment().extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        tracing::debug!(
            work_dir = %self.work_dir.display(),
            repo_name = %config.repo_name,
            store = ?config.store,
            "loaded configuration"
        );
        Ok(config)
    }
}
