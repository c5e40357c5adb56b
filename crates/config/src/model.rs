use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use hoard_hash::DEFAULT_PART_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which object store a repository is backed up to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// An S3-compatible bucket
    #[default]
    S3,
    /// A directory on a local or mounted filesystem; `bucket` is its path
    Local,
}

/// Connection settings for [`StoreKind::S3`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Key prefix inside the bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
}
impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            prefix: None,
            key_id: None,
            key_secret: None,
        }
    }
}

/// Repository configuration.
///
/// Every field has a default so that each layer only needs to set what it
/// changes; `repo_name` and `bucket` default to empty and are rejected by
/// [`validate()`](Self::validate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace mixed into every content hash
    pub repo_name: String,
    /// Target bucket, or target directory for [`StoreKind::Local`]
    pub bucket: String,
    pub store: StoreKind,
    /// Directory that gets snapshotted; never written by `save()`
    #[serde(skip_serializing)]
    pub work_dir: PathBuf,
    /// Expected number of files, used to pre-allocate the snapshot
    pub max_files: usize,
    /// Concurrent uploads; 0 means one per available CPU
    pub max_workers: usize,
    /// Multipart part size in bytes, and the single-upload threshold
    pub part_size: u64,
    /// Overwrite an existing repository configuration on save
    #[serde(skip_serializing)]
    pub force: bool,
    /// Log every upload at INFO
    pub verbose: bool,
    pub s3: S3Config,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            repo_name: String::new(),
            bucket: String::new(),
            store: StoreKind::default(),
            work_dir: PathBuf::from("."),
            max_files: 10_000,
            max_workers: 0,
            part_size: DEFAULT_PART_SIZE,
            force: false,
            verbose: false,
            s3: S3Config::default(),
        }
    }
}

impl Config {
    pub fn new(repo_name: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Reject configurations that cannot be committed with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| ErrorKind::Invalid(reason.to_string());
        if self.repo_name.is_empty() {
            exn::bail!(invalid("repo_name must be set"));
        }
        if self.repo_name.contains('\0') {
            exn::bail!(invalid("repo_name must not contain NUL"));
        }
        if self.bucket.is_empty() {
            exn::bail!(invalid("bucket must be set"));
        }
        if self.part_size == 0 {
            exn::bail!(invalid("part_size must be greater than zero"));
        }
        if self.store == StoreKind::S3 && (self.s3.key_id.is_none() || self.s3.key_secret.is_none()) {
            exn::bail!(invalid("s3.key_id and s3.key_secret must both be set"));
        }
        Ok(())
    }

    /// Write this configuration to `path` as pretty JSON, creating parent
    /// directories. Refuses to replace an existing file unless `force` is
    /// set.
    pub fn save(&self, path: &Path) -> Result<()> {
        if path.exists() && !self.force {
            exn::bail!(ErrorKind::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
        }
        let json = serde_json::to_string_pretty(self).or_raise(|| ErrorKind::Serialize)?;
        std::fs::write(path, json + "\n").map_err(ErrorKind::Io)?;
        tracing::info!(path = %path.display(), "wrote repository configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid() -> Config {
        let mut config = Config::new("photos", "backup-bucket");
        config.s3.key_id = Some("id".to_string());
        config.s3.key_secret = Some("secret".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.work_dir, Path::new("."));
        assert_eq!(config.max_files, 10_000);
        assert_eq!(config.max_workers, 0);
        assert_eq!(config.part_size, 104_857_600);
        assert_eq!(config.store, StoreKind::S3);
        assert_eq!(config.s3.region, "us-east-1");
        assert!(!config.force && !config.verbose);
    }

    #[test]
    fn test_valid() {
        valid().validate().unwrap();
        let local = Config {
            store: StoreKind::Local,
            ..Config::new("photos", "/mnt/backup")
        };
        local.validate().unwrap();
    }

    #[rstest]
    #[case::no_repo(Config { repo_name: String::new(), ..valid() })]
    #[case::nul_repo(Config { repo_name: "a\0b".to_string(), ..valid() })]
    #[case::no_bucket(Config { bucket: String::new(), ..valid() })]
    #[case::zero_part_size(Config { part_size: 0, ..valid() })]
    #[case::no_credentials(Config { s3: S3Config::default(), ..valid() })]
    fn test_invalid(#[case] config: Config) {
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_save_refuses_overwrite_without_force() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("repos/photos/config.json");
        let config = valid();
        config.save(&path).unwrap();
        assert!(path.is_file());

        let err = config.save(&path).unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(p) if p == &path));

        let forced = Config { force: true, ..config };
        forced.save(&path).unwrap();
    }

    #[test]
    fn test_saved_json_omits_force_and_unset_secrets() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        let config = Config {
            work_dir: temp_dir.path().to_path_buf(),
            force: true,
            ..Config::new("photos", "bucket")
        };
        config.save(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["repo_name"], "photos");
        assert_eq!(value["store"], "s3");
        assert!(value.get("force").is_none());
        assert!(value.get("work_dir").is_none());
        assert!(value["s3"].get("key_secret").is_none());
    }
}
