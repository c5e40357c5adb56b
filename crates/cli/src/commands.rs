use crate::error::{ErrorKind, Result};
use clap::Args;
use exn::ResultExt;
use hoard_commit::{CommitSummary, Repository, UploadPipeline};
use hoard_config::{Config, ConfigLoader, StoreKind};
use hoard_snapshot::FileRecord;
use hoard_storage::BackendHandle;
use hoard_storage::backend::LocalBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Flags accepted by every subcommand; each one overrides the loaded
/// configuration when given.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Directory to back up [default: current directory]
    #[arg(short = 'w', long = "workdir", global = true)]
    pub work_dir: Option<PathBuf>,
    /// Concurrent uploads, 0 for one per CPU
    #[arg(long = "worker", global = true)]
    pub workers: Option<usize>,
    /// Expected number of files in the work directory
    #[arg(short = 'n', long = "maxfiles", global = true)]
    pub max_files: Option<usize>,
    /// Overwrite an existing repository configuration
    #[arg(short, long, global = true)]
    pub force: bool,
    /// Log every upload, and debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Read the user configuration from this directory
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,
}

impl GlobalArgs {
    fn work_dir(&self) -> Result<PathBuf> {
        let dir = self.work_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        Ok(std::path::absolute(dir).map_err(ErrorKind::Io)?)
    }

    fn loader(&self, work_dir: PathBuf) -> ConfigLoader {
        let loader = ConfigLoader::new(work_dir);
        match &self.config_dir {
            Some(dir) => loader.with_user_config_dir(Some(dir.clone())),
            None => loader,
        }
    }

    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(max_files) = self.max_files {
            config.max_files = max_files;
        }
        config.force |= self.force;
        config.verbose |= self.verbose;
    }
}

/// `hoard init`: write a fresh repository configuration.
///
/// A local store directory is saved as an absolute path, resolved against
/// the current directory.
pub fn init(args: &GlobalArgs, repo_name: String, bucket: String, local: bool) -> Result<PathBuf> {
    let mut config = Config::new(repo_name, bucket);
    if local {
        config.store = StoreKind::Local;
        let root = std::path::absolute(&config.bucket).map_err(ErrorKind::Io)?;
        config.bucket = root.to_string_lossy().into_owned();
    }
    args.apply(&mut config);
    config.work_dir = args.work_dir()?;
    if local {
        local_root(&config)?;
    }
    let path = args.loader(config.work_dir.clone()).repo_config_path().or_raise(|| ErrorKind::Config)?;
    config.save(&path).or_raise(|| ErrorKind::Config)?;
    Ok(path)
}

/// `hoard commit`: load the configuration and commit the work directory
/// against an empty previous snapshot.
pub async fn commit(args: &GlobalArgs, cancel: &CancellationToken) -> Result<CommitSummary> {
    let mut config = args.loader(args.work_dir()?).load().or_raise(|| ErrorKind::Config)?;
    args.apply(&mut config);
    config.work_dir = std::path::absolute(&config.work_dir).map_err(ErrorKind::Io)?;
    config.validate().or_raise(|| ErrorKind::Config)?;

    let store = open_store(&config).await?;
    let pipeline = UploadPipeline::new(store, &config.work_dir, &config.repo_name)
        .with_part_size(config.part_size)
        .with_max_workers(config.max_workers)
        .verbose(config.verbose);
    let previous: Vec<FileRecord> = Vec::new();
    Repository::new(pipeline)
        .with_capacity(config.max_files)
        .commit(cancel, &previous)
        .await
        .or_raise(|| ErrorKind::Commit)
}

async fn open_store(config: &Config) -> Result<BackendHandle> {
    match config.store {
        StoreKind::Local => {
            let root = local_root(config)?;
            let store = LocalBackend::new(config.bucket.as_str(), root).or_raise(|| ErrorKind::Store)?;
            Ok(Arc::new(store))
        },
        #[cfg(feature = "s3")]
        StoreKind::S3 => {
            use exn::OptionExt;
            use hoard_storage::backend::S3Backend;

            let s3 = &config.s3;
            let key_id = s3.key_id.clone().ok_or_raise(|| ErrorKind::Store)?;
            let key_secret = s3.key_secret.clone().ok_or_raise(|| ErrorKind::Store)?;
            let store = S3Backend::new(
                config.bucket.as_str(),
                config.bucket.as_str(),
                s3.prefix.clone(),
                s3.region.as_str(),
                s3.endpoint.clone(),
                key_id,
                key_secret,
            )
            .await
            .or_raise(|| ErrorKind::Store)?;
            Ok(Arc::new(store))
        },
        #[cfg(not(feature = "s3"))]
        StoreKind::S3 => exn::bail!(ErrorKind::Unsupported("s3")),
    }
}

/// The local store directory; it must not be inside the work directory,
/// or every commit would back up the store itself.
fn local_root(config: &Config) -> Result<PathBuf> {
    let root = std::path::absolute(Path::new(&config.bucket)).map_err(ErrorKind::Io)?;
    if root.starts_with(&config.work_dir) {
        exn::bail!(ErrorKind::StoreInsideWorkDir(root));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn args(work_dir: &Path, config_dir: &Path) -> GlobalArgs {
        GlobalArgs {
            work_dir: Some(work_dir.to_path_buf()),
            config_dir: Some(config_dir.to_path_buf()),
            ..GlobalArgs::default()
        }
    }

    #[test]
    fn test_init_writes_repository_config() {
        let work = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        let path = init(&args(work.path(), user.path()), "photos".into(), "bucket".into(), false).unwrap();
        assert_eq!(path, hoard_config::repo_config_path(user.path(), work.path()));
        assert!(!path.starts_with(work.path()));

        let err = init(&args(work.path(), user.path()), "photos".into(), "bucket".into(), false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config));

        let forced = GlobalArgs {
            force: true,
            ..args(work.path(), user.path())
        };
        init(&forced, "videos".into(), "bucket".into(), false).unwrap();
        let json = std::fs::read_to_string(path).unwrap();
        assert!(json.contains("videos"));
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::new("photos", "bucket");
        let args = GlobalArgs {
            workers: Some(7),
            max_files: Some(12),
            verbose: true,
            ..GlobalArgs::default()
        };
        args.apply(&mut config);
        assert_eq!(config.max_workers, 7);
        assert_eq!(config.max_files, 12);
        assert!(config.verbose);
        assert_eq!(config.work_dir, Path::new("."));
    }

    #[tokio::test]
    async fn test_commit_to_local_store() {
        let work = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("a.txt"), "alpha").unwrap();
        std::fs::create_dir(work.path().join("sub")).unwrap();
        std::fs::write(work.path().join("sub/b.txt"), "beta").unwrap();

        let args = args(work.path(), user.path());
        init(&args, "photos".into(), target.path().to_string_lossy().into_owned(), true).unwrap();
        let summary = commit(&args, &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.snapshot.len(), 2);
        assert_eq!(summary.uploads.len(), 2);
        for record in &summary.uploads {
            let object = target.path().join("objects").join(&record.fingerprint.storage_key);
            assert_eq!(std::fs::metadata(object).unwrap().len(), record.size);
        }
    }

    #[tokio::test]
    async fn test_commit_without_config() {
        let work = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        let err = commit(&args(work.path(), user.path()), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config));
    }

    #[test]
    fn test_init_saves_absolute_local_store() {
        let work = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        let args = args(work.path(), user.path());
        init(&args, "photos".into(), "backup".into(), true).unwrap();

        let config = args.loader(work.path().to_path_buf()).with_env_prefix(None).load().unwrap();
        assert_eq!(config.store, StoreKind::Local);
        assert_eq!(Path::new(&config.bucket), std::env::current_dir().unwrap().join("backup"));
    }

    #[test]
    fn test_store_inside_work_dir_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        let inside = work.path().join("backup").to_string_lossy().into_owned();
        let err = init(&args(work.path(), user.path()), "photos".into(), inside.clone(), true).unwrap_err();
        assert!(matches!(&*err, ErrorKind::StoreInsideWorkDir(_)));

        let config = Config {
            store: StoreKind::Local,
            work_dir: work.path().to_path_buf(),
            ..Config::new("photos", inside)
        };
        let err = local_root(&config).unwrap_err();
        assert!(matches!(&*err, ErrorKind::StoreInsideWorkDir(root) if root == &work.path().join("backup")));

        let elsewhere = tempfile::tempdir().unwrap();
        let config = Config {
            bucket: elsewhere.path().to_string_lossy().into_owned(),
            ..config
        };
        assert_eq!(local_root(&config).unwrap(), elsewhere.path());
    }
}
