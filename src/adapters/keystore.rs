//! Filesystem keystore importer.
//!
//! A keystore is a small JSON document:
//!
//! ```json
//! { "pubkey": "0xab..", "crypto": { "salt": "..", "checksum": ".." } }
//! ```
//!
//! `checksum` is the hex BLAKE3 digest of `salt || password`. Importing copies
//! the unlocked keystore into the keystore directory as `<target>.json` and
//! never overwrites an existing file there.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{INCORRECT_PASSWORD, KeyLoader, Preflight, Unlock, run_jobs};
use crate::config::AppConfig;
use crate::core::importer::{BatchChannels, BatchImporter, PasswordFileControl};
use crate::core::models::{ImportJob, ImportResult};

const KEYSTORE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub pubkey: String,
    pub crypto: KeystoreCrypto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreCrypto {
    pub salt: String,
    pub checksum: String,
}

impl KeystoreFile {
    /// Build a keystore that unlocks with `password`.
    pub fn new(pubkey: impl Into<String>, salt: impl Into<String>, password: &str) -> Self {
        let salt = salt.into();
        let checksum = password_checksum(&salt, password);
        Self {
            pubkey: pubkey.into(),
            crypto: KeystoreCrypto { salt, checksum },
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("file corrupted")
    }

    pub fn verify(&self, password: &str) -> bool {
        let Ok(expected) = blake3::Hash::from_hex(&self.crypto.checksum) else {
            return false;
        };
        // blake3::Hash compares in constant time.
        expected == checksum_hash(&self.crypto.salt, password)
    }
}

fn checksum_hash(salt: &str, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize()
}

pub fn password_checksum(salt: &str, password: &str) -> String {
    checksum_hash(salt, password).to_hex().to_string()
}

pub struct FsImporter {
    keystore_directory: PathBuf,
    password_extension: String,
    max_attempts: u32,
    password_files: AtomicBool,
}

impl FsImporter {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_options(
            config.keystore_directory.clone(),
            config.password_file_extension.clone(),
            config.max_password_attempts,
        )
    }

    pub fn with_options(
        keystore_directory: impl Into<PathBuf>,
        password_extension: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            keystore_directory: keystore_directory.into(),
            password_extension: password_extension.into(),
            max_attempts,
            password_files: AtomicBool::new(true),
        }
    }

    pub fn destination(&self, job: &ImportJob) -> PathBuf {
        self.keystore_directory
            .join(format!("{}.{KEYSTORE_EXTENSION}", job.target_name))
    }

    fn password_file(&self, job: &ImportJob) -> PathBuf {
        job.source.with_extension(&self.password_extension)
    }
}

fn is_keystore(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(KEYSTORE_EXTENSION))
}

#[async_trait]
impl BatchImporter for FsImporter {
    fn create_import_jobs_from_files(&self, paths: &[PathBuf]) -> Result<Vec<ImportJob>> {
        paths
            .iter()
            .map(|path| {
                if !is_keystore(path) {
                    bail!("{} is not a .{KEYSTORE_EXTENSION} keystore", path.display());
                }
                Ok(ImportJob::from_path(path.clone()))
            })
            .collect()
    }

    fn create_import_jobs_from_directory(&self, path: &Path) -> Result<Vec<ImportJob>> {
        let entries = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory {}", path.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list {}", path.display()))?;
            let file = entry.path();
            if entry.file_type()?.is_file() && is_keystore(&file) {
                files.push(file);
            }
        }
        files.sort();

        debug!(directory = %path.display(), keystores = files.len(), "Scanned directory");
        Ok(files.into_iter().map(ImportJob::from_path).collect())
    }

    fn validate_import_jobs(&self, jobs: &[ImportJob]) -> Result<()> {
        ensure!(!jobs.is_empty(), "no keystores to import");

        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for job in jobs {
            ensure!(
                sources.insert(&job.source),
                "duplicate keystore {}",
                job.source.display()
            );
            ensure!(
                targets.insert(&job.target_name),
                "duplicate target name {}",
                job.target_name
            );
            ensure!(
                job.source.is_file(),
                "keystore {} does not exist",
                job.source.display()
            );
        }
        Ok(())
    }

    async fn import_batch(
        &self,
        jobs: Vec<ImportJob>,
        channels: BatchChannels,
    ) -> Vec<ImportResult> {
        run_jobs(self, jobs, channels, self.max_attempts).await
    }

    fn password_files(&self) -> Option<&dyn PasswordFileControl> {
        Some(self)
    }
}

impl PasswordFileControl for FsImporter {
    fn set_password_files_enabled(&self, enabled: bool) {
        self.password_files.store(enabled, Ordering::Relaxed);
    }

    fn password_files_enabled(&self) -> bool {
        self.password_files.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyLoader for FsImporter {
    async fn preflight(&self, job: &ImportJob) -> Preflight {
        let source = job.source.clone();
        let destination = self.destination(job);
        let password_file = self
            .password_files_enabled()
            .then(|| self.password_file(job));

        // Run file reads in a blocking task
        let checked = tokio::task::spawn_blocking(move || -> Result<Option<String>, String> {
            let bytes = fs::read(&source).map_err(|e| format!("cannot read keystore: {e}"))?;
            KeystoreFile::parse(&bytes).map_err(|e| format!("{e:#}"))?;
            if destination.exists() {
                return Err("destination already exists".to_string());
            }
            Ok(password_file.and_then(|path| read_password_file(&path)))
        })
        .await;

        match checked {
            Ok(Ok(stored)) => Preflight::NeedsPassword { stored },
            Ok(Err(e)) => Preflight::Done(Err(e)),
            Err(e) => Preflight::Done(Err(format!("import task failed: {e}"))),
        }
    }

    async fn unlock(&self, job: &ImportJob, password: &str) -> Unlock {
        let source = job.source.clone();
        let destination = self.destination(job);
        let password = password.to_string();

        let unlocked =
            tokio::task::spawn_blocking(move || import_keystore(&source, &destination, &password))
                .await;

        match unlocked {
            Ok(outcome) => outcome,
            Err(e) => Unlock::Failed(format!("import task failed: {e}")),
        }
    }
}

fn read_password_file(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let password = content.trim_end_matches(['\r', '\n']);
    debug!(path = %path.display(), "Found password file");
    Some(password.to_string())
}

fn import_keystore(source: &Path, destination: &Path, password: &str) -> Unlock {
    let bytes = match fs::read(source) {
        Ok(bytes) => bytes,
        Err(e) => return Unlock::Failed(format!("cannot read keystore: {e}")),
    };
    let keystore = match KeystoreFile::parse(&bytes) {
        Ok(keystore) => keystore,
        Err(e) => return Unlock::Failed(format!("{e:#}")),
    };

    if !keystore.verify(password) {
        return Unlock::WrongPassword(INCORRECT_PASSWORD.to_string());
    }

    match write_new(destination, &bytes) {
        Ok(()) => Unlock::Imported,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Unlock::Failed("destination already exists".to_string())
        }
        Err(e) => Unlock::Failed(format!("cannot write {}: {e}", destination.display())),
    }
}

/// Write `bytes` to a file that must not exist yet.
fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handshake::{PasswordResponse, password_channels};
    use crate::core::progress::{Polled, progress_channel};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn write_keystore(dir: &Path, name: &str, password: &str) -> PathBuf {
        let path = dir.join(format!("{name}.json"));
        let keystore = KeystoreFile::new(format!("0x{name}"), format!("salt-{name}"), password);
        fs::write(&path, serde_json::to_vec(&keystore).unwrap()).unwrap();
        path
    }

    fn importer(dest: &TempDir) -> FsImporter {
        FsImporter::with_options(dest.path().join("keystores"), "pwd", 2)
    }

    fn batch_channels() -> (
        BatchChannels,
        crate::core::handshake::PasswordRequestReceiver,
        crate::core::handshake::PasswordResponder,
        crate::core::progress::ProgressReceiver,
    ) {
        let (progress, progress_rx) = progress_channel(256, Duration::from_millis(5));
        let (passwords, requests, responder) = password_channels();
        (
            BatchChannels {
                progress,
                passwords,
                cancel: CancellationToken::new(),
            },
            requests,
            responder,
            progress_rx,
        )
    }

    #[test]
    fn checksum_verifies_only_the_right_password() {
        let keystore = KeystoreFile::new("0x01", "salt", "hunter2");
        assert!(keystore.verify("hunter2"));
        assert!(!keystore.verify("hunter3"));
        assert_eq!(keystore.crypto.checksum, password_checksum("salt", "hunter2"));
    }

    #[test]
    fn directory_jobs_are_sorted_json_files_only() {
        let src = TempDir::new().unwrap();
        write_keystore(src.path(), "b", "pw");
        write_keystore(src.path(), "a", "pw");
        fs::write(src.path().join("a.pwd"), "pw").unwrap();
        fs::create_dir(src.path().join("nested.json")).unwrap();

        let dest = TempDir::new().unwrap();
        let jobs = importer(&dest)
            .create_import_jobs_from_directory(src.path())
            .unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.target_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn rejects_non_keystore_files() {
        let dest = TempDir::new().unwrap();
        let err = importer(&dest)
            .create_import_jobs_from_files(&[PathBuf::from("/keys/notes.txt")])
            .unwrap_err();
        assert!(err.to_string().contains("not a .json keystore"));
    }

    #[test]
    fn validation_catches_duplicates_and_missing_files() {
        let src = TempDir::new().unwrap();
        let a = write_keystore(src.path(), "a", "pw");
        let dest = TempDir::new().unwrap();
        let importer = importer(&dest);

        assert!(importer.validate_import_jobs(&[]).is_err());
        assert!(importer.validate_import_jobs(&[ImportJob::from_path(&a)]).is_ok());

        let dup = [ImportJob::from_path(&a), ImportJob::from_path(&a)];
        assert!(importer.validate_import_jobs(&dup).unwrap_err().to_string().contains("duplicate keystore"));

        let other_dir = src.path().join("other");
        fs::create_dir(&other_dir).unwrap();
        let a2 = write_keystore(&other_dir, "a", "pw");
        let clash = [ImportJob::from_path(&a), ImportJob::from_path(&a2)];
        assert!(importer.validate_import_jobs(&clash).unwrap_err().to_string().contains("duplicate target"));

        let missing = [ImportJob::from_path(src.path().join("missing.json"))];
        assert!(importer.validate_import_jobs(&missing).unwrap_err().to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn password_file_unlocks_without_prompting() {
        let src = TempDir::new().unwrap();
        let a = write_keystore(src.path(), "a", "from-file");
        fs::write(src.path().join("a.pwd"), "from-file\n").unwrap();

        let dest = TempDir::new().unwrap();
        let importer = importer(&dest);
        let (channels, mut requests, _responder, _progress) = batch_channels();

        let results = importer.import_batch(vec![ImportJob::from_path(&a)], channels).await;
        assert!(results[0].success, "{:?}", results[0].error);
        assert!(importer.destination(&results[0].job).exists());
        assert_eq!(requests.poll(Duration::from_millis(10)).await, Polled::Closed);
    }

    #[tokio::test]
    async fn disabled_password_files_fall_back_to_prompt() {
        let src = TempDir::new().unwrap();
        let a = write_keystore(src.path(), "a", "typed");
        fs::write(src.path().join("a.pwd"), "typed").unwrap();

        let dest = TempDir::new().unwrap();
        let importer = importer(&dest);
        importer.set_password_files_enabled(false);
        let (channels, mut requests, responder, _progress) = batch_channels();

        let job = ImportJob::from_path(&a);
        let batch = tokio::spawn(async move {
            let results = importer.import_batch(vec![job], channels).await;
            (importer, results)
        });

        let Polled::Item(request) = requests.poll(Duration::from_secs(1)).await else {
            panic!("expected a password prompt");
        };
        assert!(!request.retry);
        responder.try_respond(PasswordResponse::submit("typed")).unwrap();

        let (_importer, results) = batch.await.unwrap();
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn reports_corrupted_and_existing_destinations() {
        let src = TempDir::new().unwrap();
        let broken = src.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        let a = write_keystore(src.path(), "a", "pw");
        fs::write(src.path().join("a.pwd"), "pw").unwrap();

        let dest = TempDir::new().unwrap();
        let importer = importer(&dest);
        fs::create_dir_all(dest.path().join("keystores")).unwrap();
        fs::write(dest.path().join("keystores/a.json"), "{}").unwrap();

        let (channels, _requests, _responder, _progress) = batch_channels();
        let results = importer
            .import_batch(vec![ImportJob::from_path(&broken), ImportJob::from_path(&a)], channels)
            .await;

        assert!(results[0].error.as_deref().unwrap().starts_with("file corrupted"));
        assert_eq!(results[1].error.as_deref(), Some("destination already exists"));
        assert_eq!(fs::read_to_string(dest.path().join("keystores/a.json")).unwrap(), "{}");
    }
}
