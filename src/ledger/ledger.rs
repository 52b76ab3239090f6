use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use compio::fs;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info};

use crate::ext::BestEffortPathExt;
use crate::filetree::{CodecError, Tree, decode, encode};
use crate::ledger::PackageName;

/// What was installed where.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LedgerRecord {
    pub destination: String,
    pub tree: Tree,
}

/// Directory holding one encoded [`LedgerRecord`] per installed package.
#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &PackageName) -> PathBuf {
        self.dir.join(name.as_str())
    }

    /// Only a missing record means "not installed", other failures surface.
    pub async fn is_installed(&self, name: &PackageName) -> Result<bool, LedgerError> {
        let path = self.record_path(name);
        match fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).context(ReadSnafu { path }),
        }
    }

    /// Stores the record for a package that is not installed yet.
    pub async fn write(
        &self,
        name: &PackageName,
        record: &LedgerRecord,
    ) -> Result<(), LedgerError> {
        ensure!(
            !self.is_installed(name).await?,
            AlreadyInstalledSnafu { name: name.clone() }
        );

        fs::create_dir_all(&self.dir).await.context(WriteSnafu {
            path: self.dir.clone(),
        })?;

        let bytes = encode(record).context(CodecSnafu { name: name.clone() })?;
        let path = self.record_path(name);
        debug!(
            "Writing ledger record of {} bytes to {}",
            bytes.len(),
            path.display()
        );
        fs::write(&path, bytes).await.0.context(WriteSnafu { path })?;

        info!("Recorded '{}' as installed", name);
        Ok(())
    }

    pub async fn read(&self, name: &PackageName) -> Result<LedgerRecord, LedgerError> {
        let path = self.record_path(name);
        debug!("Reading ledger record {}", path.display());

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return NotInstalledSnafu { name: name.clone() }.fail();
            }
            Err(err) => return Err(err).context(ReadSnafu { path }),
        };

        decode(&bytes).context(CodecSnafu { name: name.clone() })
    }

    pub async fn remove(&self, name: &PackageName) -> Result<(), LedgerError> {
        let path = self.record_path(name);

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Forgot ledger record of '{}'", name);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                NotInstalledSnafu { name: name.clone() }.fail()
            }
            Err(err) => Err(err).context(RemoveSnafu { path }),
        }
    }

    /// Names of all installed packages, sorted.
    pub async fn list(&self) -> Result<Vec<PackageName>, LedgerError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("Ledger directory {} does not exist yet", self.dir.display());
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).context(ReadSnafu {
                    path: self.dir.clone(),
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.context(ReadSnafu {
                path: self.dir.clone(),
            })?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            match PackageName::new(file_name) {
                Ok(name) => names.push(name),
                Err(err) => debug!("Skipping ledger entry: {}", err),
            }
        }

        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(names)
    }
}

#[derive(Debug, Snafu)]
pub enum LedgerError {
    #[snafu(display("Package '{}' is already installed", name))]
    AlreadyInstalledError { name: PackageName },
    #[snafu(display("Package '{}' is not installed", name))]
    NotInstalledError { name: PackageName },
    #[snafu(display("Failed to read ledger at {}", path.best_effort_path_display()))]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write ledger at {}", path.best_effort_path_display()))]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to remove ledger record {}", path.display()))]
    RemoveError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Ledger record of '{}' is unreadable", name))]
    CodecError { name: PackageName, source: CodecError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn name(value: &str) -> PackageName {
        PackageName::new(value).expect("Valid package name")
    }

    fn record() -> LedgerRecord {
        LedgerRecord {
            destination: "/srv/root".to_string(),
            tree: Tree::root(BTreeMap::from([(
                "a.txt".to_string(),
                Tree::file("a.txt", b"hi".to_vec(), 0o644),
            )])),
        }
    }

    #[compio::test]
    async fn ledger_round_trips_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path().join("var/lib/spm"));

        ledger
            .write(&name("tools"), &record())
            .await
            .expect("Failed to write record");

        assert!(ledger.is_installed(&name("tools")).await.expect("Failed to check"));
        let read = ledger.read(&name("tools")).await.expect("Failed to read");
        assert_eq!(read, record());
    }

    #[compio::test]
    async fn ledger_refuses_second_install() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path());
        ledger
            .write(&name("tools"), &record())
            .await
            .expect("Failed to write record");

        let result = ledger.write(&name("tools"), &record()).await;

        assert!(matches!(
            result,
            Err(LedgerError::AlreadyInstalledError { .. })
        ));
    }

    #[compio::test]
    async fn ledger_reports_missing_packages() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path());

        let read = ledger.read(&name("ghost")).await;
        let removed = ledger.remove(&name("ghost")).await;

        assert!(matches!(read, Err(LedgerError::NotInstalledError { .. })));
        assert!(matches!(
            removed,
            Err(LedgerError::NotInstalledError { .. })
        ));
    }

    #[compio::test]
    async fn ledger_lists_and_forgets_packages() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Ledger::new(temp_dir.path().join("ledger"));
        assert!(ledger.list().await.expect("Failed to list").is_empty());

        for package in ["zeta", "alpha"] {
            ledger
                .write(&name(package), &record())
                .await
                .expect("Failed to write record");
        }
        ledger.remove(&name("zeta")).await.expect("Failed to remove");

        let names = ledger.list().await.expect("Failed to list");
        assert_eq!(names, vec![name("alpha")]);
        assert!(!ledger.is_installed(&name("zeta")).await.expect("Failed to check"));
    }

    #[compio::test]
    async fn ledger_surfaces_lookup_failures_other_than_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let not_a_dir = temp_dir.path().join("ledger");
        std::fs::write(&not_a_dir, b"file in the way").expect("Failed to write");
        let ledger = Ledger::new(&not_a_dir);

        let installed = ledger.is_installed(&name("tools")).await;
        let written = ledger.write(&name("tools"), &record()).await;

        assert!(matches!(installed, Err(LedgerError::ReadError { .. })));
        assert!(matches!(written, Err(LedgerError::ReadError { .. })));
    }

    #[compio::test]
    async fn ledger_rejects_corrupt_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::write(temp_dir.path().join("broken"), b"garbage").expect("Failed to write");
        let ledger = Ledger::new(temp_dir.path());

        let result = ledger.read(&name("broken")).await;

        assert!(matches!(result, Err(LedgerError::CodecError { .. })));
    }
}
