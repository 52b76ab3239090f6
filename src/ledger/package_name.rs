use std::path::Path;

use derive_more::{Deref, Display};
use snafu::{Snafu, ensure};

/// Key under which a package's ledger record is stored. Always a single,
/// plain file name.
#[derive(Debug, Clone, PartialEq, Eq, Display, Deref)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: impl Into<String>) -> Result<Self, PackageNameError> {
        let name = name.into();
        ensure!(
            !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0']),
            InvalidSnafu { name }
        );
        Ok(Self(name))
    }

    /// Derives the name from an archive path by dropping its extension,
    /// e.g. `dist/tools.spk` becomes `tools`.
    pub fn from_archive_path(path: &Path) -> Result<Self, PackageNameError> {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(stem)
    }
}

#[derive(Debug, Snafu)]
pub enum PackageNameError {
    #[snafu(display("'{}' is not a valid package name", name))]
    InvalidError { name: String },
}
