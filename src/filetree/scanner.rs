use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, warn};

use crate::ext::{BestEffortPathExt, relative_path};
use crate::filetree::tree::{DIR_MARKER, Tree};

/// Captures `path` and everything below it.
///
/// Symlinks are never followed; an absolute link target is rewritten relative
/// to the directory holding the link so the tree can be replayed elsewhere.
pub fn scan(path: &Path) -> Result<Tree, ScanError> {
    let metadata = fs::symlink_metadata(path).context(IoSnafu { path })?;
    let name = base_name(path)?;
    scan_entry(path, name, &metadata)
}

/// Scans every path and merges the results into one mapping of top-level
/// entries. Scanning `.`, `..` or `/` contributes that directory's entries
/// instead of the directory itself.
pub fn scan_forest<P: AsRef<Path>>(paths: &[P]) -> Result<BTreeMap<String, Tree>, ScanError> {
    let trees = paths
        .iter()
        .map(|path| scan(path.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(assemble_forest(trees))
}

/// Later trees overwrite earlier ones on name collisions.
pub fn assemble_forest(trees: impl IntoIterator<Item = Tree>) -> BTreeMap<String, Tree> {
    let mut forest = BTreeMap::new();

    let mut insert = |tree: Tree| {
        if let Some(previous) = forest.insert(tree.name.clone(), tree) {
            warn!(
                "Entry '{}' is captured more than once, keeping the last one",
                previous.name
            );
        }
    };

    for tree in trees {
        if tree.is_dir() && is_flattened(&tree.name) {
            debug!("Merging entries of '{}' into the forest root", tree.name);
            tree.into_children().into_values().for_each(&mut insert);
        } else {
            insert(tree);
        }
    }

    forest
}

fn is_flattened(name: &str) -> bool {
    matches!(name.trim_end_matches(DIR_MARKER), "" | "." | "..")
}

/// `components()` drops a trailing `.`, so `a/.` has to be spotted on the raw
/// bytes.
fn names_current_dir(path: &Path) -> bool {
    let bytes = path.as_os_str().as_bytes();
    let end = bytes
        .iter()
        .rposition(|&byte| byte != b'/')
        .map_or(0, |index| index + 1);
    let trimmed = &bytes[..end];

    trimmed == b"." || trimmed.ends_with(b"/.")
}

fn base_name(path: &Path) -> Result<String, ScanError> {
    if names_current_dir(path) {
        return Ok(".".to_string());
    }

    let name = match path.components().next_back() {
        Some(Component::Normal(name)) => name.to_str().context(NonUtf8PathSnafu { path })?,
        Some(Component::ParentDir) => "..",
        Some(Component::RootDir) => "/",
        Some(Component::CurDir) | Some(Component::Prefix(_)) | None => ".",
    };

    Ok(name.to_string())
}

fn scan_entry(path: &Path, name: String, metadata: &Metadata) -> Result<Tree, ScanError> {
    let file_type = metadata.file_type();

    if file_type.is_dir() {
        scan_dir(path, &name)
    } else if file_type.is_file() {
        scan_file(path, name, metadata)
    } else if file_type.is_symlink() {
        scan_symlink(path, name)
    } else {
        UnsupportedFileTypeSnafu {
            path,
            mode: metadata.mode(),
        }
        .fail()
    }
}

fn scan_dir(path: &Path, name: &str) -> Result<Tree, ScanError> {
    debug!("Scanning directory {}", path.display());

    let mut entries = fs::read_dir(path)
        .context(IoSnafu { path })?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .context(IoSnafu { path })?;
    entries.sort();

    let mut children = BTreeMap::new();
    for entry_path in entries {
        let metadata = fs::symlink_metadata(&entry_path).context(IoSnafu { path: &entry_path })?;
        let entry_name = base_name(&entry_path)?;

        let child = scan_entry(&entry_path, entry_name, &metadata)?;
        children.insert(child.name.clone(), child);
    }

    Ok(Tree::dir(name, children))
}

fn scan_file(path: &Path, name: String, metadata: &Metadata) -> Result<Tree, ScanError> {
    debug!("Capturing file {}", path.display());

    let content = fs::read(path).context(IoSnafu { path })?;
    Ok(Tree::file(name, content, metadata.permissions().mode()))
}

fn scan_symlink(path: &Path, name: String) -> Result<Tree, ScanError> {
    let mut target = fs::read_link(path).context(IoSnafu { path })?;

    if target.is_absolute() {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let containing_dir = std::path::absolute(parent).context(IoSnafu { path: parent })?;
        let relative = relative_path(&containing_dir, &target);
        debug!(
            "Rewriting absolute link target {} as {}",
            target.display(),
            relative.display()
        );
        target = relative;
    }

    let target = target
        .into_os_string()
        .into_string()
        .ok()
        .context(NonUtf8PathSnafu { path })?;

    Ok(Tree::symlink(name, target))
}

#[derive(Debug, Snafu)]
pub enum ScanError {
    #[snafu(display("Failed to read {}", path.best_effort_path_display()))]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "File mode {:o} of {} is unsupported",
        mode,
        path.best_effort_path_display()
    ))]
    UnsupportedFileTypeError { path: PathBuf, mode: u32 },
    #[snafu(display("Name or link target of {} is not valid UTF-8", path.display()))]
    NonUtf8PathError { path: PathBuf },
}
