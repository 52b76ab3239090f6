use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::ext::BestEffortPathExt;
use crate::filetree::tree::{DIR_MARKER, ImpossibleState, Node, Tree, check_child};

/// Removes from `destination` exactly the entries `tree` describes.
///
/// Directories are removed only once they are empty, so content the tree does
/// not own (another package, user files) keeps its parent directories alive.
/// Entries that are already gone are skipped. A directory that turns out to be
/// a symlink is pruned through but the link itself is left alone.
pub fn prune(tree: &Tree, destination: &Path) -> Result<(), PruneError> {
    let Some(children) = tree.children() else {
        return Ok(());
    };

    for (key, child) in children {
        check_child(key, child).context(InconsistentTreeSnafu)?;
        let path = destination.join(child.name.trim_end_matches(DIR_MARKER));

        match child.node {
            Node::Dir { .. } => prune_dir(child, &path)?,
            Node::File { .. } | Node::SymLink { .. } => remove_entry(&path)?,
        }
    }

    Ok(())
}

fn prune_dir(tree: &Tree, path: &Path) -> Result<(), PruneError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!("Directory {} is already gone", path.display());
            return Ok(());
        }
        Err(err) => return Err(err).context(InspectSnafu { path }),
    };

    prune(tree, path)?;

    if metadata.file_type().is_symlink() {
        warn!("Keeping {}, it is a symlink and not owned by the package", path.display());
        return Ok(());
    }

    if !is_empty(path)? {
        warn!("Keeping non-empty directory {}", path.display());
        return Ok(());
    }

    debug!("Removing directory {}", path.display());
    fs::remove_dir(path).context(RemoveSnafu { path })
}

fn is_empty(path: &Path) -> Result<bool, PruneError> {
    let mut entries = fs::read_dir(path).context(InspectSnafu { path })?;
    Ok(entries.next().is_none())
}

fn remove_entry(path: &Path) -> Result<(), PruneError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!("{} is already gone", path.display());
            Ok(())
        }
        Err(err) => Err(err).context(RemoveSnafu { path }),
    }
}

#[derive(Debug, Snafu)]
pub enum PruneError {
    #[snafu(display("Refusing to prune an inconsistent tree"))]
    InconsistentTreeError { source: ImpossibleState },
    #[snafu(display("Failed to inspect {}", path.best_effort_path_display()))]
    InspectError { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to remove {}", path.display()))]
    RemoveError { path: PathBuf, source: io::Error },
}
