use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::ext::BestEffortPathExt;
use crate::filetree::tree::{ImpossibleState, Node, Tree, check_child};

/// Writes the children of `tree` into `destination`, depth first.
///
/// Existing directories are reused. Stops at the first failure and leaves
/// whatever was already written in place.
pub fn materialize(tree: &Tree, destination: &Path) -> Result<(), MaterializeError> {
    let Some(children) = tree.children() else {
        return Ok(());
    };

    for (key, child) in children {
        check_child(key, child).context(InconsistentTreeSnafu)?;
        let path = destination.join(&child.name);

        match &child.node {
            Node::Dir { .. } => {
                create_dir(&path)?;
                materialize(child, &path)?;
            }
            Node::File { content, mode } => write_file(&path, content, *mode)?,
            Node::SymLink { target } => {
                debug!("Linking {} -> {}", path.display(), target);
                symlink(target, &path).context(SymlinkSnafu { path: &path })?;
            }
        }
    }

    Ok(())
}

fn create_dir(path: &Path) -> Result<(), MaterializeError> {
    match fs::create_dir(path) {
        Ok(()) => {
            debug!("Created directory {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {
            debug!("Reusing directory {}", path.display());
            Ok(())
        }
        Err(err) => Err(err).context(CreateDirSnafu { path }),
    }
}

fn write_file(path: &Path, content: &[u8], mode: u32) -> Result<(), MaterializeError> {
    debug!("Writing {} bytes to {}", content.len(), path.display());

    let mut file = File::create(path).context(WriteFileSnafu { path })?;
    file.write_all(content).context(WriteFileSnafu { path })?;
    file.set_permissions(fs::Permissions::from_mode(mode))
        .context(PermissionsSnafu { path })?;

    Ok(())
}

#[derive(Debug, Snafu)]
pub enum MaterializeError {
    #[snafu(display("Refusing to materialize an inconsistent tree"))]
    InconsistentTreeError { source: ImpossibleState },
    #[snafu(display("Failed to create directory {}", path.best_effort_path_display()))]
    CreateDirError { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to write file {}", path.best_effort_path_display()))]
    WriteFileError { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to set permissions of {}", path.best_effort_path_display()))]
    PermissionsError { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to create symlink {}", path.display()))]
    SymlinkError { path: PathBuf, source: io::Error },
}
