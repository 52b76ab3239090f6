use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use snafu::{Snafu, ensure};
use tracing::debug;

use crate::ext::normalize_path;
use crate::filetree::tree::Tree;

/// Nests `forest` under the directory chain spelled by `prefix` and roots the
/// result at `/`, so that materializing it onto a destination places the
/// forest at `destination + prefix`.
pub fn wrap(forest: BTreeMap<String, Tree>, prefix: &Path) -> Result<Tree, PrefixError> {
    let segments = prefix_segments(prefix)?;

    let children = segments.iter().rev().fold(forest, |children, segment| {
        let dir = Tree::dir(segment, children);
        BTreeMap::from([(dir.name.clone(), dir)])
    });

    Ok(Tree::root(children))
}

/// Splits an absolute directory prefix into its directory names, shallowest
/// first. A segment containing a dot, such as `pkg.tar` or `.hidden`, is taken
/// for a file name and rejected.
pub fn prefix_segments(prefix: &Path) -> Result<Vec<String>, PrefixError> {
    ensure!(
        prefix.is_absolute(),
        NotAbsoluteSnafu {
            prefix: prefix.to_path_buf()
        }
    );

    let normalized = normalize_path(prefix);
    let mut segments = Vec::new();
    for component in normalized.components() {
        let Component::Normal(segment) = component else {
            continue;
        };

        let segment = segment.to_str().ok_or_else(|| {
            NonUtf8Snafu {
                prefix: prefix.to_path_buf(),
            }
            .build()
        })?;

        // Any dot counts as an extension, dotfile names included
        ensure!(
            !segment.contains('.'),
            NotADirectorySnafu {
                prefix: prefix.to_path_buf(),
                segment,
            }
        );
        segments.push(segment.to_string());
    }

    debug!("Prefix {} has segments {:?}", prefix.display(), segments);
    Ok(segments)
}

#[derive(Debug, Snafu)]
pub enum PrefixError {
    #[snafu(display("Prefix {} must be absolute", prefix.display()))]
    NotAbsoluteError { prefix: PathBuf },
    #[snafu(display(
        "Prefix {} must contain only directories, '{}' looks like a file",
        prefix.display(),
        segment
    ))]
    NotADirectoryError { prefix: PathBuf, segment: String },
    #[snafu(display("Prefix {} is not valid UTF-8", prefix.display()))]
    NonUtf8Error { prefix: PathBuf },
}
