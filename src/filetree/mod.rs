//! Capture, persist, replay and reverse filesystem subtrees.
//!
//! A [`Tree`] is built from real paths by the scanner, nested under an
//! absolute prefix, encoded into a self-describing stream, and later either
//! materialized onto a destination root or pruned back out of it.

mod codec;
mod materializer;
mod prefix;
mod pruner;
mod render;
mod scanner;
mod tree;

use std::path::Path;

use snafu::{ResultExt, Snafu, ensure};
use tracing::info;

pub use codec::{CodecError, decode, encode};
pub use materializer::{MaterializeError, materialize};
pub use prefix::{PrefixError, wrap};
pub use pruner::{PruneError, prune};
pub use render::human_size;
pub use scanner::{ScanError, scan_forest};
pub use tree::{MAX_DEPTH, Tree};

/// Captures `paths` and nests them under the absolute directory `prefix`.
///
/// The prefix is checked before anything is scanned. Trees nesting deeper than
/// [`MAX_DEPTH`] directories are refused, since they could not be decoded.
pub fn build<P: AsRef<Path>>(paths: &[P], prefix: &Path) -> Result<Tree, BuildError> {
    let segments = prefix::prefix_segments(prefix).context(PrefixSnafu)?;
    ensure!(
        segments.len() < MAX_DEPTH,
        TooDeepSnafu {
            depth: segments.len() + 1
        }
    );

    let forest = scan_forest(paths).context(ScanSnafu)?;
    info!(
        "Captured {} top-level entries under prefix {}",
        forest.len(),
        prefix.display()
    );

    let tree = wrap(forest, prefix).context(PrefixSnafu)?;
    let depth = tree.depth();
    ensure!(depth <= MAX_DEPTH, TooDeepSnafu { depth });

    Ok(tree)
}

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("Invalid destination prefix"))]
    PrefixError { source: PrefixError },
    #[snafu(display("Failed to capture input paths"))]
    ScanError { source: ScanError },
    #[snafu(display(
        "Tree nests {} directories, at most {} are supported",
        depth,
        MAX_DEPTH
    ))]
    TooDeepError { depth: usize },
}
