use std::cell::Cell;
use std::collections::BTreeMap;

use bincode::de::Decoder;
use bincode::error::{AllowedEnumVariants, DecodeError};
use bincode::{Decode, Encode};
use derive_more::Display;
use snafu::{Snafu, ensure};

/// Trailing marker that distinguishes a directory name from a same-named file.
pub const DIR_MARKER: char = '/';

/// Name of the synthetic directory every built tree is rooted at.
pub const ROOT_NAME: &str = "/";

/// Only the permission part of a file mode is carried.
pub const PERMISSION_MASK: u32 = 0o7777;

/// Deepest chain of nested directories a tree may hold, the root included.
pub const MAX_DEPTH: usize = 256;

/// Decode failure raised once a stream nests directories past [`MAX_DEPTH`].
pub const TOO_DEEP: &str = "directory nesting exceeds the depth limit";

/// A captured filesystem entry and everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Tree {
    pub name: String,
    pub node: Node,
}

/// What a [`Tree`] entry represents. Children live on directories only.
#[derive(Debug, Clone, PartialEq, Eq, Encode)]
pub enum Node {
    File { content: Vec<u8>, mode: u32 },
    Dir { children: BTreeMap<String, Tree> },
    SymLink { target: String },
}

thread_local! {
    static DECODE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts the directories currently being decoded on this thread.
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, DecodeError> {
        let depth = DECODE_DEPTH.get() + 1;
        if depth > MAX_DEPTH {
            return Err(DecodeError::Other(TOO_DEEP));
        }
        DECODE_DEPTH.set(depth);
        Ok(Self)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DECODE_DEPTH.set(DECODE_DEPTH.get() - 1);
    }
}

// Same layout as the derived encoding, with directory nesting bounded.
impl<Context> Decode<Context> for Node {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        match <u32 as Decode<Context>>::decode(decoder)? {
            0 => Ok(Node::File {
                content: <Vec<u8> as Decode<Context>>::decode(decoder)?,
                mode: <u32 as Decode<Context>>::decode(decoder)?,
            }),
            1 => {
                let _guard = DepthGuard::enter()?;
                Ok(Node::Dir {
                    children: <BTreeMap<String, Tree> as Decode<Context>>::decode(decoder)?,
                })
            }
            2 => Ok(Node::SymLink {
                target: <String as Decode<Context>>::decode(decoder)?,
            }),
            found => Err(DecodeError::UnexpectedVariant {
                type_name: "Node",
                allowed: &AllowedEnumVariants::Range { min: 0, max: 2 },
                found,
            }),
        }
    }
}

bincode::impl_borrow_decode!(Node);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NodeKind {
    #[display("file")]
    File,
    #[display("directory")]
    Dir,
    #[display("symlink")]
    SymLink,
}

/// Appends the directory marker to `base` unless it already carries one.
pub fn dir_name(base: &str) -> String {
    if base.ends_with(DIR_MARKER) {
        base.to_string()
    } else {
        format!("{base}{DIR_MARKER}")
    }
}

impl Tree {
    pub fn file(name: impl Into<String>, content: Vec<u8>, mode: u32) -> Self {
        Self {
            name: name.into(),
            node: Node::File {
                content,
                mode: mode & PERMISSION_MASK,
            },
        }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: Node::SymLink {
                target: target.into(),
            },
        }
    }

    /// Creates a directory node, adding the marker to `name` if missing.
    pub fn dir(name: &str, children: BTreeMap<String, Tree>) -> Self {
        Self {
            name: dir_name(name),
            node: Node::Dir { children },
        }
    }

    pub fn root(children: BTreeMap<String, Tree>) -> Self {
        Self {
            name: ROOT_NAME.to_string(),
            node: Node::Dir { children },
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.node {
            Node::File { .. } => NodeKind::File,
            Node::Dir { .. } => NodeKind::Dir,
            Node::SymLink { .. } => NodeKind::SymLink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.node, Node::Dir { .. })
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Tree>> {
        match &self.node {
            Node::Dir { children } => Some(children),
            Node::File { .. } | Node::SymLink { .. } => None,
        }
    }

    /// Consumes the tree, yielding its children; leaves have none.
    pub fn into_children(self) -> BTreeMap<String, Tree> {
        match self.node {
            Node::Dir { children } => children,
            Node::File { .. } | Node::SymLink { .. } => BTreeMap::new(),
        }
    }

    /// Number of regular files anywhere below (and including) this node.
    pub fn file_count(&self) -> usize {
        match &self.node {
            Node::File { .. } => 1,
            Node::SymLink { .. } => 0,
            Node::Dir { children } => children.values().map(Tree::file_count).sum(),
        }
    }

    /// Number of directories on the longest chain from this node down.
    pub fn depth(&self) -> usize {
        match &self.node {
            Node::File { .. } | Node::SymLink { .. } => 0,
            Node::Dir { children } => 1 + children.values().map(Tree::depth).max().unwrap_or(0),
        }
    }

    /// Sum of all file content sizes in bytes.
    pub fn total_size(&self) -> u64 {
        match &self.node {
            Node::File { content, .. } => content.len() as u64,
            Node::SymLink { .. } => 0,
            Node::Dir { children } => children.values().map(Tree::total_size).sum(),
        }
    }
}

/// Checks that a child stored under `key` can safely be joined onto a
/// destination directory.
pub fn check_child(key: &str, child: &Tree) -> Result<(), ImpossibleState> {
    ensure!(
        key == child.name,
        ImpossibleStateSnafu {
            key,
            kind: child.kind(),
            reason: "key does not match the child's name",
        }
    );

    let base = match child.node {
        Node::Dir { .. } => child.name.strip_suffix(DIR_MARKER).ok_or_else(|| {
            ImpossibleStateSnafu {
                key,
                kind: child.kind(),
                reason: "directory name lacks the trailing marker",
            }
            .build()
        })?,
        Node::File { .. } | Node::SymLink { .. } => {
            ensure!(
                !child.name.ends_with(DIR_MARKER),
                ImpossibleStateSnafu {
                    key,
                    kind: child.kind(),
                    reason: "non-directory name carries the directory marker",
                }
            );
            child.name.as_str()
        }
    };

    ensure!(
        !base.is_empty() && base != "." && base != ".." && !base.contains(DIR_MARKER),
        ImpossibleStateSnafu {
            key,
            kind: child.kind(),
            reason: "name is not a single path component",
        }
    );

    Ok(())
}

#[derive(Debug, Snafu)]
#[snafu(display("Impossible tree state at {kind} '{key}': {reason}"))]
pub struct ImpossibleState {
    key: String,
    kind: NodeKind,
    reason: &'static str,
}
