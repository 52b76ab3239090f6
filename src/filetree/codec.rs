//! Self-describing byte format shared by package archives and ledger records.
//!
//! Layout: `MAGIC | checksum (u64 LE) | zstd(bincode(value))`. The checksum is
//! a MetroHash64 of the uncompressed payload.

use std::hash::Hasher;
use std::io::Read;

use bincode::{Decode, Encode, config::Config};
use metrohash::MetroHash64;
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

use crate::filetree::tree::{MAX_DEPTH, TOO_DEEP};

const MAGIC: [u8; 4] = *b"SPK\x01";
const CHECKSUM_LEN: usize = std::mem::size_of::<u64>();
const HEADER_LEN: usize = MAGIC.len() + CHECKSUM_LEN;
/// Upper bound on what a single decode may allocate
const DECODE_LIMIT: usize = 1 << 31;

fn bincode_config() -> impl Config {
    bincode::config::standard().with_limit::<DECODE_LIMIT>()
}

fn checksum(payload: &[u8]) -> u64 {
    let mut hasher = MetroHash64::default();
    hasher.write(payload);
    hasher.finish()
}

pub fn encode<T: Encode>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::encode_to_vec(value, bincode_config()).context(SerializeSnafu)?;
    frame(&payload)
}

pub fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T, CodecError> {
    let payload = unframe(bytes, DECODE_LIMIT)?;

    let (value, read) =
        bincode::decode_from_slice(&payload, bincode_config()).map_err(|source| match source {
            bincode::error::DecodeError::UnexpectedVariant {
                type_name, found, ..
            } => CodecError::UnknownNodeVariantError { type_name, found },
            bincode::error::DecodeError::Other(TOO_DEEP) => {
                CodecError::TooDeepError { limit: MAX_DEPTH }
            }
            source => CodecError::DeserializeError { source },
        })?;

    ensure!(
        read == payload.len(),
        TrailingBytesSnafu {
            count: payload.len() - read
        }
    );

    Ok(value)
}

fn frame(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let compressed =
        zstd::encode_all(payload, zstd::DEFAULT_COMPRESSION_LEVEL).context(CompressSnafu)?;
    debug!(
        "Encoded {} payload bytes into {} compressed bytes",
        payload.len(),
        compressed.len()
    );

    let mut bytes = Vec::with_capacity(HEADER_LEN + compressed.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&checksum(payload).to_le_bytes());
    bytes.extend_from_slice(&compressed);
    Ok(bytes)
}

/// Strips the header and decompresses at most `limit` payload bytes.
fn unframe(bytes: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    ensure!(bytes.len() >= HEADER_LEN, TruncatedSnafu { len: bytes.len() });

    let (magic, rest) = bytes.split_at(MAGIC.len());
    ensure!(magic == MAGIC, BadMagicSnafu);

    let (stored_checksum, compressed) = rest.split_at(CHECKSUM_LEN);
    let mut checksum_bytes = [0u8; CHECKSUM_LEN];
    checksum_bytes.copy_from_slice(stored_checksum);
    let expected = u64::from_le_bytes(checksum_bytes);

    let mut payload = Vec::new();
    zstd::stream::read::Decoder::new(compressed)
        .context(DecompressSnafu)?
        .take(limit as u64 + 1)
        .read_to_end(&mut payload)
        .context(DecompressSnafu)?;
    ensure!(payload.len() <= limit, PayloadTooLargeSnafu { limit });

    let actual = checksum(&payload);
    ensure!(actual == expected, ChecksumMismatchSnafu { expected, actual });

    Ok(payload)
}

#[derive(Debug, Snafu)]
pub enum CodecError {
    #[snafu(display("Failed to serialize value"))]
    SerializeError {
        source: bincode::error::EncodeError,
    },
    #[snafu(display("Failed to compress payload"))]
    CompressError { source: std::io::Error },
    #[snafu(display("Stream of {} bytes is too short to hold a header", len))]
    TruncatedError { len: usize },
    #[snafu(display("Stream is not a package archive or ledger record"))]
    BadMagicError,
    #[snafu(display("Failed to decompress payload"))]
    DecompressError { source: std::io::Error },
    #[snafu(display("Decompressed payload exceeds {} bytes", limit))]
    PayloadTooLargeError { limit: usize },
    #[snafu(display(
        "Payload checksum {:016x} does not match the stored {:016x}",
        actual,
        expected
    ))]
    ChecksumMismatchError { expected: u64, actual: u64 },
    #[snafu(display("Unknown variant {} of {}", found, type_name))]
    UnknownNodeVariantError { type_name: &'static str, found: u32 },
    #[snafu(display("Tree nests directories deeper than {} levels", limit))]
    TooDeepError { limit: usize },
    #[snafu(display("Failed to deserialize payload"))]
    DeserializeError {
        source: bincode::error::DecodeError,
    },
    #[snafu(display("Payload has {} unexpected trailing bytes", count))]
    TrailingBytesError { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filetree::scanner::scan;
    use crate::filetree::tree::{Node, Tree};
    use std::collections::BTreeMap;
    use std::fs;
    use std::os::unix::fs::{PermissionsExt, symlink};
    use tempfile::TempDir;

    fn scanned_tree() -> (TempDir, Tree) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("pkg");
        fs::create_dir_all(root.join("share/doc")).expect("Failed to create dirs");
        fs::create_dir_all(root.join("empty")).expect("Failed to create dirs");
        fs::write(root.join("share/doc/README"), "read me").expect("Failed to write");
        fs::write(root.join("bin"), [0u8, 159, 146, 150]).expect("Failed to write");
        fs::set_permissions(root.join("bin"), fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod");
        symlink("share/doc/README", root.join("README")).expect("Failed to symlink");

        let tree = scan(&root).expect("Failed to scan");
        (temp_dir, tree)
    }

    #[test]
    fn decode_of_encoded_scan_is_identical() {
        let (_temp_dir, tree) = scanned_tree();

        let bytes = encode(&tree).expect("Failed to encode");
        let decoded: Tree = decode(&bytes).expect("Failed to decode");

        assert_eq!(decoded, tree);
        assert!(decoded.children().expect("dir")["empty/"].is_dir());
    }

    #[test]
    fn encoded_stream_starts_with_magic() {
        let bytes = encode(&Tree::root(BTreeMap::new())).expect("Failed to encode");
        assert_eq!(&bytes[..4], b"SPK\x01");
    }

    #[test]
    fn decode_rejects_unknown_node_variant() {
        let tree = Tree::file("a", b"x".to_vec(), 0o644);
        let mut payload = bincode::encode_to_vec(&tree, bincode_config()).expect("encode");
        // name length, name byte, then the variant tag
        assert_eq!(payload[2], 0);
        payload[2] = 9;
        let bytes = frame(&payload).expect("Failed to frame");

        let result = decode::<Tree>(&bytes);

        assert!(matches!(
            result,
            Err(CodecError::UnknownNodeVariantError { found: 9, .. })
        ));
    }

    #[test]
    fn decode_rejects_truncated_streams() {
        let (_temp_dir, tree) = scanned_tree();
        let bytes = encode(&tree).expect("Failed to encode");

        for len in [0, 3, HEADER_LEN - 1, HEADER_LEN, bytes.len() - 1] {
            let result = decode::<Tree>(&bytes[..len]);
            assert!(result.is_err(), "Truncation to {len} bytes was accepted");
        }
    }

    #[test]
    fn decode_rejects_foreign_bytes() {
        let result = decode::<Tree>(b"definitely not an archive");
        assert!(matches!(result, Err(CodecError::BadMagicError)));
    }

    #[test]
    fn decode_detects_checksum_mismatch() {
        let mut bytes = encode(&Tree::file("a", b"x".to_vec(), 0o644)).expect("encode");
        bytes[MAGIC.len()] ^= 0xff;

        let result = decode::<Tree>(&bytes);

        assert!(matches!(
            result,
            Err(CodecError::ChecksumMismatchError { .. })
        ));
    }

    #[test]
    fn decode_rejects_trailing_payload_bytes() {
        let tree = Tree::symlink("l", "t");
        let mut payload = bincode::encode_to_vec(&tree, bincode_config()).expect("encode");
        payload.push(0);
        let bytes = frame(&payload).expect("Failed to frame");

        let result = decode::<Tree>(&bytes);

        assert!(matches!(
            result,
            Err(CodecError::TrailingBytesError { count: 1 })
        ));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let tree = Tree::file("a", b"content".to_vec(), 0o644);
        let payload = bincode::encode_to_vec(&tree, bincode_config()).expect("encode");
        let bytes = frame(&payload[..payload.len() - 3]).expect("Failed to frame");

        let result = decode::<Tree>(&bytes);

        assert!(matches!(result, Err(CodecError::DeserializeError { .. })));
    }

    /// Payload of a chain of `levels` directories all named `a/`.
    fn nested_dirs_payload(levels: usize) -> Vec<u8> {
        // name "a/", Dir tag, one child keyed "a/"
        let link = [2, b'a', b'/', 1, 1, 2, b'a', b'/'];
        let mut payload = link.repeat(levels - 1);
        // innermost: name "a/", Dir tag, no children
        payload.extend_from_slice(&[2, b'a', b'/', 1, 0]);
        payload
    }

    #[test]
    fn decode_accepts_nesting_up_to_the_depth_limit() {
        let bytes = frame(&nested_dirs_payload(MAX_DEPTH)).expect("Failed to frame");

        let decoded: Tree = decode(&bytes).expect("Failed to decode");

        assert_eq!(decoded.depth(), MAX_DEPTH);
    }

    #[test]
    fn decode_rejects_nesting_past_the_depth_limit() {
        let bytes = frame(&nested_dirs_payload(200_000)).expect("Failed to frame");

        let result = decode::<Tree>(&bytes);

        assert!(matches!(
            result,
            Err(CodecError::TooDeepError { limit: MAX_DEPTH })
        ));
        // the depth counter is released after a failed decode
        let shallow = encode(&Tree::root(BTreeMap::new())).expect("encode");
        assert!(decode::<Tree>(&shallow).is_ok());
    }

    #[test]
    fn unframe_stops_decompressing_at_the_limit() {
        let bytes = frame(&vec![0u8; 64 * 1024]).expect("Failed to frame");

        assert!(matches!(
            unframe(&bytes, 1024),
            Err(CodecError::PayloadTooLargeError { limit: 1024 })
        ));
        assert_eq!(unframe(&bytes, 64 * 1024).expect("Within limit").len(), 64 * 1024);
    }

    #[test]
    fn variant_payloads_survive_round_trip() {
        let tree = Tree::root(BTreeMap::from([
            (
                "f".to_string(),
                Tree {
                    name: "f".into(),
                    node: Node::File {
                        content: vec![1, 2, 3],
                        mode: 0o4755,
                    },
                },
            ),
            ("s".to_string(), Tree::symlink("s", "../f")),
        ]));

        let decoded: Tree = decode(&encode(&tree).expect("encode")).expect("decode");

        assert_eq!(decoded, tree);
    }
}
