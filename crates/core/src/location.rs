//! Deterministic object-store locations.

use crate::artifact::{ArtifactKind, ArtifactRecord};
use std::path::Path;

/// Prefix under which permanent copies live.
pub const PERMANENT_PREFIX: &str = "permanent";

/// Prefix under which agents publish their handshake tokens.
pub const HANDSHAKE_PREFIX: &str = "handshake";

/// Extension of `location` including the leading dot, or an empty string.
pub fn extension(location: &str) -> String {
    Path::new(location)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Durable location for a block: `permanent/<network>/<root><ext>`.
///
/// The extension is taken from the transient `source_location` so the copy
/// keeps its encoding suffix.
pub fn permanent_location(network: &str, block_root: &str, source_location: &str) -> String {
    format!(
        "{PERMANENT_PREFIX}/{network}/{block_root}{}",
        extension(source_location)
    )
}

/// Location of a node's handshake token.
pub fn handshake_location(node: &str) -> String {
    format!("{HANDSHAKE_PREFIX}/{node}")
}

/// Location an agent writes an artifact to:
/// `<network>/<kind>/<node>/<slot-or-number>/<identifier><ext>`.
///
/// Returns `None` when the record lacks the coordinates of its kind.
pub fn artifact_location(kind: ArtifactKind, record: &ArtifactRecord) -> Option<String> {
    let (coordinate, identifier) = match kind {
        ArtifactKind::BeaconState => (record.slot?, record.state_root.clone()?),
        ArtifactKind::BeaconBlock | ArtifactKind::BeaconBadBlock => {
            (record.slot?, record.block_root.clone()?)
        }
        ArtifactKind::BeaconBadBlob => (
            record.slot?,
            format!("{}-{}", record.block_root.as_deref()?, record.blob_index?),
        ),
        ArtifactKind::ExecutionBlockTrace | ArtifactKind::ExecutionBadBlock => {
            (record.block_number?, record.block_hash.clone()?)
        }
    };

    Some(format!(
        "{}/{}/{}/{}/{}{}",
        record.network,
        kind.as_str(),
        record.node,
        coordinate,
        identifier,
        kind.file_extension()
    ))
}
