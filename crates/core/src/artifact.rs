//! Artifact kinds and records.
//!
//! Every artifact kind shares one record shape. What differs between kinds is
//! captured by the [`ArtifactKind`] descriptor: which table holds it, which
//! columns it has, and which columns form its natural key.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Kind of artifact produced by an Ethereum node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    BeaconState,
    BeaconBlock,
    BeaconBadBlock,
    BeaconBadBlob,
    ExecutionBlockTrace,
    ExecutionBadBlock,
}

use ArtifactField as F;

const BEACON_STATE_FIELDS: &[ArtifactField] = &[
    F::Id,
    F::Node,
    F::FetchedAt,
    F::Slot,
    F::Epoch,
    F::StateRoot,
    F::Location,
    F::Network,
    F::BeaconImplementation,
    F::BeaconVersion,
];

const BEACON_BLOCK_FIELDS: &[ArtifactField] = &[
    F::Id,
    F::Node,
    F::FetchedAt,
    F::Slot,
    F::Epoch,
    F::BlockRoot,
    F::Location,
    F::Network,
    F::BeaconImplementation,
    F::BeaconVersion,
];

const BEACON_BAD_BLOB_FIELDS: &[ArtifactField] = &[
    F::Id,
    F::Node,
    F::FetchedAt,
    F::Slot,
    F::Epoch,
    F::BlockRoot,
    F::BlobIndex,
    F::Location,
    F::Network,
    F::BeaconImplementation,
    F::BeaconVersion,
];

const EXECUTION_BLOCK_TRACE_FIELDS: &[ArtifactField] = &[
    F::Id,
    F::Node,
    F::FetchedAt,
    F::BlockHash,
    F::BlockNumber,
    F::Location,
    F::Network,
    F::ExecutionImplementation,
    F::ExecutionVersion,
];

const EXECUTION_BAD_BLOCK_FIELDS: &[ArtifactField] = &[
    F::Id,
    F::Node,
    F::FetchedAt,
    F::BlockHash,
    F::BlockNumber,
    F::BlockExtraData,
    F::Location,
    F::Network,
    F::ExecutionImplementation,
    F::ExecutionVersion,
];

impl ArtifactKind {
    /// All kinds, in sweep order.
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::BeaconState,
        ArtifactKind::BeaconBlock,
        ArtifactKind::BeaconBadBlock,
        ArtifactKind::BeaconBadBlob,
        ArtifactKind::ExecutionBlockTrace,
        ArtifactKind::ExecutionBadBlock,
    ];

    /// Snake-case name, also used as the table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeaconState => "beacon_state",
            Self::BeaconBlock => "beacon_block",
            Self::BeaconBadBlock => "beacon_bad_block",
            Self::BeaconBadBlob => "beacon_bad_blob",
            Self::ExecutionBlockTrace => "execution_block_trace",
            Self::ExecutionBadBlock => "execution_bad_block",
        }
    }

    /// Table holding rows of this kind.
    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    /// Kebab-case name used in REST paths.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::BeaconState => "beacon-state",
            Self::BeaconBlock => "beacon-block",
            Self::BeaconBadBlock => "beacon-bad-block",
            Self::BeaconBadBlob => "beacon-bad-blob",
            Self::ExecutionBlockTrace => "execution-block-trace",
            Self::ExecutionBadBlock => "execution-bad-block",
        }
    }

    /// Columns present on this kind's table.
    pub fn fields(&self) -> &'static [ArtifactField] {
        match self {
            Self::BeaconState => BEACON_STATE_FIELDS,
            Self::BeaconBlock | Self::BeaconBadBlock => BEACON_BLOCK_FIELDS,
            Self::BeaconBadBlob => BEACON_BAD_BLOB_FIELDS,
            Self::ExecutionBlockTrace => EXECUTION_BLOCK_TRACE_FIELDS,
            Self::ExecutionBadBlock => EXECUTION_BAD_BLOCK_FIELDS,
        }
    }

    /// Fields identifying one logical observation, used for create dedup.
    pub fn natural_key(&self) -> &'static [ArtifactField] {
        match self {
            Self::BeaconState => &[F::Network, F::Slot, F::StateRoot, F::Node],
            Self::BeaconBlock | Self::BeaconBadBlock => {
                &[F::Network, F::Slot, F::BlockRoot, F::Node]
            }
            Self::BeaconBadBlob => &[F::Network, F::Slot, F::BlockRoot, F::BlobIndex, F::Node],
            Self::ExecutionBlockTrace => &[F::Network, F::BlockHash, F::BlockNumber, F::Node],
            Self::ExecutionBadBlock => &[F::Network, F::BlockHash, F::Node],
        }
    }

    /// Fields a record of this kind must carry.
    pub fn required_fields(&self) -> &'static [ArtifactField] {
        match self {
            Self::BeaconState => &[F::Slot, F::Epoch, F::StateRoot],
            Self::BeaconBlock | Self::BeaconBadBlock => &[F::Slot, F::Epoch, F::BlockRoot],
            Self::BeaconBadBlob => &[F::Slot, F::Epoch, F::BlockRoot, F::BlobIndex],
            Self::ExecutionBlockTrace | Self::ExecutionBadBlock => {
                &[F::BlockHash, F::BlockNumber]
            }
        }
    }

    /// Whether this kind has the given column.
    pub fn supports(&self, field: ArtifactField) -> bool {
        self.fields().contains(&field)
    }

    /// Whether the artifact comes from a consensus-layer client.
    pub fn is_beacon(&self) -> bool {
        matches!(
            self,
            Self::BeaconState | Self::BeaconBlock | Self::BeaconBadBlock | Self::BeaconBadBlob
        )
    }

    /// File extension (with dot) used when the agent stores this kind.
    pub fn file_extension(&self) -> &'static str {
        if self.is_beacon() { ".ssz" } else { ".json" }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = Error;

    /// Accepts both the snake-case name and the kebab-case slug.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

/// A column on an artifact table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactField {
    Id,
    Node,
    FetchedAt,
    Slot,
    Epoch,
    StateRoot,
    BlockRoot,
    BlobIndex,
    BlockHash,
    BlockNumber,
    BlockExtraData,
    Location,
    Network,
    BeaconImplementation,
    BeaconVersion,
    ExecutionImplementation,
    ExecutionVersion,
}

impl ArtifactField {
    const ALL: [ArtifactField; 17] = [
        F::Id,
        F::Node,
        F::FetchedAt,
        F::Slot,
        F::Epoch,
        F::StateRoot,
        F::BlockRoot,
        F::BlobIndex,
        F::BlockHash,
        F::BlockNumber,
        F::BlockExtraData,
        F::Location,
        F::Network,
        F::BeaconImplementation,
        F::BeaconVersion,
        F::ExecutionImplementation,
        F::ExecutionVersion,
    ];

    /// SQL column name.
    pub fn column(&self) -> &'static str {
        match self {
            F::Id => "id",
            F::Node => "node",
            F::FetchedAt => "fetched_at",
            F::Slot => "slot",
            F::Epoch => "epoch",
            F::StateRoot => "state_root",
            F::BlockRoot => "block_root",
            F::BlobIndex => "blob_index",
            F::BlockHash => "block_hash",
            F::BlockNumber => "block_number",
            F::BlockExtraData => "block_extra_data",
            F::Location => "location",
            F::Network => "network",
            F::BeaconImplementation => "beacon_implementation",
            F::BeaconVersion => "beacon_version",
            F::ExecutionImplementation => "execution_implementation",
            F::ExecutionVersion => "execution_version",
        }
    }

    /// Whether the column is stored as a signed 64-bit integer.
    pub fn is_integer(&self) -> bool {
        matches!(self, F::Slot | F::Epoch | F::BlobIndex | F::BlockNumber)
    }

    /// Whether the column is a timestamp.
    pub fn is_timestamp(&self) -> bool {
        matches!(self, F::FetchedAt)
    }
}

impl fmt::Display for ArtifactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for ArtifactField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.column() == s)
            .ok_or_else(|| Error::UnknownField(s.to_string()))
    }
}

/// Artifact metadata as submitted for indexing.
///
/// Coordinates that a kind does not have must be left unset; see
/// [`ArtifactRecord::validate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Name of the node that produced the artifact.
    pub node: String,
    /// When the agent observed the artifact.
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    /// Object-store key holding the artifact bytes.
    pub location: String,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_extra_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon_implementation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_implementation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_version: Option<String>,
}

impl Default for ArtifactRecord {
    fn default() -> Self {
        Self {
            node: String::new(),
            fetched_at: OffsetDateTime::UNIX_EPOCH,
            location: String::new(),
            network: String::new(),
            slot: None,
            epoch: None,
            state_root: None,
            block_root: None,
            blob_index: None,
            block_hash: None,
            block_number: None,
            block_extra_data: None,
            beacon_implementation: None,
            beacon_version: None,
            execution_implementation: None,
            execution_version: None,
        }
    }
}

impl ArtifactRecord {
    /// Whether the optional column `field` is populated.
    pub fn has(&self, field: ArtifactField) -> bool {
        match field {
            F::Id => false,
            F::Node | F::FetchedAt | F::Location | F::Network => true,
            F::Slot => self.slot.is_some(),
            F::Epoch => self.epoch.is_some(),
            F::StateRoot => self.state_root.is_some(),
            F::BlockRoot => self.block_root.is_some(),
            F::BlobIndex => self.blob_index.is_some(),
            F::BlockHash => self.block_hash.is_some(),
            F::BlockNumber => self.block_number.is_some(),
            F::BlockExtraData => self.block_extra_data.is_some(),
            F::BeaconImplementation => self.beacon_implementation.is_some(),
            F::BeaconVersion => self.beacon_version.is_some(),
            F::ExecutionImplementation => self.execution_implementation.is_some(),
            F::ExecutionVersion => self.execution_version.is_some(),
        }
    }

    /// Check the record is well-formed for `kind`.
    ///
    /// Required coordinates must be present, columns the kind lacks must be
    /// absent, and integer coordinates must fit in a signed 64-bit column.
    pub fn validate(&self, kind: ArtifactKind) -> Result<()> {
        for (name, value) in [
            ("node", &self.node),
            ("location", &self.location),
            ("network", &self.network),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidArgument(format!("{name} is required")));
            }
        }
        validate_segment("node", &self.node)?;
        validate_segment("network", &self.network)?;

        for field in kind.required_fields() {
            if !self.has(*field) {
                return Err(Error::InvalidArgument(format!(
                    "{field} is required for {kind}"
                )));
            }
        }

        for field in ArtifactField::ALL {
            if self.has(field) && !kind.supports(field) {
                return Err(Error::UnsupportedField { kind, field });
            }
        }

        for root in [&self.state_root, &self.block_root, &self.block_hash]
            .into_iter()
            .flatten()
        {
            validate_segment("root", root)?;
        }

        for (field, value) in [
            (F::Slot, self.slot),
            (F::Epoch, self.epoch),
            (F::BlobIndex, self.blob_index),
            (F::BlockNumber, self.block_number),
        ] {
            if let Some(value) = value {
                to_i64(field, value)?;
            }
        }

        Ok(())
    }
}

/// An indexed artifact row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Opaque unique identifier assigned at create time.
    pub id: String,
    #[serde(flatten)]
    pub record: ArtifactRecord,
}

/// Convert an API-side unsigned coordinate to its stored signed form.
pub fn to_i64(field: ArtifactField, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::OutOfRange { field, value })
}

/// Reject values that would break out of a location path segment.
fn validate_segment(name: &str, value: &str) -> Result<()> {
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(Error::InvalidArgument(format!(
            "{name} must be a single path segment: {value:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon_state_record() -> ArtifactRecord {
        ArtifactRecord {
            node: "lighthouse-001".to_string(),
            fetched_at: OffsetDateTime::UNIX_EPOCH,
            location: "mainnet/beacon_state/lighthouse-001/100/0xabc.ssz".to_string(),
            network: "mainnet".to_string(),
            slot: Some(100),
            epoch: Some(3),
            state_root: Some("0xabc".to_string()),
            beacon_implementation: Some("lighthouse".to_string()),
            beacon_version: Some("v5.1.0".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn kind_parses_snake_and_kebab() {
        assert_eq!(
            "beacon_bad_blob".parse::<ArtifactKind>().unwrap(),
            ArtifactKind::BeaconBadBlob
        );
        assert_eq!(
            "execution-block-trace".parse::<ArtifactKind>().unwrap(),
            ArtifactKind::ExecutionBlockTrace
        );
        assert!("beacon_blob".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn natural_key_fields_are_supported_by_kind() {
        for kind in ArtifactKind::ALL {
            for field in kind.natural_key() {
                assert!(kind.supports(*field), "{kind} natural key uses {field}");
            }
            for field in kind.required_fields() {
                assert!(kind.supports(*field), "{kind} requires {field}");
            }
        }
    }

    #[test]
    fn field_round_trips_through_column_name() {
        for field in ArtifactField::ALL {
            assert_eq!(field.column().parse::<ArtifactField>().unwrap(), field);
        }
    }

    #[test]
    fn validate_accepts_well_formed_record() {
        beacon_state_record()
            .validate(ArtifactKind::BeaconState)
            .unwrap();
    }

    #[test]
    fn validate_rejects_foreign_columns() {
        let mut record = beacon_state_record();
        record.block_hash = Some("0xdead".to_string());

        let err = record.validate(ArtifactKind::BeaconState).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedField {
                field: ArtifactField::BlockHash,
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_missing_coordinates() {
        let mut record = beacon_state_record();
        record.state_root = None;
        assert!(matches!(
            record.validate(ArtifactKind::BeaconState),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn validate_rejects_slot_above_i64() {
        let mut record = beacon_state_record();
        record.slot = Some(u64::MAX);
        assert!(matches!(
            record.validate(ArtifactKind::BeaconState),
            Err(Error::OutOfRange {
                field: ArtifactField::Slot,
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_path_segments() {
        let mut record = beacon_state_record();
        record.network = "main/net".to_string();
        assert!(record.validate(ArtifactKind::BeaconState).is_err());
    }

    #[test]
    fn artifact_serializes_flat() {
        let artifact = Artifact {
            id: "id-1".to_string(),
            record: beacon_state_record(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["id"], "id-1");
        assert_eq!(json["slot"], 100);
        assert_eq!(json["fetched_at"], "1970-01-01T00:00:00Z");
        assert!(json.get("block_hash").is_none());
    }
}
