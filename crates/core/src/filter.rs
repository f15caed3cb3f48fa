//! Filters, predicates and pagination for artifact queries.

use crate::artifact::{ArtifactField, ArtifactKind, ArtifactRecord, to_i64};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// A value bound into a SQL predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Timestamp(OffsetDateTime),
}

/// Comparison applied by a [`Predicate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    Gt,
    Le,
}

impl PredicateOp {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Gt => " > ",
            Self::Le => " <= ",
        }
    }
}

/// One `column <op> value` term of a conjunctive filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    pub field: ArtifactField,
    pub op: PredicateOp,
    pub value: FieldValue,
}

impl Predicate {
    fn eq(field: ArtifactField, value: FieldValue) -> Self {
        Self {
            field,
            op: PredicateOp::Eq,
            value,
        }
    }
}

/// Optional predicates over an artifact table, ANDed together.
///
/// Unset fields are omitted from the query rather than compared against a
/// zero value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Only rows fetched strictly after this instant.
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub after: Option<OffsetDateTime>,
    /// Only rows fetched at or before this instant.
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub before: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon_implementation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_implementation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_version: Option<String>,
}

impl ArtifactFilter {
    /// Filter matching the natural key of `record` for `kind`.
    pub fn natural_key(kind: ArtifactKind, record: &ArtifactRecord) -> Self {
        let mut filter = Self::default();
        for field in kind.natural_key() {
            match field {
                ArtifactField::Network => filter.network = Some(record.network.clone()),
                ArtifactField::Node => filter.node = Some(record.node.clone()),
                ArtifactField::Slot => filter.slot = record.slot,
                ArtifactField::StateRoot => filter.state_root = record.state_root.clone(),
                ArtifactField::BlockRoot => filter.block_root = record.block_root.clone(),
                ArtifactField::BlobIndex => filter.blob_index = record.blob_index,
                ArtifactField::BlockHash => filter.block_hash = record.block_hash.clone(),
                ArtifactField::BlockNumber => filter.block_number = record.block_number,
                _ => {}
            }
        }
        filter
    }

    /// Filter matching rows fetched at or before `cutoff`.
    pub fn fetched_at_or_before(cutoff: OffsetDateTime) -> Self {
        Self {
            before: Some(cutoff),
            ..Self::default()
        }
    }

    /// Whether no predicate is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reject predicates on columns `kind` does not have.
    pub fn validate(&self, kind: ArtifactKind) -> Result<()> {
        for predicate in self.predicates()? {
            if !kind.supports(predicate.field) {
                return Err(Error::UnsupportedField {
                    kind,
                    field: predicate.field,
                });
            }
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), and additionally require at least
    /// one predicate.
    pub fn validate_non_empty(&self, kind: ArtifactKind) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidArgument(
                "filter requires at least one predicate".to_string(),
            ));
        }
        self.validate(kind)
    }

    /// Flatten the set fields into SQL predicates.
    ///
    /// Fails if an integer coordinate does not fit the signed 64-bit column.
    pub fn predicates(&self) -> Result<Vec<Predicate>> {
        use ArtifactField as F;

        let mut out = Vec::new();
        let text = [
            (F::Id, &self.id),
            (F::Node, &self.node),
            (F::StateRoot, &self.state_root),
            (F::BlockRoot, &self.block_root),
            (F::BlockHash, &self.block_hash),
            (F::Location, &self.location),
            (F::Network, &self.network),
            (F::BeaconImplementation, &self.beacon_implementation),
            (F::BeaconVersion, &self.beacon_version),
            (F::ExecutionImplementation, &self.execution_implementation),
            (F::ExecutionVersion, &self.execution_version),
        ];
        for (field, value) in text {
            if let Some(value) = value {
                out.push(Predicate::eq(field, FieldValue::Text(value.clone())));
            }
        }

        let ints = [
            (F::Slot, self.slot),
            (F::Epoch, self.epoch),
            (F::BlobIndex, self.blob_index),
            (F::BlockNumber, self.block_number),
        ];
        for (field, value) in ints {
            if let Some(value) = value {
                out.push(Predicate::eq(field, FieldValue::Int(to_i64(field, value)?)));
            }
        }

        if let Some(after) = self.after {
            out.push(Predicate {
                field: F::FetchedAt,
                op: PredicateOp::Gt,
                value: FieldValue::Timestamp(after),
            });
        }
        if let Some(before) = self.before {
            out.push(Predicate {
                field: F::FetchedAt,
                op: PredicateOp::Le,
                value: FieldValue::Timestamp(before),
            });
        }

        Ok(out)
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Ordering clause such as `fetched_at DESC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderBy {
    pub field: ArtifactField,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: ArtifactField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: ArtifactField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

impl Default for OrderBy {
    fn default() -> Self {
        Self::asc(ArtifactField::FetchedAt)
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field.column(), self.direction.sql())
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| Error::InvalidOrderBy(s.to_string()))?
            .parse::<ArtifactField>()
            .map_err(|_| Error::InvalidOrderBy(s.to_string()))?;
        let direction = match parts.next().map(|d| d.to_ascii_uppercase()) {
            None => SortDirection::Asc,
            Some(d) if d == "ASC" => SortDirection::Asc,
            Some(d) if d == "DESC" => SortDirection::Desc,
            Some(_) => return Err(Error::InvalidOrderBy(s.to_string())),
        };
        if parts.next().is_some() {
            return Err(Error::InvalidOrderBy(s.to_string()));
        }
        Ok(Self { field, direction })
    }
}

impl TryFrom<String> for OrderBy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OrderBy> for String {
    fn from(value: OrderBy) -> Self {
        value.to_string()
    }
}

/// Offset/limit pagination. A `limit` of 0 means no limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            order_by: None,
        }
    }

    pub fn with_order(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    /// Effective ordering, defaulting to `fetched_at ASC`.
    pub fn order(&self) -> OrderBy {
        self.order_by.unwrap_or_default()
    }

    /// Check ordering and bounds against the columns of `kind`.
    pub fn validate(&self, kind: ArtifactKind) -> Result<()> {
        let order = self.order();
        if !kind.supports(order.field) {
            return Err(Error::UnsupportedField {
                kind,
                field: order.field,
            });
        }
        to_i64(ArtifactField::Id, self.offset)
            .map_err(|_| Error::InvalidArgument(format!("offset {} too large", self.offset)))?;
        to_i64(ArtifactField::Id, self.limit)
            .map_err(|_| Error::InvalidArgument(format!("limit {} too large", self.limit)))?;
        Ok(())
    }

    /// Require a non-zero limit no greater than `max`.
    pub fn require_limit(&self, max: u64) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::InvalidArgument("limit is required".to_string()));
        }
        if self.limit > max {
            return Err(Error::InvalidArgument(format!(
                "limit {} exceeds maximum {max}",
                self.limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn empty_filter_has_no_predicates() {
        let filter = ArtifactFilter::default();
        assert!(filter.is_empty());
        assert!(filter.predicates().unwrap().is_empty());
        assert!(filter.validate_non_empty(ArtifactKind::BeaconState).is_err());
        assert!(filter.validate(ArtifactKind::BeaconState).is_ok());
    }

    #[test]
    fn predicates_include_only_set_fields() {
        let filter = ArtifactFilter {
            network: Some("mainnet".to_string()),
            slot: Some(42),
            before: Some(datetime!(2024-01-01 00:00 UTC)),
            ..Default::default()
        };

        let predicates = filter.predicates().unwrap();
        assert_eq!(predicates.len(), 3);
        assert!(predicates.contains(&Predicate::eq(
            ArtifactField::Network,
            FieldValue::Text("mainnet".to_string())
        )));
        assert!(predicates.contains(&Predicate::eq(ArtifactField::Slot, FieldValue::Int(42))));
        assert!(predicates.iter().any(|p| p.field == ArtifactField::FetchedAt
            && p.op == PredicateOp::Le));
    }

    #[test]
    fn validate_rejects_columns_missing_from_kind() {
        let filter = ArtifactFilter {
            state_root: Some("0xabc".to_string()),
            ..Default::default()
        };
        assert!(filter.validate(ArtifactKind::BeaconState).is_ok());
        assert!(matches!(
            filter.validate(ArtifactKind::ExecutionBlockTrace),
            Err(Error::UnsupportedField { .. })
        ));
    }

    #[test]
    fn slot_above_i64_is_rejected_not_masked() {
        let filter = ArtifactFilter {
            slot: Some(i64::MAX as u64 + 1),
            ..Default::default()
        };
        assert!(matches!(
            filter.predicates(),
            Err(Error::OutOfRange {
                field: ArtifactField::Slot,
                ..
            })
        ));
    }

    #[test]
    fn natural_key_filter_for_blob_includes_index() {
        let record = ArtifactRecord {
            node: "prysm-1".to_string(),
            network: "holesky".to_string(),
            slot: Some(7),
            epoch: Some(0),
            block_root: Some("0xroot".to_string()),
            blob_index: Some(2),
            ..Default::default()
        };
        let filter = ArtifactFilter::natural_key(ArtifactKind::BeaconBadBlob, &record);
        assert_eq!(filter.blob_index, Some(2));
        assert_eq!(filter.node.as_deref(), Some("prysm-1"));
        assert_eq!(filter.epoch, None);
        assert!(filter.location.is_none());
    }

    #[test]
    fn order_by_parses_direction() {
        assert_eq!(
            "fetched_at DESC".parse::<OrderBy>().unwrap(),
            OrderBy::desc(ArtifactField::FetchedAt)
        );
        assert_eq!(
            "slot".parse::<OrderBy>().unwrap(),
            OrderBy::asc(ArtifactField::Slot)
        );
        assert_eq!(
            "slot desc".parse::<OrderBy>().unwrap(),
            OrderBy::desc(ArtifactField::Slot)
        );
        assert!("slot; DROP TABLE beacon_state".parse::<OrderBy>().is_err());
        assert!("unknown ASC".parse::<OrderBy>().is_err());
        assert!("slot sideways".parse::<OrderBy>().is_err());
    }

    #[test]
    fn pagination_deserializes_order_by_string() {
        let json = r#"{"offset":0,"limit":2,"order_by":"fetched_at DESC"}"#;
        let pagination: Pagination = serde_json::from_str(json).unwrap();
        assert_eq!(pagination.order(), OrderBy::desc(ArtifactField::FetchedAt));

        let bad = r#"{"limit":2,"order_by":"nope"}"#;
        assert!(serde_json::from_str::<Pagination>(bad).is_err());
    }

    #[test]
    fn pagination_validates_order_column_against_kind() {
        let pagination = Pagination::new(0, 10).with_order(OrderBy::asc(ArtifactField::Slot));
        assert!(pagination.validate(ArtifactKind::BeaconBlock).is_ok());
        assert!(pagination.validate(ArtifactKind::ExecutionBadBlock).is_err());
    }

    #[test]
    fn require_limit_bounds() {
        assert!(Pagination::new(0, 0).require_limit(1000).is_err());
        assert!(Pagination::new(0, 1001).require_limit(1000).is_err());
        assert!(Pagination::new(0, 1000).require_limit(1000).is_ok());
    }
}
