//! SQL generation for artifact tables.
//!
//! One implementation serves every artifact kind and both backends: the kind
//! descriptor decides which columns exist, and [`Dialect`] covers the few
//! places where SQLite and PostgreSQL differ.

use crate::error::{MetadataError, MetadataResult};
use sqlx::{Database, Postgres, QueryBuilder, Sqlite};
use std::collections::{BTreeMap, BTreeSet};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracoor_core::artifact::to_i64;
use tracoor_core::{
    Artifact, ArtifactField, ArtifactFilter, ArtifactKind, FieldValue, Pagination,
};

/// Every column of [`ArtifactRow`](crate::models::ArtifactRow), in row order.
pub(crate) const ROW_COLUMNS: [ArtifactField; 17] = [
    ArtifactField::Id,
    ArtifactField::Node,
    ArtifactField::FetchedAt,
    ArtifactField::Location,
    ArtifactField::Network,
    ArtifactField::Slot,
    ArtifactField::Epoch,
    ArtifactField::StateRoot,
    ArtifactField::BlockRoot,
    ArtifactField::BlobIndex,
    ArtifactField::BlockHash,
    ArtifactField::BlockNumber,
    ArtifactField::BlockExtraData,
    ArtifactField::BeaconImplementation,
    ArtifactField::BeaconVersion,
    ArtifactField::ExecutionImplementation,
    ArtifactField::ExecutionVersion,
];

/// Backend-specific SQL details.
pub(crate) trait Dialect: Database + Sized {
    /// Clause allowing an OFFSET without a row limit.
    const UNBOUNDED_LIMIT: &'static str;

    /// Bind `value`, or push NULL when absent.
    fn push_value(qb: &mut QueryBuilder<'_, Self>, value: Option<FieldValue>)
    -> MetadataResult<()>;
}

impl Dialect for Sqlite {
    const UNBOUNDED_LIMIT: &'static str = " LIMIT -1";

    fn push_value(
        qb: &mut QueryBuilder<'_, Self>,
        value: Option<FieldValue>,
    ) -> MetadataResult<()> {
        match value {
            None => {
                qb.push("NULL");
            }
            Some(FieldValue::Text(v)) => {
                qb.push_bind(v);
            }
            Some(FieldValue::Int(v)) => {
                qb.push_bind(v);
            }
            Some(FieldValue::Timestamp(v)) => {
                qb.push_bind(sqlite_timestamp(v)?);
            }
        }
        Ok(())
    }
}

impl Dialect for Postgres {
    const UNBOUNDED_LIMIT: &'static str = "";

    fn push_value(
        qb: &mut QueryBuilder<'_, Self>,
        value: Option<FieldValue>,
    ) -> MetadataResult<()> {
        match value {
            None => {
                qb.push("NULL");
            }
            Some(FieldValue::Text(v)) => {
                qb.push_bind(v);
            }
            Some(FieldValue::Int(v)) => {
                qb.push_bind(v);
            }
            Some(FieldValue::Timestamp(v)) => {
                qb.push_bind(v);
            }
        }
        Ok(())
    }
}

/// Render a timestamp as fixed-width UTC text.
///
/// SQLite compares timestamps as strings, so every stored value must share
/// one width and offset for `<=`/`ORDER BY` to match chronological order.
pub(crate) fn sqlite_timestamp(ts: OffsetDateTime) -> MetadataResult<String> {
    ts.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
        ))
        .map_err(|e| MetadataError::Internal(format!("unencodable timestamp {ts}: {e}")))
}

fn select_expr(kind: ArtifactKind, field: ArtifactField) -> String {
    let column = field.column();
    if kind.supports(field) {
        column.to_string()
    } else if field.is_integer() {
        format!("CAST(NULL AS BIGINT) AS {column}")
    } else {
        format!("CAST(NULL AS TEXT) AS {column}")
    }
}

fn push_where<DB: Dialect>(
    qb: &mut QueryBuilder<'_, DB>,
    filter: &ArtifactFilter,
) -> MetadataResult<()> {
    qb.push(" WHERE deleted_at IS NULL");
    for predicate in filter.predicates()? {
        qb.push(" AND ");
        qb.push(predicate.field.column());
        qb.push(predicate.op.sql());
        DB::push_value(qb, Some(predicate.value))?;
    }
    Ok(())
}

/// `SELECT <row columns> FROM <table> WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
pub(crate) fn build_list<'args, DB: Dialect>(
    kind: ArtifactKind,
    filter: &ArtifactFilter,
    pagination: &Pagination,
) -> MetadataResult<QueryBuilder<'args, DB>>
where
    DB::Arguments<'args>: Default,
{
    filter.validate(kind)?;
    pagination.validate(kind)?;

    let columns: Vec<String> = ROW_COLUMNS.iter().map(|f| select_expr(kind, *f)).collect();
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        kind.table()
    ));
    push_where(&mut qb, filter)?;

    let order = pagination.order();
    qb.push(format!(
        " ORDER BY {col} {dir}, id {dir}",
        col = order.field.column(),
        dir = order.direction.sql()
    ));

    if pagination.limit > 0 {
        qb.push(" LIMIT ");
        DB::push_value(
            &mut qb,
            Some(FieldValue::Int(to_i64(ArtifactField::Id, pagination.limit)?)),
        )?;
    }
    if pagination.offset > 0 {
        if pagination.limit == 0 {
            qb.push(DB::UNBOUNDED_LIMIT);
        }
        qb.push(" OFFSET ");
        DB::push_value(
            &mut qb,
            Some(FieldValue::Int(to_i64(ArtifactField::Id, pagination.offset)?)),
        )?;
    }

    Ok(qb)
}

/// `SELECT COUNT(*) FROM <table> WHERE ...`; requires at least one predicate.
pub(crate) fn build_count<'args, DB: Dialect>(
    kind: ArtifactKind,
    filter: &ArtifactFilter,
) -> MetadataResult<QueryBuilder<'args, DB>>
where
    DB::Arguments<'args>: Default,
{
    filter.validate_non_empty(kind)?;
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", kind.table()));
    push_where(&mut qb, filter)?;
    Ok(qb)
}

/// Column value of `artifact`, converted to its stored form.
fn value_of(artifact: &Artifact, field: ArtifactField) -> MetadataResult<Option<FieldValue>> {
    let r = &artifact.record;
    let text = |v: &Option<String>| v.clone().map(FieldValue::Text);
    let int = |v: Option<u64>| -> MetadataResult<Option<FieldValue>> {
        Ok(v.map(|v| to_i64(field, v)).transpose()?.map(FieldValue::Int))
    };

    Ok(match field {
        ArtifactField::Id => Some(FieldValue::Text(artifact.id.clone())),
        ArtifactField::Node => Some(FieldValue::Text(r.node.clone())),
        ArtifactField::FetchedAt => Some(FieldValue::Timestamp(r.fetched_at)),
        ArtifactField::Location => Some(FieldValue::Text(r.location.clone())),
        ArtifactField::Network => Some(FieldValue::Text(r.network.clone())),
        ArtifactField::Slot => int(r.slot)?,
        ArtifactField::Epoch => int(r.epoch)?,
        ArtifactField::StateRoot => text(&r.state_root),
        ArtifactField::BlockRoot => text(&r.block_root),
        ArtifactField::BlobIndex => int(r.blob_index)?,
        ArtifactField::BlockHash => text(&r.block_hash),
        ArtifactField::BlockNumber => int(r.block_number)?,
        ArtifactField::BlockExtraData => text(&r.block_extra_data),
        ArtifactField::BeaconImplementation => text(&r.beacon_implementation),
        ArtifactField::BeaconVersion => text(&r.beacon_version),
        ArtifactField::ExecutionImplementation => text(&r.execution_implementation),
        ArtifactField::ExecutionVersion => text(&r.execution_version),
    })
}

/// `INSERT INTO <table> (<kind columns>) VALUES (...)`
pub(crate) fn build_insert<'args, DB: Dialect>(
    kind: ArtifactKind,
    artifact: &Artifact,
) -> MetadataResult<QueryBuilder<'args, DB>>
where
    DB::Arguments<'args>: Default,
{
    artifact.record.validate(kind)?;
    if artifact.id.is_empty() {
        return Err(tracoor_core::Error::InvalidArgument("id is required".to_string()).into());
    }

    let fields = kind.fields();
    let columns: Vec<&str> = fields.iter().map(|f| f.column()).collect();
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) VALUES (",
        kind.table(),
        columns.join(", ")
    ));
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        DB::push_value(&mut qb, value_of(artifact, *field)?)?;
    }
    qb.push(")");
    Ok(qb)
}

/// `UPDATE <table> SET ... WHERE id = ? AND deleted_at IS NULL`
pub(crate) fn build_update<'args, DB: Dialect>(
    kind: ArtifactKind,
    artifact: &Artifact,
) -> MetadataResult<QueryBuilder<'args, DB>>
where
    DB::Arguments<'args>: Default,
{
    artifact.record.validate(kind)?;

    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", kind.table()));
    let mut first = true;
    for field in kind.fields().iter().filter(|f| **f != ArtifactField::Id) {
        if !first {
            qb.push(", ");
        }
        first = false;
        qb.push(field.column());
        qb.push(" = ");
        DB::push_value(&mut qb, value_of(artifact, *field)?)?;
    }
    qb.push(" WHERE id = ");
    DB::push_value(&mut qb, Some(FieldValue::Text(artifact.id.clone())))?;
    qb.push(" AND deleted_at IS NULL");
    Ok(qb)
}

/// `UPDATE <table> SET deleted_at = now WHERE id = ? AND deleted_at IS NULL`
pub(crate) fn build_soft_delete<'args, DB: Dialect>(
    kind: ArtifactKind,
    id: &str,
    now: OffsetDateTime,
) -> MetadataResult<QueryBuilder<'args, DB>>
where
    DB::Arguments<'args>: Default,
{
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET deleted_at = ", kind.table()));
    DB::push_value(&mut qb, Some(FieldValue::Timestamp(now)))?;
    qb.push(" WHERE id = ");
    DB::push_value(&mut qb, Some(FieldValue::Text(id.to_string())))?;
    qb.push(" AND deleted_at IS NULL");
    Ok(qb)
}

/// Grouped scan over `fields`, each projected as text.
pub(crate) fn build_distinct<'args, DB: Dialect>(
    kind: ArtifactKind,
    fields: &[ArtifactField],
    scan_limit: u64,
) -> MetadataResult<QueryBuilder<'args, DB>>
where
    DB::Arguments<'args>: Default,
{
    if fields.is_empty() {
        return Err(
            tracoor_core::Error::InvalidArgument("at least one field is required".to_string())
                .into(),
        );
    }
    for field in fields {
        if !kind.supports(*field) {
            return Err(tracoor_core::Error::UnsupportedField {
                kind,
                field: *field,
            }
            .into());
        }
    }

    let projections: Vec<String> = fields
        .iter()
        .map(|f| format!("CAST({col} AS TEXT) AS {col}", col = f.column()))
        .collect();
    let group_by: Vec<&str> = fields.iter().map(|f| f.column()).collect();

    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM {} WHERE deleted_at IS NULL GROUP BY {} LIMIT ",
        projections.join(", "),
        kind.table(),
        group_by.join(", ")
    ));
    DB::push_value(
        &mut qb,
        Some(FieldValue::Int(to_i64(ArtifactField::Id, scan_limit)?)),
    )?;
    Ok(qb)
}

/// Fold grouped rows into a sorted, de-duplicated value set per field.
pub(crate) fn collect_distinct(
    fields: &[ArtifactField],
    rows: Vec<Vec<Option<String>>>,
) -> BTreeMap<ArtifactField, Vec<String>> {
    let mut sets: BTreeMap<ArtifactField, BTreeSet<String>> =
        fields.iter().map(|f| (*f, BTreeSet::new())).collect();
    for row in rows {
        for (field, value) in fields.iter().zip(row) {
            if let (Some(set), Some(value)) = (sets.get_mut(field), value) {
                set.insert(value);
            }
        }
    }
    sets.into_iter()
        .map(|(field, values)| (field, values.into_iter().collect()))
        .collect()
}
