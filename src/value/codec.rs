//! Encoding and decoding between [`Value`] and driver representations.
//!
//! The sqlx side is generic over [`sqlx::Database`]: one decode path shared
//! by Postgres, MySQL and SQLite, driven by the [`DbType`] tag table. The
//! SQL Server side maps [`tiberius::ColumnData`] structurally, so widths
//! come from the wire data itself.
//!
//! Decode failure semantics: an unsupported or unrecognized column type
//! fails the whole result set with `UnsupportedType`; a row is never
//! partially decoded. NULL cells decode to [`Value::Null`] before the type
//! tag is consulted, so a NULL in an unsupported column is still `Null`.

use std::borrow::Cow;

use sqlx::{Column, ColumnIndex, Database, Decode, Encode, Row as SqlxRow, Type, TypeInfo, ValueRef};
use tiberius::ColumnData;

use super::typemap::DbType;
use super::{NaiveDate, NaiveDateTime, NaiveTime, Row, Uuid, Value};
use crate::error::DbError;

/// Binds canonical values onto an sqlx query.
///
/// Integers bind through `i64` so a single generic path serves every sqlx
/// backend; the backend narrows them to the column type server-side. A
/// `UInt64` above `i64::MAX` has no portable representation and is rejected.
pub(crate) fn bind_all<'q, DB>(
    sql: &'q str,
    binds: &'q [Value],
) -> Result<sqlx::query::Query<'q, DB, <DB as Database>::Arguments<'q>>, DbError>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    Option<i64>: Encode<'q, DB> + Type<DB>,
    f32: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
    NaiveDateTime: Encode<'q, DB> + Type<DB>,
    NaiveDate: Encode<'q, DB> + Type<DB>,
    NaiveTime: Encode<'q, DB> + Type<DB>,
    Uuid: Encode<'q, DB> + Type<DB>,
    &'q serde_json::Value: Encode<'q, DB> + Type<DB>,
{
    let mut query = sqlx::query(sql);
    for bind in binds {
        query = match bind {
            Value::Null => query.bind(None::<i64>),
            Value::Bool(v) => query.bind(*v),
            Value::Int8(v) => query.bind(i64::from(*v)),
            Value::UInt8(v) => query.bind(i64::from(*v)),
            Value::Int16(v) => query.bind(i64::from(*v)),
            Value::UInt16(v) => query.bind(i64::from(*v)),
            Value::Int32(v) => query.bind(i64::from(*v)),
            Value::UInt32(v) => query.bind(i64::from(*v)),
            Value::Int64(v) => query.bind(*v),
            Value::UInt64(v) => query.bind(checked_u64(*v)?),
            Value::Float32(v) => query.bind(*v),
            Value::Float64(v) => query.bind(*v),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Timestamp(t) => query.bind(*t),
            Value::Date(d) => query.bind(*d),
            Value::Time(t) => query.bind(*t),
            Value::Uuid(u) => query.bind(*u),
            Value::Json(j) => query.bind(j),
        };
    }
    Ok(query)
}

fn checked_u64(v: u64) -> Result<i64, DbError> {
    i64::try_from(v)
        .map_err(|_| DbError::invalid("u64 bind parameter exceeds the signed 64-bit range"))
}

/// Rejects bind parameters the TDS encoder cannot represent faithfully.
///
/// Runs before dispatch because [`tiberius::ToSql::to_sql`] is infallible.
pub(crate) fn check_tds_binds(binds: &[Value]) -> Result<(), DbError> {
    for bind in binds {
        if let Value::UInt64(v) = bind {
            if i64::try_from(*v).is_err() {
                return Err(DbError::invalid(
                    "u64 bind parameter exceeds the signed 64-bit range",
                ));
            }
        }
    }
    Ok(())
}

impl tiberius::ToSql for Value {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Value::Null => ColumnData::I32(None),
            Value::Bool(v) => ColumnData::Bit(Some(*v)),
            Value::Int8(v) => ColumnData::I16(Some(i16::from(*v))),
            Value::UInt8(v) => ColumnData::U8(Some(*v)),
            Value::Int16(v) => ColumnData::I16(Some(*v)),
            Value::UInt16(v) => ColumnData::I32(Some(i32::from(*v))),
            Value::Int32(v) => ColumnData::I32(Some(*v)),
            Value::UInt32(v) => ColumnData::I64(Some(i64::from(*v))),
            Value::Int64(v) => ColumnData::I64(Some(*v)),
            // Out-of-range values are rejected by check_tds_binds before dispatch.
            Value::UInt64(v) => ColumnData::I64(Some(*v as i64)),
            Value::Float32(v) => ColumnData::F32(Some(*v)),
            Value::Float64(v) => ColumnData::F64(Some(*v)),
            Value::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Value::Bytes(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
            Value::Timestamp(t) => tiberius::ToSql::to_sql(t),
            Value::Date(d) => tiberius::ToSql::to_sql(d),
            Value::Time(t) => tiberius::ToSql::to_sql(t),
            Value::Uuid(u) => ColumnData::Guid(Some(*u)),
            Value::Json(j) => ColumnData::String(Some(Cow::Owned(j.to_string()))),
        }
    }
}

/// Decodes a batch of sqlx rows into canonical rows.
///
/// Column metadata is read once from the first row; sqlx guarantees a
/// uniform shape across a single result set.
pub(crate) fn decode_rows<'r, DB>(rows: &'r [DB::Row]) -> Result<Vec<Row>, DbError>
where
    DB: Database,
    usize: ColumnIndex<DB::Row>,
    i8: Decode<'r, DB>,
    i16: Decode<'r, DB>,
    i32: Decode<'r, DB>,
    i64: Decode<'r, DB>,
    f32: Decode<'r, DB>,
    f64: Decode<'r, DB>,
    bool: Decode<'r, DB>,
    &'r str: Decode<'r, DB>,
    &'r [u8]: Decode<'r, DB>,
    NaiveDate: Decode<'r, DB>,
    NaiveDateTime: Decode<'r, DB>,
    NaiveTime: Decode<'r, DB>,
    Uuid: Decode<'r, DB>,
    serde_json::Value: Decode<'r, DB>,
{
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns: Vec<(usize, String, DbType, String)> = first
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let tag = column.type_info().name().to_string();
            let db_type = DbType::from_name(&tag);
            (index, column.name().to_string(), db_type, tag)
        })
        .collect();

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut pairs = Vec::with_capacity(columns.len());
        for (index, name, db_type, tag) in &columns {
            let raw = row
                .try_get_raw(*index)
                .map_err(|e| DbError::backend(format!("column `{name}`: {e}")))?;

            if raw.is_null() {
                pairs.push((name.clone(), Value::Null));
                continue;
            }

            // A column-level tag of NULL or an unrecognized name can still
            // carry real data (SQLite expression columns report no decltype,
            // so `COUNT(*)` arrives tagged NULL). Refine through the
            // value-level type before giving up; a non-null cell never
            // decodes to `Value::Null`.
            let mut db_type = *db_type;
            let mut tag = Cow::Borrowed(tag.as_str());
            if matches!(db_type, DbType::Null | DbType::Unknown) {
                let value_tag = raw.type_info().name().to_string();
                db_type = DbType::from_name(&value_tag);
                tag = Cow::Owned(value_tag);
            }

            let value = match db_type {
                DbType::Int8 => Value::Int8(decode_cell::<DB, i8>(raw, name)?),
                DbType::UInt8 => Value::UInt8(decode_cell::<DB, i8>(raw, name)? as u8),
                DbType::Int16 => Value::Int16(decode_cell::<DB, i16>(raw, name)?),
                DbType::UInt16 => Value::UInt16(decode_cell::<DB, i16>(raw, name)? as u16),
                DbType::Int32 => Value::Int32(decode_cell::<DB, i32>(raw, name)?),
                DbType::UInt32 => Value::UInt32(decode_cell::<DB, i32>(raw, name)? as u32),
                DbType::Int64 => Value::Int64(decode_cell::<DB, i64>(raw, name)?),
                DbType::UInt64 => Value::UInt64(decode_cell::<DB, i64>(raw, name)? as u64),
                DbType::Float32 => Value::Float32(decode_cell::<DB, f32>(raw, name)?),
                DbType::Float64 => Value::Float64(decode_cell::<DB, f64>(raw, name)?),
                DbType::Bool => Value::Bool(decode_cell::<DB, bool>(raw, name)?),
                DbType::Text => Value::Text(decode_cell::<DB, &str>(raw, name)?.to_owned()),
                DbType::Bytes => Value::Bytes(decode_cell::<DB, &[u8]>(raw, name)?.to_vec()),
                DbType::Timestamp => {
                    Value::Timestamp(decode_cell::<DB, NaiveDateTime>(raw, name)?)
                }
                DbType::Date => Value::Date(decode_cell::<DB, NaiveDate>(raw, name)?),
                DbType::Time => Value::Time(decode_cell::<DB, NaiveTime>(raw, name)?),
                DbType::Uuid => Value::Uuid(decode_cell::<DB, Uuid>(raw, name)?),
                DbType::Json => match <serde_json::Value as Decode<DB>>::decode(raw) {
                    Ok(v) => Value::Json(v),
                    // Unparseable JSON degrades to raw text.
                    Err(_) => {
                        let raw = row
                            .try_get_raw(*index)
                            .map_err(|e| DbError::backend(format!("column `{name}`: {e}")))?;
                        Value::Text(decode_cell::<DB, &str>(raw, name)?.to_owned())
                    }
                },
                DbType::Null
                | DbType::UnsupportedDecimal
                | DbType::UnsupportedTimeWithTz
                | DbType::Unknown => {
                    return Err(DbError::unsupported(format!(
                        "column `{name}` has unsupported type `{tag}`"
                    )));
                }
            };
            pairs.push((name.clone(), value));
        }
        out.push(Row::from_pairs(pairs));
    }
    Ok(out)
}

fn decode_cell<'r, DB, T>(raw: <DB as Database>::ValueRef<'r>, name: &str) -> Result<T, DbError>
where
    DB: Database,
    T: Decode<'r, DB>,
{
    T::decode(raw).map_err(|e| DbError::backend(format!("column `{name}` decode error: {e}")))
}

/// Decodes a batch of SQL Server rows into canonical rows.
pub(crate) fn decode_tds_rows(rows: Vec<tiberius::Row>) -> Result<Vec<Row>, DbError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
        let mut pairs = Vec::with_capacity(names.len());
        for (name, cell) in names.into_iter().zip(row.into_iter()) {
            let value = decode_tds_cell(&name, cell)?;
            pairs.push((name, value));
        }
        out.push(Row::from_pairs(pairs));
    }
    Ok(out)
}

fn decode_tds_cell(name: &str, cell: ColumnData<'static>) -> Result<Value, DbError> {
    use ColumnData as C;

    let value = match cell {
        C::U8(v) => v.map(Value::UInt8).unwrap_or(Value::Null),
        C::I16(v) => v.map(Value::Int16).unwrap_or(Value::Null),
        C::I32(v) => v.map(Value::Int32).unwrap_or(Value::Null),
        C::I64(v) => v.map(Value::Int64).unwrap_or(Value::Null),
        C::F32(v) => v.map(Value::Float32).unwrap_or(Value::Null),
        C::F64(v) => v.map(Value::Float64).unwrap_or(Value::Null),
        C::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        C::String(v) => v
            .map(|s| Value::Text(s.into_owned()))
            .unwrap_or(Value::Null),
        C::Guid(v) => v.map(Value::Uuid).unwrap_or(Value::Null),
        C::Binary(v) => v
            .map(|b| Value::Bytes(b.into_owned()))
            .unwrap_or(Value::Null),
        C::Numeric(None) | C::Xml(None) | C::DateTimeOffset(None) => Value::Null,
        C::Numeric(Some(_)) => return Err(unsupported_tds(name, "NUMERIC")),
        C::Xml(Some(_)) => return Err(unsupported_tds(name, "XML")),
        C::DateTimeOffset(Some(_)) => return Err(unsupported_tds(name, "DATETIMEOFFSET")),
        cell @ (C::DateTime(_) | C::SmallDateTime(_) | C::DateTime2(_)) => {
            match tds_from_sql::<NaiveDateTime>(&cell, name)? {
                Some(dt) => Value::Timestamp(dt),
                None => Value::Null,
            }
        }
        cell @ C::Date(_) => match tds_from_sql::<NaiveDate>(&cell, name)? {
            Some(d) => Value::Date(d),
            None => Value::Null,
        },
        cell @ C::Time(_) => match tds_from_sql::<NaiveTime>(&cell, name)? {
            Some(t) => Value::Time(t),
            None => Value::Null,
        },
    };
    Ok(value)
}

fn unsupported_tds(name: &str, tag: &str) -> DbError {
    DbError::unsupported(format!("column `{name}` has unsupported type `{tag}`"))
}

fn tds_from_sql<'a, T: tiberius::FromSql<'a>>(
    cell: &'a ColumnData<'static>,
    name: &str,
) -> Result<Option<T>, DbError> {
    T::from_sql(cell).map_err(|e| DbError::backend(format!("column `{name}` decode error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tiberius::ToSql;

    #[test]
    fn tds_cells_preserve_width() {
        assert_eq!(
            decode_tds_cell("a", ColumnData::U8(Some(5))).unwrap(),
            Value::UInt8(5)
        );
        assert_eq!(
            decode_tds_cell("a", ColumnData::I16(Some(-7))).unwrap(),
            Value::Int16(-7)
        );
        assert_eq!(
            decode_tds_cell("a", ColumnData::F32(Some(1.5))).unwrap(),
            Value::Float32(1.5)
        );
    }

    #[test]
    fn tds_null_decodes_null_even_when_unsupported() {
        assert_eq!(
            decode_tds_cell("a", ColumnData::I32(None)).unwrap(),
            Value::Null
        );
        assert_eq!(
            decode_tds_cell("a", ColumnData::Numeric(None)).unwrap(),
            Value::Null
        );
        assert_eq!(
            decode_tds_cell("a", ColumnData::DateTimeOffset(None)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn tds_unsupported_types_error_with_tag() {
        let num = tiberius::numeric::Numeric::new_with_scale(12345, 2);
        let err = decode_tds_cell("price", ColumnData::Numeric(Some(num))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedType);
        assert!(err.message.contains("NUMERIC"));
        assert!(err.message.contains("price"));
    }

    /// Re-tags a temporal cell as `'static`. The temporal payloads own their
    /// data, so only the lifetime parameter changes.
    fn to_static(cell: ColumnData<'_>) -> ColumnData<'static> {
        match cell {
            ColumnData::DateTime2(v) => ColumnData::DateTime2(v),
            ColumnData::Date(v) => ColumnData::Date(v),
            ColumnData::Time(v) => ColumnData::Time(v),
            other => panic!("not a temporal cell: {other:?}"),
        }
    }

    #[test]
    fn tds_temporal_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 34, 56)
            .unwrap();
        let cell = to_static(Value::Timestamp(dt).to_sql());
        assert_eq!(decode_tds_cell("ts", cell).unwrap(), Value::Timestamp(dt));

        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let cell = to_static(Value::Date(d).to_sql());
        assert_eq!(decode_tds_cell("d", cell).unwrap(), Value::Date(d));

        let t = NaiveTime::from_hms_opt(23, 59, 58).unwrap();
        let cell = to_static(Value::Time(t).to_sql());
        assert_eq!(decode_tds_cell("t", cell).unwrap(), Value::Time(t));
    }

    #[test]
    fn tds_encode_scalar_shapes() {
        assert!(matches!(Value::Bool(true).to_sql(), ColumnData::Bit(Some(true))));
        assert!(matches!(Value::Int8(-3).to_sql(), ColumnData::I16(Some(-3))));
        assert!(matches!(Value::Null.to_sql(), ColumnData::I32(None)));
        assert!(matches!(
            Value::Json(serde_json::json!({"a": 1})).to_sql(),
            ColumnData::String(Some(_))
        ));
    }

    #[test]
    fn oversized_u64_binds_are_rejected() {
        let binds = vec![Value::UInt64(u64::MAX)];
        let err = check_tds_binds(&binds).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(checked_u64(u64::MAX).is_err());
        assert_eq!(checked_u64(42).unwrap(), 42);
    }
}
