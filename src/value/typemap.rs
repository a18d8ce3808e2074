//! Backend type-name to canonical-variant mapping for the sqlx backends.
//!
//! sqlx reports column types by name (Postgres `INT2`, MySQL
//! `SMALLINT UNSIGNED`, SQLite `INTEGER`, ...). The table below is the
//! single source of truth for which names decode, into which width, and
//! which are deliberately unsupported. SQL Server does not go through this
//! table; TDS columns are mapped structurally in [`super::codec`].

/// Canonical decode target for a backend column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DbType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Text,
    Bool,
    Timestamp,
    Date,
    Time,
    Uuid,
    Bytes,
    Json,
    Null,
    /// DECIMAL / NUMERIC / MONEY: no lossless canonical representation.
    UnsupportedDecimal,
    /// TIMETZ: a time zone without a date cannot be represented faithfully.
    UnsupportedTimeWithTz,
    /// Anything not in the table.
    Unknown,
}

static DB_TYPE_NAMES: phf::Map<&'static str, DbType> = phf::phf_map! {
    // 32-bit integers
    "INT4" => DbType::Int32,
    "INT" => DbType::Int32,
    "INTEGER" => DbType::Int32,
    "MEDIUMINT" => DbType::Int32,
    // 64-bit integers
    "INT8" => DbType::Int64,
    "BIGINT" => DbType::Int64,
    // 16-bit integers
    "INT2" => DbType::Int16,
    "SMALLINT" => DbType::Int16,
    // 8-bit integers
    "TINYINT" => DbType::Int8,
    // MySQL unsigned widths
    "TINYINT UNSIGNED" => DbType::UInt8,
    "SMALLINT UNSIGNED" => DbType::UInt16,
    "INT UNSIGNED" => DbType::UInt32,
    "MEDIUMINT UNSIGNED" => DbType::UInt32,
    "BIGINT UNSIGNED" => DbType::UInt64,
    // 64-bit floats
    "FLOAT8" => DbType::Float64,
    "DOUBLE" => DbType::Float64,
    // 32-bit floats
    "FLOAT4" => DbType::Float32,
    "FLOAT" => DbType::Float32,
    "REAL" => DbType::Float32,
    // Text
    "TEXT" => DbType::Text,
    "VARCHAR" => DbType::Text,
    "CHAR" => DbType::Text,
    "BPCHAR" => DbType::Text,
    "NAME" => DbType::Text,
    "TINYTEXT" => DbType::Text,
    "MEDIUMTEXT" => DbType::Text,
    "LONGTEXT" => DbType::Text,
    "NVARCHAR" => DbType::Text,
    "NCHAR" => DbType::Text,
    // Booleans
    "BOOL" => DbType::Bool,
    "BOOLEAN" => DbType::Bool,
    // Timestamps
    "TIMESTAMP" => DbType::Timestamp,
    "TIMESTAMPTZ" => DbType::Timestamp,
    "DATETIME" => DbType::Timestamp,
    // Date and time of day
    "DATE" => DbType::Date,
    "TIME" => DbType::Time,
    // UUID
    "UUID" => DbType::Uuid,
    // Binary
    "BYTEA" => DbType::Bytes,
    "BLOB" => DbType::Bytes,
    "VARBINARY" => DbType::Bytes,
    "BINARY" => DbType::Bytes,
    "TINYBLOB" => DbType::Bytes,
    "MEDIUMBLOB" => DbType::Bytes,
    "LONGBLOB" => DbType::Bytes,
    // JSON
    "JSON" => DbType::Json,
    "JSONB" => DbType::Json,
    // Untyped NULL (e.g. `SELECT NULL`)
    "NULL" => DbType::Null,
    // Deliberately unsupported
    "DECIMAL" => DbType::UnsupportedDecimal,
    "NUMERIC" => DbType::UnsupportedDecimal,
    "MONEY" => DbType::UnsupportedDecimal,
    "TIMETZ" => DbType::UnsupportedTimeWithTz,
};

impl DbType {
    #[inline]
    pub(crate) fn from_name(name: &str) -> Self {
        DB_TYPE_NAMES.get(name).copied().unwrap_or(Self::Unknown)
    }
}
