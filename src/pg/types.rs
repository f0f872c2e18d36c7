//! PostgreSQL type decoding and parameter encoding.
//!
//! Rows arrive in text format; `decode` dispatches on the column's type OID
//! to turn the raw bytes into a [`PgValue`]. Unknown OIDs are passed through
//! as text. `encode` goes the other way for bound parameters.
//! Reference: https://www.postgresql.org/docs/current/datatype.html

use std::collections::HashMap;
use std::fmt::Write as _;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::array::{self, ArrayEntry};
use super::datetime::{self, Infinite};
use super::geometry::{self, Circle, Line, LineSegment, Path, PgBox, Point, Polygon};
use crate::error::{Error, PgResult};

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
///
/// Built-in OIDs are stable across server versions:
/// `SELECT typname, oid FROM pg_type WHERE oid < 10000 ORDER BY oid;`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const REGPROC: Oid = Oid(24);
    pub const TEXT: Oid = Oid(25);
    pub const OID: Oid = Oid(26);
    pub const TID: Oid = Oid(27);
    pub const XID: Oid = Oid(28);
    pub const CID: Oid = Oid(29);
    pub const JSON: Oid = Oid(114);
    pub const XML: Oid = Oid(142);

    // Geometric types
    pub const POINT: Oid = Oid(600);
    pub const LSEG: Oid = Oid(601);
    pub const PATH: Oid = Oid(602);
    pub const BOX: Oid = Oid(603);
    pub const POLYGON: Oid = Oid(604);
    pub const LINE: Oid = Oid(628);
    pub const CIRCLE: Oid = Oid(718);

    pub const CIDR: Oid = Oid(650);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const UNKNOWN: Oid = Oid(705);
    pub const MONEY: Oid = Oid(790);
    pub const MACADDR: Oid = Oid(829);
    pub const INET: Oid = Oid(869);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);

    // Date/time types
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const INTERVAL: Oid = Oid(1186);
    pub const TIMETZ: Oid = Oid(1266);

    pub const BIT: Oid = Oid(1560);
    pub const VARBIT: Oid = Oid(1562);
    pub const NUMERIC: Oid = Oid(1700);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    // Array types
    pub const XML_ARRAY: Oid = Oid(143);
    pub const JSON_ARRAY: Oid = Oid(199);
    pub const LINE_ARRAY: Oid = Oid(629);
    pub const CIDR_ARRAY: Oid = Oid(651);
    pub const CIRCLE_ARRAY: Oid = Oid(719);
    pub const MONEY_ARRAY: Oid = Oid(791);
    pub const BOOL_ARRAY: Oid = Oid(1000);
    pub const BYTEA_ARRAY: Oid = Oid(1001);
    pub const CHAR_ARRAY: Oid = Oid(1002);
    pub const NAME_ARRAY: Oid = Oid(1003);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const REGPROC_ARRAY: Oid = Oid(1008);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const TID_ARRAY: Oid = Oid(1010);
    pub const XID_ARRAY: Oid = Oid(1011);
    pub const CID_ARRAY: Oid = Oid(1012);
    pub const BPCHAR_ARRAY: Oid = Oid(1014);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);
    pub const POINT_ARRAY: Oid = Oid(1017);
    pub const LSEG_ARRAY: Oid = Oid(1018);
    pub const PATH_ARRAY: Oid = Oid(1019);
    pub const BOX_ARRAY: Oid = Oid(1020);
    pub const FLOAT4_ARRAY: Oid = Oid(1021);
    pub const FLOAT8_ARRAY: Oid = Oid(1022);
    pub const POLYGON_ARRAY: Oid = Oid(1027);
    pub const OID_ARRAY: Oid = Oid(1028);
    pub const MACADDR_ARRAY: Oid = Oid(1040);
    pub const INET_ARRAY: Oid = Oid(1041);
    pub const TIMESTAMP_ARRAY: Oid = Oid(1115);
    pub const DATE_ARRAY: Oid = Oid(1182);
    pub const TIME_ARRAY: Oid = Oid(1183);
    pub const TIMESTAMPTZ_ARRAY: Oid = Oid(1185);
    pub const INTERVAL_ARRAY: Oid = Oid(1187);
    pub const NUMERIC_ARRAY: Oid = Oid(1231);
    pub const TIMETZ_ARRAY: Oid = Oid(1270);
    pub const UUID_ARRAY: Oid = Oid(2951);
    pub const JSONB_ARRAY: Oid = Oid(3807);

    /// Create from raw i32 value
    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    /// Get the raw i32 value
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Canonical `pg_type.typname`, if this is a known built-in type.
    pub fn name(self) -> Option<&'static str> {
        TYPE_NAMES
            .iter()
            .find(|(oid, _)| *oid == self)
            .map(|(_, name)| *name)
    }

    /// Element type of a built-in array type.
    pub fn element(self) -> Option<Oid> {
        ARRAY_ELEMENTS
            .iter()
            .find(|(array, _)| *array == self)
            .map(|(_, elem)| *elem)
    }

    pub fn is_array(self) -> bool {
        self.element().is_some()
    }
}

const TYPE_NAMES: &[(Oid, &str)] = &[
    (Oid::BOOL, "bool"),
    (Oid::BYTEA, "bytea"),
    (Oid::CHAR, "char"),
    (Oid::NAME, "name"),
    (Oid::INT8, "int8"),
    (Oid::INT2, "int2"),
    (Oid::INT4, "int4"),
    (Oid::REGPROC, "regproc"),
    (Oid::TEXT, "text"),
    (Oid::OID, "oid"),
    (Oid::TID, "tid"),
    (Oid::XID, "xid"),
    (Oid::CID, "cid"),
    (Oid::JSON, "json"),
    (Oid::XML, "xml"),
    (Oid::XML_ARRAY, "_xml"),
    (Oid::JSON_ARRAY, "_json"),
    (Oid::POINT, "point"),
    (Oid::LSEG, "lseg"),
    (Oid::PATH, "path"),
    (Oid::BOX, "box"),
    (Oid::POLYGON, "polygon"),
    (Oid::LINE, "line"),
    (Oid::LINE_ARRAY, "_line"),
    (Oid::CIDR, "cidr"),
    (Oid::CIDR_ARRAY, "_cidr"),
    (Oid::FLOAT4, "float4"),
    (Oid::FLOAT8, "float8"),
    (Oid::UNKNOWN, "unknown"),
    (Oid::CIRCLE, "circle"),
    (Oid::CIRCLE_ARRAY, "_circle"),
    (Oid::MONEY, "money"),
    (Oid::MONEY_ARRAY, "_money"),
    (Oid::MACADDR, "macaddr"),
    (Oid::INET, "inet"),
    (Oid::BOOL_ARRAY, "_bool"),
    (Oid::BYTEA_ARRAY, "_bytea"),
    (Oid::CHAR_ARRAY, "_char"),
    (Oid::NAME_ARRAY, "_name"),
    (Oid::INT2_ARRAY, "_int2"),
    (Oid::INT4_ARRAY, "_int4"),
    (Oid::REGPROC_ARRAY, "_regproc"),
    (Oid::TEXT_ARRAY, "_text"),
    (Oid::TID_ARRAY, "_tid"),
    (Oid::XID_ARRAY, "_xid"),
    (Oid::CID_ARRAY, "_cid"),
    (Oid::BPCHAR_ARRAY, "_bpchar"),
    (Oid::VARCHAR_ARRAY, "_varchar"),
    (Oid::INT8_ARRAY, "_int8"),
    (Oid::POINT_ARRAY, "_point"),
    (Oid::LSEG_ARRAY, "_lseg"),
    (Oid::PATH_ARRAY, "_path"),
    (Oid::BOX_ARRAY, "_box"),
    (Oid::FLOAT4_ARRAY, "_float4"),
    (Oid::FLOAT8_ARRAY, "_float8"),
    (Oid::POLYGON_ARRAY, "_polygon"),
    (Oid::OID_ARRAY, "_oid"),
    (Oid::MACADDR_ARRAY, "_macaddr"),
    (Oid::INET_ARRAY, "_inet"),
    (Oid::BPCHAR, "bpchar"),
    (Oid::VARCHAR, "varchar"),
    (Oid::DATE, "date"),
    (Oid::TIME, "time"),
    (Oid::TIMESTAMP, "timestamp"),
    (Oid::TIMESTAMP_ARRAY, "_timestamp"),
    (Oid::DATE_ARRAY, "_date"),
    (Oid::TIME_ARRAY, "_time"),
    (Oid::TIMESTAMPTZ, "timestamptz"),
    (Oid::TIMESTAMPTZ_ARRAY, "_timestamptz"),
    (Oid::INTERVAL, "interval"),
    (Oid::INTERVAL_ARRAY, "_interval"),
    (Oid::NUMERIC_ARRAY, "_numeric"),
    (Oid::TIMETZ, "timetz"),
    (Oid::TIMETZ_ARRAY, "_timetz"),
    (Oid::BIT, "bit"),
    (Oid::VARBIT, "varbit"),
    (Oid::NUMERIC, "numeric"),
    (Oid::UUID, "uuid"),
    (Oid::UUID_ARRAY, "_uuid"),
    (Oid::JSONB, "jsonb"),
    (Oid::JSONB_ARRAY, "_jsonb"),
];

const ARRAY_ELEMENTS: &[(Oid, Oid)] = &[
    (Oid::XML_ARRAY, Oid::XML),
    (Oid::JSON_ARRAY, Oid::JSON),
    (Oid::LINE_ARRAY, Oid::LINE),
    (Oid::CIDR_ARRAY, Oid::CIDR),
    (Oid::CIRCLE_ARRAY, Oid::CIRCLE),
    (Oid::MONEY_ARRAY, Oid::MONEY),
    (Oid::BOOL_ARRAY, Oid::BOOL),
    (Oid::BYTEA_ARRAY, Oid::BYTEA),
    (Oid::CHAR_ARRAY, Oid::CHAR),
    (Oid::NAME_ARRAY, Oid::NAME),
    (Oid::INT2_ARRAY, Oid::INT2),
    (Oid::INT4_ARRAY, Oid::INT4),
    (Oid::REGPROC_ARRAY, Oid::REGPROC),
    (Oid::TEXT_ARRAY, Oid::TEXT),
    (Oid::TID_ARRAY, Oid::TID),
    (Oid::XID_ARRAY, Oid::XID),
    (Oid::CID_ARRAY, Oid::CID),
    (Oid::BPCHAR_ARRAY, Oid::BPCHAR),
    (Oid::VARCHAR_ARRAY, Oid::VARCHAR),
    (Oid::INT8_ARRAY, Oid::INT8),
    (Oid::POINT_ARRAY, Oid::POINT),
    (Oid::LSEG_ARRAY, Oid::LSEG),
    (Oid::PATH_ARRAY, Oid::PATH),
    (Oid::BOX_ARRAY, Oid::BOX),
    (Oid::FLOAT4_ARRAY, Oid::FLOAT4),
    (Oid::FLOAT8_ARRAY, Oid::FLOAT8),
    (Oid::POLYGON_ARRAY, Oid::POLYGON),
    (Oid::OID_ARRAY, Oid::OID),
    (Oid::MACADDR_ARRAY, Oid::MACADDR),
    (Oid::INET_ARRAY, Oid::INET),
    (Oid::TIMESTAMP_ARRAY, Oid::TIMESTAMP),
    (Oid::DATE_ARRAY, Oid::DATE),
    (Oid::TIME_ARRAY, Oid::TIME),
    (Oid::TIMESTAMPTZ_ARRAY, Oid::TIMESTAMPTZ),
    (Oid::INTERVAL_ARRAY, Oid::INTERVAL),
    (Oid::NUMERIC_ARRAY, Oid::NUMERIC),
    (Oid::TIMETZ_ARRAY, Oid::TIMETZ),
    (Oid::UUID_ARRAY, Oid::UUID),
    (Oid::JSONB_ARRAY, Oid::JSONB),
];

// ============================================================================
// Format codes
// ============================================================================

/// Wire format code of a column or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum Format {
    #[default]
    Text = 0,
    Binary = 1,
}

impl Format {
    pub fn from_i16(code: i16) -> PgResult<Self> {
        match code {
            0 => Ok(Format::Text),
            1 => Ok(Format::Binary),
            other => Err(Error::packet(format!("Unknown format code {}", other))),
        }
    }

    #[inline]
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

// ============================================================================
// PostgreSQL Values
// ============================================================================

/// Tuple identifier: `(block, offset)` of a row version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tid {
    pub block: u32,
    pub offset: u16,
}

/// A decoded column value or a parameter to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    /// text, varchar, numeric, network addresses, uuid and anything unknown
    Text(String),
    Bytea(Vec<u8>),
    Json(serde_json::Value),
    Date(Infinite<NaiveDate>),
    Timestamp(Infinite<NaiveDateTime>),
    TimestampTz(Infinite<DateTime<Utc>>),
    Point(Point),
    Line(Line),
    LineSegment(LineSegment),
    Box(PgBox),
    Circle(Circle),
    Path(Path),
    Polygon(Polygon),
    Tid(Tid),
    Array(Vec<PgValue>),
}

impl PgValue {
    /// Check if this value is NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value of `Int` or `BigInt`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PgValue::Int(v) => Some(*v as i64),
            PgValue::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PgValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PgValue]> {
        match self {
            PgValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one column value. `None` is SQL NULL.
pub fn decode(raw: Option<&[u8]>, oid: Oid, format: Format) -> PgResult<PgValue> {
    let Some(raw) = raw else {
        return Ok(PgValue::Null);
    };
    if format == Format::Binary {
        return Err(Error::Type("binary format is not supported".to_string()));
    }
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::Type(format!("Invalid UTF-8 in column value: {}", e)))?;
    decode_text(oid, text)
}

fn parse_num<T: std::str::FromStr>(text: &str, oid: Oid) -> PgResult<T>
where
    T::Err: std::fmt::Display,
{
    text.parse::<T>().map_err(|e| {
        Error::Type(format!(
            "Invalid {} '{}': {}",
            oid.name().unwrap_or("number"),
            text,
            e
        ))
    })
}

fn parse_float(text: &str) -> PgResult<f64> {
    match text {
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => parse_num(text, Oid::FLOAT8),
    }
}

/// Decode a text-format value of type `oid`.
pub fn decode_text(oid: Oid, text: &str) -> PgResult<PgValue> {
    if let Some(elem) = oid.element() {
        let entries = array::parse_array(text, array::separator_for(elem))?;
        return decode_entries(elem, &entries).map(PgValue::Array);
    }

    Ok(match oid {
        Oid::BOOL => PgValue::Bool(text.starts_with('t')),
        Oid::INT2 | Oid::INT4 => PgValue::Int(parse_num(text, oid)?),
        Oid::INT8 | Oid::OID | Oid::XID | Oid::CID => PgValue::BigInt(parse_num(text, oid)?),
        Oid::FLOAT4 | Oid::FLOAT8 => PgValue::Float(parse_float(text)?),
        Oid::JSON | Oid::JSONB => PgValue::Json(
            serde_json::from_str(text)
                .map_err(|e| Error::Type(format!("Invalid JSON: {}", e)))?,
        ),
        Oid::BYTEA => PgValue::Bytea(decode_bytea(text)?),
        Oid::DATE => PgValue::Date(datetime::parse_date(text)?),
        Oid::TIMESTAMP => PgValue::Timestamp(datetime::parse_timestamp(text)?),
        Oid::TIMESTAMPTZ => PgValue::TimestampTz(datetime::parse_timestamptz(text)?),
        Oid::POINT => PgValue::Point(geometry::parse_point(text)?),
        Oid::LINE => PgValue::Line(geometry::parse_line(text)?),
        Oid::LSEG => PgValue::LineSegment(geometry::parse_line_segment(text)?),
        Oid::BOX => PgValue::Box(geometry::parse_box(text)?),
        Oid::CIRCLE => PgValue::Circle(geometry::parse_circle(text)?),
        Oid::PATH => PgValue::Path(geometry::parse_path(text)?),
        Oid::POLYGON => PgValue::Polygon(geometry::parse_polygon(text)?),
        Oid::TID => PgValue::Tid(parse_tid(text)?),
        // Default: treat as text
        _ => PgValue::Text(text.to_string()),
    })
}

fn decode_entries(elem: Oid, entries: &[ArrayEntry]) -> PgResult<Vec<PgValue>> {
    entries
        .iter()
        .map(|entry| match entry {
            ArrayEntry::Null => Ok(PgValue::Null),
            ArrayEntry::Value(v) => decode_text(elem, v),
            ArrayEntry::Nested(items) => decode_entries(elem, items).map(PgValue::Array),
        })
        .collect()
}

fn parse_tid(text: &str) -> PgResult<Tid> {
    let invalid = || Error::Type(format!("Invalid tid '{}'", text));
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let (block, offset) = inner.split_once(',').ok_or_else(invalid)?;
    Ok(Tid {
        block: block.trim().parse().map_err(|_| invalid())?,
        offset: offset.trim().parse().map_err(|_| invalid())?,
    })
}

/// `bytea` in either `\x` hex form or the legacy escape form.
pub fn decode_bytea(text: &str) -> PgResult<Vec<u8>> {
    if let Some(hex) = text.strip_prefix("\\x") {
        return decode_hex(hex);
    }

    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
        } else if bytes.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else {
            let octal = bytes
                .get(i + 1..i + 4)
                .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)))
                .and_then(|d| std::str::from_utf8(d).ok())
                .and_then(|d| u8::from_str_radix(d, 8).ok())
                .ok_or_else(|| Error::Type(format!("Invalid bytea escape in '{}'", text)))?;
            out.push(octal);
            i += 4;
        }
    }
    Ok(out)
}

fn decode_hex(hex: &str) -> PgResult<Vec<u8>> {
    let digits = hex.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(Error::Type("Odd number of hex digits in bytea".to_string()));
    }
    if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(Error::Type(format!("Invalid hex digit '{}' in bytea", bad)));
    }
    Ok(digits
        .chunks_exact(2)
        .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
        .collect())
}

/// Value of an ASCII hex digit already checked with `is_ascii_hexdigit`.
fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// A bound parameter as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedParam {
    Null,
    /// Sent with format code 0.
    Text(String),
    /// Sent as-is with format code 1.
    Binary(Bytes),
}

impl EncodedParam {
    pub fn format(&self) -> Format {
        match self {
            EncodedParam::Binary(_) => Format::Binary,
            _ => Format::Text,
        }
    }
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        v.to_string()
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn to_entry(value: &PgValue) -> ArrayEntry {
    match value {
        PgValue::Null => ArrayEntry::Null,
        PgValue::Array(items) => ArrayEntry::Nested(items.iter().map(to_entry).collect()),
        other => ArrayEntry::Value(to_text(other)),
    }
}

/// Text representation of a non-null value.
fn to_text(value: &PgValue) -> String {
    match value {
        PgValue::Null => String::new(),
        PgValue::Bool(b) => b.to_string(),
        PgValue::Int(v) => v.to_string(),
        PgValue::BigInt(v) => v.to_string(),
        PgValue::Float(v) => format_float(*v),
        PgValue::Text(s) => s.clone(),
        PgValue::Bytea(b) => encode_hex(b),
        PgValue::Json(j) => j.to_string(),
        PgValue::Date(d) => datetime::format_infinite(d, datetime::format_date),
        PgValue::Timestamp(ts) => datetime::format_infinite(ts, datetime::format_timestamp),
        PgValue::TimestampTz(ts) => datetime::format_infinite(ts, datetime::format_timestamptz),
        PgValue::Point(p) => p.to_string(),
        PgValue::Line(l) => l.to_string(),
        PgValue::LineSegment(s) => s.to_string(),
        PgValue::Box(b) => b.to_string(),
        PgValue::Circle(c) => c.to_string(),
        PgValue::Path(p) => p.to_string(),
        PgValue::Polygon(p) => p.to_string(),
        PgValue::Tid(t) => format!("({},{})", t.block, t.offset),
        PgValue::Array(items) => {
            array::format_array(&items.iter().map(to_entry).collect::<Vec<_>>())
        }
    }
}

/// Encode a value for Bind. Everything goes out in text format.
pub fn encode(value: &PgValue) -> EncodedParam {
    match value {
        PgValue::Null => EncodedParam::Null,
        other => EncodedParam::Text(to_text(other)),
    }
}

// ============================================================================
// Conversions into PgValue
// ============================================================================

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PgValue {
                fn from(v: $ty) -> Self {
                    PgValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Bytea,
    serde_json::Value => Json,
    Point => Point,
    Line => Line,
    LineSegment => LineSegment,
    PgBox => Box,
    Circle => Circle,
    Path => Path,
    Polygon => Polygon,
    Tid => Tid,
    Vec<PgValue> => Array,
}

impl From<NaiveDate> for PgValue {
    fn from(v: NaiveDate) -> Self {
        PgValue::Date(Infinite::Value(v))
    }
}

impl From<NaiveDateTime> for PgValue {
    fn from(v: NaiveDateTime) -> Self {
        PgValue::Timestamp(Infinite::Value(v))
    }
}

impl From<DateTime<Utc>> for PgValue {
    fn from(v: DateTime<Utc>) -> Self {
        PgValue::TimestampTz(Infinite::Value(v))
    }
}

impl From<HashMap<String, serde_json::Value>> for PgValue {
    fn from(v: HashMap<String, serde_json::Value>) -> Self {
        PgValue::Json(serde_json::Value::Object(v.into_iter().collect()))
    }
}

impl<T: Into<PgValue>> From<Option<T>> for PgValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(PgValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(oid: Oid, s: &str) -> PgValue {
        decode(Some(s.as_bytes()), oid, Format::Text).unwrap()
    }

    #[test]
    fn test_oid_catalog() {
        assert_eq!(Oid::INT4.name(), Some("int4"));
        assert_eq!(Oid::TIMESTAMPTZ_ARRAY.name(), Some("_timestamptz"));
        assert_eq!(Oid(999_999).name(), None);
        assert_eq!(Oid::BOX_ARRAY.element(), Some(Oid::BOX));
        assert!(!Oid::TEXT.is_array());
    }

    #[test]
    fn test_scalar_dispatch() {
        assert_eq!(text(Oid::BOOL, "t"), PgValue::Bool(true));
        assert_eq!(text(Oid::BOOL, "f"), PgValue::Bool(false));
        assert_eq!(text(Oid::INT4, "-42"), PgValue::Int(-42));
        assert_eq!(text(Oid::INT8, "9000000000"), PgValue::BigInt(9_000_000_000));
        assert_eq!(text(Oid::FLOAT8, "1.5"), PgValue::Float(1.5));
        assert_eq!(text(Oid::FLOAT8, "-Infinity"), PgValue::Float(f64::NEG_INFINITY));
        assert_eq!(text(Oid::NUMERIC, "1.10"), PgValue::Text("1.10".into()));
        assert_eq!(
            text(Oid::JSONB, r#"{"a":[1,2]}"#),
            PgValue::Json(serde_json::json!({"a": [1, 2]}))
        );
        assert_eq!(
            text(Oid::TID, "(3,7)"),
            PgValue::Tid(Tid { block: 3, offset: 7 })
        );
    }

    #[test]
    fn test_null_and_unknown_oid() {
        assert_eq!(decode(None, Oid::INT4, Format::Text).unwrap(), PgValue::Null);
        assert_eq!(text(Oid(424242), "whatever"), PgValue::Text("whatever".into()));
    }

    #[test]
    fn test_binary_format_is_rejected() {
        let err = decode(Some(&[0, 0, 0, 1]), Oid::INT4, Format::Binary).unwrap_err();
        assert!(matches!(err, Error::Type(ref m) if m.contains("not supported")));
    }

    #[test]
    fn test_bad_number_is_type_error() {
        let err = decode(Some(b"abc"), Oid::INT4, Format::Text).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn test_bytea_hex_and_escape() {
        assert_eq!(decode_bytea("\\x00ff10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert_eq!(decode_bytea("a\\\\b\\001").unwrap(), vec![b'a', b'\\', b'b', 1]);
        assert!(decode_bytea("\\x0").is_err());
        assert_eq!(decode_bytea("\\xAbCd").unwrap(), vec![0xab, 0xcd]);
        assert_eq!(
            encode(&PgValue::Bytea(vec![0xde, 0xad])),
            EncodedParam::Text("\\xdead".into())
        );
    }

    #[test]
    fn test_bytea_rejects_non_hex_input() {
        for bad in ["\\x0\u{e9}0", "\\x\u{e9}", "\\xzz", "\\x+1"] {
            let err = decode_bytea(bad).unwrap_err();
            assert!(matches!(err, Error::Type(_)), "{:?}", bad);
        }
        assert!(decode_bytea("\\+12").is_err());
        assert!(matches!(
            decode_text(Oid::BYTEA, "\\x\u{e9}\u{e9}"),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_semicolon_in_text_array_is_data() {
        assert_eq!(
            text(Oid::TEXT_ARRAY, "{a;b,c}"),
            PgValue::Array(vec![PgValue::Text("a;b".into()), PgValue::Text("c".into())])
        );
        assert_eq!(
            text(Oid::BOX_ARRAY, "{(1,1),(0,0)}").as_array().map(|a| a.len()),
            Some(1)
        );
    }

    #[test]
    fn test_arrays_decode_elements() {
        assert_eq!(
            text(Oid::INT4_ARRAY, "{1,NULL,3}"),
            PgValue::Array(vec![PgValue::Int(1), PgValue::Null, PgValue::Int(3)])
        );
        let boxes = text(Oid::BOX_ARRAY, "{(1,1),(0,0);(3,3),(2,2)}");
        assert_eq!(boxes.as_array().map(|a| a.len()), Some(2));
        let nested = text(Oid::TEXT_ARRAY, r#"{{"a,b",c},{NULL,"NULL"}}"#);
        assert_eq!(
            nested,
            PgValue::Array(vec![
                PgValue::Array(vec![PgValue::Text("a,b".into()), PgValue::Text("c".into())]),
                PgValue::Array(vec![PgValue::Null, PgValue::Text("NULL".into())]),
            ])
        );
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&PgValue::Null), EncodedParam::Null);
        assert_eq!(encode(&5i32.into()), EncodedParam::Text("5".into()));
        assert_eq!(encode(&true.into()), EncodedParam::Text("true".into()));
        assert_eq!(
            encode(&PgValue::Float(f64::INFINITY)),
            EncodedParam::Text("Infinity".into())
        );
        assert_eq!(
            encode(&serde_json::json!({"k": "v"}).into()),
            EncodedParam::Text(r#"{"k":"v"}"#.into())
        );
        assert_eq!(encode(&PgValue::from(None::<i32>)), EncodedParam::Null);
    }

    #[test]
    fn test_encode_timestamptz_has_offset() {
        let ts = DateTime::parse_from_rfc3339("2020-05-06T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            encode(&ts.into()),
            EncodedParam::Text("2020-05-06T07:08:09.000000+00:00".into())
        );
    }

    #[test]
    fn test_array_literal_round_trip() {
        let value = PgValue::Array(vec![1i32.into(), PgValue::Null, "a,b".into()]);
        let EncodedParam::Text(literal) = encode(&value) else {
            panic!("expected text");
        };
        assert_eq!(literal, r#"{"1",NULL,"a,b"}"#);

        let ints = text(Oid::TEXT_ARRAY, &literal);
        assert_eq!(
            ints,
            PgValue::Array(vec!["1".into(), PgValue::Null, "a,b".into()])
        );
    }
}
