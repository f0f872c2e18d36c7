//! Query requests and result accumulation.
//!
//! [`QueryOptions`] describes one request; [`QueryResult`] collects what the
//! server sends back, materializing rows either positionally or by name.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use super::error::Notice;
use super::protocol::FieldDescription;
use super::types::{self, EncodedParam, PgValue};
use crate::error::{Error, PgResult};

// ============================================================================
// Request
// ============================================================================

/// A single query request. Built once, then handed to the connection.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    text: String,
    portal: String,
    statement_name: String,
    args: Vec<EncodedParam>,
    fields: Option<Vec<String>>,
    copy_in: Vec<Bytes>,
}

impl QueryOptions {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Portal name for the extended flow. Empty means the unnamed portal.
    pub fn portal(mut self, portal: impl Into<String>) -> Self {
        self.portal = portal.into();
        self
    }

    /// Prepared statement name for the extended flow.
    pub fn statement_name(mut self, name: impl Into<String>) -> Self {
        self.statement_name = name.into();
        self
    }

    /// Bind one parameter, encoded as text.
    pub fn arg(mut self, value: impl Into<PgValue>) -> Self {
        self.args.push(types::encode(&value.into()));
        self
    }

    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<PgValue>,
    {
        self.args
            .extend(values.into_iter().map(|v| types::encode(&v.into())));
        self
    }

    /// Bind one parameter as raw bytes, sent with the binary format code.
    pub fn raw_arg(mut self, bytes: impl Into<Bytes>) -> Self {
        self.args.push(EncodedParam::Binary(bytes.into()));
        self
    }

    /// Chunks sent as CopyData if the server answers with CopyInResponse.
    pub fn copy_in<I>(mut self, chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        self.copy_in.extend(chunks.into_iter().map(Into::into));
        self
    }

    /// Override the column names used for object-shaped rows.
    ///
    /// Names are lower-cased and must be unique identifiers.
    pub fn fields<I, S>(mut self, names: I) -> PgResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for name in names {
            let name = name.as_ref().to_lowercase();
            if !is_identifier(&name) {
                return Err(Error::Type(format!("Invalid field name: '{}'", name)));
            }
            if !seen.insert(name.clone()) {
                return Err(Error::Type(format!("Duplicate field name: '{}'", name)));
            }
            fields.push(name);
        }
        self.fields = Some(fields);
        Ok(self)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn portal_name(&self) -> &str {
        &self.portal
    }

    pub fn statement(&self) -> &str {
        &self.statement_name
    }

    pub fn encoded_args(&self) -> &[EncodedParam] {
        &self.args
    }

    pub fn explicit_fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn copy_chunks(&self) -> &[Bytes] {
        &self.copy_in
    }

    /// Whether this request needs the extended query flow.
    pub fn has_args(&self) -> bool {
        !self.args.is_empty()
    }
}

impl From<&str> for QueryOptions {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for QueryOptions {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

// ============================================================================
// Command tag
// ============================================================================

/// Parsed CommandComplete tag, e.g. `INSERT 0 5` or `SELECT 10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    pub command: String,
    pub rows: Option<u64>,
}

impl CommandTag {
    /// Parse the leading word and up to two numbers.
    ///
    /// With two numbers (`INSERT oid rows`) the second is the row count,
    /// otherwise the first.
    pub fn parse(tag: &str) -> Self {
        let word_end = tag
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(tag.len());
        let command = tag[..word_end].to_string();

        let mut numbers = Vec::with_capacity(2);
        let mut rest = &tag[word_end..];
        while numbers.len() < 2 {
            let Some(tail) = rest.strip_prefix(' ') else {
                break;
            };
            let digits = tail
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(tail.len());
            if digits == 0 {
                break;
            }
            match tail[..digits].parse::<u64>() {
                Ok(n) => numbers.push(n),
                Err(_) => break,
            }
            rest = &tail[digits..];
        }

        let rows = numbers.get(1).or_else(|| numbers.first()).copied();
        Self { command, rows }
    }
}

// ============================================================================
// Result
// ============================================================================

/// How rows are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultShape {
    /// Positional values per row.
    #[default]
    Array,
    /// Column name to value per row.
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultRows {
    Array(Vec<Vec<PgValue>>),
    Object(Vec<HashMap<String, PgValue>>),
}

impl ResultRows {
    pub fn len(&self) -> usize {
        match self {
            ResultRows::Array(rows) => rows.len(),
            ResultRows::Object(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_array(&self) -> Option<&[Vec<PgValue>]> {
        match self {
            ResultRows::Array(rows) => Some(rows),
            ResultRows::Object(_) => None,
        }
    }

    pub fn as_objects(&self) -> Option<&[HashMap<String, PgValue>]> {
        match self {
            ResultRows::Object(rows) => Some(rows),
            ResultRows::Array(_) => None,
        }
    }
}

/// Accumulated outcome of one query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Command word of the last CommandComplete (`SELECT`, `INSERT`, ...).
    pub command: Option<String>,
    pub affected_rows: Option<u64>,
    /// Set by RowDescription. A later one replaces an earlier one.
    pub fields: Option<Vec<FieldDescription>>,
    pub warnings: Vec<Notice>,
    pub rows: ResultRows,
    /// Raw chunks received during COPY TO STDOUT.
    pub copy_data: Vec<Bytes>,
    names: Option<Vec<String>>,
}

impl QueryResult {
    pub fn new(shape: ResultShape) -> Self {
        let rows = match shape {
            ResultShape::Array => ResultRows::Array(Vec::new()),
            ResultShape::Object => ResultRows::Object(Vec::new()),
        };
        Self {
            command: None,
            affected_rows: None,
            fields: None,
            warnings: Vec::new(),
            rows,
            copy_data: Vec::new(),
            names: None,
        }
    }

    /// A result that names object-shaped columns from `fields` instead of
    /// the server's column names.
    pub fn with_names(shape: ResultShape, names: Option<Vec<String>>) -> Self {
        Self {
            names,
            ..Self::new(shape)
        }
    }

    pub fn shape(&self) -> ResultShape {
        match self.rows {
            ResultRows::Array(_) => ResultShape::Array,
            ResultRows::Object(_) => ResultShape::Object,
        }
    }

    pub fn set_fields(&mut self, fields: Vec<FieldDescription>) -> PgResult<()> {
        if let (ResultShape::Object, Some(names)) = (self.shape(), &self.names) {
            if names.len() != fields.len() {
                return Err(Error::Type(format!(
                    "{} field names given but the result has {} columns",
                    names.len(),
                    fields.len()
                )));
            }
        }
        self.fields = Some(fields);
        Ok(())
    }

    pub fn set_command(&mut self, tag: &str) {
        let tag = CommandTag::parse(tag);
        self.command = Some(tag.command);
        self.affected_rows = tag.rows;
    }

    /// Decode one DataRow and append it.
    pub fn insert(&mut self, values: Vec<Option<Bytes>>) -> PgResult<()> {
        let fields = self
            .fields
            .as_ref()
            .ok_or_else(|| Error::packet("DataRow received before RowDescription"))?;
        if values.len() != fields.len() {
            return Err(Error::packet(format!(
                "DataRow has {} values, expected {}",
                values.len(),
                fields.len()
            )));
        }

        let decoded = values
            .iter()
            .zip(fields)
            .map(|(raw, field)| types::decode(raw.as_deref(), field.type_oid, field.format))
            .collect::<PgResult<Vec<_>>>()?;

        match &mut self.rows {
            ResultRows::Array(rows) => rows.push(decoded),
            ResultRows::Object(rows) => {
                let row = match &self.names {
                    Some(names) => names.iter().cloned().zip(decoded).collect(),
                    None => fields.iter().map(|f| f.name.clone()).zip(decoded).collect(),
                };
                rows.push(row);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::types::{Format, Oid};

    fn field(name: &str, oid: Oid) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid: oid,
            type_size: -1,
            type_modifier: -1,
            format: Format::Text,
        }
    }

    #[test]
    fn test_command_tag() {
        assert_eq!(
            CommandTag::parse("INSERT 0 5"),
            CommandTag { command: "INSERT".into(), rows: Some(5) }
        );
        assert_eq!(CommandTag::parse("SELECT 10").rows, Some(10));
        assert_eq!(
            CommandTag::parse("VACUUM"),
            CommandTag { command: "VACUUM".into(), rows: None }
        );
        assert_eq!(CommandTag::parse("CREATE TABLE").command, "CREATE");
        assert_eq!(CommandTag::parse("CREATE TABLE").rows, None);
    }

    #[test]
    fn test_fields_are_normalized() {
        let opts = QueryOptions::new("SELECT 1").fields(["Id", "user_name"]).unwrap();
        assert_eq!(opts.explicit_fields().unwrap(), &["id", "user_name"]);

        assert!(QueryOptions::new("q").fields(["a", "A"]).is_err());
        assert!(QueryOptions::new("q").fields(["1abc"]).is_err());
        assert!(QueryOptions::new("q").fields(["has space"]).is_err());
    }

    #[test]
    fn test_args_select_extended_flow() {
        let opts = QueryOptions::new("SELECT $1, $2").arg(1).arg(None::<i32>);
        assert!(opts.has_args());
        assert_eq!(
            opts.encoded_args(),
            &[EncodedParam::Text("1".into()), EncodedParam::Null]
        );
        assert!(!QueryOptions::new("SELECT 1").has_args());
    }

    #[test]
    fn test_insert_requires_fields() {
        let mut result = QueryResult::new(ResultShape::Array);
        let err = result.insert(vec![Some(Bytes::from_static(b"1"))]).unwrap_err();
        assert!(matches!(err, Error::Packet(_)));
    }

    #[test]
    fn test_array_rows() {
        let mut result = QueryResult::new(ResultShape::Array);
        result
            .set_fields(vec![field("n", Oid::INT4), field("s", Oid::TEXT)])
            .unwrap();
        result
            .insert(vec![Some(Bytes::from_static(b"7")), None])
            .unwrap();
        result.set_command("SELECT 1");

        assert_eq!(result.command.as_deref(), Some("SELECT"));
        assert_eq!(result.affected_rows, Some(1));
        assert_eq!(
            result.rows.as_array().unwrap(),
            &[vec![PgValue::Int(7), PgValue::Null]]
        );
    }

    #[test]
    fn test_object_rows_with_explicit_names() {
        let mut result =
            QueryResult::with_names(ResultShape::Object, Some(vec!["x".into(), "y".into()]));
        result
            .set_fields(vec![field("?column?", Oid::BOOL), field("?column?", Oid::TEXT)])
            .unwrap();
        result
            .insert(vec![Some(Bytes::from_static(b"t")), Some(Bytes::from_static(b"hi"))])
            .unwrap();

        let row = &result.rows.as_objects().unwrap()[0];
        assert_eq!(row["x"], PgValue::Bool(true));
        assert_eq!(row["y"], PgValue::Text("hi".into()));
    }

    #[test]
    fn test_explicit_names_must_match_columns() {
        let mut result = QueryResult::with_names(ResultShape::Object, Some(vec!["x".into()]));
        let err = result
            .set_fields(vec![field("a", Oid::INT4), field("b", Oid::INT4)])
            .unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }
}
