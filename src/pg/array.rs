//! Array literal parsing and formatting.
//!
//! PostgreSQL prints arrays as `{1,2,NULL}`, nested arrays as `{{1,2},{3,4}}`
//! and quotes any element containing separators, braces or whitespace:
//! `{"a,b","say \"hi\""}`. Arrays with non-default lower bounds carry a
//! dimension prefix, `[0:1]={1,2}`. `box` is the one built-in type whose
//! array delimiter is `;` instead of `,`.

use super::types::Oid;
use crate::error::{Error, PgResult};

/// One element of a parsed array literal, before element decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayEntry {
    Null,
    Value(String),
    Nested(Vec<ArrayEntry>),
}

fn unbalanced(text: &str) -> Error {
    Error::Type(format!("Malformed array literal '{}'", text))
}

/// Element delimiter of an array whose elements have type `elem`.
pub fn separator_for(elem: Oid) -> char {
    if elem == Oid::BOX {
        ';'
    } else {
        ','
    }
}

struct Parser<'a> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    separator: char,
}

impl<'a> Parser<'a> {
    fn expect(&mut self, want: char) -> PgResult<()> {
        match self.chars.next() {
            Some(c) if c == want => Ok(()),
            _ => Err(unbalanced(self.text)),
        }
    }

    /// Parse `{...}` with the opening brace still pending.
    fn list(&mut self) -> PgResult<Vec<ArrayEntry>> {
        self.expect('{')?;
        let mut entries = Vec::new();
        if self.chars.peek() == Some(&'}') {
            self.chars.next();
            return Ok(entries);
        }
        loop {
            let entry = match self.chars.peek() {
                Some('{') => ArrayEntry::Nested(self.list()?),
                Some('"') => ArrayEntry::Value(self.quoted()?),
                Some(_) => self.unquoted()?,
                None => return Err(unbalanced(self.text)),
            };
            entries.push(entry);

            match self.chars.next() {
                Some('}') => return Ok(entries),
                Some(c) if c == self.separator => continue,
                _ => return Err(unbalanced(self.text)),
            }
        }
    }

    fn quoted(&mut self) -> PgResult<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some('\\') => match self.chars.next() {
                    Some(c) => out.push(c),
                    None => return Err(unbalanced(self.text)),
                },
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(unbalanced(self.text)),
            }
        }
    }

    fn unquoted(&mut self) -> PgResult<ArrayEntry> {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == self.separator || c == '}' {
                break;
            }
            self.chars.next();
            if c == '\\' {
                match self.chars.next() {
                    Some(e) => out.push(e),
                    None => return Err(unbalanced(self.text)),
                }
            } else {
                out.push(c);
            }
        }
        if out == "NULL" {
            Ok(ArrayEntry::Null)
        } else {
            Ok(ArrayEntry::Value(out))
        }
    }
}

/// Parse an array literal into its (possibly nested) raw entries, splitting
/// on `separator` (see [`separator_for`]).
///
/// Unquoted `NULL` becomes [`ArrayEntry::Null`]; a quoted `"NULL"` stays text.
pub fn parse_array(text: &str, separator: char) -> PgResult<Vec<ArrayEntry>> {
    let mut body = text.trim();
    if body.starts_with('[') {
        // dimension decoration: [1:2][0:1]={...}
        let eq = body.find('=').ok_or_else(|| unbalanced(text))?;
        body = &body[eq + 1..];
    }

    let mut parser = Parser {
        text,
        chars: body.chars().peekable(),
        separator,
    };
    let entries = parser.list()?;
    if parser.chars.next().is_some() {
        return Err(unbalanced(text));
    }
    Ok(entries)
}

// ============================================================================
// Writer
// ============================================================================

fn write_entry(out: &mut String, entry: &ArrayEntry) {
    match entry {
        ArrayEntry::Null => out.push_str("NULL"),
        ArrayEntry::Value(v) => {
            out.push('"');
            for c in v.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
        ArrayEntry::Nested(items) => write_list(out, items),
    }
}

fn write_list(out: &mut String, entries: &[ArrayEntry]) {
    out.push('{');
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_entry(out, entry);
    }
    out.push('}');
}

/// Render entries as an array literal. Every scalar is quoted.
pub fn format_array(entries: &[ArrayEntry]) -> String {
    let mut out = String::new();
    write_list(&mut out, entries);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ArrayEntry {
        ArrayEntry::Value(s.to_string())
    }

    #[test]
    fn test_flat_and_empty() {
        assert_eq!(parse_array("{1,2,3}", ',').unwrap(), vec![v("1"), v("2"), v("3")]);
        assert_eq!(parse_array("{}", ',').unwrap(), vec![]);
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(
            parse_array(r#"{NULL,"NULL",x}"#, ',').unwrap(),
            vec![ArrayEntry::Null, v("NULL"), v("x")]
        );
    }

    #[test]
    fn test_quoted_with_escapes() {
        let parsed = parse_array(r#"{"a,b","say \"hi\"","back\\slash",""}"#, ',').unwrap();
        assert_eq!(
            parsed,
            vec![v("a,b"), v("say \"hi\""), v("back\\slash"), v("")]
        );
    }

    #[test]
    fn test_nested() {
        let parsed = parse_array("{{1,2},{3,NULL}}", ',').unwrap();
        assert_eq!(
            parsed,
            vec![
                ArrayEntry::Nested(vec![v("1"), v("2")]),
                ArrayEntry::Nested(vec![v("3"), ArrayEntry::Null]),
            ]
        );
    }

    #[test]
    fn test_box_arrays_use_semicolon() {
        let parsed = parse_array("{(1,1),(0,0);(3,3),(2,2)}", ';').unwrap();
        assert_eq!(parsed, vec![v("(1,1),(0,0)"), v("(3,3),(2,2)")]);
    }

    #[test]
    fn test_dimension_prefix_is_skipped() {
        assert_eq!(parse_array("[0:1]={7,8}", ',').unwrap(), vec![v("7"), v("8")]);
    }

    #[test]
    fn test_unbalanced_is_error() {
        assert!(parse_array("{1,2", ',').is_err());
        assert!(parse_array("{{1,2}", ',').is_err());
        assert!(parse_array("{1}}", ',').is_err());
        assert!(parse_array(r#"{"open}"#, ',').is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let entries = vec![
            v("1"),
            ArrayEntry::Null,
            v("a,b"),
            ArrayEntry::Nested(vec![v("q\"uote")]),
        ];
        let text = format_array(&entries);
        assert_eq!(text, r#"{"1",NULL,"a,b",{"q\"uote"}}"#);
        assert_eq!(parse_array(&text, ',').unwrap(), entries);
    }

    #[test]
    fn test_semicolon_in_text_element_is_data() {
        assert_eq!(
            parse_array("{a;b,c}", separator_for(Oid::TEXT)).unwrap(),
            vec![v("a;b"), v("c")]
        );
        assert_eq!(separator_for(Oid::BOX), ';');
    }
}
