//! Geometric types in PostgreSQL text form.
//!
//! Reference: https://www.postgresql.org/docs/current/datatype-geometric.html

use std::fmt;

use crate::error::{Error, PgResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Infinite line `Ax + By + C = 0`, text form `{A,B,C}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Text form `[(x1,y1),(x2,y2)]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub a: Point,
    pub b: Point,
}

/// The `box` type, text form `(x1,y1),(x2,y2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PgBox {
    pub a: Point,
    pub b: Point,
}

/// Text form `<(x,y),r>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

/// Open paths are written `[...]`, closed ones `(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub points: Vec<Point>,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

// ============================================================================
// Parsing
// ============================================================================

fn float(s: &str) -> PgResult<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|e| Error::Type(format!("Invalid float8 '{}': {}", s, e)))
}

fn strip(value: &str, open: char, close: char) -> &str {
    let value = value.trim();
    value
        .strip_prefix(open)
        .and_then(|v| v.strip_suffix(close))
        .unwrap_or(value)
}

/// Split on `sep` only where it is not nested inside parentheses.
pub(crate) fn split_top_level(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

/// Every innermost `(x,y)` group in order of appearance.
fn points(value: &str) -> PgResult<Vec<Point>> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in value.char_indices() {
        match c {
            '(' => start = Some(i),
            ')' => {
                if let Some(s) = start.take() {
                    out.push(parse_point(&value[s..=i])?);
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn two_points(value: &str, type_name: &str) -> PgResult<(Point, Point)> {
    match points(value)?.as_slice() {
        [a, b] => Ok((*a, *b)),
        other => Err(Error::Type(format!(
            "Invalid {} '{}': expected 2 points, found {}",
            type_name,
            value,
            other.len()
        ))),
    }
}

pub fn parse_point(value: &str) -> PgResult<Point> {
    let inner = strip(value, '(', ')');
    match inner.split(',').collect::<Vec<_>>().as_slice() {
        [x, y] => Ok(Point {
            x: float(x)?,
            y: float(y)?,
        }),
        _ => Err(Error::Type(format!("Invalid point '{}'", value))),
    }
}

pub fn parse_line(value: &str) -> PgResult<Line> {
    let inner = strip(value, '{', '}');
    match inner.split(',').collect::<Vec<_>>().as_slice() {
        [a, b, c] => Ok(Line {
            a: float(a)?,
            b: float(b)?,
            c: float(c)?,
        }),
        _ => Err(Error::Type(format!("Invalid line '{}'", value))),
    }
}

pub fn parse_line_segment(value: &str) -> PgResult<LineSegment> {
    let (a, b) = two_points(strip(value, '[', ']'), "lseg")?;
    Ok(LineSegment { a, b })
}

pub fn parse_box(value: &str) -> PgResult<PgBox> {
    let (a, b) = two_points(value, "box")?;
    Ok(PgBox { a, b })
}

pub fn parse_circle(value: &str) -> PgResult<Circle> {
    let inner = strip(value, '<', '>');
    match split_top_level(inner, ',').as_slice() {
        [center, radius] => Ok(Circle {
            center: parse_point(center)?,
            radius: float(radius)?,
        }),
        _ => Err(Error::Type(format!("Invalid circle '{}'", value))),
    }
}

pub fn parse_path(value: &str) -> PgResult<Path> {
    let closed = !value.trim_start().starts_with('[');
    Ok(Path {
        points: points(value)?,
        closed,
    })
}

pub fn parse_polygon(value: &str) -> PgResult<Polygon> {
    Ok(Polygon {
        points: points(value)?,
    })
}

// ============================================================================
// Text output (PostgreSQL input syntax)
// ============================================================================

fn write_points(f: &mut fmt::Formatter<'_>, points: &[Point]) -> fmt::Result {
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", p)?;
    }
    Ok(())
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{},{}}}", self.a, self.b, self.c)
    }
}

impl fmt::Display for LineSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.a, self.b)
    }
}

impl fmt::Display for PgBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.a, self.b)
    }
}

impl fmt::Display for Circle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{},{}>", self.center, self.radius)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.closed { ("(", ")") } else { ("[", "]") };
        f.write_str(open)?;
        write_points(f, &self.points)?;
        f.write_str(close)
    }
}

impl fmt::Display for Polygon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        write_points(f, &self.points)?;
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64) -> Point {
        Point { x, y }
    }

    #[test]
    fn test_point() {
        assert_eq!(parse_point("(1.5,-2)").unwrap(), pt(1.5, -2.0));
        assert!(parse_point("(1)").is_err());
        assert!(parse_point("(a,b)").is_err());
    }

    #[test]
    fn test_line_and_segment() {
        let line = parse_line("{1,-1,0}").unwrap();
        assert_eq!(line, Line { a: 1.0, b: -1.0, c: 0.0 });

        let seg = parse_line_segment("[(1,2),(3,4)]").unwrap();
        assert_eq!(seg.a, pt(1.0, 2.0));
        assert_eq!(seg.b, pt(3.0, 4.0));
    }

    #[test]
    fn test_box() {
        let b = parse_box("(3,4),(1,2)").unwrap();
        assert_eq!(b.a, pt(3.0, 4.0));
        assert_eq!(b.b, pt(1.0, 2.0));
        assert!(parse_box("(3,4)").is_err());
    }

    #[test]
    fn test_circle_does_not_split_inside_parens() {
        let c = parse_circle("<(1,2),3.5>").unwrap();
        assert_eq!(c.center, pt(1.0, 2.0));
        assert_eq!(c.radius, 3.5);
    }

    #[test]
    fn test_path_open_and_closed() {
        let open = parse_path("[(0,0),(1,1),(2,0)]").unwrap();
        assert!(!open.closed);
        assert_eq!(open.points.len(), 3);

        let closed = parse_path("((0,0),(1,1))").unwrap();
        assert!(closed.closed);
        assert_eq!(closed.points, vec![pt(0.0, 0.0), pt(1.0, 1.0)]);
    }

    #[test]
    fn test_polygon() {
        let poly = parse_polygon("((0,0),(0,1),(1,1))").unwrap();
        assert_eq!(poly.points.len(), 3);
        assert_eq!(poly.points[2], pt(1.0, 1.0));
    }

    #[test]
    fn test_display_is_parseable() {
        let c = Circle {
            center: pt(1.0, 2.5),
            radius: 3.0,
        };
        assert_eq!(c.to_string(), "<(1,2.5),3>");
        assert_eq!(parse_circle(&c.to_string()).unwrap(), c);

        let path = Path {
            points: vec![pt(0.0, 0.0), pt(1.0, 1.0)],
            closed: false,
        };
        assert_eq!(path.to_string(), "[(0,0),(1,1)]");
        assert_eq!(parse_path(&path.to_string()).unwrap(), path);
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(split_top_level("(1,2),3", ','), vec!["(1,2)", "3"]);
        assert_eq!(
            split_top_level("(1,1),(0,0);(2,2),(1,1)", ';'),
            vec!["(1,1),(0,0)", "(2,2),(1,1)"]
        );
    }
}
