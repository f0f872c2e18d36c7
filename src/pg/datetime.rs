//! Text-format date and timestamp parsing.
//!
//! PostgreSQL prints ISO dates by default: `1988-07-13 03:28:46.123-08`,
//! with a trailing ` BC` for years before the common era and the literals
//! `infinity` / `-infinity` for unbounded values.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::{Error, PgResult};

/// A date/time that may also be one of PostgreSQL's infinity sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Infinite<T> {
    NegInfinity,
    Value(T),
    Infinity,
}

impl<T> Infinite<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Infinite::Value(v) => Some(v),
            _ => None,
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Infinite<U> {
        match self {
            Infinite::NegInfinity => Infinite::NegInfinity,
            Infinite::Value(v) => Infinite::Value(f(v)),
            Infinite::Infinity => Infinite::Infinity,
        }
    }
}

fn invalid(kind: &str, value: &str) -> Error {
    Error::Type(format!("'{}' could not be parsed as {}", value, kind))
}

fn sentinel(value: &str) -> Option<Infinite<()>> {
    match value {
        "infinity" => Some(Infinite::Infinity),
        "-infinity" => Some(Infinite::NegInfinity),
        _ => None,
    }
}

fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Strip a trailing ` BC`, reporting whether it was there.
fn split_era(value: &str) -> (&str, bool) {
    match value.strip_suffix(" BC") {
        Some(rest) => (rest, true),
        None => (value, false),
    }
}

fn ymd(value: &str, bc: bool) -> Option<NaiveDate> {
    let mut parts = value.splitn(3, '-');
    let year = digits(parts.next()?)? as i32;
    let month = parts.next().filter(|m| m.len() == 2).and_then(digits)?;
    let day = parts.next().filter(|d| d.len() == 2).and_then(digits)?;
    let year = if bc { -year } else { year };
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn parse_date(value: &str) -> PgResult<Infinite<NaiveDate>> {
    if let Some(s) = sentinel(value) {
        return Ok(s.map(|_| NaiveDate::MIN));
    }
    let (date, bc) = split_era(value);
    ymd(date, bc)
        .map(Infinite::Value)
        .ok_or_else(|| invalid("date", value))
}

/// Split `HH:MM:SS[.frac]<tz>` into a time and the remaining zone text.
fn time_and_zone(value: &str) -> Option<(NaiveTime, &str)> {
    if value.len() < 8 {
        return None;
    }
    let (hms, mut rest) = value.split_at(8);
    let mut parts = hms.split(':');
    let h = parts.next().and_then(digits)?;
    let m = parts.next().and_then(digits)?;
    let s = parts.next().and_then(digits)?;

    let mut nanos = 0;
    if let Some(frac) = rest.strip_prefix('.') {
        let len = frac.bytes().take_while(u8::is_ascii_digit).count();
        let (frac_digits, tail) = frac.split_at(len);
        let mut padded: String = frac_digits.chars().take(9).collect();
        while padded.len() < 9 {
            padded.push('0');
        }
        nanos = digits(&padded)?;
        rest = tail;
    }

    NaiveTime::from_hms_nano_opt(h, m, s, nanos).map(|t| (t, rest))
}

/// Offset in seconds east of UTC from `Z`, `+HH`, `+HH:MM` or `+HH:MM:SS`.
fn zone_offset(zone: &str) -> Option<Option<i32>> {
    if zone.is_empty() {
        return Some(None);
    }
    if zone == "Z" {
        return Some(Some(0));
    }
    let sign = match zone.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let body = zone[1..].replace(':', "");
    if body.len() % 2 != 0 || body.len() > 6 {
        return None;
    }
    let mut secs = 0i32;
    for (i, unit) in [3600, 60, 1].iter().enumerate() {
        if let Some(chunk) = body.get(i * 2..i * 2 + 2) {
            secs += digits(chunk)? as i32 * unit;
        }
    }
    Some(Some(sign * secs))
}

/// Parse into a naive date-time plus the optional zone offset in seconds.
fn parse_parts(value: &str) -> Option<(NaiveDateTime, Option<i32>)> {
    let (body, bc) = split_era(value);
    let Some((date, rest)) = body.split_once(' ') else {
        // a bare date means midnight
        return ymd(body, bc).map(|d| (d.and_time(NaiveTime::MIN), None));
    };
    let date = ymd(date, bc)?;
    let (time, zone) = time_and_zone(rest)?;
    let offset = zone_offset(zone)?;
    Some((date.and_time(time), offset))
}

/// `timestamp without time zone`. Any zone suffix is ignored.
pub fn parse_timestamp(value: &str) -> PgResult<Infinite<NaiveDateTime>> {
    if let Some(s) = sentinel(value) {
        return Ok(s.map(|_| NaiveDateTime::MIN));
    }
    parse_parts(value)
        .map(|(dt, _)| Infinite::Value(dt))
        .ok_or_else(|| invalid("timestamp", value))
}

/// `timestamp with time zone`, normalized to UTC. No zone means UTC.
pub fn parse_timestamptz(value: &str) -> PgResult<Infinite<DateTime<Utc>>> {
    if let Some(s) = sentinel(value) {
        return Ok(s.map(|_| DateTime::<Utc>::MIN_UTC));
    }
    let (naive, offset) = parse_parts(value).ok_or_else(|| invalid("timestamptz", value))?;
    let offset = FixedOffset::east_opt(offset.unwrap_or(0))
        .ok_or_else(|| invalid("timestamptz", value))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| Infinite::Value(dt.with_timezone(&Utc)))
        .ok_or_else(|| invalid("timestamptz", value))
}

// ============================================================================
// Formatting
// ============================================================================

fn era_year(year: i32) -> (i32, &'static str) {
    if year < 0 {
        (-year, " BC")
    } else {
        (year, "")
    }
}

pub fn format_date(date: &NaiveDate) -> String {
    use chrono::Datelike;
    let (year, era) = era_year(date.year());
    format!("{:04}-{}{}", year, date.format("%m-%d"), era)
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    use chrono::Datelike;
    let (year, era) = era_year(ts.year());
    format!("{:04}-{}{}", year, ts.format("%m-%dT%H:%M:%S%.6f"), era)
}

/// ISO-8601 with an explicit numeric offset, e.g. `2021-03-04T05:06:07.000000+00:00`.
pub fn format_timestamptz(ts: &DateTime<Utc>) -> String {
    use chrono::Datelike;
    let (year, era) = era_year(ts.year());
    format!("{:04}-{}{}", year, ts.format("%m-%dT%H:%M:%S%.6f%:z"), era)
}

pub fn format_infinite<T>(value: &Infinite<T>, f: impl FnOnce(&T) -> String) -> String {
    match value {
        Infinite::NegInfinity => "-infinity".to_string(),
        Infinite::Value(v) => f(v),
        Infinite::Infinity => "infinity".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_date() {
        let d = parse_date("2021-02-28").unwrap();
        assert_eq!(d, Infinite::Value(NaiveDate::from_ymd_opt(2021, 2, 28).unwrap()));
        assert!(parse_date("2021-02-30").is_err());
        assert!(parse_date("not a date").is_err());
    }

    #[test]
    fn test_infinity_sentinels() {
        assert_eq!(parse_date("infinity").unwrap(), Infinite::Infinity);
        assert_eq!(parse_timestamp("-infinity").unwrap(), Infinite::NegInfinity);
        assert_eq!(parse_timestamptz("infinity").unwrap(), Infinite::Infinity);
    }

    #[test]
    fn test_bc_years_are_negated() {
        let d = parse_date("0044-03-15 BC").unwrap();
        assert_eq!(d.value().unwrap().year(), -44);

        let ts = parse_timestamp("0044-03-15 12:00:00 BC").unwrap();
        assert_eq!(ts.value().unwrap().year(), -44);
        assert_eq!(format_date(d.value().unwrap()), "0044-03-15 BC");
    }

    #[test]
    fn test_timestamp_fraction() {
        let ts = parse_timestamp("1988-07-13 03:28:46.007").unwrap();
        let ts = ts.value().unwrap();
        assert_eq!(ts.hour(), 3);
        assert_eq!(ts.second(), 46);
        assert_eq!(ts.nanosecond(), 7_000_000);
    }

    #[test]
    fn test_timestamptz_offset_sign() {
        // 03:28 at UTC-8 is 11:28 UTC
        let ts = parse_timestamptz("1988-07-13 03:28:46-08").unwrap();
        let ts = ts.value().unwrap();
        assert_eq!(ts.hour(), 11);
        assert_eq!(ts.minute(), 28);

        let ts = parse_timestamptz("2021-01-01 05:30:00+05:30").unwrap();
        assert_eq!(ts.value().unwrap().hour(), 0);
        assert_eq!(ts.value().unwrap().minute(), 0);
    }

    #[test]
    fn test_timestamptz_round_trip_through_format() {
        let ts = parse_timestamptz("2021-03-04 05:06:07.5+00").unwrap();
        let text = format_timestamptz(ts.value().unwrap());
        assert_eq!(text, "2021-03-04T05:06:07.500000+00:00");
    }

    #[test]
    fn test_bare_date_as_timestamp() {
        let ts = parse_timestamp("2020-01-02").unwrap();
        assert_eq!(ts.value().unwrap().hour(), 0);
    }
}
