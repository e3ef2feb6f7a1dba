//! Built-in XML Schema datatype checks
//!
//! Only the lexical space is checked. The empty string is always accepted;
//! emptiness is what `required` is for. Types this module does not know are
//! accepted too.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use url::Url;

use super::item::ItemType;
use super::ns;

/// Whether `value` is in the lexical space of `item_type`
pub fn is_valid(item_type: &ItemType, value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if item_type.namespace != ns::XSD && item_type.namespace != ns::XFORMS {
        return true;
    }
    let v = value.trim();
    match item_type.local.as_str() {
        "boolean" => matches!(v, "true" | "false" | "1" | "0"),
        "decimal" => is_decimal(v),
        "double" | "float" => is_double(v),
        "date" => parse_date(v).is_some(),
        "dateTime" => parse_date_time(v).is_some(),
        "time" => parse_time(v).is_some(),
        "anyURI" => is_uri(v),
        local => match integer_bounds(local) {
            Some(bounds) => is_integer(v, bounds),
            None => true,
        },
    }
}

#[derive(Clone, Copy)]
enum Bounds {
    Unbounded,
    NonNegative,
    Positive,
    NonPositive,
    Negative,
    Range(i128, i128),
}

fn integer_bounds(local: &str) -> Option<Bounds> {
    Some(match local {
        "integer" => Bounds::Unbounded,
        "nonNegativeInteger" => Bounds::NonNegative,
        "positiveInteger" => Bounds::Positive,
        "nonPositiveInteger" => Bounds::NonPositive,
        "negativeInteger" => Bounds::Negative,
        "long" => Bounds::Range(i64::MIN.into(), i64::MAX.into()),
        "int" => Bounds::Range(i32::MIN.into(), i32::MAX.into()),
        "short" => Bounds::Range(i16::MIN.into(), i16::MAX.into()),
        "byte" => Bounds::Range(i8::MIN.into(), i8::MAX.into()),
        "unsignedLong" => Bounds::Range(0, u64::MAX.into()),
        "unsignedInt" => Bounds::Range(0, u32::MAX.into()),
        "unsignedShort" => Bounds::Range(0, u16::MAX.into()),
        "unsignedByte" => Bounds::Range(0, u8::MAX.into()),
        _ => return None,
    })
}

/// Split an optional sign from a digit string
fn signed_digits(v: &str) -> Option<(bool, &str)> {
    let (negative, digits) = match v.as_bytes().first()? {
        b'-' => (true, &v[1..]),
        b'+' => (false, &v[1..]),
        _ => (false, v),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((negative, digits))
}

fn is_integer(v: &str, bounds: Bounds) -> bool {
    let Some((negative, digits)) = signed_digits(v) else {
        return false;
    };
    let zero = digits.bytes().all(|b| b == b'0');
    match bounds {
        Bounds::Unbounded => true,
        Bounds::NonNegative => !negative || zero,
        Bounds::Positive => !negative && !zero,
        Bounds::NonPositive => negative || zero,
        Bounds::Negative => negative && !zero,
        Bounds::Range(min, max) => v
            .parse::<i128>()
            .is_ok_and(|n| (min..=max).contains(&n)),
    }
}

fn is_decimal(v: &str) -> bool {
    let body = v.strip_prefix(['+', '-']).unwrap_or(v);
    let mut digits = 0;
    let mut dots = 0;
    for b in body.bytes() {
        match b {
            b'0'..=b'9' => digits += 1,
            b'.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

fn is_double(v: &str) -> bool {
    if matches!(v, "INF" | "+INF" | "-INF" | "NaN") {
        return true;
    }
    v.bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
        && v.parse::<f64>().is_ok()
}

fn is_uri(v: &str) -> bool {
    Url::parse(v).is_ok()
        || Url::parse("http://localhost/")
            .and_then(|base| base.join(v))
            .is_ok()
}

/// Strip a trailing `Z` or `±hh:mm` zone
fn split_timezone(v: &str) -> Option<(&str, Option<FixedOffset>)> {
    if let Some(body) = v.strip_suffix('Z') {
        return Some((body, FixedOffset::east_opt(0)));
    }
    let bytes = v.as_bytes();
    let n = bytes.len();
    if n > 6 && matches!(bytes[n - 6], b'+' | b'-') && bytes[n - 3] == b':' {
        let hours: i32 = v[n - 5..n - 3].parse().ok()?;
        let minutes: i32 = v[n - 2..].parse().ok()?;
        let seconds = (hours * 60 + minutes) * 60;
        let offset = if bytes[n - 6] == b'-' {
            FixedOffset::west_opt(seconds)
        } else {
            FixedOffset::east_opt(seconds)
        };
        return Some((&v[..n - 6], Some(offset?)));
    }
    Some((v, None))
}

/// `xsd:date` lexical form, zone ignored
pub fn parse_date(v: &str) -> Option<NaiveDate> {
    let (body, _) = split_timezone(v.trim())?;
    NaiveDate::parse_from_str(body, "%Y-%m-%d").ok()
}

/// `xsd:dateTime` lexical form with its zone, if any
pub fn parse_date_time(v: &str) -> Option<(NaiveDateTime, Option<FixedOffset>)> {
    let (body, zone) = split_timezone(v.trim())?;
    let parsed = NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some((parsed, zone))
}

/// `xsd:time` lexical form, zone ignored
pub fn parse_time(v: &str) -> Option<NaiveTime> {
    let (body, _) = split_timezone(v.trim())?;
    NaiveTime::parse_from_str(body, "%H:%M:%S%.f").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(local: &str, value: &str) -> bool {
        is_valid(&ItemType::xsd(local), value)
    }

    #[test]
    fn test_empty_and_unknown_accepted() {
        assert!(check("integer", ""));
        assert!(check("gYearMonth", "anything"));
        assert!(is_valid(&ItemType::new("urn:other", "integer"), "abc"));
    }

    #[test]
    fn test_numbers() {
        assert!(check("integer", "-0042"));
        assert!(!check("integer", "4.2"));
        assert!(check("decimal", "4.2"));
        assert!(check("decimal", "-.5"));
        assert!(!check("decimal", "1.2.3"));
        assert!(check("double", "1e10"));
        assert!(check("double", "-INF"));
        assert!(!check("double", "infinity"));
        assert!(check("unsignedByte", "255"));
        assert!(!check("unsignedByte", "256"));
        assert!(!check("positiveInteger", "0"));
        assert!(check("nonNegativeInteger", "-0"));
        assert!(check("long", "9223372036854775807"));
        assert!(!check("int", "2147483648"));
    }

    #[test]
    fn test_booleans_and_strings() {
        assert!(check("boolean", "true"));
        assert!(check("boolean", " 0 "));
        assert!(!check("boolean", "yes"));
        assert!(check("string", "  anything "));
    }

    #[test]
    fn test_dates_and_times() {
        assert!(check("date", "2024-02-29"));
        assert!(!check("date", "2023-02-29"));
        assert!(check("date", "2024-01-05-05:00"));
        assert!(check("dateTime", "2024-01-05T10:20:30Z"));
        assert!(check("dateTime", "2024-01-05T10:20:30.25+02:00"));
        assert!(!check("dateTime", "2024-01-05"));
        assert!(check("time", "23:59:59"));
        assert!(!check("time", "25:00:00"));
    }

    #[test]
    fn test_uris() {
        assert!(check("anyURI", "http://example.com/a?b"));
        assert!(check("anyURI", "relative/path"));
    }

    #[test]
    fn test_timezone_offset() {
        let (_, zone) = parse_date_time("2024-01-05T10:00:00-05:30").unwrap();
        assert_eq!(zone.unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
    }
}
