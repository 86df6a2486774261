//! Number and time rendering

use chrono::{Local, SecondsFormat, TimeZone};

/// `1234567` -> `1,234,567`
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// RFC 3339 in the local time zone, truncated toward zero to whole seconds
pub fn format_timestamp(ms: i64) -> String {
    format_timestamp_in(ms, &Local)
}

pub fn format_timestamp_in<Tz>(ms: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    match tz.timestamp_opt(ms / 1000, 0).earliest() {
        Some(time) => time.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => ms.to_string(),
    }
}
