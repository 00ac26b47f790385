//! DASH MPD window discovery
//!
//! Reads the root `MPD` attributes only:
//! - `type` (static or dynamic)
//! - `availabilityStartTime`
//! - `timeShiftBufferDepth`

use crate::{Error, Result, WindowDescriptor, WindowType};
use chrono::{DateTime, NaiveDateTime};
use nom::{
    character::complete::char,
    combinator::opt,
    number::complete::double,
    sequence::{preceded, terminated},
    IResult, Parser,
};

/// Derive the live window of an MPD as seen at `now_ms`
///
/// DASH players report time against `availabilityStartTime`, so the
/// correction is the distance from that anchor to the window start.
pub fn parse_mpd(content: &str, now_ms: i64, window_type: WindowType) -> Result<WindowDescriptor> {
    let attrs = mpd_attributes(content)
        .ok_or_else(|| Error::ManifestParse("no MPD element found".into()))?;

    let is_dynamic = extract_attr(attrs, "type").as_deref() == Some("dynamic");
    if !is_dynamic || !window_type.is_live() {
        return Ok(WindowDescriptor::default());
    }

    let availability_start = extract_attr(attrs, "availabilityStartTime")
        .ok_or_else(|| Error::ManifestParse("dynamic MPD without availabilityStartTime".into()))
        .and_then(|value| parse_date_time_ms(&value))?;

    let buffer_depth = extract_attr(attrs, "timeShiftBufferDepth")
        .map(|value| parse_iso8601_duration(&value))
        .transpose()?;

    let window_start = match (window_type, buffer_depth) {
        (WindowType::Sliding, Some(depth)) => now_ms - (depth * 1000.0).round() as i64,
        _ => availability_start,
    };

    Ok(WindowDescriptor {
        window_start_time: Some(window_start),
        window_end_time: Some(now_ms),
        time_correction_seconds: (window_start - availability_start) as f64 / 1000.0,
    })
}

/// Attribute text of the root `MPD` element
fn mpd_attributes(content: &str) -> Option<&str> {
    let start = content.find("<MPD")? + "<MPD".len();
    let rest = &content[start..];
    let end = rest.find('>')?;
    Some(&rest[..end])
}

/// Extract an attribute value from an element's attribute text
fn extract_attr(attrs: &str, name: &str) -> Option<String> {
    let pattern = format!("{}=\"", name);
    let mut from = 0;
    while let Some(found) = attrs[from..].find(&pattern) {
        let at = from + found;
        // Skip matches that are the tail of a longer attribute name
        if attrs[..at].ends_with(char::is_whitespace) {
            let rest = &attrs[at + pattern.len()..];
            let end = rest.find('"')?;
            return Some(rest[..end].to_string());
        }
        from = at + pattern.len();
    }
    None
}

fn parse_date_time_ms(value: &str) -> Result<i64> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.timestamp_millis());
    }
    // Offset-less timestamps are UTC in practice
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|e| Error::ManifestParse(format!("invalid date '{}': {}", value, e)))
}

/// Parse an ISO 8601 duration (`PnWnDTnHnMnS`) into seconds
pub fn parse_iso8601_duration(value: &str) -> Result<f64> {
    match iso8601_duration(value.trim()) {
        Ok(("", seconds)) => Ok(seconds),
        _ => Err(Error::ManifestParse(format!("invalid duration '{}'", value))),
    }
}

fn iso8601_duration(input: &str) -> IResult<&str, f64> {
    let (input, _) = char('P').parse(input)?;
    let (input, weeks) = designated(input, 'W')?;
    let (input, days) = designated(input, 'D')?;
    let (input, time) = opt(preceded(char('T'), time_part)).parse(input)?;

    let (hours, minutes, seconds) = time.unwrap_or((0.0, 0.0, 0.0));
    let total = weeks.unwrap_or(0.0) * 604_800.0
        + days.unwrap_or(0.0) * 86_400.0
        + hours * 3_600.0
        + minutes * 60.0
        + seconds;

    Ok((input, total))
}

fn time_part(input: &str) -> IResult<&str, (f64, f64, f64)> {
    let (input, hours) = designated(input, 'H')?;
    let (input, minutes) = designated(input, 'M')?;
    let (input, seconds) = designated(input, 'S')?;
    Ok((
        input,
        (
            hours.unwrap_or(0.0),
            minutes.unwrap_or(0.0),
            seconds.unwrap_or(0.0),
        ),
    ))
}

/// One optional `<number><unit>` component
fn designated(input: &str, unit: char) -> IResult<&str, Option<f64>> {
    opt(terminated(double, char(unit))).parse(input)
}
