//! Relative joint angle from two inertial sensors.
//!
//! Each sensor exports a delimited text file with one orientation quaternion
//! per row (`timestamp, w, x, y, z`, preceded by a few header rows). The two
//! streams are paired strictly by position, not by timestamp.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::quaternion::{relative_angle, Quaternion};

/// Header rows skipped by default (sensor export preamble).
pub const DEFAULT_SKIP_ROWS: usize = 3;

/// Default column delimiter of sensor exports.
pub const DEFAULT_DELIMITER: char = '\t';

/// Fields a data row needs: timestamp plus four quaternion components.
pub const MIN_FIELDS_PER_ROW: usize = 5;

/// One orientation reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuaternionSample {
    /// Passed through verbatim; never interpreted.
    pub timestamp: String,
    pub orientation: Quaternion,
}

/// One relative-angle reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleSample {
    pub angle_deg: f64,
    /// Timestamp of the segment (second) sensor's sample.
    pub timestamp: String,
}

/// Output of lenient CSV parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSensor {
    pub samples: Vec<QuaternionSample>,
    /// Data rows (after the header skip) that were discarded as malformed.
    pub dropped_rows: usize,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a sensor export.
///
/// Rows end at `\n`, `\r\n` or a lone `\r`. The first `skip_rows` rows are
/// ignored. Any later row with fewer than
/// [`MIN_FIELDS_PER_ROW`] fields or a non-numeric quaternion component is
/// dropped and counted in [`ParsedSensor::dropped_rows`]; parsing itself
/// never fails. Invalid UTF-8 is replaced rather than rejected.
pub fn parse_quaternion_csv(content: &[u8], delimiter: char, skip_rows: usize) -> ParsedSensor {
    let text = String::from_utf8_lossy(content);
    let mut parsed = ParsedSensor::default();

    for line in records(&text).skip(skip_rows) {
        match parse_row(&split_row(line, delimiter)) {
            Some(sample) => parsed.samples.push(sample),
            None => parsed.dropped_rows += 1,
        }
    }

    parsed
}

fn parse_row(fields: &[String]) -> Option<QuaternionSample> {
    if fields.len() < MIN_FIELDS_PER_ROW {
        return None;
    }
    let number = |i: usize| fields[i].trim().parse::<f64>().ok();
    Some(QuaternionSample {
        timestamp: fields[0].trim().to_string(),
        orientation: Quaternion::new(number(1)?, number(2)?, number(3)?, number(4)?),
    })
}

/// Split `text` into rows. A trailing terminator does not start an empty row.
fn records(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let Some(end) = rest.find(&['\r', '\n'][..]) else {
            return Some(std::mem::take(&mut rest));
        };
        let line = &rest[..end];
        let terminator = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[end + terminator..];
        Some(line)
    })
}

/// Split a single row on `delimiter`. A double quote opens a quoted field
/// only at the start of a field; elsewhere it is kept literally.
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' && current.is_empty() {
            in_quotes = true;
        } else if ch == delimiter {
            result.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    result.push(current);
    result
}

/// Resolve a user-supplied delimiter string to a single character.
///
/// Accepts a literal character, or the spellings `\t` / `tab` for a tab.
pub fn parse_delimiter(raw: &str) -> Result<char, CoreError> {
    match raw {
        "\\t" | "tab" | "TAB" => return Ok('\t'),
        _ => {}
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(CoreError::InvalidInput(format!(
            "Delimiter must be a single character, got {raw:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

/// Pair the two streams by position and compute one angle per pair.
///
/// `reference` is walked in order; each of its samples consumes the next
/// unconsumed `segment` sample. The cursor never rewinds, so the output has
/// `min(reference.len(), segment.len())` entries.
pub fn align_and_compute(
    reference: &[QuaternionSample],
    segment: &[QuaternionSample],
    offset_deg: f64,
) -> Vec<AngleSample> {
    let mut cursor = segment.iter();
    let mut angles = Vec::with_capacity(reference.len().min(segment.len()));

    for r in reference {
        let Some(s) = cursor.next() else {
            break;
        };
        angles.push(AngleSample {
            angle_deg: relative_angle(&r.orientation, &s.orientation, offset_deg),
            timestamp: s.timestamp.clone(),
        });
    }

    angles
}

/// Parse both sensor exports and compute the relative angle series.
///
/// Sensor 1 is the reference (e.g. upper arm), sensor 2 the moving segment
/// (e.g. forearm). Fails with `InvalidInput` if either export has no usable
/// rows.
pub fn analyze_imu_csv(
    sensor1: &[u8],
    sensor2: &[u8],
    delimiter: char,
    skip_rows: usize,
    offset_deg: f64,
) -> Result<Vec<AngleSample>, CoreError> {
    let reference = parse_quaternion_csv(sensor1, delimiter, skip_rows);
    let segment = parse_quaternion_csv(sensor2, delimiter, skip_rows);

    for (name, parsed) in [("sensor1", &reference), ("sensor2", &segment)] {
        if parsed.dropped_rows > 0 {
            tracing::warn!(
                sensor = name,
                dropped_rows = parsed.dropped_rows,
                kept_rows = parsed.samples.len(),
                "Dropped malformed sensor rows",
            );
        }
        if parsed.samples.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "No parseable quaternion rows in {name} (expected timestamp, w, x, y, z after {skip_rows} header rows)"
            )));
        }
    }

    let angles = align_and_compute(&reference.samples, &segment.samples, offset_deg);
    tracing::debug!(
        reference_rows = reference.samples.len(),
        segment_rows = segment.samples.len(),
        angles = angles.len(),
        "Computed relative sensor angles",
    );
    Ok(angles)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::quaternion::DEFAULT_ANGLE_OFFSET_DEG;

    const HEADER: &str = "DeviceName\tIMU\nFormat\tquat\ntimestamp\tw\tx\ty\tz\n";

    fn export(rows: &[&str]) -> Vec<u8> {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text.into_bytes()
    }

    fn sample(ts: &str, q: Quaternion) -> QuaternionSample {
        QuaternionSample {
            timestamp: ts.to_string(),
            orientation: q,
        }
    }

    #[test]
    fn parses_rows_after_header() {
        let parsed = parse_quaternion_csv(
            &export(&["0.01\t1\t0\t0\t0", "0.02\t0.7071\t0.7071\t0\t0"]),
            '\t',
            DEFAULT_SKIP_ROWS,
        );
        assert_eq!(parsed.dropped_rows, 0);
        assert_eq!(parsed.samples.len(), 2);
        assert_eq!(parsed.samples[0].timestamp, "0.01");
        assert_eq!(parsed.samples[1].orientation.x, 0.7071);
    }

    #[test]
    fn malformed_rows_are_dropped_and_counted() {
        let parsed = parse_quaternion_csv(
            &export(&[
                "t0\t1\t0\t0\t0",
                "t1\t1\t0\t0",
                "t2\tone\t0\t0\t0",
                "",
                "t3\t 1 \t0\t0\t0\textra",
            ]),
            '\t',
            DEFAULT_SKIP_ROWS,
        );
        assert_eq!(parsed.dropped_rows, 3);
        let timestamps: Vec<_> = parsed.samples.iter().map(|s| s.timestamp.as_str()).collect();
        assert_eq!(timestamps, ["t0", "t3"]);
    }

    #[test]
    fn timestamp_is_not_required_to_be_numeric() {
        let parsed = parse_quaternion_csv(b"12:00:01.5,1,0,0,0\n", ',', 0);
        assert_eq!(parsed.samples[0].timestamp, "12:00:01.5");
    }

    #[test]
    fn quoted_fields_may_contain_delimiter() {
        let parsed = parse_quaternion_csv(b"\"2024-01-01, 10:00\",1,0,0,0\n", ',', 0);
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].timestamp, "2024-01-01, 10:00");
    }

    #[test]
    fn quote_inside_unquoted_field_is_literal() {
        let parsed = parse_quaternion_csv(b"ts\"x,1,0,0,0\n", ',', 0);
        assert_eq!(parsed.dropped_rows, 0);
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].timestamp, "ts\"x");
    }

    #[test]
    fn carriage_return_only_exports_are_split() {
        let parsed = parse_quaternion_csv(
            b"h1\rh2\rh3\rt0\t1\t0\t0\t0\rt1\t1\t0\t0\t0\r",
            '\t',
            DEFAULT_SKIP_ROWS,
        );
        assert_eq!(parsed.dropped_rows, 0);
        let timestamps: Vec<_> = parsed.samples.iter().map(|s| s.timestamp.as_str()).collect();
        assert_eq!(timestamps, ["t0", "t1"]);
    }

    #[test]
    fn mixed_line_endings_count_rows_once() {
        let parsed = parse_quaternion_csv(b"header\r\nt0,1,0,0,0\r\n\nt1,1,0,0,0", ',', 1);
        assert_eq!(parsed.dropped_rows, 1);
        assert_eq!(parsed.samples.len(), 2);
        assert_eq!(parsed.samples[1].timestamp, "t1");
    }

    #[test]
    fn skip_rows_beyond_input_yields_nothing() {
        let parsed = parse_quaternion_csv(b"a\nb\n", '\t', 10);
        assert!(parsed.samples.is_empty());
        assert_eq!(parsed.dropped_rows, 0);
    }

    #[test]
    fn pairing_is_positional_and_uses_segment_timestamps() {
        let reference: Vec<_> = (0..3)
            .map(|i| sample(&format!("r{i}"), Quaternion::IDENTITY))
            .collect();
        let segment: Vec<_> = (0..5)
            .map(|i| sample(&format!("s{i}"), Quaternion::IDENTITY))
            .collect();

        let angles = align_and_compute(&reference, &segment, 0.0);
        let timestamps: Vec<_> = angles.iter().map(|a| a.timestamp.as_str()).collect();
        assert_eq!(timestamps, ["s0", "s1", "s2"]);
        assert!(angles.iter().all(|a| a.angle_deg == 0.0));
    }

    #[test]
    fn pairing_stops_when_segment_runs_out() {
        let reference: Vec<_> = (0..4).map(|i| sample(&i.to_string(), Quaternion::IDENTITY)).collect();
        let segment = vec![sample("only", Quaternion::IDENTITY)];
        assert_eq!(align_and_compute(&reference, &segment, 0.0).len(), 1);
        assert!(align_and_compute(&[], &segment, 0.0).is_empty());
    }

    #[test]
    fn analyze_three_by_five_rows() {
        let s1 = export(&[
            "a0\t1\t0\t0\t0",
            "a1\t1\t0\t0\t0",
            "a2\t1\t0\t0\t0",
        ]);
        let s2 = export(&[
            "b0\t0.7071068\t0\t0\t0.7071068",
            "b1\t1\t0\t0\t0",
            "b2\t1\t0\t0\t0",
            "b3\t1\t0\t0\t0",
            "b4\t1\t0\t0\t0",
        ]);

        let angles =
            analyze_imu_csv(&s1, &s2, '\t', DEFAULT_SKIP_ROWS, DEFAULT_ANGLE_OFFSET_DEG).unwrap();

        assert_eq!(angles.len(), 3);
        assert_eq!(angles[0].timestamp, "b0");
        assert_eq!(angles[0].angle_deg, -90.0);
        assert_eq!(angles[1].angle_deg, -180.0);
        assert_eq!(angles[2].timestamp, "b2");
    }

    #[test]
    fn analyze_rejects_export_without_usable_rows() {
        let good = export(&["a0\t1\t0\t0\t0"]);
        let bad = export(&["garbage", "x\ty\tz"]);

        assert_matches!(
            analyze_imu_csv(&good, &bad, '\t', DEFAULT_SKIP_ROWS, 0.0),
            Err(CoreError::InvalidInput(_))
        );
        assert_matches!(
            analyze_imu_csv(&bad, &good, '\t', DEFAULT_SKIP_ROWS, 0.0),
            Err(CoreError::InvalidInput(_))
        );
    }

    #[test]
    fn delimiter_spellings() {
        assert_eq!(parse_delimiter("\\t").unwrap(), '\t');
        assert_eq!(parse_delimiter("tab").unwrap(), '\t');
        assert_eq!(parse_delimiter(";").unwrap(), ';');
        assert_matches!(parse_delimiter(""), Err(CoreError::InvalidInput(_)));
        assert_matches!(parse_delimiter(",;"), Err(CoreError::InvalidInput(_)));
    }
}
