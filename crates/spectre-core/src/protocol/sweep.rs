// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Sweep row parser.
//!
//! Parses the CSV rows written by `hackrf_sweep` and `rtl_power`. Each row
//! covers one frequency segment of one sweep pass.
//!
//! Row format:
//! ```text
//! <date>, <time>, <hz_low>, <hz_high>, <hz_bin_width>, <num_samples>, <dB>, <dB>, ...
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{InstantaneousSample, ParseError, Protocol};

/// Number of fixed columns preceding the dB values.
const HEADER_FIELDS: usize = 6;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parser for sweep rows.
///
/// Stamps every reading with the station identifier and source name it was
/// created with.
#[derive(Debug, Clone)]
pub struct SweepParser {
    identifier: String,
    source: String,
}

impl SweepParser {
    /// Create a new sweep parser.
    #[must_use]
    pub fn new(identifier: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            source: source.into(),
        }
    }
}

impl Protocol for SweepParser {
    type Reading = InstantaneousSample;
    type Error = ParseError;

    fn parse(&mut self, line: &str) -> Result<Vec<InstantaneousSample>, ParseError> {
        let row = parse_sweep_row(line)?;
        Ok(row.readings(&self.identifier, &self.source).collect())
    }
}

/// A decoded sweep row before bins are expanded into readings.
#[derive(Debug)]
struct SweepRow {
    timestamp: DateTime<Utc>,
    segment_low: u64,
    segment_high: u64,
    bin_width: u64,
    sample_count: u64,
    decibels: Vec<f64>,
}

impl SweepRow {
    fn readings<'a>(
        &'a self,
        identifier: &'a str,
        source: &'a str,
    ) -> impl Iterator<Item = InstantaneousSample> + 'a {
        self.decibels.iter().enumerate().map(move |(i, &db)| {
            let (low, high) = bin_range(self.segment_low, self.segment_high, self.bin_width, i as u64);
            InstantaneousSample {
                identifier: identifier.to_string(),
                source: source.to_string(),
                freq_center: (low + high) / 2,
                freq_low: low,
                freq_high: high,
                db,
                sample_count: self.sample_count,
                timestamp: self.timestamp,
            }
        })
    }
}

/// Lowest and highest frequency of bin `bin` in a segment.
///
/// The last bin is clipped to the segment edge when the segment width is not
/// a multiple of the bin width.
fn bin_range(segment_low: u64, segment_high: u64, bin_width: u64, bin: u64) -> (u64, u64) {
    let low = segment_low + bin * bin_width;
    let high = low.saturating_add(bin_width).min(segment_high);
    (low, high)
}

/// Parse an integer column, truncating any fractional part ("12500.00").
/// Integer fields may carry a decimal fraction (`1000000.00`), which is
/// truncated. Anything other than digits after the point is rejected.
fn parse_integer(field: &'static str, value: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::InvalidValue {
        field,
        value: value.to_string(),
    };
    let (integral, fraction) = value.split_once('.').unwrap_or((value, ""));
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    integral.parse::<u64>().map_err(|_| invalid())
}

fn parse_timestamp(date: &str, time: &str) -> Result<DateTime<Utc>, ParseError> {
    let raw = format!("{date} {time}");
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| ParseError::InvalidValue {
            field: "timestamp",
            value: raw,
        })
}

fn parse_sweep_row(line: &str) -> Result<SweepRow, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::InvalidFormat("empty row".to_string()));
    }

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() <= HEADER_FIELDS {
        return Err(ParseError::MissingField("dB"));
    }

    let timestamp = parse_timestamp(parts[0], parts[1])?;
    let segment_low = parse_integer("hz_low", parts[2])?;
    let segment_high = parse_integer("hz_high", parts[3])?;
    let bin_width = parse_integer("hz_bin_width", parts[4])?;
    let sample_count = parse_integer("num_samples", parts[5])?;

    if segment_high <= segment_low {
        return Err(ParseError::InvalidFormat(format!(
            "segment upper edge {segment_high} Hz is not above lower edge {segment_low} Hz"
        )));
    }
    if bin_width == 0 {
        return Err(ParseError::InvalidValue {
            field: "hz_bin_width",
            value: parts[4].to_string(),
        });
    }
    if sample_count == 0 {
        return Err(ParseError::InvalidValue {
            field: "num_samples",
            value: parts[5].to_string(),
        });
    }

    let decibels = parts[HEADER_FIELDS..]
        .iter()
        .map(|value| match value.parse::<f64>() {
            Ok(db) if db.is_finite() => Ok(db),
            _ => Err(ParseError::InvalidValue {
                field: "dB",
                value: (*value).to_string(),
            }),
        })
        .collect::<Result<Vec<f64>, ParseError>>()?;

    // Every bin must start inside the segment, otherwise the bins would not tile it.
    let last_low = (decibels.len() as u64 - 1)
        .saturating_mul(bin_width)
        .saturating_add(segment_low);
    if last_low >= segment_high {
        return Err(ParseError::InvalidFormat(format!(
            "{} bins of {bin_width} Hz overrun segment {segment_low}-{segment_high} Hz",
            decibels.len()
        )));
    }

    Ok(SweepRow {
        timestamp,
        segment_low,
        segment_high,
        bin_width,
        sample_count,
        decibels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parser() -> SweepParser {
        SweepParser::new("station-1", "hackrf")
    }

    #[test]
    fn test_parse_two_bins() {
        let line = "2021-12-01,10:00:01,400000000,400025000,12500,10,-20.0,-18.0";
        let readings = parser().parse(line).unwrap();

        assert_eq!(readings.len(), 2);
        let expected_time = Utc.with_ymd_and_hms(2021, 12, 1, 10, 0, 1).unwrap();

        assert_eq!(readings[0].freq_center, 400_006_250);
        assert_eq!(readings[0].freq_low, 400_000_000);
        assert_eq!(readings[0].freq_high, 400_012_500);
        assert_eq!(readings[0].sample_count, 10);
        assert!((readings[0].db - (-20.0)).abs() < f64::EPSILON);
        assert_eq!(readings[0].timestamp, expected_time);

        assert_eq!(readings[1].freq_center, 400_018_750);
        assert_eq!(readings[1].sample_count, 10);
        assert!((readings[1].db - (-18.0)).abs() < f64::EPSILON);
        assert_eq!(readings[1].timestamp, expected_time);

        assert_eq!(readings[0].identifier, "station-1");
        assert_eq!(readings[0].source, "hackrf");
    }

    #[test]
    fn test_parse_hackrf_spacing_and_fractions() {
        let line = "2024-03-05, 17:42:09.273913, 2400000000, 2405000000, 1000000.00, 20, -70.12, -68.50, -71.00, -69.25, -72.75";
        let readings = parser().parse(line).unwrap();

        assert_eq!(readings.len(), 5);
        assert_eq!(readings[0].freq_low, 2_400_000_000);
        assert_eq!(readings[4].freq_high, 2_405_000_000);
        assert_eq!(readings[0].timestamp.timestamp_subsec_micros(), 273_913);
    }

    #[test]
    fn test_bins_tile_segment_with_clipped_last_bin() {
        // 30 kHz segment with 12.5 kHz bins: two full bins and a 5 kHz remainder.
        let line = "2021-12-01,10:00:01,400000000,400030000,12500,4,-20.0,-18.0,-19.0";
        let readings = parser().parse(line).unwrap();

        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].freq_low, 400_000_000);
        for pair in readings.windows(2) {
            assert_eq!(pair[0].freq_high, pair[1].freq_low);
            assert_eq!(pair[0].freq_high - pair[0].freq_low, 12_500);
        }
        let last = &readings[2];
        assert_eq!(last.freq_high, 400_030_000);
        assert_eq!(last.freq_high - last.freq_low, 5_000);
        assert_eq!(last.freq_center, 400_027_500);
    }

    #[test]
    fn test_bad_decibel_rejects_row() {
        let line = "2021-12-01,10:00:01,400000000,400025000,12500,10,-20.0,oops";
        let err = parser().parse(line).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { field: "dB", .. }));
    }

    #[test]
    fn test_nan_decibel_rejects_row() {
        let line = "2021-12-01,10:00:01,400000000,400025000,12500,10,-20.0,nan";
        assert!(parser().parse(line).is_err());
    }

    #[test]
    fn test_bad_timestamp_rejects_row() {
        let line = "2021-13-01,10:00:01,400000000,400025000,12500,10,-20.0,-18.0";
        let err = parser().parse(line).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { field: "timestamp", .. }));
    }

    #[test]
    fn test_bad_frequency_rejects_row() {
        let line = "2021-12-01,10:00:01,abc,400025000,12500,10,-20.0,-18.0";
        let err = parser().parse(line).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { field: "hz_low", .. }));
    }

    #[test]
    fn test_junk_fraction_rejects_row() {
        let line = "2021-12-01,10:00:01,400000000.junk,400025000,12500.x,10,-20.0,-18.0";
        let err = parser().parse(line).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { field: "hz_low", .. }));

        let line = "2021-12-01,10:00:01,400000000,400025000,12500.x,10,-20.0,-18.0";
        assert!(parser().parse(line).is_err());

        let line = "2021-12-01,10:00:01,400000000.,400025000.50,12500.0,10,-20.0,-18.0";
        assert_eq!(parser().parse(line).unwrap().len(), 2);
    }

    #[test]
    fn test_row_without_bins() {
        let line = "2021-12-01,10:00:01,400000000,400025000,12500,10";
        let err = parser().parse(line).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("dB")));
    }

    #[test]
    fn test_too_many_bins_for_segment() {
        let line = "2021-12-01,10:00:01,400000000,400025000,12500,10,-20.0,-18.0,-17.0";
        let err = parser().parse(line).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_zero_bin_width() {
        let line = "2021-12-01,10:00:01,400000000,400025000,0,10,-20.0";
        assert!(parser().parse(line).is_err());
    }

    #[test]
    fn test_empty_line() {
        assert!(matches!(
            parser().parse("   ").unwrap_err(),
            ParseError::InvalidFormat(_)
        ));
    }

    #[test]
    fn test_bin_range() {
        assert_eq!(bin_range(100, 130, 10, 0), (100, 110));
        assert_eq!(bin_range(100, 125, 10, 2), (120, 125));
    }
}
