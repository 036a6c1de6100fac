//! Line classification for the controller board's output.
//!
//! Everything here is pure and total: any input line maps to exactly one
//! [`LineEvent`], and garbled numeric fragments become `None` instead of errors.

use super::{ACK_AT_CAPTURE, ACK_AT_HOME, ACK_TARE, MEASURED_MARKER, WEIGH_DONE};
use serde::{Deserialize, Serialize};

/// Weight / temperature / humidity reading.
///
/// Each field is independently optional. Fields accumulate across partial
/// `MEASURED` lines; a present value is only ever replaced by another
/// successfully parsed value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Net weight in grams
    pub weight_g: Option<f64>,
    /// Temperature in °C
    pub temperature_c: Option<f64>,
    /// Relative humidity in %
    pub humidity_pct: Option<f64>,
}

impl MeasurementRecord {
    /// Fold a partial reading into this record, last parsed value wins per field.
    pub fn absorb(&mut self, partial: &MeasurementRecord) {
        if partial.weight_g.is_some() {
            self.weight_g = partial.weight_g;
        }
        if partial.temperature_c.is_some() {
            self.temperature_c = partial.temperature_c;
        }
        if partial.humidity_pct.is_some() {
            self.humidity_pct = partial.humidity_pct;
        }
    }

    /// No field has been received.
    pub fn is_empty(&self) -> bool {
        self.weight_g.is_none() && self.temperature_c.is_none() && self.humidity_pct.is_none()
    }

    /// Every field has been received.
    pub fn is_complete(&self) -> bool {
        self.weight_g.is_some() && self.temperature_c.is_some() && self.humidity_pct.is_some()
    }
}

impl std::fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn field(v: Option<f64>) -> String {
            v.map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "weight={} g, T={} C, H={} %",
            field(self.weight_g),
            field(self.temperature_c),
            field(self.humidity_pct)
        )
    }
}

/// Meaning of one line received from the board.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// Informational output; never affects protocol progress
    Log(String),
    /// One of the command acknowledgments
    Ack(&'static str),
    /// A `MEASURED` line; fields that did not parse are `None`
    Measurement(MeasurementRecord),
    /// `WEIGH_DONE`
    Done,
}

/// Classify a single line (surrounding whitespace is ignored).
pub fn classify(line: &str) -> LineEvent {
    let line = line.trim();

    if line == WEIGH_DONE {
        return LineEvent::Done;
    }

    if let Some(ack) = [ACK_TARE, ACK_AT_CAPTURE, ACK_AT_HOME]
        .into_iter()
        .find(|ack| *ack == line)
    {
        return LineEvent::Ack(ack);
    }

    let mut tokens = line.split_whitespace();
    if tokens.next() == Some(MEASURED_MARKER) {
        return LineEvent::Measurement(parse_fragments(tokens));
    }

    LineEvent::Log(line.to_string())
}

/// Parse `KEY=VALUE<unit>` fragments; unknown keys and unparseable values are skipped.
fn parse_fragments<'a>(fragments: impl Iterator<Item = &'a str>) -> MeasurementRecord {
    let mut record = MeasurementRecord::default();
    for fragment in fragments {
        let Some((key, value)) = fragment.split_once('=') else {
            continue;
        };
        let Some(value) = parse_number(value) else {
            continue;
        };
        match key {
            "W" => record.weight_g = Some(value),
            "T" => record.temperature_c = Some(value),
            "H" => record.humidity_pct = Some(value),
            _ => {}
        }
    }
    record
}

/// Extract a number from a fragment such as `12.3g` or `-4.0C`.
///
/// Only digits, signs, and decimal points are kept; everything else (unit
/// suffixes included) is discarded before parsing. Returns `None` when no digit
/// survives or the remaining characters do not form a number.
pub fn parse_number(fragment: &str) -> Option<f64> {
    let kept: String = fragment
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        .collect();

    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    kept.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_measurement_line() {
        let event = classify("MEASURED W=1.23g T=27.4C H=61.2%");
        assert_eq!(
            event,
            LineEvent::Measurement(MeasurementRecord {
                weight_g: Some(1.23),
                temperature_c: Some(27.4),
                humidity_pct: Some(61.2),
            })
        );
    }

    #[test]
    fn unit_suffixes_do_not_matter() {
        let cases = [
            ("MEASURED W=12.3 T=25 H=40", (12.3, 25.0, 40.0)),
            ("MEASURED W=12.3grams T=25degC H=40pct", (12.3, 25.0, 40.0)),
            ("  MEASURED   W=-0.5g T=-3.25C H=100%  ", (-0.5, -3.25, 100.0)),
        ];
        for (line, (w, t, h)) in cases {
            let LineEvent::Measurement(rec) = classify(line) else {
                panic!("not a measurement: {line}");
            };
            assert_eq!(rec.weight_g, Some(w), "{line}");
            assert_eq!(rec.temperature_c, Some(t), "{line}");
            assert_eq!(rec.humidity_pct, Some(h), "{line}");
        }
    }

    #[test]
    fn garbled_fragment_leaves_field_absent() {
        let event = classify("MEASURED W=abc T=22.0C");
        assert_eq!(
            event,
            LineEvent::Measurement(MeasurementRecord {
                weight_g: None,
                temperature_c: Some(22.0),
                humidity_pct: None,
            })
        );
    }

    #[test]
    fn malformed_numbers_are_skipped() {
        assert_eq!(parse_number("1.2.3g"), None);
        assert_eq!(parse_number("--"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("+7g"), Some(7.0));
    }

    #[test]
    fn acknowledgments_and_done_are_exact_matches() {
        assert_eq!(classify("ZERO_DONE"), LineEvent::Ack(ACK_TARE));
        assert_eq!(classify("AT_CAPTURE\r"), LineEvent::Ack(ACK_AT_CAPTURE));
        assert_eq!(classify("AT_HOME"), LineEvent::Ack(ACK_AT_HOME));
        assert_eq!(classify("WEIGH_DONE"), LineEvent::Done);

        assert!(matches!(classify("AT_CAPTURE?"), LineEvent::Log(_)));
        assert!(matches!(classify("at_home"), LineEvent::Log(_)));
        assert!(matches!(classify("WEIGH_DONE now"), LineEvent::Log(_)));
    }

    #[test]
    fn marker_must_be_a_whole_token() {
        assert!(matches!(classify("MEASUREDW=1g"), LineEvent::Log(_)));
        assert!(matches!(classify("NOT MEASURED W=1g"), LineEvent::Log(_)));
    }

    #[test]
    fn other_lines_are_logs() {
        assert_eq!(classify("BOOT OK"), LineEvent::Log("BOOT OK".to_string()));
        assert_eq!(classify("Scale ready"), LineEvent::Log("Scale ready".to_string()));
    }

    #[test]
    fn absorb_keeps_parsed_fields() {
        let mut rec = MeasurementRecord::default();
        rec.absorb(&MeasurementRecord {
            weight_g: Some(12.3),
            temperature_c: Some(25.0),
            humidity_pct: Some(40.1),
        });
        rec.absorb(&MeasurementRecord {
            weight_g: None,
            temperature_c: None,
            humidity_pct: Some(41.0),
        });
        assert_eq!(rec.weight_g, Some(12.3));
        assert_eq!(rec.temperature_c, Some(25.0));
        assert_eq!(rec.humidity_pct, Some(41.0));
        assert!(rec.is_complete());
    }

    #[test]
    fn repeated_key_in_one_line_last_wins() {
        let LineEvent::Measurement(rec) = classify("MEASURED W=1g W=2g") else {
            panic!("not a measurement");
        };
        assert_eq!(rec.weight_g, Some(2.0));
    }
}
