use std::collections::BTreeMap;
use std::fmt;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

/// An error returned by [`Sample::parse`] and [`Sample::parse_all`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseSampleError(());

impl fmt::Display for ParseSampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse sample")
    }
}

impl std::error::Error for ParseSampleError {}

/// Validates a metric name.
///
/// Metric names cannot be empty, must begin with a letter, underscore or colon and can consist of
/// ASCII alphanumerics, underscores and colons.
fn is_valid_name(name: &str) -> bool {
    let mut iter = name.as_bytes().iter();
    if let Some(first_byte) = iter.next()
        && (first_byte.is_ascii_alphabetic() || matches!(first_byte, b'_' | b':'))
    {
        return iter.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b':'));
    }
    false
}

/// Validates a label name, which follows the rules of metric names without colons.
fn is_valid_label_name(name: &str) -> bool {
    let mut iter = name.as_bytes().iter();
    if let Some(first_byte) = iter.next()
        && (first_byte.is_ascii_alphabetic() || *first_byte == b'_')
    {
        return iter.all(|b| b.is_ascii_alphanumeric() || *b == b'_');
    }
    false
}

/// Parses a quoted label value up to its closing quote.
///
/// Returns the unescaped value and the remainder after the closing quote.
fn parse_label_value(string: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = string.char_indices();

    while let Some((index, c)) = chars.next() {
        match c {
            '"' => return Some((value, &string[index + 1..])),
            '\\' => match chars.next()?.1 {
                'n' => value.push('\n'),
                '\\' => value.push('\\'),
                '"' => value.push('"'),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            },
            c => value.push(c),
        }
    }

    None
}

/// Parses labels in the format `name="value",other="value"}`.
///
/// The opening brace must already be consumed. Returns the labels and the remainder after the
/// closing brace. A trailing comma is permitted, and duplicate names keep the last value.
fn parse_labels(mut string: &str) -> Option<(BTreeMap<String, String>, &str)> {
    let mut labels = BTreeMap::new();

    loop {
        string = string.trim_start();
        if let Some(rest) = string.strip_prefix('}') {
            return Some((labels, rest));
        }

        let (name, rest) = string.split_once('=')?;
        let name = name.trim();
        if !is_valid_label_name(name) {
            return None;
        }

        let rest = rest.trim_start().strip_prefix('"')?;
        let (value, rest) = parse_label_value(rest)?;
        labels.insert(name.to_owned(), value);

        string = rest.trim_start();
        if let Some(rest) = string.strip_prefix(',') {
            string = rest;
        } else if !string.starts_with('}') {
            return None;
        }
    }
}

/// Parses a sample value, including the special values `NaN`, `+Inf` and `-Inf`.
fn parse_value(string: &str) -> Option<f64> {
    match string {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => string.parse().ok(),
    }
}

/// A single metric sample scraped from a target.
///
/// # Exposition Format
///
/// Samples are parsed from the Prometheus text exposition format:
///
/// ```text
/// <name>[{<label>="<value>",...}] <value> [<timestamp>]
/// ```
///
/// An example scrape body looks like this:
///
/// ```text
/// # HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
/// # TYPE node_cpu_seconds_total counter
/// node_cpu_seconds_total{machineid="machine_12",mode="idle"} 2.4e+04
/// up 1
/// ```
///
/// The optional timestamp of a sample line is validated and discarded. All samples of a cycle are
/// stamped with the same cycle timestamp when they are dispatched.
///
/// # JSON Representation
///
/// On the ingest wire, samples use capitalized field names:
///
/// ```json
/// {
///   "Name": "node_cpu_seconds_total",
///   "Labels": {"machineid": "machine_12", "mode": "idle"},
///   "Value": 24000.0
/// }
/// ```
///
/// Non-finite values serialize as `null`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Sample {
    /// The metric name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Labels of the series, sorted by name.
    #[serde(rename = "Labels")]
    pub labels: BTreeMap<String, String>,
    /// The sample value.
    #[serde(rename = "Value")]
    pub value: f64,
}

impl Sample {
    /// Creates a new sample without labels.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            value,
        }
    }

    /// Adds a label to this sample, replacing an existing label of the same name.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Returns the value of the given label, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    fn parse_str(line: &str) -> Option<Self> {
        let line = line.trim();

        let name_end = line.find(|c: char| c == '{' || c.is_ascii_whitespace())?;
        let name = &line[..name_end];
        if !is_valid_name(name) {
            return None;
        }

        let mut rest = &line[name_end..];
        let labels = match rest.strip_prefix('{') {
            Some(inner) => {
                let (labels, after) = parse_labels(inner)?;
                rest = after;
                labels
            }
            None => BTreeMap::new(),
        };

        let mut parts = rest.split_ascii_whitespace();
        let value = parse_value(parts.next()?)?;

        if let Some(timestamp) = parts.next() {
            timestamp.parse::<i64>().ok()?;
        }

        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            name: name.to_owned(),
            labels,
            value,
        })
    }

    /// Parses a single sample line.
    ///
    /// # Example
    ///
    /// ```
    /// use sketchrelay_metrics::Sample;
    ///
    /// let sample = Sample::parse(br#"up{machineid="machine_3"} 1"#).expect("sample should parse");
    /// assert_eq!(sample.label("machineid"), Some("machine_3"));
    /// ```
    pub fn parse(slice: &[u8]) -> Result<Self, ParseSampleError> {
        let string = std::str::from_utf8(slice).or(Err(ParseSampleError(())))?;
        Self::parse_str(string).ok_or(ParseSampleError(()))
    }

    /// Parses all samples of an exposition body.
    ///
    /// Returns a sample result for each line in `slice`, ignoring empty lines and comments. Both
    /// UNIX newlines (`\n`) and Windows newlines (`\r\n`) are supported.
    ///
    /// It is possible to continue consuming the iterator after `Err` is yielded.
    ///
    /// # Example
    ///
    /// ```
    /// use sketchrelay_metrics::Sample;
    ///
    /// let data = br#"
    /// # TYPE up gauge
    /// up{machineid="machine_0"} 1
    /// up{machineid="machine_1"} 0
    /// "#;
    ///
    /// let samples: Vec<_> = Sample::parse_all(data).filter_map(Result::ok).collect();
    /// assert_eq!(samples.len(), 2);
    /// ```
    pub fn parse_all(slice: &[u8]) -> ParseSamples<'_> {
        ParseSamples { slice }
    }
}

/// Iterator over parsed samples returned from [`Sample::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseSamples<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseSamples<'_> {
    type Item = Result<Sample, ParseSampleError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string).trim(),
                Err(_) => return Some(Err(ParseSampleError(()))),
            };

            if !string.is_empty() && !string.starts_with('#') {
                return Some(Sample::parse_str(string).ok_or(ParseSampleError(())));
            }
        }
    }
}

impl FusedIterator for ParseSamples<'_> {}
