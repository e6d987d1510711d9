use std::fmt;

/// Type used for counter totals and increments.
pub type CounterType = f64;

/// Type used for timer samples.
pub type TimerType = f64;

/// Type used for gauge values.
pub type GaugeType = f64;

/// The type of a metric, determined by the second field of a specification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MetricType {
    /// Accumulates increments over a flush window. Any unknown type code counts as a counter.
    Counter,
    /// Collects samples for percentile computation, type code `ms`.
    Timer,
    /// Holds the last written value, type code `g`.
    Gauge,
}

impl MetricType {
    /// Resolves a type code. Surrounding whitespace is ignored.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "ms" => Self::Timer,
            "g" => Self::Gauge,
            _ => Self::Counter,
        }
    }

    /// Returns the canonical type code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "c",
            Self::Timer => "ms",
            Self::Gauge => "g",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single update to the metric store, parsed from one specification of a datagram.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricUpdate {
    /// Adds `value / sample_rate` to a counter.
    Counter {
        /// The raw increment.
        value: CounterType,
        /// The client-side sample rate in `(0, 1]`.
        sample_rate: f64,
    },
    /// Appends a sample to a timer.
    Timer(TimerType),
    /// Overwrites a gauge.
    Gauge(GaugeType),
}

impl MetricUpdate {
    /// Returns the type of this update.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter { .. } => MetricType::Counter,
            Self::Timer(_) => MetricType::Timer,
            Self::Gauge(_) => MetricType::Gauge,
        }
    }
}

/// A specification without a type field.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("bad line: {line:?}")]
pub struct ParseMetricError {
    line: String,
}

impl ParseMetricError {
    /// Returns the offending specification.
    pub fn line(&self) -> &str {
        &self.line
    }
}

/// Normalizes a raw metric key.
///
/// Runs of whitespace become a single `_`, `/` becomes `-`, and everything outside of
/// `[A-Za-z0-9_.-]` is removed. Normalizing a normalized key returns it unchanged.
///
/// ```
/// use tally_metrics::normalize_key;
///
/// assert_eq!(normalize_key("api /users\t list!"), "api_-users_list");
/// ```
pub fn normalize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut in_whitespace = false;

    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                key.push('_');
            }
            in_whitespace = true;
            continue;
        }

        in_whitespace = false;
        match c {
            '/' => key.push('-'),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') => key.push(c),
            _ => (),
        }
    }

    key
}

/// Parses a numeric field, falling back to `default` when it is empty or not a finite number.
fn parse_value(field: &str, default: f64) -> f64 {
    let field = field.trim();
    if field.is_empty() {
        return default;
    }

    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => default,
    }
}

/// Parses `@<rate>` from the third field of a counter specification.
///
/// Only the leading run of digits and dots after `@` is considered. Rates that are missing,
/// unparsable or not strictly positive fall back to `1`.
fn parse_sample_rate(field: Option<&str>) -> f64 {
    let Some(rest) = field.and_then(|field| field.strip_prefix('@')) else {
        return 1.0;
    };

    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());

    match rest[..end].parse::<f64>() {
        Ok(rate) if rate > 0.0 && rate.is_finite() => rate,
        _ => 1.0,
    }
}

/// Parses one `<value>|<type>[|@<rate>]` specification.
fn parse_spec(spec: &str) -> Result<MetricUpdate, ParseMetricError> {
    let mut fields = spec.split('|');
    let value = fields.next().unwrap_or_default();
    let Some(code) = fields.next() else {
        return Err(ParseMetricError {
            line: spec.to_owned(),
        });
    };

    Ok(match MetricType::from_code(code) {
        MetricType::Timer => MetricUpdate::Timer(parse_value(value, 0.0)),
        MetricType::Gauge => MetricUpdate::Gauge(parse_value(value, 0.0)),
        MetricType::Counter => MetricUpdate::Counter {
            value: parse_value(value, 1.0),
            sample_rate: parse_sample_rate(fields.next()),
        },
    })
}

/// A parsed statsd datagram.
///
/// The protocol is
///
/// ```text
/// <key>[:<value>|<type>[|@<rate>]]*
/// ```
///
/// where every `:`-separated specification after the key is applied to the same key. A datagram
/// consisting only of a key counts as a single increment of `1`. Specifications without a type
/// are collected as [errors](Self::errors) while their siblings still apply.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    /// The normalized key.
    pub key: String,
    /// Valid updates in the order they appear.
    pub updates: Vec<MetricUpdate>,
    /// Specifications that could not be parsed.
    pub errors: Vec<ParseMetricError>,
}

impl Datagram {
    /// Parses a raw datagram. Invalid UTF-8 is replaced lossily.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::{Datagram, MetricUpdate};
    ///
    /// let datagram = Datagram::parse(b"api.hits:1|c|@0.5:7|g");
    /// assert_eq!(datagram.key, "api.hits");
    /// assert_eq!(datagram.updates, [
    ///     MetricUpdate::Counter { value: 1.0, sample_rate: 0.5 },
    ///     MetricUpdate::Gauge(7.0),
    /// ]);
    /// ```
    pub fn parse(payload: &[u8]) -> Self {
        let string = String::from_utf8_lossy(payload);
        let mut bits = string.split(':');
        let key = normalize_key(bits.next().unwrap_or_default());

        let mut updates = Vec::new();
        let mut errors = Vec::new();
        let mut has_specs = false;

        for spec in bits {
            has_specs = true;
            match parse_spec(spec) {
                Ok(update) => updates.push(update),
                Err(error) => errors.push(error),
            }
        }

        if !has_specs {
            updates.push(MetricUpdate::Counter {
                value: 1.0,
                sample_rate: 1.0,
            });
        }

        Self {
            key,
            updates,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("foo.bar"), "foo.bar");
        assert_eq!(normalize_key("foo  bar\tbaz"), "foo_bar_baz");
        assert_eq!(normalize_key("a/b/c"), "a-b-c");
        assert_eq!(normalize_key("héllo#wörld!"), "hllowrld");
        assert_eq!(normalize_key("a é b"), "a__b");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn test_normalize_key_idempotent() {
        let inputs = [
            "plain",
            " leading and trailing ",
            "api/v1/users list",
            "ünïcödé/ \u{a0}mixed\n\nlines",
            "__--..",
        ];

        for input in inputs {
            let once = normalize_key(input);
            assert_eq!(normalize_key(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_counter() {
        let datagram = Datagram::parse(b"gorets:1|c");
        insta::assert_debug_snapshot!(datagram, @r###"
        Datagram {
            key: "gorets",
            updates: [
                Counter {
                    value: 1.0,
                    sample_rate: 1.0,
                },
            ],
            errors: [],
        }
        "###);
    }

    #[test]
    fn test_parse_counter_sample_rate() {
        let datagram = Datagram::parse(b"gorets:1|c|@0.1");
        assert_eq!(
            datagram.updates,
            [MetricUpdate::Counter {
                value: 1.0,
                sample_rate: 0.1
            }]
        );
    }

    #[test]
    fn test_parse_sample_rate_fallbacks() {
        assert_eq!(parse_sample_rate(None), 1.0);
        assert_eq!(parse_sample_rate(Some("0.5")), 1.0);
        assert_eq!(parse_sample_rate(Some("@")), 1.0);
        assert_eq!(parse_sample_rate(Some("@0")), 1.0);
        assert_eq!(parse_sample_rate(Some("@1.2.3")), 1.0);
        assert_eq!(parse_sample_rate(Some("@.25xyz")), 0.25);
    }

    #[test]
    fn test_parse_timer_and_gauge() {
        let datagram = Datagram::parse(b"glork:320|ms:42|g");
        assert_eq!(
            datagram.updates,
            [MetricUpdate::Timer(320.0), MetricUpdate::Gauge(42.0)]
        );
    }

    #[test]
    fn test_parse_type_is_trimmed() {
        let datagram = Datagram::parse(b"glork:320| ms \n");
        assert_eq!(datagram.updates, [MetricUpdate::Timer(320.0)]);
    }

    #[test]
    fn test_parse_value_defaults() {
        let datagram = Datagram::parse(b"k:|ms:abc|g:|c:x|foo");
        assert_eq!(
            datagram.updates,
            [
                MetricUpdate::Timer(0.0),
                MetricUpdate::Gauge(0.0),
                MetricUpdate::Counter {
                    value: 1.0,
                    sample_rate: 1.0
                },
                MetricUpdate::Counter {
                    value: 1.0,
                    sample_rate: 1.0
                },
            ]
        );
    }

    #[test]
    fn test_parse_bare_key_is_counter() {
        let datagram = Datagram::parse(b"deploys");
        assert_eq!(datagram.key, "deploys");
        assert_eq!(
            datagram.updates,
            [MetricUpdate::Counter {
                value: 1.0,
                sample_rate: 1.0
            }]
        );
        assert!(datagram.errors.is_empty());
    }

    #[test]
    fn test_parse_bad_line_keeps_siblings() {
        let datagram = Datagram::parse(b"mixed:5|c:oops:3|g");
        assert_eq!(
            datagram.updates,
            [
                MetricUpdate::Counter {
                    value: 5.0,
                    sample_rate: 1.0
                },
                MetricUpdate::Gauge(3.0),
            ]
        );
        assert_eq!(datagram.errors.len(), 1);
        assert_eq!(datagram.errors[0].line(), "oops");
        assert_eq!(datagram.errors[0].to_string(), r#"bad line: "oops""#);
    }

    #[test]
    fn test_parse_only_bad_line() {
        let datagram = Datagram::parse(b"lonely:");
        assert!(datagram.updates.is_empty());
        assert_eq!(datagram.errors.len(), 1);
    }

    #[test]
    fn test_parse_garbage_bytes() {
        let datagram = Datagram::parse(b"ke\xffy:1|c");
        assert_eq!(datagram.key, "key");
        assert_eq!(datagram.updates.len(), 1);
    }

    #[test]
    fn test_metric_type_codes() {
        assert_eq!(MetricType::from_code("ms"), MetricType::Timer);
        assert_eq!(MetricType::from_code("g"), MetricType::Gauge);
        assert_eq!(MetricType::from_code("c"), MetricType::Counter);
        assert_eq!(MetricType::from_code("h"), MetricType::Counter);
        assert_eq!(MetricType::Timer.to_string(), "ms");
    }
}
