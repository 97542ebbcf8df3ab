//! Prometheus text exposition format, version 0.0.4.
//!
//! ```text
//! # HELP veidemann_uri_statuscode_total The total number of responses for each status code
//! # TYPE veidemann_uri_statuscode_total counter
//! veidemann_uri_statuscode_total{code="200"} 17
//! ```

use std::fmt::Write as _;

use crate::collectors::{Counter, CounterVec, GaugeVec, Summary};

/// Content type of a scrape response.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Summary,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Summary => "summary",
        }
    }
}

/// Accumulates one scrape body.
#[derive(Debug, Default)]
pub struct Encoder {
    out: String,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn header(&mut self, name: &str, help: &str, kind: MetricKind) {
        let _ = writeln!(self.out, "# HELP {name} {}", escape_help(help));
        let _ = writeln!(self.out, "# TYPE {name} {}", kind.as_str());
    }

    fn sample(&mut self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.out.push_str(name);
        if !labels.is_empty() {
            self.out.push('{');
            for (i, (k, v)) in labels.iter().enumerate() {
                if i > 0 {
                    self.out.push(',');
                }
                let _ = write!(self.out, "{k}=\"{}\"", escape_label_value(v));
            }
            self.out.push('}');
        }
        let _ = writeln!(self.out, " {}", format_value(value));
    }

    pub fn counter(&mut self, name: &str, help: &str, counter: &Counter) {
        self.header(name, help, MetricKind::Counter);
        self.sample(name, &[], counter.get());
    }

    pub fn counter_vec(&mut self, name: &str, help: &str, family: &CounterVec) {
        self.header(name, help, MetricKind::Counter);
        for (values, child) in family.children() {
            let labels = zip_labels(family.label_names(), &values);
            self.sample(name, &labels, child.get());
        }
    }

    pub fn gauge(&mut self, name: &str, help: &str, labels: &[(&str, &str)], value: f64) {
        self.header(name, help, MetricKind::Gauge);
        self.sample(name, labels, value);
    }

    pub fn gauge_vec(&mut self, name: &str, help: &str, family: &GaugeVec) {
        self.header(name, help, MetricKind::Gauge);
        for (values, child) in family.children() {
            let labels = zip_labels(family.label_names(), &values);
            self.sample(name, &labels, child.get());
        }
    }

    /// A summary without quantiles: `_sum` and `_count` series only.
    pub fn summary(&mut self, name: &str, help: &str, summary: &Summary) {
        let snapshot = summary.snapshot();
        self.header(name, help, MetricKind::Summary);
        self.sample(&format!("{name}_sum"), &[], snapshot.sum);
        self.sample(&format!("{name}_count"), &[], snapshot.count as f64);
    }
}

fn zip_labels<'a>(names: &'a [&'a str], values: &'a [String]) -> Vec<(&'a str, &'a str)> {
    names
        .iter()
        .copied()
        .zip(values.iter().map(String::as_str))
        .collect()
}

/// Render a sample value. Integral values print without a fraction.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(-3.0), "-3");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(1e20), "100000000000000000000");
    }

    #[test]
    fn label_values_are_escaped() {
        let family = CounterVec::new(&["mime"]);
        family.with_label_values(&["weird\"type\\x\n"]).inc();

        let mut enc = Encoder::new();
        enc.counter_vec("m", "help", &family);
        let out = enc.finish();
        assert!(out.contains(r#"m{mime="weird\"type\\x\n"} 1"#), "{out}");
    }

    #[test]
    fn counter_vec_renders_header_even_when_empty() {
        let family = CounterVec::new(&["code"]);
        let mut enc = Encoder::new();
        enc.counter_vec("veidemann_uri_statuscode_total", "Status codes", &family);
        assert_eq!(
            enc.finish(),
            "# HELP veidemann_uri_statuscode_total Status codes\n\
             # TYPE veidemann_uri_statuscode_total counter\n"
        );
    }

    #[test]
    fn summary_renders_sum_and_count() {
        let s = Summary::default();
        s.observe(0.5);
        s.observe(1.0);

        let mut enc = Encoder::new();
        enc.summary("veidemann_uri_fetch_time_seconds", "Fetch time", &s);
        let out = enc.finish();
        assert!(out.contains("# TYPE veidemann_uri_fetch_time_seconds summary\n"));
        assert!(out.contains("veidemann_uri_fetch_time_seconds_sum 1.5\n"));
        assert!(out.contains("veidemann_uri_fetch_time_seconds_count 2\n"));
    }

    #[test]
    fn multi_label_samples() {
        let family = GaugeVec::new(&["job_name", "status"]);
        family.with_label_values(&["news", "FETCHING"]).set(3.0);

        let mut enc = Encoder::new();
        enc.gauge_vec("veidemann_job_status_total", "Status", &family);
        assert!(enc
            .finish()
            .contains("veidemann_job_status_total{job_name=\"news\",status=\"FETCHING\"} 3\n"));
    }
}
