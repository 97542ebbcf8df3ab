//! Process-wide tracing subscriber.

use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Map a configured level to a filter directive.
///
/// `panic` and `fatal` have no tracing counterpart and collapse to `error`.
pub fn filter_directive(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "panic" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, overrides `level`.
pub fn init(level: &str, format: LogFormat, with_location: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(with_location)
        .with_line_number(with_location);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Logfmt => builder.with_ansi(false).try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_levels_collapse_to_error() {
        assert_eq!(filter_directive("panic"), "error");
        assert_eq!(filter_directive("FATAL"), "error");
        assert_eq!(filter_directive("Debug"), "debug");
        assert_eq!(filter_directive("trace"), "trace");
    }
}
