//! Command-line and environment configuration.
//!
//! Every flag can also be set through the environment variable shown in
//! `--help`. Flags win over the environment.

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;
use veidemann_store::ConnectOptions;

/// Levels accepted by `--log-level`.
pub const LOG_LEVELS: &[&str] = &["panic", "fatal", "error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Logfmt,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("metrics path '{0}' must be a literal absolute path other than '/'")]
    MetricsPath(String),

    #[error("--{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("unknown log level '{0}', expected one of: panic, fatal, error, warn, info, debug, trace")]
    LogLevel(String),

    #[error("invalid listen address '{host}': {source}")]
    ListenAddress {
        host: String,
        #[source]
        source: AddrParseError,
    },
}

#[derive(Debug, Clone, Parser)]
#[command(name = "veidemann-exporter", version, about = "Prometheus exporter for the Veidemann web crawler")]
pub struct Config {
    /// Interface to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 9301)]
    pub port: u16,

    /// Path under which metrics are exposed.
    #[arg(long, env = "METRICS_PATH", default_value = "/metrics")]
    pub metrics_path: String,

    /// RethinkDB host.
    #[arg(long, env = "DB_HOST", default_value = "rethinkdb-proxy")]
    pub db_host: String,

    /// RethinkDB client port.
    #[arg(long, env = "DB_PORT", default_value_t = 28015)]
    pub db_port: u16,

    /// RethinkDB database name.
    #[arg(long, env = "DB_NAME", default_value = "veidemann")]
    pub db_name: String,

    #[arg(long, env = "DB_USERNAME", default_value = "admin")]
    pub db_username: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    /// Frontier gRPC host.
    #[arg(long, env = "FRONTIER_HOST", default_value = "veidemann-frontier")]
    pub frontier_host: String,

    #[arg(long, env = "FRONTIER_PORT", default_value_t = 7700)]
    pub frontier_port: u16,

    /// Seconds between job status polls.
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 30)]
    pub poll_interval: u64,

    /// Seconds before a database query or Frontier call is abandoned.
    #[arg(long, env = "QUERY_TIMEOUT", default_value_t = 10)]
    pub query_timeout: u64,

    /// Seconds between connection attempts at startup.
    #[arg(long, env = "CONNECT_BACKOFF", default_value_t = 5)]
    pub connect_backoff: u64,

    /// One of panic, fatal, error, warn, info, debug, trace.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMATTER", value_enum, default_value_t = LogFormat::Logfmt)]
    pub log_formatter: LogFormat,

    /// Include source file and line in log records.
    #[arg(long, env = "LOG_METHOD")]
    pub log_method: bool,
}

impl Config {
    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_literal_route(&self.metrics_path) {
            return Err(ConfigError::MetricsPath(self.metrics_path.clone()));
        }
        for (flag, value) in [
            ("poll-interval", self.poll_interval),
            ("query-timeout", self.query_timeout),
            ("connect-backoff", self.connect_backoff),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(flag));
            }
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::LogLevel(self.log_level.clone()));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::ListenAddress {
                host: self.host.clone(),
                source,
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff)
    }

    pub fn store_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            username: self.db_username.clone(),
            password: self.db_password.clone(),
            timeout: self.query_timeout(),
        }
    }
}

/// An absolute path other than `/` that the router treats literally:
/// no `{param}` captures, `*` wildcards or `:`-prefixed segments.
fn is_literal_route(path: &str) -> bool {
    path.starts_with('/')
        && path != "/"
        && !path.contains(['{', '}', '*'])
        && !path.split('/').any(|segment| segment.starts_with(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["veidemann-exporter"];
        if !args.contains(&"--host") {
            argv.extend_from_slice(&["--host", "127.0.0.1"]);
        }
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_parse() {
        let config = parse(&[
            "--port",
            "9999",
            "--metrics-path",
            "/prom",
            "--db-host",
            "db.local",
            "--poll-interval",
            "60",
            "--log-formatter",
            "json",
            "--log-method",
        ]);
        assert_eq!(config.port, 9999);
        assert_eq!(config.metrics_path, "/prom");
        assert_eq!(config.db_host, "db.local");
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.log_formatter, LogFormat::Json);
        assert!(config.log_method);
        config.validate().unwrap();
    }

    #[test]
    fn metrics_path_must_be_a_literal_absolute_path() {
        for path in ["/", "metrics", "/{name}", "/metrics/{*rest}", "/*", "/:id"] {
            let config = parse(&["--metrics-path", path]);
            assert!(matches!(config.validate(), Err(ConfigError::MetricsPath(_))), "{path}");
        }
    }

    #[test]
    fn nested_metrics_path_is_accepted() {
        assert!(parse(&["--metrics-path", "/internal/metrics"]).validate().is_ok());
        assert!(parse(&["--metrics-path", "/v1:metrics"]).validate().is_ok());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = parse(&["--poll-interval", "0"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("poll-interval"))
        ));
        let config = parse(&["--query-timeout", "0"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("query-timeout"))
        ));
    }

    #[test]
    fn log_level_is_checked() {
        assert!(parse(&["--log-level", "DEBUG"]).validate().is_ok());
        assert!(parse(&["--log-level", "fatal"]).validate().is_ok());
        assert!(matches!(
            parse(&["--log-level", "verbose"]).validate(),
            Err(ConfigError::LogLevel(_))
        ));
    }

    #[test]
    fn listen_host_must_be_an_ip() {
        let config = parse(&["--host", "not an address"]);
        assert!(matches!(config.validate(), Err(ConfigError::ListenAddress { .. })));

        let config = parse(&["--host", "::1", "--port", "9301"]);
        assert_eq!(config.listen_addr().unwrap().to_string(), "[::1]:9301");
    }

    #[test]
    fn store_options_follow_flags() {
        let config = parse(&["--db-port", "28016", "--db-name", "crawl", "--query-timeout", "3"]);
        let opts = config.store_options();
        assert_eq!(opts.port, 28016);
        assert_eq!(opts.database, "crawl");
        assert_eq!(opts.timeout, Duration::from_secs(3));
    }
}
