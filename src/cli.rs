//! Command-line interface.
//!
//! Flags override the optional TOML file, which overrides the defaults.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{finalize, parse_route_table, read_config};
use crate::config::{ConfigError, ShadowConfig};

#[derive(Debug, Parser)]
#[command(name = "traffic-shadow")]
#[command(about = "Replicate sampled HTTP requests from mirrored traffic to a shadow destination", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to base URL map, e.g. {"a.example":"http://10.0.0.5"}
    #[arg(long)]
    pub route_table_json: Option<String>,

    /// Percentage of requests to forward (0-100)
    #[arg(long)]
    pub percentage: Option<f64>,

    /// Sampling key: empty for random, "header" or "remoteaddr"
    #[arg(long)]
    pub percentage_by: Option<String>,

    /// Header to sample by when --percentage-by=header
    #[arg(long)]
    pub percentage_by_header: Option<String>,

    /// Destination port of the captured requests
    #[arg(long, allow_negative_numbers = true)]
    pub filter_request_port: Option<i64>,

    /// Capture device
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Replay a capture file instead of a live device
    #[arg(long)]
    pub pcap_file: Option<PathBuf>,

    /// Health-check listener address
    #[arg(long)]
    pub health_bind: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<String>,

    /// Log level or filter directive
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Build the validated configuration from the file (if any) and the flags.
    pub fn load(&self) -> Result<ShadowConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ShadowConfig::default(),
        };
        self.apply(&mut config)?;
        finalize(config)
    }

    /// Apply every flag that was given.
    pub fn apply(&self, config: &mut ShadowConfig) -> Result<(), ConfigError> {
        if let Some(json) = &self.route_table_json {
            config.routes.extend(parse_route_table(json)?);
        }
        if let Some(percentage) = self.percentage {
            config.sampling.percentage = percentage;
        }
        if let Some(by) = &self.percentage_by {
            config.sampling.by = by.clone();
        }
        if let Some(header) = &self.percentage_by_header {
            config.sampling.header = header.clone();
        }
        if let Some(port) = self.filter_request_port {
            config.capture.filter_port = port;
        }
        if let Some(interface) = &self.interface {
            config.capture.interface = interface.clone();
        }
        if let Some(path) = &self.pcap_file {
            config.capture.pcap_file = Some(path.display().to_string());
        }
        if let Some(bind) = &self.health_bind {
            config.health.bind_address = bind.clone();
        }
        if let Some(address) = &self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = address.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationError;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "traffic-shadow",
            "--route-table-json",
            r#"{"a.example":"http://10.0.0.5"}"#,
            "--percentage",
            "50",
            "--percentage-by",
            "header",
            "--percentage-by-header",
            "X-User",
            "--filter-request-port",
            "8080",
        ]);
        let config = cli.load().unwrap();
        assert_eq!(config.routes["a.example"], "http://10.0.0.5");
        assert_eq!(config.sampling.percentage, 50.0);
        assert_eq!(config.sampling.header, "X-User");
        assert_eq!(config.capture.filter_port, 8080);
        assert_eq!(config.capture.interface, "vxlan0");
    }

    #[test]
    fn test_invalid_flags_are_all_reported() {
        let cli = Cli::parse_from([
            "traffic-shadow",
            "--percentage",
            "150",
            "--percentage-by",
            "header",
            "--filter-request-port",
            "-1",
        ]);
        match cli.load() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.contains(&ValidationError::PercentageOutOfRange(150.0)));
                assert!(errors.contains(&ValidationError::MissingSamplingHeader));
                assert!(errors.contains(&ValidationError::PortOutOfRange(-1)));
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_route_table_is_fatal() {
        let cli = Cli::parse_from(["traffic-shadow", "--route-table-json", "{not json"]);
        assert!(matches!(cli.load(), Err(ConfigError::RouteTable(_))));
    }

    #[test]
    fn test_metrics_address_enables_metrics() {
        let cli = Cli::parse_from(["traffic-shadow", "--metrics-address", "127.0.0.1:9100"]);
        let config = cli.load().unwrap();
        assert!(config.observability.metrics_enabled);
        assert_eq!(config.observability.metrics_address, "127.0.0.1:9100");
    }
}
