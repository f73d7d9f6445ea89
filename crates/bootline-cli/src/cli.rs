//! Command-line argument parsing with clap.

use clap::{Parser, ValueEnum};

use bootline_sources::{CniLogSource, ImdsSource, SyslogSource};

/// Bootline - measure how long a Kubernetes node takes to boot.
#[derive(Parser, Debug, Clone)]
#[command(name = "bootline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Give up on unresolved events after this many seconds.
    #[arg(long, env = "BOOTLINE_TIMEOUT", default_value_t = 600)]
    pub timeout: u64,

    /// Seconds to wait between measurement passes.
    #[arg(long, env = "BOOTLINE_RETRY_DELAY", default_value_t = 5)]
    pub retry_delay: u64,

    /// Output format for the measurement.
    #[arg(long, value_enum, env = "BOOTLINE_OUTPUT", default_value_t = Output::Markdown)]
    pub output: Output,

    /// Hide the comment column in the markdown chart.
    #[arg(long, env = "BOOTLINE_NO_COMMENTS", default_value_t = false)]
    pub no_comments: bool,

    /// Experiment label attached to exported metrics, for comparing boot
    /// configurations.
    #[arg(long, env = "BOOTLINE_EXPERIMENT_DIMENSION", default_value = "none")]
    pub experiment_dimension: String,

    /// Serve Prometheus metrics after measuring instead of exiting.
    #[arg(long, env = "BOOTLINE_PROMETHEUS", default_value_t = false)]
    pub prometheus: bool,

    /// Port for the Prometheus /metrics endpoint.
    #[arg(long, env = "BOOTLINE_METRICS_PORT", default_value_t = 2112)]
    pub metrics_port: u16,

    /// Instance metadata service endpoint.
    #[arg(long, env = "BOOTLINE_IMDS_ENDPOINT", default_value = ImdsSource::DEFAULT_ENDPOINT)]
    pub imds_endpoint: String,

    /// Disable the instance metadata source entirely (for nodes without a
    /// metadata endpoint).
    #[arg(long, env = "BOOTLINE_NO_IMDS", default_value_t = false)]
    pub no_imds: bool,

    /// Namespace whose pods signal workload readiness.
    #[arg(long, env = "BOOTLINE_POD_NAMESPACE", default_value = "default")]
    pub pod_namespace: String,

    /// Node name for the cluster API source. Defaults to the hostname
    /// reported by the metadata endpoint.
    #[arg(long, env = "BOOTLINE_NODE_NAME")]
    pub node_name: Option<String>,

    /// Path or glob for the syslog messages file.
    #[arg(long, env = "BOOTLINE_MESSAGES_PATH", default_value = SyslogSource::DEFAULT_PATH)]
    pub messages_path: String,

    /// Path or glob for the CNI pod log.
    #[arg(long, env = "BOOTLINE_CNI_LOG_PATH", default_value = CniLogSource::DEFAULT_PATH)]
    pub cni_log_path: String,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Output {
    /// Markdown chart with a metadata heading.
    #[default]
    Markdown,
    /// JSON for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_behavior() {
        let cli = Cli::parse_from(["bootline"]);
        assert_eq!(cli.timeout, 600);
        assert_eq!(cli.retry_delay, 5);
        assert_eq!(cli.output, Output::Markdown);
        assert_eq!(cli.metrics_port, 2112);
        assert_eq!(cli.pod_namespace, "default");
        assert_eq!(cli.experiment_dimension, "none");
        assert!(!cli.no_imds);
        assert!(!cli.prometheus);
        assert_eq!(cli.messages_path, "/var/log/messages*");
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from([
            "bootline",
            "--output",
            "json",
            "--timeout",
            "30",
            "--no-imds",
            "--node-name",
            "ip-10-0-0-42.us-west-2.compute.internal",
        ]);
        assert_eq!(cli.output, Output::Json);
        assert_eq!(cli.timeout, 30);
        assert!(cli.no_imds);
        assert_eq!(
            cli.node_name.as_deref(),
            Some("ip-10-0-0-42.us-west-2.compute.internal")
        );
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
