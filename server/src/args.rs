use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kecs-server")]
#[command(about = "ECS-compatible control plane on a Kubernetes substrate")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane
    Server(ServerArgs),

    /// Check control-plane health
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port serving the ECS API
    #[arg(long, env = "KECS_API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    /// Port serving health, metrics and read-only introspection
    #[arg(long, env = "KECS_ADMIN_PORT", default_value_t = 8081)]
    pub admin_port: u16,

    /// State store DSN: a SQLite file path or a postgres:// URL
    #[arg(long, env = "KECS_STORAGE_DSN", default_value = "kecs.db")]
    pub storage_dsn: String,

    /// AWS region stamped into every ARN
    #[arg(long, env = "KECS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// AWS account id stamped into every ARN
    #[arg(long, env = "KECS_ACCOUNT_ID", default_value = "000000000000")]
    pub account_id: String,

    /// Kubeconfig path; defaults to the standard discovery chain
    #[arg(long, env = "KECS_K8S_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Reconcile interval (e.g. 5s, 500ms)
    #[arg(long, env = "KECS_RECONCILE_INTERVAL", default_value = "5s", value_parser = parse_interval)]
    pub reconcile_interval: Duration,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    /// Admin endpoint of a running control plane
    #[arg(long, env = "KECS_ADMIN_ENDPOINT", default_value = "http://127.0.0.1:8081")]
    pub endpoint: String,
}

/// Accepts `5s`, `500ms`, `2m`, or a bare number of seconds.
fn parse_interval(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let (digits, unit): (String, String) = input.chars().partition(|c| c.is_ascii_digit());
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" | "" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => Err(format!("unsupported duration unit: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("7").unwrap(), Duration::from_secs(7));
        assert!(parse_interval("fast").is_err());
    }
}
