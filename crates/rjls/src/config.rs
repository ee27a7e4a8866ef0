use clap::Parser;
use rjl_common::types::DEFAULT_PORT;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "rjls")]
#[command(about = "Reject-list relay server")]
#[command(version)]
pub struct Args {
    /// Address to bind the relay listener to.
    #[arg(long, default_value = "0.0.0.0", env = "RJLS_HOST")]
    pub host: IpAddr,
    /// TCP port for the relay listener. Defaults to 8122 when unset.
    #[arg(long, env = "LC_PORT")]
    pub port: Option<u16>,
    /// Bootstrap reject list, one hostname per line.
    #[arg(long, default_value = "rejects.txt", env = "RJLS_REJECTS")]
    pub rejects: PathBuf,
    /// Append-only decision log.
    #[arg(long, default_value = "log.txt", env = "RJLS_LOG_FILE")]
    pub log_file: PathBuf,
    /// Outbound frames buffered per connection before it is dropped.
    #[arg(long, default_value = "256", env = "RJLS_QUEUE_CAPACITY")]
    pub queue_capacity: usize,
    /// Deadline for a single outbound write, in seconds.
    #[arg(long, default_value = "60", env = "RJLS_WRITE_TIMEOUT")]
    pub write_timeout: u64,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "10000", env = "RJLS_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum length of one inbound record in bytes.
    #[arg(long, default_value = "4096", env = "RJLS_MAX_LINE")]
    pub max_line: usize,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9122", env = "RJLS_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Do not read administrative commands from stdin.
    #[arg(long)]
    pub no_admin: bool,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Bootstrap reject list path.
    pub rejects_path: PathBuf,
    /// Decision log path.
    pub log_path: PathBuf,
    /// Per-connection outbound queue bound.
    pub queue_capacity: usize,
    /// Per-write deadline in seconds.
    pub write_timeout: u64,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum inbound record length in bytes.
    pub max_line: usize,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
}

impl ServerConfig {
    /// Per-write deadline as a [`Duration`].
    #[must_use]
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }

    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }
        if self.queue_capacity > 65_536 {
            return Err("queue_capacity exceeds reasonable limit (65536)".to_string());
        }

        if self.write_timeout == 0 {
            return Err("write_timeout must be greater than 0".to_string());
        }
        if self.write_timeout > 3600 {
            return Err("write_timeout exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        // Must leave room for the longest REPORT a client can reasonably send
        const MIN_LINE: usize = 64;
        const MAX_LINE: usize = 1024 * 1024;
        if self.max_line < MIN_LINE {
            return Err(format!("max_line must be at least {MIN_LINE} bytes"));
        }
        if self.max_line > MAX_LINE {
            return Err(format!("max_line exceeds maximum allowed ({MAX_LINE} bytes)"));
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: SocketAddr::new(args.host, args.port.unwrap_or(DEFAULT_PORT)),
            rejects_path: args.rejects,
            log_path: args.log_file,
            queue_capacity: args.queue_capacity,
            write_timeout: args.write_timeout,
            max_conns: args.max_conns,
            max_line: args.max_line,
            metrics_addr: args.metrics_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:8122".parse().unwrap(),
            rejects_path: PathBuf::from("rejects.txt"),
            log_path: PathBuf::from("log.txt"),
            queue_capacity: 256,
            write_timeout: 60,
            max_conns: 1000,
            max_line: 4096,
            metrics_addr: "127.0.0.1:9122".parse().unwrap(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_port_falls_back_to_default() {
        let args = Args::parse_from(["rjls"]);
        if std::env::var_os("LC_PORT").is_none() {
            assert!(args.port.is_none());
            let config = ServerConfig::from(args);
            assert_eq!(config.listen.port(), DEFAULT_PORT);
        }
    }

    #[test]
    fn explicit_port_is_used() {
        let args = Args::parse_from(["rjls", "--port", "9000", "--host", "127.0.0.1"]);
        let config = ServerConfig::from(args);
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn write_deadline_in_seconds() {
        assert_eq!(valid_config().write_deadline(), Duration::from_secs(60));
    }

    #[test]
    fn queue_capacity_zero() {
        let mut c = valid_config();
        c.queue_capacity = 0;
        assert!(c.validate().unwrap_err().contains("queue_capacity"));
    }

    #[test]
    fn queue_capacity_too_large() {
        let mut c = valid_config();
        c.queue_capacity = 65_537;
        assert!(c.validate().unwrap_err().contains("queue_capacity"));
    }

    #[test]
    fn write_timeout_zero() {
        let mut c = valid_config();
        c.write_timeout = 0;
        assert!(c.validate().unwrap_err().contains("write_timeout"));
    }

    #[test]
    fn write_timeout_too_large() {
        let mut c = valid_config();
        c.write_timeout = 3601;
        assert!(c.validate().unwrap_err().contains("write_timeout"));
    }

    #[test]
    fn max_conns_zero() {
        let mut c = valid_config();
        c.max_conns = 0;
        assert!(c.validate().unwrap_err().contains("max_conns"));
    }

    #[test]
    fn max_line_too_small() {
        let mut c = valid_config();
        c.max_line = 63;
        assert!(c.validate().unwrap_err().contains("max_line"));
    }

    #[test]
    fn max_line_too_large() {
        let mut c = valid_config();
        c.max_line = 1024 * 1024 + 1;
        assert!(c.validate().unwrap_err().contains("max_line"));
    }

    #[test]
    fn boundary_values_valid() {
        let mut c = valid_config();
        c.queue_capacity = 1;
        c.write_timeout = 1;
        c.max_conns = 1;
        c.max_line = 64;
        assert!(c.validate().is_ok());

        c.queue_capacity = 65_536;
        c.write_timeout = 3600;
        c.max_conns = 1_000_000;
        c.max_line = 1024 * 1024;
        assert!(c.validate().is_ok());
    }
}
