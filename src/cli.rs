//! Command-line parsing and the validated server configuration derived
//! from it. This server has no config file and no environment variables of
//! its own -- the CLI is the entire configuration surface.

use std::net::{AddrParseError, IpAddr};
use std::str::FromStr;

use clap::{Parser, ValueEnum};

/// kvi - an in-memory key-value server speaking a subset of RESP3.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on. Repeatable; one Accepter set is bound per
    /// address.
    #[arg(long = "ip", value_name = "ADDR", default_values_t = vec!["0.0.0.0".to_string()])]
    pub ip: Vec<String>,

    /// TCP port shared by every listen address. Must be nonzero; checked
    /// by [`ServerConfig::from_args`], not by `clap`, so a bad value is
    /// reported through this binary's own exit-1/`error:` path rather than
    /// `clap`'s exit-2 usage error.
    #[arg(long, default_value_t = 20252)]
    pub port: u16,

    /// Number of shards. Defaults to the host's CPU count. Must be at
    /// least 1; checked by [`ServerConfig::from_args`].
    #[arg(long)]
    pub shards: Option<u64>,

    /// Number of Accepter tasks per listen address. Must be at least 1;
    /// checked by [`ServerConfig::from_args`].
    #[arg(long, default_value_t = 1)]
    pub accepters: u64,

    /// Structured log level, or `none` to disable logging entirely.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log: LogLevel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    None,
}

/// Errors from the semantic validation pass `ServerConfig::from_args` runs
/// over already-parsed arguments. `clap` only checks that numeric flags
/// parse as the declared integer type; every positivity constraint is
/// enforced here so a bad value is reported through this binary's own
/// `error: <message>` / exit-1 path (spec §6) instead of `clap`'s exit-2
/// usage error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid --ip value '{0}': {1}")]
    InvalidIp(String, AddrParseError),
    #[error("--ip must be given at least once")]
    NoListenAddresses,
    #[error("--port must be nonzero")]
    InvalidPort,
    #[error("--shards must be at least 1 (got {0})")]
    InvalidShards(u64),
    #[error("--accepters must be at least 1 (got {0})")]
    InvalidAccepters(u64),
}

/// Fully validated configuration ready to hand to [`crate::server::serve`].
pub struct ServerConfig {
    pub ips: Vec<IpAddr>,
    pub port: u16,
    pub shards: usize,
    pub accepters: usize,
    pub log: LogLevel,
}

impl ServerConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.ip.is_empty() {
            return Err(ConfigError::NoListenAddresses);
        }
        if args.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if args.accepters == 0 {
            return Err(ConfigError::InvalidAccepters(args.accepters));
        }
        if let Some(shards) = args.shards {
            if shards == 0 {
                return Err(ConfigError::InvalidShards(shards));
            }
        }

        let mut ips = Vec::with_capacity(args.ip.len());
        for raw in &args.ip {
            let ip = IpAddr::from_str(raw).map_err(|e| ConfigError::InvalidIp(raw.clone(), e))?;
            ips.push(ip);
        }

        let shards = args.shards.unwrap_or_else(|| num_cpus::get() as u64) as usize;

        Ok(Self {
            ips,
            port: args.port,
            shards,
            accepters: args.accepters as usize,
            log: args.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            ip: vec!["0.0.0.0".to_string()],
            port: 20252,
            shards: Some(4),
            accepters: 1,
            log: LogLevel::Info,
        }
    }

    #[test]
    fn valid_args_produce_a_config() {
        let cfg = ServerConfig::from_args(base_args()).unwrap();
        assert_eq!(cfg.shards, 4);
        assert_eq!(cfg.accepters, 1);
        assert_eq!(cfg.port, 20252);
    }

    #[test]
    fn shard_count_defaults_to_cpu_count_when_unset() {
        let mut args = base_args();
        args.shards = None;
        let cfg = ServerConfig::from_args(args).unwrap();
        assert_eq!(cfg.shards, num_cpus::get());
    }

    #[test]
    fn malformed_ip_is_rejected() {
        let mut args = base_args();
        args.ip = vec!["not-an-ip".to_string()];
        assert!(matches!(
            ServerConfig::from_args(args),
            Err(ConfigError::InvalidIp(_, _))
        ));
    }

    #[test]
    fn empty_ip_list_is_rejected() {
        let mut args = base_args();
        args.ip = vec![];
        assert!(matches!(
            ServerConfig::from_args(args),
            Err(ConfigError::NoListenAddresses)
        ));
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut args = base_args();
        args.port = 0;
        assert!(matches!(
            ServerConfig::from_args(args),
            Err(ConfigError::InvalidPort)
        ));
    }

    #[test]
    fn zero_shards_is_rejected() {
        let mut args = base_args();
        args.shards = Some(0);
        assert!(matches!(
            ServerConfig::from_args(args),
            Err(ConfigError::InvalidShards(0))
        ));
    }

    #[test]
    fn zero_accepters_is_rejected() {
        let mut args = base_args();
        args.accepters = 0;
        assert!(matches!(
            ServerConfig::from_args(args),
            Err(ConfigError::InvalidAccepters(0))
        ));
    }
}
