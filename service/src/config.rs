use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use hub::{HubConfig, OverflowPolicy};
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl fmt::Display for RustEnvParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected one of: development, production, staging")
    }
}

impl std::error::Error for RustEnvParseError {}

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .try_map(|s| s.parse::<RustEnv>()),
    )]
    pub runtime_env: RustEnv,

    /// Seconds allowed for writing one frame to a client before it is dropped
    #[arg(long, env, default_value_t = 10)]
    pub write_wait_secs: u64,

    /// Seconds a client may stay silent (no pong) before it is considered dead
    #[arg(long, env, default_value_t = 60)]
    pub pong_wait_secs: u64,

    /// Seconds between heartbeat pings. Must be less than the pong wait.
    #[arg(long, env, default_value_t = 54)]
    pub ping_period_secs: u64,

    /// Largest inbound WebSocket message accepted from a client, in bytes
    #[arg(long, env, default_value_t = 65536)]
    pub max_frame_size: usize,

    /// Envelopes buffered per client before the overflow policy applies
    #[arg(long, env, default_value_t = 64)]
    pub mailbox_capacity: usize,

    /// What to do with a client whose mailbox is full: disconnect or drop-newest
    #[arg(
        long,
        env,
        default_value_t = OverflowPolicy::Disconnect,
        value_parser = clap::builder::PossibleValuesParser::new(["disconnect", "drop-newest"])
            .try_map(|s| s.parse::<OverflowPolicy>()),
    )]
    pub mailbox_overflow_policy: OverflowPolicy,

    /// Bearer token required by the internal publish endpoint. Unset disables the check.
    #[arg(long, env)]
    publish_token: Option<String>,

    /// Seconds to wait for clients to drain during graceful shutdown
    #[arg(long, env, default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_publish_token(mut self, publish_token: Option<String>) -> Self {
        self.publish_token = publish_token;
        self
    }

    pub fn publish_token(&self) -> Option<&str> {
        self.publish_token.as_deref()
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Hub tunables derived from this configuration, validated.
    pub fn hub_config(&self) -> hub::Result<HubConfig> {
        let hub_config = HubConfig {
            write_wait: Duration::from_secs(self.write_wait_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            ping_period: Duration::from_secs(self.ping_period_secs),
            max_frame_size: self.max_frame_size,
            mailbox_capacity: self.mailbox_capacity,
            overflow_policy: self.mailbox_overflow_policy,
        };
        hub_config.validate()?;
        Ok(hub_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::parse_from(std::iter::once("realtime_hub").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_produce_a_valid_hub_config() {
        let config = parse(&[]);
        let hub_config = config.hub_config().unwrap();
        assert_eq!(hub_config, HubConfig::default());
        assert_eq!(config.runtime_env(), RustEnv::Development);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn overflow_policy_and_limits_are_parsed() {
        let config = parse(&[
            "--mailbox-overflow-policy",
            "drop-newest",
            "--mailbox-capacity",
            "8",
            "--max-frame-size",
            "1024",
        ]);
        let hub_config = config.hub_config().unwrap();
        assert_eq!(hub_config.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(hub_config.mailbox_capacity, 8);
        assert_eq!(hub_config.max_frame_size, 1024);
    }

    #[test]
    fn ping_period_at_or_above_pong_wait_is_rejected() {
        let config = parse(&["--ping-period-secs", "60", "--pong-wait-secs", "60"]);
        assert!(config.hub_config().is_err());
    }

    #[test]
    fn unknown_overflow_policy_fails_to_parse() {
        let result = Config::try_parse_from(["realtime_hub", "--mailbox-overflow-policy", "block"]);
        assert!(result.is_err());
    }

    #[test]
    fn rust_env_parses_case_insensitively() {
        assert_eq!("PRODUCTION".parse::<RustEnv>(), Ok(RustEnv::Production));
        assert_eq!("staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("qa".parse::<RustEnv>(), Err(RustEnvParseError));
        assert_eq!(RustEnv::Production.to_string(), "production");
    }
}
