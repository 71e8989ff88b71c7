use std::{path::PathBuf, time::Duration};

use clap::Parser;

/// Tazk API server, recurring task scheduler and web push fan-out
#[derive(Debug, Clone, Parser)]
#[command(name = "tazk-server", version)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "TAZK_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "TAZK_PORT", default_value_t = 3001)]
    pub port: u16,

    /// SQLite connection string, created if missing
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://tazk.db")]
    pub database_url: String,

    /// Seconds between recurring task generator runs
    #[arg(
        long,
        env = "TAZK_SCHEDULER_INTERVAL_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub scheduler_interval_secs: u64,

    /// Only generate recurring tasks when the function endpoint is called
    #[arg(long, env = "TAZK_DISABLE_SCHEDULER")]
    pub disable_scheduler: bool,

    /// PKCS#8 PEM P-256 key used to sign VAPID tokens; push is disabled without it
    #[arg(long, env = "VAPID_PRIVATE_KEY_PATH")]
    pub vapid_private_key_path: Option<PathBuf>,

    /// Contact URI sent to push services in the VAPID `sub` claim
    #[arg(long, env = "VAPID_SUBJECT", default_value = "mailto:admin@localhost")]
    pub vapid_subject: String,

    /// How long push services keep undelivered messages
    #[arg(long, env = "TAZK_PUSH_TTL_SECS", default_value_t = 86_400)]
    pub push_ttl_secs: u64,

    /// Bearer token required by the /functions/v1 endpoints when set
    #[arg(long, env = "TAZK_FUNCTIONS_TOKEN")]
    pub functions_token: Option<String>,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn push_ttl(&self) -> Duration {
        Duration::from_secs(self.push_ttl_secs)
    }

    /// Empty tokens from a blank env var count as unset
    pub fn functions_token(&self) -> Option<&str> {
        self.functions_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["server"]).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:3001");
        assert_eq!(config.scheduler_interval(), Duration::from_secs(60));
        assert_eq!(config.push_ttl(), Duration::from_secs(86_400));
        assert!(!config.disable_scheduler);
        assert!(config.vapid_private_key_path.is_none());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Config::try_parse_from(["server", "--scheduler-interval-secs", "0"]).is_err());
    }

    #[test]
    fn test_blank_functions_token_is_unset() {
        let config = Config::try_parse_from(["server", "--functions-token", "  "]).unwrap();
        assert_eq!(config.functions_token(), None);

        let config = Config::try_parse_from(["server", "--functions-token", "s3cret"]).unwrap();
        assert_eq!(config.functions_token(), Some("s3cret"));
    }
}
