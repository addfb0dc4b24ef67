//! Configuration types.
//!
//! `AppConfig` is the routing contract (mail accounts, targets, rules) and is
//! loaded from JSON. `ServerConfig` holds process settings read from the
//! environment.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Environment variable naming the routing config file.
pub const CONFIG_PATH_ENV: &str = "PARCEL_ROUTER_CONFIG";

fn default_enabled() -> bool {
    true
}

/// A mailbox the service receives carrier notices on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAccountConfig {
    pub id: String,
    /// Key into the provider registry (e.g. `gmail`).
    pub provider_key: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A configured notification target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    /// Key into the target registry (e.g. `ntfy_push`).
    pub target_key: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Routes events of one carrier on one mail account to a set of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRuleConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub mail_account_id: String,
    pub parser_key: String,
    pub target_ids: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Full routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub mail_accounts: Vec<MailAccountConfig>,
    pub targets: Vec<TargetConfig>,
    pub routing_rules: Vec<RoutingRuleConfig>,
}

impl AppConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Load from `PARCEL_ROUTER_CONFIG` if set, otherwise the built-in sample.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => Ok(Self::sample()),
        }
    }

    /// Reject structurally invalid configuration.
    ///
    /// Dangling target references are not checked here: the routing engine
    /// reports them per event and keeps delivering to the remaining targets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for account in &self.mail_accounts {
            require_non_empty("mail_accounts[].id", &account.id)?;
            require_non_empty(
                &format!("mail_accounts[{}].provider_key", account.id),
                &account.provider_key,
            )?;
            if !seen.insert(account.id.as_str()) {
                return Err(duplicate("mail_accounts", &account.id));
            }
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            require_non_empty("targets[].id", &target.id)?;
            require_non_empty(&format!("targets[{}].target_key", target.id), &target.target_key)?;
            if !seen.insert(target.id.as_str()) {
                return Err(duplicate("targets", &target.id));
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.routing_rules {
            require_non_empty("routing_rules[].id", &rule.id)?;
            require_non_empty(
                &format!("routing_rules[{}].mail_account_id", rule.id),
                &rule.mail_account_id,
            )?;
            require_non_empty(&format!("routing_rules[{}].parser_key", rule.id), &rule.parser_key)?;
            if !seen.insert(rule.id.as_str()) {
                return Err(duplicate("routing_rules", &rule.id));
            }
            if rule.target_ids.is_empty() {
                warn!(rule = %rule.id, "Routing rule has no targets");
            }
        }

        Ok(())
    }

    pub fn mail_account(&self, id: &str) -> Option<&MailAccountConfig> {
        self.mail_accounts.iter().find(|a| a.id == id)
    }

    pub fn target(&self, id: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// The sample household setup the service ships with.
    pub fn sample() -> Self {
        Self {
            mail_accounts: vec![
                MailAccountConfig {
                    id: "gmail_marco".into(),
                    provider_key: "gmail".into(),
                    display_name: "Marco Gmail".into(),
                    enabled: true,
                },
                MailAccountConfig {
                    id: "gmail_partner".into(),
                    provider_key: "gmail".into(),
                    display_name: "Partner Gmail".into(),
                    enabled: true,
                },
            ],
            targets: vec![
                TargetConfig {
                    id: "ntfy_daily".into(),
                    target_key: "ntfy_push".into(),
                    display_name: "ntfy daily push".into(),
                    enabled: true,
                },
                TargetConfig {
                    id: "calendar_home".into(),
                    target_key: "calendar_ics".into(),
                    display_name: "Home ICS calendar".into(),
                    enabled: true,
                },
            ],
            routing_rules: vec![
                RoutingRuleConfig {
                    id: "rule-dhl-marco".into(),
                    description: "Marco DHL deliveries to ntfy and calendar".into(),
                    mail_account_id: "gmail_marco".into(),
                    parser_key: "DE_DHL".into(),
                    target_ids: vec!["ntfy_daily".into(), "calendar_home".into()],
                    enabled: true,
                },
                RoutingRuleConfig {
                    id: "rule-hermes-partner".into(),
                    description: "Partner Hermes deliveries to calendar".into(),
                    mail_account_id: "gmail_partner".into(),
                    parser_key: "DE_HERMES".into(),
                    target_ids: vec!["calendar_home".into()],
                    enabled: true,
                },
            ],
        }
    }
}

fn require_non_empty(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            key: key.to_string(),
            hint: "Value must not be empty.".to_string(),
        });
    }
    Ok(())
}

fn duplicate(section: &str, id: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: section.to_string(),
        message: format!("duplicate id {id}"),
    }
}

// ── Retry policy ────────────────────────────────────────────────────

/// Retry budget and backoff for retryable dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which a retryable failure becomes permanent.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retrying after `attempt_count` attempts.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600), // 1 hour
        }
    }
}

// ── Server config ───────────────────────────────────────────────────

/// Process settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// How often the retry driver scans the outcome ledger.
    pub retry_interval: Duration,
    pub retry: RetryPolicy,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_parse("PARCEL_ROUTER_PORT").unwrap_or(defaults.port);
        let retry_interval = env_parse("PARCEL_ROUTER_RETRY_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_interval);
        let max_attempts =
            env_parse("PARCEL_ROUTER_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts);
        let base_delay = env_parse("PARCEL_ROUTER_RETRY_BASE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry.base_delay);
        let max_delay = env_parse("PARCEL_ROUTER_RETRY_MAX_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry.max_delay);

        Self {
            port,
            retry_interval,
            retry: RetryPolicy {
                max_attempts: max_attempts.max(1),
                base_delay,
                max_delay,
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            retry_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
