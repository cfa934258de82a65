use serde::Deserialize;
use std::env;

use crate::services::{ContextOptions, DuplicatePolicy, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub retry_limit: u32,
    #[serde(default)]
    pub retry_allow: Vec<String>,
    #[serde(default)]
    pub retry_deny: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

/// Split a comma separated list, ignoring blanks
fn operation_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", ":memory:")?
            .set_default("dispatch.retry_limit", 10)?
            .set_default("dispatch.retry_allow", Vec::<String>::new())?
            .set_default("dispatch.retry_deny", Vec::<String>::new())?
            .set_default("dispatch.duplicate_policy", "reject")?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        // Load from environment variables
        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(limit) = env::var("OPKERNEL_RETRY_LIMIT") {
            let limit = limit.trim().parse::<u32>().map_err(|e| {
                config::ConfigError::Message(format!(
                    "OPKERNEL_RETRY_LIMIT must be a number: {}",
                    e
                ))
            })?;
            builder = builder.set_override("dispatch.retry_limit", limit)?;
        }

        if let Ok(allow) = env::var("OPKERNEL_RETRY_ALLOW") {
            builder = builder.set_override("dispatch.retry_allow", operation_list(&allow))?;
        }

        if let Ok(deny) = env::var("OPKERNEL_RETRY_DENY") {
            builder = builder.set_override("dispatch.retry_deny", operation_list(&deny))?;
        }

        if let Ok(policy) = env::var("OPKERNEL_DUPLICATE_POLICY") {
            let policy: DuplicatePolicy = policy
                .parse()
                .map_err(|e: String| config::ConfigError::Message(e))?;
            let name = match policy {
                DuplicatePolicy::Reject => "reject",
                DuplicatePolicy::Replace => "replace",
            };
            builder = builder.set_override("dispatch.duplicate_policy", name)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Options for `OperationContext::with_default_operations`
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            retry: RetryPolicy {
                limit: self.dispatch.retry_limit,
                allow: self.dispatch.retry_allow.clone(),
                deny: self.dispatch.retry_deny.clone(),
            },
            duplicate_policy: self.dispatch.duplicate_policy,
        }
    }
}
