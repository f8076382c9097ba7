//! Environment configuration for the widget binary

use crate::attachment::DEFAULT_MAX_ATTACHMENT_BYTES;
use crate::dialog::{Role, UserIdentity, DEFAULT_ENDPOINT};
use crate::state_machine::state::DEFAULT_FOLLOW_UP_DELAY;
use crate::state_machine::ConvContext;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_EMAIL: &str = "verbose@example.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct WidgetConfig {
    pub endpoint: String,
    pub api_key: String,
    pub identity: UserIdentity,
    pub db_path: PathBuf,
    pub read_receipt_delay: Duration,
    pub file_ack_delay: Duration,
    pub max_attachment_bytes: u64,
}

impl WidgetConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key =
            var("WIDGET_CHAT_API_KEY").ok_or(ConfigError::Missing("WIDGET_CHAT_API_KEY"))?;

        let role = var("WIDGET_CHAT_ROLE")
            .map(|raw| {
                raw.parse::<Role>().map_err(|reason| ConfigError::Invalid {
                    name: "WIDGET_CHAT_ROLE",
                    reason,
                })
            })
            .transpose()?;

        let db_path = var("WIDGET_CHAT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.widget-chat/widget.db"))
            },
            PathBuf::from,
        );

        Ok(Self {
            endpoint: var("WIDGET_CHAT_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key,
            identity: UserIdentity::new(
                var("WIDGET_CHAT_EMAIL").unwrap_or_else(|| DEFAULT_EMAIL.to_string()),
            )
            .with_role(role),
            db_path,
            read_receipt_delay: millis(&var, "WIDGET_CHAT_RECEIPT_DELAY_MS")?
                .unwrap_or(DEFAULT_FOLLOW_UP_DELAY),
            file_ack_delay: millis(&var, "WIDGET_CHAT_ACK_DELAY_MS")?
                .unwrap_or(DEFAULT_FOLLOW_UP_DELAY),
            max_attachment_bytes: number(&var, "WIDGET_CHAT_MAX_ATTACHMENT_BYTES")?
                .unwrap_or(DEFAULT_MAX_ATTACHMENT_BYTES),
        })
    }

    pub fn context(&self) -> ConvContext {
        ConvContext::new(self.read_receipt_delay, self.file_ack_delay)
    }
}

fn number<F>(var: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn millis<F>(var: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(number(var, name)?.map(Duration::from_millis))
}
