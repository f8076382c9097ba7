//! Wire types for the `/api/process` contract

use super::DialogError;
use crate::state_machine::state::CLARIFYING_QUESTION_TEXT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of the person asking, as the backend spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "заказчик")]
    Customer,
    #[serde(rename = "гип")]
    ChiefEngineer,
    #[serde(rename = "инженер")]
    Engineer,
    #[serde(rename = "наблюдатель")]
    Observer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "заказчик",
            Role::ChiefEngineer => "гип",
            Role::Engineer => "инженер",
            Role::Observer => "наблюдатель",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "заказчик" | "customer" => Ok(Role::Customer),
            "гип" | "chief_engineer" => Ok(Role::ChiefEngineer),
            "инженер" | "engineer" => Ok(Role::Engineer),
            "наблюдатель" | "observer" => Ok(Role::Observer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who the widget speaks for; obtained and validated by the host page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub email: String,
    pub role: Option<Role>,
}

impl UserIdentity {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: Option<Role>) -> Self {
        self.role = role;
        self
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogRequest {
    pub text: String,
    /// Caller identity, validated upstream
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl DialogRequest {
    pub fn new(text: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            email: email.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: Option<Role>) -> Self {
        self.role = role;
        self
    }

    pub fn for_identity(text: impl Into<String>, identity: &UserIdentity) -> Self {
        Self::new(text, identity.email.clone()).with_role(identity.role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Optional echo block of the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseData {
    #[serde(default)]
    pub processed_text: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    /// Explicit "the bot just asked a question" flag
    #[serde(default)]
    pub awaiting_clarification: Option<bool>,
}

/// Response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogResponse {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl DialogResponse {
    /// Fold the payload into a reply, honoring its own status field
    pub fn into_reply(self) -> Result<Reply, DialogError> {
        match self.status {
            ResponseStatus::Error => Err(DialogError::rejected(self.message)),
            ResponseStatus::Success => {
                // Backends without the flag signal a question by its wording
                let awaiting_clarification = self
                    .data
                    .and_then(|d| d.awaiting_clarification)
                    .unwrap_or_else(|| self.message == CLARIFYING_QUESTION_TEXT);
                Ok(Reply {
                    message: self.message,
                    awaiting_clarification,
                })
            }
        }
    }
}

/// What the conversation needs from a successful round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message: String,
    /// Keep the prompt menu closed under a question
    pub awaiting_clarification: bool,
}

impl Reply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            awaiting_clarification: false,
        }
    }

    pub fn awaiting_clarification(mut self, awaiting: bool) -> Self {
        self.awaiting_clarification = awaiting;
        self
    }
}
