use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{IdentityKind, LocalIdentity};

/// Frames sent from the client to the matchmaking server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    FindPartner {
        #[serde(
            rename = "telegramId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        telegram_id: Option<String>,
        #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    StopSearch,
    Disconnect,
    Message {
        message: String,
        #[serde(
            rename = "telegramId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        telegram_id: Option<String>,
        #[serde(
            rename = "partnerId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        partner_id: Option<String>,
    },
}

impl ClientRequest {
    pub fn find_partner(identity: &LocalIdentity) -> Self {
        match identity.kind {
            IdentityKind::Telegram => Self::FindPartner {
                telegram_id: Some(identity.id.clone()),
                user_id: None,
            },
            IdentityKind::Anonymous => Self::FindPartner {
                telegram_id: None,
                user_id: Some(identity.id.clone()),
            },
        }
    }

    /// Telegram clients tag chat frames with their own id; anonymous clients
    /// address the current partner instead.
    pub fn chat_message(
        text: impl Into<String>,
        identity: &LocalIdentity,
        partner_id: Option<&str>,
    ) -> Self {
        let (telegram_id, partner_id) = match identity.kind {
            IdentityKind::Telegram => (Some(identity.id.clone()), None),
            IdentityKind::Anonymous => (None, partner_id.map(str::to_owned)),
        };
        Self::Message {
            message: text.into(),
            telegram_id,
            partner_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FindPartner { .. } => "find_partner",
            Self::StopSearch => "stop_search",
            Self::Disconnect => "disconnect",
            Self::Message { .. } => "message",
        }
    }
}

/// Frames pushed by the matchmaking server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PartnerFound {
        #[serde(rename = "partnerId", deserialize_with = "string_or_number")]
        partner_id: String,
        #[serde(
            rename = "roomId",
            default,
            deserialize_with = "optional_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        room_id: Option<String>,
    },
    PartnerDisconnected,
    Message {
        message: String,
    },
    Searching {
        #[serde(default)]
        message: String,
    },
    SearchTimeout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    /// Any tag this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PartnerFound { .. } => "partner_found",
            Self::PartnerDisconnected => "partner_disconnected",
            Self::Message { .. } => "message",
            Self::Searching { .. } => "searching",
            Self::SearchTimeout { .. } => "search_timeout",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(Value::Number(value)) => Ok(Some(value.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
