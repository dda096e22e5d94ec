use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(MessageId);
id_newtype!(ConnectionId);
id_newtype!(TimerId);

const ANONYMOUS_ID_PREFIX: &str = "dev_";
const ANONYMOUS_ID_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Searching,
    Paired,
}

impl SessionStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Paired => "paired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Own,
    Remote,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub id: MessageId,
    pub text: String,
    pub origin: MessageOrigin,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Identity handed over by the Telegram Mini-App host.
    Telegram,
    /// Locally generated identity used when no host identity exists.
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub id: String,
    pub kind: IdentityKind,
}

impl LocalIdentity {
    pub fn telegram(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IdentityKind::Telegram,
        }
    }

    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IdentityKind::Anonymous,
        }
    }

    /// Generates a `dev_` prefixed identity with a short random suffix.
    pub fn generate_anonymous() -> Self {
        let suffix: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(ANONYMOUS_ID_SUFFIX_LEN)
            .collect();
        Self::anonymous(format!("{ANONYMOUS_ID_PREFIX}{suffix}"))
    }

    pub fn is_generated(&self) -> bool {
        self.kind == IdentityKind::Anonymous && self.id.starts_with(ANONYMOUS_ID_PREFIX)
    }
}

/// Read-only view of a session handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub partner_id: Option<String>,
    pub room_id: Option<String>,
    pub elapsed_search_seconds: u64,
    pub transcript: Vec<TranscriptMessage>,
}

impl SessionSnapshot {
    pub fn status_text(&self) -> &'static str {
        match self.status {
            SessionStatus::Idle => "Disconnected",
            SessionStatus::Searching => "Searching for a partner...",
            SessionStatus::Paired => "Connected",
        }
    }

    pub fn formatted_search_time(&self) -> String {
        let minutes = self.elapsed_search_seconds / 60;
        let seconds = self.elapsed_search_seconds % 60;
        format!("{minutes:02}:{seconds:02}")
    }
}
