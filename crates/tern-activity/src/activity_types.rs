//! Externally visible activity records posted to the issue tracker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Thought,
    Action,
    Response,
    Error,
    Elicitation,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Response => "response",
            Self::Error => "error",
            Self::Elicitation => "elicitation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityContent {
    Thought {
        body: String,
    },
    Action {
        action: String,
        parameter: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Response {
        body: String,
    },
    Error {
        body: String,
    },
    Elicitation {
        body: String,
    },
}

impl ActivityContent {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::Thought { .. } => ActivityKind::Thought,
            Self::Action { .. } => ActivityKind::Action,
            Self::Response { .. } => ActivityKind::Response,
            Self::Error { .. } => ActivityKind::Error,
            Self::Elicitation { .. } => ActivityKind::Elicitation,
        }
    }

    /// Narrative and action records can be muted by a subroutine; responses,
    /// errors and elicitations cannot.
    pub fn is_suppressible(&self) -> bool {
        matches!(self.kind(), ActivityKind::Thought | ActivityKind::Action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySignal {
    Auth,
    Select,
    Stop,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub content: ActivityContent,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<ActivitySignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_metadata: Option<Value>,
}

impl ActivityRecord {
    fn from_content(content: ActivityContent) -> Self {
        Self {
            content,
            ephemeral: false,
            signal: None,
            signal_metadata: None,
        }
    }

    pub fn thought(body: impl Into<String>) -> Self {
        Self::from_content(ActivityContent::Thought { body: body.into() })
    }

    pub fn action(
        action: impl Into<String>,
        parameter: impl Into<String>,
        result: Option<String>,
    ) -> Self {
        Self::from_content(ActivityContent::Action {
            action: action.into(),
            parameter: parameter.into(),
            result,
        })
    }

    pub fn response(body: impl Into<String>) -> Self {
        Self::from_content(ActivityContent::Response { body: body.into() })
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self::from_content(ActivityContent::Error { body: body.into() })
    }

    pub fn elicitation(body: impl Into<String>) -> Self {
        Self::from_content(ActivityContent::Elicitation { body: body.into() })
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Attaches metadata without a platform signal.
    pub fn with_signal_metadata(mut self, metadata: Value) -> Self {
        self.signal_metadata = Some(metadata);
        self
    }

    pub fn kind(&self) -> ActivityKind {
        self.content.kind()
    }
}

/// Payload handed to [`crate::ActivityPoster::create_activity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivityRequest {
    pub agent_session_id: String,
    pub content: ActivityContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<ActivitySignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_metadata: Option<Value>,
}

impl CreateActivityRequest {
    pub fn from_record(agent_session_id: &str, record: ActivityRecord) -> Self {
        Self {
            agent_session_id: agent_session_id.to_string(),
            content: record.content,
            ephemeral: record.ephemeral.then_some(true),
            signal: record.signal,
            signal_metadata: record.signal_metadata,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityReceipt {
    pub activity_id: Option<String>,
}
