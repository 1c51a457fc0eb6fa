//! Typed messages emitted by the coding-agent runtime's event stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tern_session::SessionUsage;
use thiserror::Error;

pub const SYSTEM_INIT_SUBTYPE: &str = "init";

#[derive(Debug, Error)]
pub enum RuntimeMessageParseError {
    #[error("runtime message line is empty")]
    Empty,
    #[error("invalid runtime message json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRuntimeMessage {
    System(SystemMessage),
    User(ConversationMessage),
    Assistant(ConversationMessage),
    Result(ResultMessage),
}

impl AgentRuntimeMessage {
    /// Parses one line of the runtime's JSON stream.
    pub fn parse_line(line: &str) -> Result<Self, RuntimeMessageParseError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(RuntimeMessageParseError::Empty);
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::Result(_) => "result",
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    pub fn system_init(runtime_session_id: &str, model: &str, tools: &[&str]) -> Self {
        Self::System(SystemMessage {
            subtype: SYSTEM_INIT_SUBTYPE.to_string(),
            session_id: Some(runtime_session_id.to_string()),
            model: Some(model.to_string()),
            tools: tools.iter().map(|tool| tool.to_string()).collect(),
            permission_mode: None,
            api_key_source: None,
            cwd: None,
        })
    }

    pub fn assistant_text(text: &str) -> Self {
        Self::Assistant(ConversationMessage::from_blocks(vec![ContentBlock::Text {
            text: text.to_string(),
        }]))
    }

    pub fn assistant_tool_use(tool_use_id: &str, name: &str, input: Value) -> Self {
        Self::Assistant(ConversationMessage::from_blocks(vec![
            ContentBlock::ToolUse {
                id: tool_use_id.to_string(),
                name: name.to_string(),
                input,
            },
        ]))
    }

    pub fn tool_result(tool_use_id: &str, content: &str, is_error: bool) -> Self {
        Self::User(ConversationMessage::from_blocks(vec![
            ContentBlock::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                content: Value::String(content.to_string()),
                is_error,
            },
        ]))
    }

    pub fn result_success(result: &str) -> Self {
        Self::Result(ResultMessage {
            subtype: "success".to_string(),
            is_error: false,
            result: Some(result.to_string()),
            ..ResultMessage::default()
        })
    }

    pub fn result_error(subtype: &str, result: Option<&str>) -> Self {
        Self::Result(ResultMessage {
            subtype: subtype.to_string(),
            is_error: true,
            result: result.map(str::to_string),
            ..ResultMessage::default()
        })
    }

    /// Sets `parent_tool_use_id` on user/assistant messages.
    pub fn nested_under(mut self, parent_tool_use_id: &str) -> Self {
        if let Self::User(message) | Self::Assistant(message) = &mut self {
            message.parent_tool_use_id = Some(parent_tool_use_id.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, rename = "permissionMode")]
    pub permission_mode: Option<String>,
    #[serde(default, rename = "apiKeySource")]
    pub api_key_source: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl SystemMessage {
    pub fn is_init(&self) -> bool {
        self.subtype == SYSTEM_INIT_SUBTYPE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message: MessageBody,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ConversationMessage {
    pub fn from_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            message: MessageBody {
                content: MessageContent::Blocks(blocks),
            },
            parent_tool_use_id: None,
            session_id: None,
        }
    }

    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.message.content {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Text blocks joined with blank lines.
    pub fn text(&self) -> String {
        self.blocks()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.trim()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Unsupported,
}

/// Flattens a tool result payload (string or list of text parts) into text.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.clone()),
                Value::Object(object) => object
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<SessionUsage>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ResultMessage {
    pub fn is_failure(&self) -> bool {
        self.is_error || self.subtype.starts_with("error")
    }

    pub fn result_text(&self) -> &str {
        self.result.as_deref().map(str::trim).unwrap_or("")
    }
}
