//! Pure mapping from runtime messages to entries and activity records.
//!
//! The only state touched here is the [`ToolCallLedger`]; publishing and
//! storage are left to the engine.

use std::sync::Arc;

use serde_json::Value;
use tern_core::truncate_for_display;
use tern_session::{
    AgentSession, EntryKind, SessionEntry, SessionMetadataUpdate, ToolCallLedger, ToolCallRecord,
};
use tracing::{debug, warn};

use crate::activity_types::ActivityRecord;
use crate::runtime_message::{
    tool_result_text, AgentRuntimeMessage, ContentBlock, ConversationMessage, ResultMessage,
    SystemMessage,
};

pub const TASK_TOOL_NAME: &str = "Task";
pub const CHECKLIST_TOOL_NAME: &str = "TodoWrite";
pub const NESTED_TOOL_PREFIX: &str = "↪ ";

const ACTION_PARAMETER_MAX_CHARS: usize = 200;
const ACTION_RESULT_MAX_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Checklist results add nothing after the checklist note itself.
    ChecklistResult,
    UnmatchedToolResult,
    EmptyMessage,
    /// The current subroutine mutes narrative and action records.
    ThoughtsSuppressed,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChecklistResult => "checklist_result",
            Self::UnmatchedToolResult => "unmatched_tool_result",
            Self::EmptyMessage => "empty_message",
            Self::ThoughtsSuppressed => "thoughts_suppressed",
        }
    }
}

/// Runtime identity captured from the `system/init` message.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeInit {
    pub runtime_session_id: Option<String>,
    pub metadata: SessionMetadataUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedEvent {
    pub entry: SessionEntry,
    /// `None` keeps the entry local without publishing anything.
    pub activity: Option<ActivityRecord>,
    pub init: Option<RuntimeInit>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Record(TranslatedEvent),
    Suppress(SuppressReason),
}

impl Translation {
    fn record(entry: SessionEntry, activity: Option<ActivityRecord>) -> Self {
        Self::Record(TranslatedEvent {
            entry,
            activity,
            init: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ActivityTranslator {
    ledger: Arc<ToolCallLedger>,
}

impl ActivityTranslator {
    pub fn new(ledger: Arc<ToolCallLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<ToolCallLedger> {
        &self.ledger
    }

    pub fn translate(&self, session: &AgentSession, message: &AgentRuntimeMessage) -> Translation {
        match message {
            AgentRuntimeMessage::Assistant(message) => self.translate_assistant(session, message),
            AgentRuntimeMessage::User(message) => self.translate_user(session, message),
            AgentRuntimeMessage::System(message) => translate_system(message),
            AgentRuntimeMessage::Result(message) => translate_result(message),
        }
    }

    fn translate_assistant(
        &self,
        session: &AgentSession,
        message: &ConversationMessage,
    ) -> Translation {
        let blocks = message.blocks();
        let mut tool_uses = blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
            _ => None,
        });

        let Some((tool_use_id, tool_name, input)) = tool_uses.next() else {
            let text = message.text();
            if text.is_empty() {
                return Translation::Suppress(SuppressReason::EmptyMessage);
            }
            let entry = SessionEntry::new(EntryKind::Assistant, text.clone())
                .with_parent_tool_use_id(message.parent_tool_use_id.clone());
            return Translation::record(entry, Some(ActivityRecord::thought(text)));
        };

        let parent = message.parent_tool_use_id.as_deref();
        let activity = self.open_tool_call(session, parent, tool_use_id, tool_name, input);
        // Parallel calls in the same message are tracked so their results
        // still resolve, but only the first one is announced.
        for (extra_id, extra_name, extra_input) in tool_uses {
            self.open_tool_call(session, parent, extra_id, extra_name, extra_input);
        }

        let entry = SessionEntry::new(EntryKind::Assistant, tool_name.clone())
            .with_parent_tool_use_id(message.parent_tool_use_id.clone())
            .with_tool_use(tool_use_id.clone(), tool_name.clone(), Some(input.clone()));
        Translation::record(entry, Some(activity))
    }

    /// Records the call in the ledger and renders its opening activity.
    fn open_tool_call(
        &self,
        session: &AgentSession,
        parent_tool_use_id: Option<&str>,
        tool_use_id: &str,
        tool_name: &str,
        input: &Value,
    ) -> ActivityRecord {
        let active_task = self.ledger.active_task(&session.id);
        let nested = parent_tool_use_id.is_some() && parent_tool_use_id == active_task.as_deref();
        let display_name = if nested {
            format!("{NESTED_TOOL_PREFIX}{tool_name}")
        } else {
            tool_name.to_string()
        };
        self.ledger.record_tool_call(
            tool_use_id,
            ToolCallRecord {
                session_id: session.id.clone(),
                tool_name: tool_name.to_string(),
                display_name: display_name.clone(),
                input: input.clone(),
            },
        );

        match tool_name {
            TASK_TOOL_NAME => {
                if let Some(previous) = self.ledger.mark_active_task(&session.id, tool_use_id) {
                    debug!(
                        session_id = %session.id,
                        previous = %previous,
                        tool_use_id,
                        "replacing active task pointer"
                    );
                }
                ActivityRecord::action(display_name, format_tool_parameter(tool_name, input), None)
            }
            CHECKLIST_TOOL_NAME => ActivityRecord::thought(render_checklist(input)),
            _ => ActivityRecord::action(display_name, format_tool_parameter(tool_name, input), None)
                .ephemeral(true),
        }
    }

    fn translate_user(&self, session: &AgentSession, message: &ConversationMessage) -> Translation {
        let tool_result = message.blocks().into_iter().find_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id, content, is_error)),
            _ => None,
        });

        let Some((tool_use_id, content, is_error)) = tool_result else {
            let text = message.text();
            if text.is_empty() {
                return Translation::Suppress(SuppressReason::EmptyMessage);
            }
            // Prompts are already visible upstream; keep them local.
            let entry = SessionEntry::new(EntryKind::User, text)
                .with_parent_tool_use_id(message.parent_tool_use_id.clone());
            return Translation::record(entry, None);
        };

        let Some(call) = self.ledger.take_tool_call(&tool_use_id) else {
            warn!(
                session_id = %session.id,
                tool_use_id = %tool_use_id,
                "tool result has no matching tool call"
            );
            return Translation::Suppress(SuppressReason::UnmatchedToolResult);
        };
        if call.tool_name == CHECKLIST_TOOL_NAME {
            return Translation::Suppress(SuppressReason::ChecklistResult);
        }

        let body = tool_result_text(&content);
        let entry = SessionEntry::new(EntryKind::User, body.clone())
            .with_parent_tool_use_id(message.parent_tool_use_id.clone())
            .with_tool_use(
                tool_use_id.clone(),
                call.tool_name.clone(),
                Some(call.input.clone()),
            )
            .with_tool_result_error(is_error);

        if self
            .ledger
            .clear_active_task_if(&session.id, tool_use_id.as_str())
        {
            let trimmed = body.trim();
            let note = if trimmed.is_empty() {
                "✅ Task completed".to_string()
            } else {
                format!(
                    "✅ Task completed\n\n{}",
                    truncate_for_display(trimmed, ACTION_RESULT_MAX_CHARS)
                )
            };
            return Translation::record(entry, Some(ActivityRecord::thought(note)));
        }

        let action = if is_error {
            format!("{} (Error)", call.display_name)
        } else {
            call.display_name.clone()
        };
        let activity = ActivityRecord::action(
            action,
            format_tool_parameter(&call.tool_name, &call.input),
            Some(wrap_tool_output(&body)),
        );
        Translation::record(entry, Some(activity))
    }
}

fn translate_system(message: &SystemMessage) -> Translation {
    if message.is_init() {
        let note = match message.model.as_deref() {
            Some(model) => format!("Using model: {model}"),
            None => "Agent runtime initialized".to_string(),
        };
        let entry = SessionEntry::new(EntryKind::System, note.clone());
        return Translation::Record(TranslatedEvent {
            entry,
            activity: Some(ActivityRecord::thought(note)),
            init: Some(RuntimeInit {
                runtime_session_id: message.session_id.clone(),
                metadata: SessionMetadataUpdate {
                    model: message.model.clone(),
                    tools: Some(message.tools.clone()),
                    permission_mode: message.permission_mode.clone(),
                    api_key_source: message.api_key_source.clone(),
                    ..SessionMetadataUpdate::default()
                },
            }),
        });
    }
    let subtype = if message.subtype.is_empty() {
        "system"
    } else {
        message.subtype.as_str()
    };
    let note = format!("System event: {subtype}");
    let entry = SessionEntry::new(EntryKind::System, note.clone());
    Translation::record(entry, Some(ActivityRecord::thought(note)))
}

fn translate_result(message: &ResultMessage) -> Translation {
    let failed = message.is_failure();
    let text = message.result_text();
    let body = match (failed, text.is_empty()) {
        (_, false) => text.to_string(),
        (true, true) => format!("Agent run failed ({})", message.subtype),
        (false, true) => "Agent run completed".to_string(),
    };
    let entry = SessionEntry::new(EntryKind::Result, body.clone())
        .with_result_outcome(message.duration_ms, failed);
    let activity = if failed {
        ActivityRecord::error(body)
    } else {
        ActivityRecord::response(body)
    };
    Translation::record(entry, Some(activity))
}

/// Renders a checklist tool input as status-annotated lines in input order.
pub fn render_checklist(input: &Value) -> String {
    let items = input
        .get("todos")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut lines = Vec::with_capacity(items.len());
    for item in &items {
        let content = item
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if content.is_empty() {
            continue;
        }
        let glyph = match item.get("status").and_then(Value::as_str) {
            Some("completed") => "✅",
            Some("in_progress") => "🔄",
            _ => "⏳",
        };
        lines.push(format!("{glyph} {content}"));
    }
    if lines.is_empty() {
        return "📋 Task list is empty".to_string();
    }
    format!("📋 Task list\n\n{}", lines.join("\n"))
}

/// Picks the input field that best summarizes a tool call.
pub fn format_tool_parameter(tool_name: &str, input: &Value) -> String {
    let field = match tool_name {
        "Bash" => Some("command"),
        "Read" | "Edit" | "MultiEdit" | "Write" | "NotebookEdit" => Some("file_path"),
        "Grep" | "Glob" => Some("pattern"),
        "WebFetch" => Some("url"),
        "WebSearch" => Some("query"),
        TASK_TOOL_NAME => Some("description"),
        _ => None,
    };
    let rendered = field
        .and_then(|field| input.get(field))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match input {
            Value::Null => String::new(),
            Value::Object(object) if object.is_empty() => String::new(),
            other => other.to_string(),
        });
    truncate_for_display(rendered.trim(), ACTION_PARAMETER_MAX_CHARS)
}

fn wrap_tool_output(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "```\n{}\n```",
        truncate_for_display(trimmed, ACTION_RESULT_MAX_CHARS)
    )
}
