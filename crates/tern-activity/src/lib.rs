//! Session activity engine: runtime event translation, publishing,
//! procedure advancement and the human approval gate.

mod activity_translator;
mod activity_types;
mod approval_gateway;
mod collaborators;
mod procedure_advancer;
mod runtime_message;
mod session_engine;

pub use activity_translator::{
    format_tool_parameter, render_checklist, ActivityTranslator, RuntimeInit, SuppressReason,
    TranslatedEvent, Translation, CHECKLIST_TOOL_NAME, NESTED_TOOL_PREFIX, TASK_TOOL_NAME,
};
pub use activity_types::{
    ActivityContent, ActivityKind, ActivityReceipt, ActivityRecord, ActivitySignal,
    CreateActivityRequest,
};
pub use approval_gateway::{
    ApprovalDecision, ApprovalGateway, ApprovalRequestView, ApprovalWaitOutcome, PendingApproval,
    APPROVAL_ENDPOINT, DEFAULT_APPROVAL_BASE_URL,
};
pub use collaborators::{
    ActivityPoster, CollaboratorError, ParentResolver, ParentResumer, ProcedureCatalog,
    SubroutineDefinition, SubroutineResumer,
};
pub use procedure_advancer::{
    build_parent_prompt, CompletionEvent, ProcedureAdvancer, ProcedureAdvancerConfig,
    ProcedureOutcome, DEFAULT_APPROVAL_TIMEOUT,
};
pub use runtime_message::{
    tool_result_text, AgentRuntimeMessage, ContentBlock, ConversationMessage, MessageBody,
    MessageContent, ResultMessage, RuntimeMessageParseError, SystemMessage, SYSTEM_INIT_SUBTYPE,
};
pub use session_engine::{
    ActivityPublisher, MessageDisposition, PublishOutcome, SessionActivityEngine,
};

#[cfg(test)]
mod tests;
