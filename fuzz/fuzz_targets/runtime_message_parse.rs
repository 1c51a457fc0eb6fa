#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use tern_activity::{ActivityTranslator, AgentRuntimeMessage, Translation};
use tern_session::{AgentSession, IssueRef, ToolCallLedger, WorkspaceRef};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(message) = AgentRuntimeMessage::parse_line(&raw) else {
        return;
    };
    let ledger = Arc::new(ToolCallLedger::new());
    let translator = ActivityTranslator::new(Arc::clone(&ledger));
    let session = AgentSession::new(
        "fuzz-session",
        IssueRef::new("fuzz-issue", "FUZZ-1"),
        WorkspaceRef::new("/tmp/fuzz"),
        true,
    );
    if let Translation::Record(event) = translator.translate(&session, &message) {
        if !event.entry.is_result() {
            assert_ne!(message.kind_label(), "result");
        }
    }
    ledger.clear_session("fuzz-session");
});
