//! Minimal HTML pages served to people in a browser.
use super::*;

const PAGE_STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:40rem;margin:3rem auto;padding:0 1rem;color:#1f2328}\
textarea{width:100%;min-height:6rem}button{margin-right:.5rem;padding:.4rem 1rem}";

pub(super) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for character in raw.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn render_page(title: &str, body_html: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
<style>{PAGE_STYLE}</style></head><body><h1>{title}</h1>{body_html}</body></html>",
        title = escape_html(title),
    )
}

pub(super) fn render_message_page(title: &str, message: &str) -> String {
    render_page(title, &format!("<p>{}</p>", escape_html(message)))
}

pub(super) fn render_approval_page(request: &ApprovalRequestView) -> String {
    let session = escape_html(&request.session_id);
    let decision_form = |action: &str, label: &str| {
        format!(
            "<form method=\"get\" action=\"{APPROVAL_ENDPOINT}\">\
<input type=\"hidden\" name=\"session\" value=\"{session}\">\
<input type=\"hidden\" name=\"action\" value=\"{action}\">\
<label>Feedback (optional)<textarea name=\"feedback\"></textarea></label>\
<button type=\"submit\">{label}</button></form>"
        )
    };
    render_page(
        "Approval requested",
        &format!(
            "<p>The agent working in session <code>{session}</code> is waiting for approval \
before continuing to the next step.</p>{}{}",
            decision_form("approve", "Approve"),
            decision_form("reject", "Reject"),
        ),
    )
}

pub(super) fn render_decision_page(approved: bool) -> String {
    if approved {
        render_message_page(
            "Approved",
            "The agent will continue with the next step. You can close this window.",
        )
    } else {
        render_message_page(
            "Rejected",
            "The procedure has been stopped. You can close this window.",
        )
    }
}
