// =============================================================================
// WS wire format — pure message construction and status-frame detection
// =============================================================================
//
// Grounded on polygon_api/websocket.py's `_make_sub_msg`/`_make_unsub_msg`
// (comma-joined `"<channel>.<symbol>"` params) and `_on_message`'s status
// detection (`"success" in status and "authenticated" in message`).

use crate::symbol::Symbol;
use crate::types::ChannelTag;

/// Build the JSON auth frame sent as the first message after connect.
pub fn build_auth_message(api_key: &str) -> String {
    serde_json::json!({"action": "auth", "params": api_key}).to_string()
}

/// Build a subscribe/unsubscribe frame for one channel and a batch of
/// symbols: `params` is `"<channel>.<symbol>,<channel>.<symbol>,..."`.
pub fn build_action_message(action: &str, channel: ChannelTag, symbols: &[Symbol]) -> String {
    let params = symbols
        .iter()
        .map(|s| format!("{}.{}", channel.wire_code(), s))
        .collect::<Vec<_>>()
        .join(",");
    serde_json::json!({"action": action, "params": params}).to_string()
}

/// Parse one inbound text frame into its constituent JSON events. Upstream
/// feeds may send either a single object or a batched array.
pub fn parse_events(text: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    })
}

/// The `"ev"` tag of an event, if present.
pub fn event_tag(event: &serde_json::Value) -> Option<&str> {
    event.get("ev").and_then(|v| v.as_str())
}

/// True if `event` is a status frame reporting a completed authentication,
/// matching the original's case-insensitive `"success" in status and
/// "authenticated" in message` check.
pub fn is_auth_success_status(event: &serde_json::Value) -> bool {
    let status = event
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let message = event
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    status.contains("success") && message.contains("authenticated")
}

/// True if `event` looks like a status frame at all (no `ev`, or `ev ==
/// "status"`), as opposed to a data event that should reach handlers.
pub fn is_status_frame(event: &serde_json::Value) -> bool {
    match event_tag(event) {
        None => true,
        Some(tag) => tag.is_empty() || tag == "status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn builds_comma_joined_subscribe_params() {
        let msg = build_action_message("subscribe", ChannelTag::Trade, &[sym("AAPL"), sym("MSFT")]);
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["action"], "subscribe");
        assert_eq!(parsed["params"], "T.AAPL,T.MSFT");
    }

    #[test]
    fn auth_message_carries_api_key_as_params() {
        let msg = build_auth_message("secret-key");
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["action"], "auth");
        assert_eq!(parsed["params"], "secret-key");
    }

    #[test]
    fn parses_batched_array_and_single_object() {
        let arr = parse_events(r#"[{"ev":"T"},{"ev":"Q"}]"#).unwrap();
        assert_eq!(arr.len(), 2);
        let single = parse_events(r#"{"ev":"T"}"#).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn detects_auth_success_case_insensitively() {
        let ev: serde_json::Value =
            serde_json::from_str(r#"{"status":"Success","message":"authenticated"}"#).unwrap();
        assert!(is_auth_success_status(&ev));

        let not_yet: serde_json::Value =
            serde_json::from_str(r#"{"status":"connected","message":"connected"}"#).unwrap();
        assert!(!is_auth_success_status(&not_yet));
    }

    #[test]
    fn status_frame_detection_handles_missing_ev() {
        let status: serde_json::Value = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(is_status_frame(&status));
        let trade: serde_json::Value = serde_json::from_str(r#"{"ev":"T","sym":"AAPL"}"#).unwrap();
        assert!(!is_status_frame(&trade));
    }
}
