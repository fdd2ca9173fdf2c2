//! `$`-path substitution for outbound commands.
//!
//! Any string field containing `$` is rewritten just before transmission.
//! `"$randy.x"` resolves `randy` through the name table, pulls that
//! reference's History entry, and walks the remaining path against the
//! object's first modifier, then the object payload, then the previous
//! intermediate value. A field that is exactly one `$` expression keeps
//! the resolved value's native JSON type, which is how numeric command
//! parameters ride through the string syntax.
//!
//! Substitution never fails: unresolved paths degrade to literal text.
//! One inherited quirk is kept for compatibility with the legacy client:
//! a first path segment with no History entry falls back to the name
//! table (or the chunk text) and silently discards the rest of the path.
//! TODO: revisit the path-discarding fallback once the server protocol
//! grows an explicit error channel for bad command parameters.

use crate::message::Message;
use crate::session::{Session, first_mod};
use serde_json::Value;

/// Rewrite every eligible field of an outbound message in place.
///
/// Only string-typed fields containing a `$` are touched; field order is
/// irrelevant.
pub fn substitute_state(session: &Session, msg: &mut Message) {
    let eligible: Vec<String> = msg
        .as_map()
        .iter()
        .filter(|(_, value)| value.as_str().is_some_and(|s| s.contains('$')))
        .map(|(key, _)| key.clone())
        .collect();

    for key in eligible {
        if let Some(raw) = msg.get(&key).and_then(Value::as_str).map(str::to_string) {
            msg.set(key, substitute_value(session, &raw));
        }
    }
}

/// Substitute one field value.
fn substitute_value(session: &Session, raw: &str) -> Value {
    let chunks: Vec<&str> = raw.split('$').collect();
    let mut resolved: Vec<Value> = chunks[1..]
        .iter()
        .map(|chunk| resolve_chunk(session, chunk))
        .collect();

    // A bare `$...` expression with no surrounding text substitutes the
    // resolved value directly, preserving its native type.
    if chunks.len() == 2 && chunks[0].is_empty() {
        return resolved.pop().unwrap_or(Value::Null);
    }

    let mut out = String::from(chunks[0]);
    for value in &resolved {
        out.push_str(&stringify(value));
    }
    Value::String(out)
}

/// Resolve one `$` expression: a dot-separated path rooted in History.
fn resolve_chunk(session: &Session, chunk: &str) -> Value {
    let mut segments = chunk.split('.');
    let Some(first) = segments.next() else {
        return Value::String(chunk.to_string());
    };

    let Some(entry) = session.history(&session.resolve(first)) else {
        // Legacy fallback: no matching object, so substitute the name
        // table value (or the chunk itself) and drop the rest of the path.
        return Value::String(
            session
                .lookup(first)
                .map_or_else(|| chunk.to_string(), str::to_string),
        );
    };

    let obj = entry.obj().cloned();
    let modifier = obj.as_ref().and_then(first_mod).cloned();
    let mut value = entry.to_value();

    for segment in segments {
        let hit = modifier
            .as_ref()
            .and_then(|m| m.get(segment))
            .or_else(|| obj.as_ref().and_then(|o| o.get(segment)))
            .or_else(|| value.get(segment))
            .cloned();
        match hit {
            Some(next) => value = next,
            // Dead end mid-path: degrade to the literal chunk text.
            None => return Value::String(chunk.to_string()),
        }
    }
    value
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with_avatar() -> Session {
        let mut session = Session::new();
        let mut msg = Message::parse(
            r#"{"op":"make","you":true,"obj":{"ref":"avatar-1","mods":[{"x":84,"noid":7}]}}"#,
        )
        .expect("avatar frame parses");
        session.scan(&mut msg);
        session
    }

    fn substitute(session: &Session, field: &str) -> Value {
        let mut msg = Message::new().with("value", field);
        substitute_state(session, &mut msg);
        msg.get("value").cloned().expect("field survives")
    }

    #[test]
    fn test_bare_expression_keeps_native_type() {
        let session = session_with_avatar();
        assert_eq!(substitute(&session, "$ME.x"), json!(84));
        assert_eq!(substitute(&session, "$ME.noid"), json!(7));
    }

    #[test]
    fn test_in_string_substitution_stringifies() {
        let session = session_with_avatar();
        assert_eq!(substitute(&session, "Hi $ME.noid$!"), json!("Hi 7!"));
        assert_eq!(substitute(&session, "at x=$ME.x"), json!("at x=84"));
    }

    #[test]
    fn test_object_payload_segment() {
        let session = session_with_avatar();
        assert_eq!(substitute(&session, "$ME.ref"), json!("avatar-1"));
    }

    #[test]
    fn test_modifier_wins_over_payload() {
        let mut session = Session::new();
        let mut msg = Message::parse(
            r#"{"op":"make","obj":{"ref":"item-1","x":1,"mods":[{"x":2}]}}"#,
        )
        .expect("frame parses");
        session.scan(&mut msg);
        assert_eq!(substitute(&session, "$item-1.x"), json!(2));
    }

    #[test]
    fn test_history_miss_falls_back_to_name_table() {
        let mut session = Session::new();
        // Known name without a History entry (learned from a `to` field).
        session.add_name("context-downtown-5");
        assert_eq!(
            substitute(&session, "$downtown.deep.path"),
            json!("context-downtown-5")
        );
    }

    #[test]
    fn test_history_miss_falls_back_to_chunk_text() {
        let session = Session::new();
        assert_eq!(
            substitute(&session, "$nobody.x"),
            json!("nobody.x")
        );
    }

    #[test]
    fn test_dead_end_path_degrades_to_chunk_text() {
        let session = session_with_avatar();
        assert_eq!(
            substitute(&session, "$ME.nonexistent"),
            json!("ME.nonexistent")
        );
    }

    #[test]
    fn test_non_string_and_dollarless_fields_untouched() {
        let session = session_with_avatar();
        let mut msg = Message::new()
            .with("n", 131)
            .with("plain", "no substitution");
        substitute_state(&session, &mut msg);
        assert_eq!(msg.get("n"), Some(&json!(131)));
        assert_eq!(msg.get("plain"), Some(&json!("no substitution")));
    }

    #[test]
    fn test_single_segment_expression_yields_history_entry() {
        let session = session_with_avatar();
        let value = substitute(&session, "$ME");
        assert_eq!(value.get("op"), Some(&json!("make")));
    }
}
