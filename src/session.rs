//! Session state for one Elko connection.
//!
//! The server only ever identifies objects by reference strings it
//! assigned itself, so everything a bot can act on has to be learned from
//! the creation and announcement messages it has observed. The session
//! keeps three maps built up by [`Session::scan`]: the name table (alias →
//! full reference), the history (reference → most recent creation message)
//! and the object index (numeric `noid` → object payload).
//!
//! The session is owned by one client and mutated only on the inbound
//! message path; nothing else writes to it.

use crate::message::{Message, OP_HEREIS, OP_MAKE, is_truthy};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Alias for the controlled avatar's full reference.
pub const ME: &str = "ME";
/// Alias for the owning user's reference (first two dash segments of `ME`).
pub const USER: &str = "USER";
/// Alias for the avatar's disembodied counterpart.
pub const GHOST: &str = "GHOST";

/// What a scan decided beyond its state mutations.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// The message was our own avatar's creation; the client fires the
    /// entered-region event.
    pub entered_region: bool,
}

/// Known objects and names for one connection.
#[derive(Debug, Default)]
pub struct Session {
    names: HashMap<String, String>,
    history: HashMap<String, Message>,
    noids: HashMap<i64, Value>,
}

impl Session {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reference and all of its short aliases.
    ///
    /// `npc-region7-4471` registers itself, `npc`, `region7` and `4471`,
    /// plus any dot sub-segments of the dash segments. Last write wins on
    /// collision.
    pub fn add_name(&mut self, reference: &str) {
        self.names
            .insert(reference.to_string(), reference.to_string());
        for dash in reference.split('-') {
            self.names.insert(dash.to_string(), reference.to_string());
            for dot in dash.split('.') {
                self.names.insert(dot.to_string(), reference.to_string());
            }
        }
    }

    /// Resolve an alias to its full reference, or echo the input back if
    /// it is unknown (it may already be a literal reference).
    #[must_use]
    pub fn resolve(&self, name: &str) -> String {
        self.names
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Raw name table hit, without the echo fallback of [`Session::resolve`].
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }

    /// Most recent creation message recorded for a full reference.
    #[must_use]
    pub fn history(&self, reference: &str) -> Option<&Message> {
        self.history.get(reference)
    }

    /// Object payload indexed by its first modifier's numeric id.
    #[must_use]
    pub fn object_by_noid(&self, noid: i64) -> Option<&Value> {
        let found = self.noids.get(&noid);
        if found.is_none() {
            debug!("no object at noid {noid}");
        }
        found
    }

    /// First modifier of the object at a numeric id.
    #[must_use]
    pub fn mod_by_noid(&self, noid: i64) -> Option<&Value> {
        self.object_by_noid(noid).and_then(first_mod)
    }

    /// The controlled avatar's object payload, once known.
    #[must_use]
    pub fn avatar(&self) -> Option<&Value> {
        let reference = self.names.get(ME)?;
        self.history.get(reference)?.obj()
    }

    /// The avatar's numeric object id.
    #[must_use]
    pub fn avatar_noid(&self) -> Option<i64> {
        first_mod(self.avatar()?)?.get("noid")?.as_i64()
    }

    /// Whether the avatar is currently in its reduced ghost presence.
    ///
    /// False when the avatar has not been announced yet.
    #[must_use]
    pub fn is_ghosted(&self) -> bool {
        self.avatar()
            .and_then(first_mod)
            .and_then(|m| m.get("amAGhost"))
            .is_some_and(is_truthy)
    }

    /// Process one inbound message, updating every map it touches.
    ///
    /// This is the sole mutation point for session state. `HEREIS_$`
    /// announcements are normalized to the `make` shape first so the rest
    /// of the scan is operation-agnostic.
    pub fn scan(&mut self, msg: &mut Message) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        if let Some(to) = msg.to().map(str::to_string) {
            self.add_name(&to);
        }
        // Field-only packets (bare `to` pings) carry no object state.
        let Some(op) = msg.op().map(str::to_string) else {
            return outcome;
        };

        if op == OP_HEREIS
            && let Some(object) = msg.get("object").cloned()
        {
            msg.set("obj", object);
        }
        if op != OP_MAKE && op != OP_HEREIS {
            return outcome;
        }

        let Some(obj) = msg.obj().cloned() else {
            warn!("creation message without object payload: {msg:?}");
            return outcome;
        };
        let Some(reference) = obj.get("ref").and_then(Value::as_str).map(str::to_string)
        else {
            warn!("creation message without obj.ref: {msg:?}");
            return outcome;
        };

        self.add_name(&reference);
        self.history.insert(reference.clone(), msg.clone());

        if let Some(noid) = first_mod(&obj)
            .and_then(|m| m.get("noid"))
            .and_then(Value::as_i64)
        {
            self.noids.insert(noid, obj.clone());
        }

        if msg.is_you() {
            let mut segments = reference.split('-');
            if let (Some(kind), Some(owner)) = (segments.next(), segments.next()) {
                self.names.insert(USER.to_string(), format!("{kind}-{owner}"));
            }
            self.names.insert(ME.to_string(), reference.clone());
            outcome.entered_region = true;
        }

        if first_mod(&obj).and_then(|m| m.get("type")).and_then(Value::as_str)
            == Some("Ghost")
        {
            self.names.insert(GHOST.to_string(), reference);
        }

        outcome
    }
}

/// First modifier of an object payload, if it carries any.
pub(crate) fn first_mod(obj: &Value) -> Option<&Value> {
    obj.get("mods")?.get(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan_frame(session: &mut Session, frame: &str) -> ScanOutcome {
        let mut msg = Message::parse(frame).expect("test frame parses");
        session.scan(&mut msg)
    }

    #[test]
    fn test_alias_fan_out() {
        let mut session = Session::new();
        session.add_name("npc-region7-4471");
        for alias in ["npc-region7-4471", "npc", "region7", "4471"] {
            assert_eq!(session.resolve(alias), "npc-region7-4471", "{alias}");
        }
    }

    #[test]
    fn test_dot_sub_segments_resolve() {
        let mut session = Session::new();
        session.add_name("context-vault.1.2-88");
        assert_eq!(session.resolve("vault"), "context-vault.1.2-88");
        assert_eq!(session.resolve("2"), "context-vault.1.2-88");
    }

    #[test]
    fn test_resolve_echoes_unknown_names() {
        let session = Session::new();
        assert_eq!(session.resolve("user-randy-123"), "user-randy-123");
        assert_eq!(session.lookup("user-randy-123"), None);
    }

    #[test]
    fn test_scan_registers_to_field() {
        let mut session = Session::new();
        scan_frame(&mut session, r#"{"to":"context-downtown-5"}"#);
        assert_eq!(session.resolve("downtown"), "context-downtown-5");
    }

    #[test]
    fn test_make_records_history_and_noid_index() {
        let mut session = Session::new();
        scan_frame(
            &mut session,
            r#"{"op":"make","obj":{"ref":"item-door-12","mods":[{"type":"Door","noid":42,"open":1}]}}"#,
        );
        assert!(session.history("item-door-12").is_some());
        assert_eq!(
            session.object_by_noid(42).and_then(|o| o.get("ref")),
            Some(&json!("item-door-12"))
        );
        assert_eq!(
            session.mod_by_noid(42).and_then(|m| m.get("open")),
            Some(&json!(1))
        );
    }

    #[test]
    fn test_noid_reannouncement_supersedes() {
        let mut session = Session::new();
        scan_frame(
            &mut session,
            r#"{"op":"make","obj":{"ref":"item-a-1","mods":[{"noid":7,"x":1}]}}"#,
        );
        scan_frame(
            &mut session,
            r#"{"op":"make","obj":{"ref":"item-b-2","mods":[{"noid":7,"x":9}]}}"#,
        );
        assert_eq!(
            session.object_by_noid(7).and_then(|o| o.get("ref")),
            Some(&json!("item-b-2"))
        );
    }

    #[test]
    fn test_you_message_assigns_me_and_user() {
        let mut session = Session::new();
        let outcome = scan_frame(
            &mut session,
            r#"{"op":"make","you":true,"obj":{"ref":"user-randy-1230958","mods":[{"type":"Avatar","noid":1}]}}"#,
        );
        assert!(outcome.entered_region);
        assert_eq!(session.resolve(ME), "user-randy-1230958");
        assert_eq!(session.resolve(USER), "user-randy");
        assert_eq!(session.avatar_noid(), Some(1));
    }

    #[test]
    fn test_ghost_type_assigns_ghost_alias() {
        let mut session = Session::new();
        let outcome = scan_frame(
            &mut session,
            r#"{"op":"make","obj":{"ref":"ghost-randy-77","mods":[{"type":"Ghost","noid":9}]}}"#,
        );
        assert!(!outcome.entered_region);
        assert_eq!(session.resolve(GHOST), "ghost-randy-77");
    }

    #[test]
    fn test_hereis_normalized_to_make_shape() {
        let mut make = Session::new();
        scan_frame(
            &mut make,
            r#"{"op":"make","obj":{"ref":"item-chest-3","mods":[{"type":"Chest","noid":5}]}}"#,
        );
        let mut hereis = Session::new();
        scan_frame(
            &mut hereis,
            r#"{"op":"HEREIS_$","object":{"ref":"item-chest-3","mods":[{"type":"Chest","noid":5}]}}"#,
        );
        assert_eq!(hereis.resolve("chest"), make.resolve("chest"));
        assert_eq!(
            hereis.history("item-chest-3").and_then(Message::obj),
            make.history("item-chest-3").and_then(Message::obj),
        );
        assert_eq!(
            hereis.object_by_noid(5).and_then(|o| o.get("ref")),
            make.object_by_noid(5).and_then(|o| o.get("ref")),
        );
    }

    #[test]
    fn test_history_overwrite_keeps_unrelated_aliases() {
        let mut session = Session::new();
        scan_frame(
            &mut session,
            r#"{"op":"make","obj":{"ref":"npc-phil-1","mods":[{"noid":1,"x":10}]}}"#,
        );
        scan_frame(
            &mut session,
            r#"{"op":"make","obj":{"ref":"item-door-2","mods":[{"noid":2}]}}"#,
        );
        scan_frame(
            &mut session,
            r#"{"op":"make","obj":{"ref":"npc-phil-1","mods":[{"noid":1,"x":99}]}}"#,
        );

        let entry = session.history("npc-phil-1").expect("history entry");
        assert_eq!(
            first_mod(entry.obj().expect("obj")).and_then(|m| m.get("x")),
            Some(&json!(99))
        );
        assert_eq!(session.resolve("door"), "item-door-2");
    }

    #[test]
    fn test_op_less_packet_leaves_state_untouched() {
        let mut session = Session::new();
        scan_frame(&mut session, r#"{"to":"user-randy-1"}"#);
        assert!(session.history("user-randy-1").is_none());
        assert!(!session.is_ghosted());
    }

    #[test]
    fn test_is_ghosted_reads_first_modifier() {
        let mut session = Session::new();
        scan_frame(
            &mut session,
            r#"{"op":"make","you":true,"obj":{"ref":"user-randy-1","mods":[{"type":"Avatar","noid":1,"amAGhost":true}]}}"#,
        );
        assert!(session.is_ghosted());
        scan_frame(
            &mut session,
            r#"{"op":"make","you":true,"obj":{"ref":"user-randy-1","mods":[{"type":"Avatar","noid":1,"amAGhost":false}]}}"#,
        );
        assert!(!session.is_ghosted());
    }
}
