// Path: crates/entity/src/app.rs
//! The application payload callback.
//!
//! The core is payload-agnostic: transaction bodies and the entity domain
//! are opaque canonical-JSON bytes, and their semantics belong to an
//! [`Application`] implementation supplied by the host. The chat
//! application here is the demo payload; nothing in the reducers depends
//! on it.

use keel_types::error::EntityError;
use keel_types::payload;
use serde_json::Value;

/// Deterministic payload semantics for one entity family.
///
/// Implementations must be pure functions of their arguments: replay on a
/// different host feeds the same bytes and must observe the same outputs.
pub trait Application {
    /// Whether this application handles the given transaction kind.
    fn supports(&self, kind: &str) -> bool;

    /// Applies one transaction body to the domain, returning the new
    /// canonical domain bytes.
    ///
    /// Unknown kinds surface as [`EntityError::UnknownTxKind`]; malformed
    /// bodies as [`EntityError::FrameBuildFailed`].
    fn apply_tx(&self, kind: &str, body: &[u8], domain: &[u8]) -> Result<Vec<u8>, EntityError>;
}

/// The demo application: a `"chat"` transaction appends its `message`
/// string to the `log` array of the domain object.
#[derive(Debug, Default, Clone)]
pub struct ChatApp;

impl ChatApp {
    /// The canonical empty chat domain.
    pub fn genesis_domain() -> Vec<u8> {
        br#"{"log":[]}"#.to_vec()
    }
}

impl Application for ChatApp {
    fn supports(&self, kind: &str) -> bool {
        kind == "chat"
    }

    fn apply_tx(&self, kind: &str, body: &[u8], domain: &[u8]) -> Result<Vec<u8>, EntityError> {
        if !self.supports(kind) {
            return Err(EntityError::UnknownTxKind(kind.to_string()));
        }
        let body: Value = payload::parse(body)
            .map_err(|e| EntityError::FrameBuildFailed(e.to_string()))?;
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| EntityError::FrameBuildFailed("chat body missing message".into()))?;

        let mut state: Value = payload::parse(domain)
            .map_err(|e| EntityError::FrameBuildFailed(format!("domain: {e}")))?;
        match state.get_mut("log").and_then(Value::as_array_mut) {
            Some(log) => log.push(Value::String(message.to_string())),
            None => return Err(EntityError::FrameBuildFailed("domain missing log".into())),
        }
        payload::canonicalize(&state).map_err(|e| EntityError::FrameBuildFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_messages_in_order() {
        let app = ChatApp;
        let d0 = ChatApp::genesis_domain();
        let d1 = app
            .apply_tx("chat", br#"{"message":"hello"}"#, &d0)
            .unwrap();
        let d2 = app.apply_tx("chat", br#"{"message":"world"}"#, &d1).unwrap();
        assert_eq!(d2, br#"{"log":["hello","world"]}"#);
    }

    #[test]
    fn rejects_unknown_kind_and_bad_bodies() {
        let app = ChatApp;
        let d0 = ChatApp::genesis_domain();
        assert!(matches!(
            app.apply_tx("transfer", b"{}", &d0),
            Err(EntityError::UnknownTxKind(_))
        ));
        assert!(matches!(
            app.apply_tx("chat", br#"{"msg":"typo"}"#, &d0),
            Err(EntityError::FrameBuildFailed(_))
        ));
        assert!(matches!(
            app.apply_tx("chat", b"not json", &d0),
            Err(EntityError::FrameBuildFailed(_))
        ));
    }
}
