//! Session state
//!
//! This core has no persistent-session resume, so a session's lifetime is
//! exactly the lifetime of one TCP connection: it is born expecting a
//! CONNECT, becomes active once accepted, and is discarded on close.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Session lifecycle state (see broker::connection's dispatch loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, no CONNECT processed yet. Only CONNECT is valid.
    ExpectConnect,
    /// CONNECT accepted; SUBSCRIBE/UNSUBSCRIBE/PUBLISH/PINGREQ are valid.
    Active,
    /// Session has been torn down; no further packets are processed.
    Closed,
}

/// Per-connection session state.
pub struct Session {
    /// Set once CONNECT is accepted. `None` while `ExpectConnect`.
    pub client_id: Option<Arc<str>>,
    pub state: SessionState,
    /// Filters this client is currently subscribed to, tracked here so
    /// `unsubscribe_all` on disconnect doesn't need to guess the filter set.
    pub subscriptions: HashSet<String>,
    /// Updated on every decoded packet. Not currently used to enforce
    /// keep-alive timeouts (see DESIGN.md), but kept so that's a pure
    /// addition rather than a data model change.
    pub last_activity: Instant,
    pub keep_alive: u16,
}

impl Session {
    pub fn new() -> Self {
        Self {
            client_id: None,
            state: SessionState::ExpectConnect,
            subscriptions: HashSet::new(),
            last_activity: Instant::now(),
            keep_alive: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn activate(&mut self, client_id: Arc<str>, keep_alive: u16) {
        self.client_id = Some(client_id);
        self.keep_alive = keep_alive;
        self.state = SessionState::Active;
    }

    pub fn add_subscription(&mut self, filter: String) {
        self.subscriptions.insert(filter);
    }

    pub fn remove_subscription(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_expects_connect() {
        let session = Session::new();
        assert_eq!(session.state, SessionState::ExpectConnect);
        assert!(session.client_id.is_none());
    }

    #[test]
    fn activate_sets_client_id_and_state() {
        let mut session = Session::new();
        session.activate(Arc::from("client-1"), 30);
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.client_id.as_deref(), Some("client-1"));
        assert_eq!(session.keep_alive, 30);
    }

    #[test]
    fn subscription_bookkeeping() {
        let mut session = Session::new();
        session.add_subscription("a/b".to_string());
        session.add_subscription("a/#".to_string());
        assert!(session.remove_subscription("a/b"));
        assert!(!session.remove_subscription("a/b"));
        assert_eq!(session.subscriptions.len(), 1);
    }
}
