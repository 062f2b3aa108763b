/// What a backend session should be reset to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// Seed with the settled history of this conversation.
    Conversation(String),
    /// No conversation is displayed; leave the session empty.
    Blank,
}

/// A reset that has to wait for the in-flight generation to settle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PendingReset {
    #[default]
    None,
    PendingFor(SessionTarget),
}

/// Tracks whose context the backend session currently holds, and the one
/// reset that may be deferred behind a background generation.
///
/// The backend session is a single shared resource: while a generation is
/// using it, a conversation switch only records the reset here, and the
/// controller applies it from [`SessionSwitch::settle`] once that generation
/// finishes. A later switch replaces an earlier pending one, since only the
/// most recent target matters once the session is free.
#[derive(Debug, Default)]
pub struct SessionSwitch {
    owner: Option<SessionTarget>,
    pending: PendingReset,
    background: Option<String>,
}

impl SessionSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn owner(&self) -> Option<&SessionTarget> {
        self.owner.as_ref()
    }

    /// Whether the session already holds `conversation_id`'s context.
    pub fn holds(&self, conversation_id: &str) -> bool {
        matches!(&self.owner, Some(SessionTarget::Conversation(id)) if id == conversation_id)
    }

    pub fn pending(&self) -> &PendingReset {
        &self.pending
    }

    /// Conversation whose generation keeps running while another one is shown.
    pub fn background(&self) -> Option<&str> {
        self.background.as_deref()
    }

    /// Record that the session was just reset to `target`.
    pub fn mark_reset(&mut self, target: SessionTarget) {
        self.owner = Some(target);
    }

    pub fn defer(&mut self, target: SessionTarget, generating: &str) {
        if let PendingReset::PendingFor(previous) = &self.pending {
            tracing::debug!("Replacing pending session reset for {:?}", previous);
        }
        self.pending = PendingReset::PendingFor(target);
        self.background = Some(generating.to_string());
    }

    /// The in-flight generation settled. Clears the background marker and
    /// hands back the deferred reset, if any, for the caller to apply.
    pub fn settle(&mut self) -> Option<SessionTarget> {
        self.background = None;
        match std::mem::take(&mut self.pending) {
            PendingReset::PendingFor(target) => Some(target),
            PendingReset::None => None,
        }
    }

    /// A conversation was deleted; nothing may still point at it.
    pub fn forget(&mut self, conversation_id: &str) {
        if self.holds(conversation_id) {
            self.owner = None;
        }
        if self.background.as_deref() == Some(conversation_id) {
            self.background = None;
        }
        if self.pending == PendingReset::PendingFor(SessionTarget::Conversation(conversation_id.to_string())) {
            self.pending = PendingReset::PendingFor(SessionTarget::Blank);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str) -> SessionTarget {
        SessionTarget::Conversation(id.to_string())
    }

    #[test]
    fn test_starts_without_owner_or_pending() {
        let switch = SessionSwitch::new();
        assert_eq!(switch.owner(), None);
        assert_eq!(switch.pending(), &PendingReset::None);
        assert!(!switch.holds("a"));
    }

    #[test]
    fn test_defer_then_settle_yields_target_once() {
        let mut switch = SessionSwitch::new();
        switch.mark_reset(conv("a"));
        switch.defer(conv("b"), "a");

        assert_eq!(switch.background(), Some("a"));
        assert_eq!(switch.pending(), &PendingReset::PendingFor(conv("b")));
        assert!(switch.holds("a"));

        assert_eq!(switch.settle(), Some(conv("b")));
        assert_eq!(switch.background(), None);
        assert_eq!(switch.pending(), &PendingReset::None);
        assert_eq!(switch.settle(), None);
    }

    #[test]
    fn test_later_switch_replaces_pending() {
        let mut switch = SessionSwitch::new();
        switch.defer(conv("b"), "a");
        switch.defer(conv("c"), "a");
        assert_eq!(switch.settle(), Some(conv("c")));
    }

    #[test]
    fn test_forget_clears_references() {
        let mut switch = SessionSwitch::new();
        switch.mark_reset(conv("a"));
        switch.defer(conv("b"), "a");

        switch.forget("a");
        assert_eq!(switch.owner(), None);
        assert_eq!(switch.background(), None);

        switch.forget("b");
        assert_eq!(switch.settle(), Some(SessionTarget::Blank));
    }
}
