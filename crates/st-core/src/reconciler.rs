//! The shared, ordered chat message list.
//!
//! Server-confirmed messages are deduplicated by id. Optimistic local
//! entries are swapped for their server echo in place, matched on role and
//! content (first pending match wins; two identical rapid sends can pair up
//! out of order).

use chrono::Utc;
use st_types::{ChatMessage, MessageId, Role};

use crate::registry::TaskStreamState;

/// What [`MessageLog::reconcile`] did with an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Appended,
    /// Replaced the pending entry at this index.
    ReplacedPending(usize),
    /// Same id already present; nothing changed.
    Duplicate,
}

impl Reconciled {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn into_inner(self) -> Vec<ChatMessage> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| m.id == *id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == *id)
    }

    /// Insert an optimistic entry and return its placeholder id.
    pub fn push_pending(&mut self, mut message: ChatMessage) -> MessageId {
        message.pending = true;
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Merge a server-confirmed message into the list.
    pub fn reconcile(&mut self, mut message: ChatMessage) -> Reconciled {
        if self.contains(&message.id) {
            return Reconciled::Duplicate;
        }
        message.pending = false;
        let pending = self.messages.iter().position(|m| {
            m.pending && m.role == message.role && m.content == message.content
        });
        match pending {
            Some(idx) => {
                tracing::debug!(id = %message.id, idx, "pending message confirmed");
                self.messages[idx] = message;
                Reconciled::ReplacedPending(idx)
            }
            None => {
                self.messages.push(message);
                Reconciled::Appended
            }
        }
    }

    /// Append a finalized message unless one with the same id exists.
    pub fn append_finalized(&mut self, message: ChatMessage) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<ChatMessage> {
        let idx = self.messages.iter().position(|m| m.id == *id)?;
        Some(self.messages.remove(idx))
    }
}

/// Freeze a finished task into an assistant message.
pub fn finalized_message(state: &TaskStreamState, id: MessageId, content: String) -> ChatMessage {
    let model = (!state.model_name.is_empty()).then(|| state.model_name.clone());
    ChatMessage {
        id,
        role: Role::Assistant,
        content,
        sender_label: state.display_label().to_string(),
        model_used: model,
        thinking_content: (!state.thinking_text.is_empty()).then(|| state.thinking_text.clone()),
        tool_calls: state.tool_invocations.clone(),
        token_usage: state.token_usage.clone(),
        created_at: Utc::now(),
        pending: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_types::TaskId;

    fn server(id: i64, role: Role, content: &str) -> ChatMessage {
        let mut m = ChatMessage::pending_user(content, "bob");
        m.id = MessageId::Server(id);
        m.role = role;
        m.pending = false;
        m
    }

    #[test]
    fn pending_entry_is_replaced_in_place() {
        let mut log = MessageLog::new();
        log.append_finalized(server(1, Role::Assistant, "earlier"));
        let local = log.push_pending(ChatMessage::pending_user("X", "bob"));
        log.append_finalized(server(2, Role::Assistant, "later"));

        let outcome = log.reconcile(server(10, Role::User, "X"));
        assert_eq!(outcome, Reconciled::ReplacedPending(1));
        assert_eq!(log.len(), 3);
        assert_eq!(log.messages()[1].id, MessageId::Server(10));
        assert!(!log.messages()[1].pending);
        assert!(!log.contains(&local));
    }

    #[test]
    fn duplicate_server_id_is_skipped() {
        let mut log = MessageLog::new();
        assert_eq!(log.reconcile(server(5, Role::User, "hi")), Reconciled::Appended);
        assert_eq!(log.reconcile(server(5, Role::User, "hi")), Reconciled::Duplicate);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn role_mismatch_appends() {
        let mut log = MessageLog::new();
        log.push_pending(ChatMessage::pending_user("X", "bob"));
        assert_eq!(
            log.reconcile(server(3, Role::Assistant, "X")),
            Reconciled::Appended
        );
        assert_eq!(log.len(), 2);
        assert!(log.messages()[0].pending);
    }

    #[test]
    fn identical_pending_entries_match_first_one() {
        let mut log = MessageLog::new();
        log.push_pending(ChatMessage::pending_user("same", "bob"));
        log.push_pending(ChatMessage::pending_user("same", "bob"));
        assert_eq!(
            log.reconcile(server(1, Role::User, "same")),
            Reconciled::ReplacedPending(0)
        );
        assert!(log.messages()[1].pending);
    }

    #[test]
    fn remove_by_id() {
        let mut log = MessageLog::from_messages(vec![server(1, Role::User, "a")]);
        assert!(log.remove(&MessageId::Server(1)).is_some());
        assert!(log.remove(&MessageId::Server(1)).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn finalized_message_copies_accumulator() {
        let mut state = TaskStreamState::new(TaskId::from("1"), "gpt-4o", "", 0);
        state.append_content("answer");
        state.append_thinking("hmm");
        let msg = finalized_message(&state, MessageId::Server(8), state.content_text.clone());
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.sender_label, "gpt-4o");
        assert_eq!(msg.model_used.as_deref(), Some("gpt-4o"));
        assert_eq!(msg.thinking_content.as_deref(), Some("hmm"));
        assert_eq!(msg.content, "answer");
    }
}
