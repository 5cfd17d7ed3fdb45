//! Transcript store
//!
//! Role-tagged text accumulated into an ordered, merge-on-append history.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::session::Role;

/// One entry in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub end_of_response: bool,
}

/// Ordered conversation history
pub type ChatHistory = Vec<ChatMessage>;

/// Shared handle to a conversation history
///
/// Cloning yields another handle to the same history. Every mutation is
/// applied as a whole under the watch lock, so readers never observe a
/// partially merged history.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    history: Arc<watch::Sender<ChatHistory>>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (history, _) = watch::channel(ChatHistory::new());
        Self {
            history: Arc::new(history),
        }
    }

    /// Append a fragment of `role`'s text
    ///
    /// A fragment from the same role as the open last entry extends it,
    /// space-joined; otherwise a new entry starts. Entries already closed
    /// by [`end_turn`](Self::end_turn) are never extended.
    pub fn append_text(&self, role: Role, text: &str) {
        self.history.send_modify(|history| match history.last_mut() {
            Some(last) if last.role == role && !last.end_of_response => {
                last.text.push(' ');
                last.text.push_str(text);
            }
            _ => history.push(ChatMessage {
                role,
                text: text.to_string(),
                end_of_response: false,
            }),
        });
    }

    /// Mark every current entry end-of-response
    pub fn end_turn(&self) {
        self.history.send_modify(|history| {
            for message in history.iter_mut() {
                message.end_of_response = true;
            }
        });
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.history.send_modify(Vec::clear);
    }

    /// Copy of the current history
    #[must_use]
    pub fn snapshot(&self) -> ChatHistory {
        self.history.borrow().clone()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.borrow().len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.borrow().is_empty()
    }

    /// Watch the history; every change publishes the full merged history
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatHistory> {
        self.history.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_role_fragments_merge() {
        let store = TranscriptStore::new();
        store.append_text(Role::Assistant, "Hello");
        store.append_text(Role::Assistant, "world");

        assert_eq!(
            store.snapshot(),
            vec![ChatMessage {
                role: Role::Assistant,
                text: "Hello world".to_string(),
                end_of_response: false,
            }]
        );
    }

    #[test]
    fn any_split_yields_one_joined_entry() {
        let words = ["the", "quick", "brown", "fox", "jumps"];
        let expected = words.join(" ");

        for split in 1..words.len() {
            let store = TranscriptStore::new();
            store.append_text(Role::User, &words[..split].join(" "));
            store.append_text(Role::User, &words[split..].join(" "));

            let history = store.snapshot();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].text, expected);
        }
    }

    #[test]
    fn role_change_starts_new_entry() {
        let store = TranscriptStore::new();
        store.append_text(Role::User, "hi");
        store.append_text(Role::Assistant, "hello");
        store.append_text(Role::User, "bye");

        let roles: Vec<Role> = store.snapshot().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn end_turn_closes_existing_entries_only() {
        let store = TranscriptStore::new();
        store.append_text(Role::User, "what time is it");
        store.append_text(Role::Assistant, "noon");
        store.end_turn();
        store.append_text(Role::Assistant, "anything else?");

        let history = store.snapshot();
        assert_eq!(history.len(), 3);
        assert!(history[0].end_of_response);
        assert!(history[1].end_of_response);
        assert!(!history[2].end_of_response);
        assert_eq!(history[1].text, "noon");
    }

    #[test]
    fn clear_empties_store() {
        let store = TranscriptStore::new();
        store.append_text(Role::User, "hi");
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn handles_share_history_and_notify() {
        let store = TranscriptStore::new();
        let reader = store.clone();
        let mut watcher = store.subscribe();

        store.append_text(Role::User, "hi");

        assert_eq!(reader.len(), 1);
        assert!(watcher.has_changed().unwrap());
        assert_eq!(watcher.borrow_and_update()[0].text, "hi");
    }

    #[test]
    fn serializes_camel_case() {
        let message = ChatMessage {
            role: Role::User,
            text: "hi".to_string(),
            end_of_response: true,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({"role": "USER", "text": "hi", "endOfResponse": true})
        );
    }
}
