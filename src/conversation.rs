use std::collections::HashMap;
use std::sync::Mutex;

/// Why the bot is waiting for a user's next message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AwaitReason {
    SearchQuery,
    BroadcastMessage,
    SessionMessage { session_id: String },
    SeasonSelection { series_id: String, series_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingReply {
    pub reason: AwaitReason,
    /// Only this user's next message is interpreted as the reply.
    pub initiator: i64,
}

/// Per-chat conversation state. At most one pending prompt per chat: starting
/// a new prompt or any new command supersedes whatever was pending, so a
/// stale prompt can never capture an unrelated message.
pub(crate) struct ConversationStore {
    pending: Mutex<HashMap<i64, PendingReply>>,
}

impl ConversationStore {
    pub(crate) fn new() -> Self {
        ConversationStore { pending: Mutex::new(HashMap::new()) }
    }

    /// Arm a prompt, replacing any prior one for the chat.
    pub(crate) fn begin(&self, chat_id: i64, initiator: i64, reason: AwaitReason) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(chat_id, PendingReply { reason, initiator });
    }

    /// Take the pending prompt if `user_id` is the user it was armed for.
    /// A match consumes the state; a mismatch leaves it armed.
    pub(crate) fn consume(&self, chat_id: i64, user_id: i64) -> Option<PendingReply> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending.get(&chat_id) {
            Some(p) if p.initiator == user_id => pending.remove(&chat_id),
            _ => None,
        }
    }

    pub(crate) fn peek(&self, chat_id: i64) -> Option<PendingReply> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get(&chat_id).cloned()
    }

    /// Drop the prompt unconditionally, e.g. when a new command arrives.
    pub(crate) fn clear(&self, chat_id: i64) -> Option<PendingReply> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_requires_matching_initiator() {
        let store = ConversationStore::new();
        store.begin(10, 1, AwaitReason::BroadcastMessage);
        // Someone else's message neither consumes nor disturbs the prompt.
        assert_eq!(store.consume(10, 2), None);
        assert!(store.peek(10).is_some());
        let taken = store.consume(10, 1).unwrap();
        assert_eq!(taken.reason, AwaitReason::BroadcastMessage);
        assert_eq!(store.peek(10), None);
    }

    #[test]
    fn new_prompt_supersedes_old() {
        let store = ConversationStore::new();
        store.begin(10, 1, AwaitReason::BroadcastMessage);
        store.begin(10, 1, AwaitReason::SessionMessage { session_id: "s9".into() });
        let taken = store.consume(10, 1).unwrap();
        assert_eq!(taken.reason, AwaitReason::SessionMessage { session_id: "s9".into() });
        // The superseded prompt is gone, not queued.
        assert_eq!(store.consume(10, 1), None);
    }

    #[test]
    fn chats_are_independent() {
        let store = ConversationStore::new();
        store.begin(10, 1, AwaitReason::SearchQuery);
        store.begin(11, 1, AwaitReason::BroadcastMessage);
        assert_eq!(store.consume(10, 1).map(|p| p.reason), Some(AwaitReason::SearchQuery));
        assert_eq!(store.consume(11, 1).map(|p| p.reason), Some(AwaitReason::BroadcastMessage));
    }

    #[test]
    fn clear_disarms() {
        let store = ConversationStore::new();
        store.begin(10, 1, AwaitReason::SearchQuery);
        assert!(store.clear(10).is_some());
        assert_eq!(store.consume(10, 1), None);
    }
}
