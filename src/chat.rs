//! Per-conversation unread counters and the currently open conversation.

use std::collections::HashMap;

use crate::protocol::UserId;

/// Unread tracking keyed by the *other* participant's id.
///
/// Invariant: the selected conversation always has an unread count of 0.
/// [`add_unread`](Self::add_unread) itself is unconditional; the inbound chat
/// path is responsible for skipping the selected conversation (see
/// [`on_message`](Self::on_message)).
#[derive(Debug, Clone, Default)]
pub struct ConversationTracker {
    unread: HashMap<UserId, u32>,
    selected: Option<UserId>,
}

impl ConversationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a conversation (resetting its counter) or close the current one.
    pub fn select_conversation(&mut self, id: Option<UserId>) {
        self.selected = id;
        if let Some(id) = id {
            self.unread.remove(&id);
        }
    }

    /// Close `id` if it is open, otherwise open it.
    pub fn toggle_conversation(&mut self, id: UserId) {
        if self.selected == Some(id) {
            self.select_conversation(None);
        } else {
            self.select_conversation(Some(id));
        }
    }

    pub fn selected(&self) -> Option<UserId> {
        self.selected
    }

    /// Bump the unread counter of `id` and return the new value.
    pub fn add_unread(&mut self, id: UserId) -> u32 {
        let count = self.unread.entry(id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn unread_count_for(&self, id: UserId) -> u32 {
        self.unread.get(&id).copied().unwrap_or(0)
    }

    /// Sum over all conversations, recomputed on every call.
    pub fn total_unread(&self) -> u32 {
        self.unread.values().fold(0, |acc, n| acc.saturating_add(*n))
    }

    /// Account for an inbound chat message seen by `local`.
    ///
    /// Returns the conversation and its new unread count when the message was
    /// counted; our own echoes and messages for the open conversation are not.
    pub fn on_message(
        &mut self,
        local: UserId,
        sender: UserId,
        receiver: UserId,
    ) -> Option<(UserId, u32)> {
        if sender == local {
            return None;
        }
        if receiver != local {
            tracing::debug!(sender, receiver, "chat message not addressed to us");
            return None;
        }
        if self.selected == Some(sender) {
            return None;
        }
        Some((sender, self.add_unread(sender)))
    }

    pub(crate) fn clear(&mut self) {
        self.unread.clear();
        self.selected = None;
    }
}
