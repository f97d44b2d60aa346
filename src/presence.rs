//! Registry of online identities, mutated only from inbound presence messages.

use std::collections::HashSet;

use crate::protocol::UserId;

/// Set of identities the server reports as connected.
///
/// There is no liveness inference: an id stays online until the server says
/// otherwise or a full resync drops it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceRegistry {
    online: HashSet<UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set (full resync).
    pub fn set_online_users(&mut self, ids: impl IntoIterator<Item = UserId>) {
        self.online = ids.into_iter().collect();
    }

    /// Mark `id` online. Returns `false` if it already was.
    pub fn add_online_user(&mut self, id: UserId) -> bool {
        self.online.insert(id)
    }

    /// Mark `id` offline. Returns `false` if it was not online.
    pub fn remove_online_user(&mut self, id: UserId) -> bool {
        self.online.remove(&id)
    }

    pub fn is_online(&self, id: UserId) -> bool {
        self.online.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    /// Online ids in ascending order.
    pub fn snapshot(&self) -> Vec<UserId> {
        let mut ids: Vec<_> = self.online.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn clear(&mut self) {
        self.online.clear();
    }
}
