use std::collections::HashSet;

/// Telegram user ids allowed to talk to the bot. Fixed after startup.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    ids: HashSet<u64>,
}

impl AccessList {
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Whether an update from `user_id` may be answered. Updates without a
    /// sender are never allowed.
    pub fn allows(&self, user_id: Option<u64>) -> bool {
        user_id.is_some_and(|id| self.ids.contains(&id))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order, for logging.
    pub fn sorted_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}
