//! Process-wide directory of locally-running stages, keyed by [`StageId`].
//!
//! Shared by [`crate::sender::Sender`] (same-node routing to a stage other
//! than the one issuing the send) and [`crate::play_dispatcher::PlayDispatcher`]
//! (inbound routing and creation-on-demand). Shaped like an actor-system
//! registry: `DashMap`-backed, looked up by id on every dispatch.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

// Layer 3: Internal module imports
use playhouse_proto::ids::StageId;

use crate::mailbox::MailboxSender;

/// Shared table of local stages. Cheap to clone (`Arc`-wrap at the call
/// site); every `Sender` and the `PlayDispatcher` hold a reference.
#[derive(Default)]
pub struct StageTable {
    entries: DashMap<StageId, MailboxSender>,
}

impl StageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage_id: StageId) -> Option<MailboxSender> {
        self.entries.get(&stage_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, stage_id: StageId) -> bool {
        self.entries.contains_key(&stage_id)
    }

    /// Atomically register `mailbox` for `stage_id` unless one is already
    /// registered. Returns the existing mailbox on a race so the losing
    /// caller can enqueue there instead of creating a duplicate stage
    /// (§4.8 "stage creation serialized per stageId").
    pub fn insert_if_absent(&self, stage_id: StageId, mailbox: MailboxSender) -> Option<MailboxSender> {
        match self.entries.entry(stage_id) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(mailbox);
                None
            }
        }
    }

    pub fn remove(&self, stage_id: StageId) {
        self.entries.remove(&stage_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;

    fn sender_for(stage_id: StageId) -> MailboxSender {
        Mailbox::new(stage_id).1
    }

    #[test]
    fn insert_if_absent_wins_on_first_call() {
        let table = StageTable::new();
        let won = table.insert_if_absent(StageId::new(1), sender_for(StageId::new(1)));
        assert!(won.is_none());
        assert!(table.contains(StageId::new(1)));
    }

    #[test]
    fn insert_if_absent_loses_on_race_and_returns_survivor() {
        let table = StageTable::new();
        table.insert_if_absent(StageId::new(1), sender_for(StageId::new(1)));
        let second = table.insert_if_absent(StageId::new(1), sender_for(StageId::new(1)));
        assert!(second.is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_drops_the_entry() {
        let table = StageTable::new();
        table.insert_if_absent(StageId::new(1), sender_for(StageId::new(1)));
        table.remove(StageId::new(1));
        assert!(table.is_empty());
    }
}
