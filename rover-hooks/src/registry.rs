use crate::pinned::{FunctionIdentity, PinnedFunction};
use crate::record::{CallbackId, CallbackKind, CallbackRecord, Extra, RemovalFlag};
use crate::script::ScriptId;
use crate::slot::SlotMap;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Per-script callback lists backed by a single slot map.
///
/// Each script's list is ordered by registration sequence. A removed record is
/// unlinked from its list right away but keeps its slot until it is freed, so
/// dispatchers still holding its id observe `removed` instead of a dangling slot.
#[derive(Default)]
pub struct CallbackRegistry {
    records: SlotMap<CallbackRecord>,
    lists: HashMap<ScriptId, BTreeMap<u64, CallbackId>>,
    next_seq: u64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a new record at the end of `owner`'s list
    pub fn add(
        &mut self,
        owner: ScriptId,
        pinned: PinnedFunction,
        kind: CallbackKind,
        extra: Extra,
    ) -> CallbackId {
        let seq = self.next_seq;
        self.next_seq += 1;

        let id = CallbackId(self.records.insert(CallbackRecord {
            owner,
            pinned: Some(pinned),
            removed: RemovalFlag::new(),
            extra,
            kind,
            seq,
        }));
        self.lists.entry(owner).or_default().insert(seq, id);
        id
    }

    pub fn get(&self, id: CallbackId) -> Option<&CallbackRecord> {
        self.records.get(id.0)
    }

    /// First record in `owner`'s list holding `identity`
    pub fn find(&self, owner: ScriptId, identity: FunctionIdentity) -> Option<CallbackId> {
        self.scan(owner, Bound::Unbounded, identity)
    }

    /// Next record after `after` holding `identity`.
    ///
    /// `after` may already be removed (its position is still known); a freed
    /// `after` ends the enumeration.
    pub fn find_next(
        &self,
        owner: ScriptId,
        after: CallbackId,
        identity: FunctionIdentity,
    ) -> Option<CallbackId> {
        let after = self.get(after)?;
        if after.owner != owner {
            return None;
        }
        self.scan(owner, Bound::Excluded(after.seq), identity)
    }

    fn scan(
        &self,
        owner: ScriptId,
        start: Bound<u64>,
        identity: FunctionIdentity,
    ) -> Option<CallbackId> {
        let list = self.lists.get(&owner)?;
        list.range((start, Bound::Unbounded))
            .map(|(_, id)| *id)
            .find(|id| {
                self.get(*id)
                    .and_then(CallbackRecord::identity)
                    .is_some_and(|candidate| candidate == identity)
            })
    }

    /// Flag a record removed, unlink it and hand back its pin for release.
    /// Returns `None` if the record is unknown or was already removed.
    pub fn remove(&mut self, id: CallbackId) -> Option<(ScriptId, PinnedFunction)> {
        let record = self.records.get_mut(id.0)?;
        if record.removed.is_set() {
            return None;
        }
        record.removed.set();
        let owner = record.owner;
        let seq = record.seq;
        let pinned = record.pinned.take();

        if let Some(list) = self.lists.get_mut(&owner) {
            list.remove(&seq);
            if list.is_empty() {
                self.lists.remove(&owner);
            }
        }

        pinned.map(|pinned| (owner, pinned))
    }

    /// Deallocate a record outright. The returned record still carries its pin
    /// when it was never removed.
    pub fn free(&mut self, id: CallbackId) -> Option<CallbackRecord> {
        let record = self.records.remove(id.0)?;
        record.removed.set();
        if let Some(list) = self.lists.get_mut(&record.owner) {
            list.remove(&record.seq);
            if list.is_empty() {
                self.lists.remove(&record.owner);
            }
        }
        Some(record)
    }

    /// Remove every live record of `owner`, in registration order
    pub fn remove_owned(&mut self, owner: ScriptId) -> Vec<(CallbackId, PinnedFunction)> {
        let ids = self.ids_of(owner);
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|(_, pinned)| (id, pinned)))
            .collect()
    }

    /// Free every record owned by `owner`, removed ones included
    pub fn free_owned(&mut self, owner: ScriptId) -> Vec<CallbackRecord> {
        let ids: Vec<CallbackId> = self
            .records
            .iter()
            .filter(|(_, record)| record.owner == owner)
            .map(|(key, _)| CallbackId(key))
            .collect();

        self.lists.remove(&owner);
        ids.into_iter().filter_map(|id| self.free(id)).collect()
    }

    /// Snapshot of `owner`'s live records in registration order
    pub fn ids_of(&self, owner: ScriptId) -> Vec<CallbackId> {
        self.lists
            .get(&owner)
            .map(|list| list.values().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live (not removed) records for `owner`
    pub fn owned_count(&self, owner: ScriptId) -> usize {
        self.lists.get(&owner).map_or(0, BTreeMap::len)
    }

    /// Number of allocated records, including removed ones awaiting free
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
