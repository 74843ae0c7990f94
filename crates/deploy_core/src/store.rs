use std::collections::HashMap;

use crate::{ConfigPatch, DatasourceConfig, EntityId};

/// Per-datasource configuration records, keyed by [`EntityId`].
///
/// All mutation goes through [`ConfigStore::update`] and [`ConfigStore::reset`];
/// a change to one entity's record never touches a sibling's.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigStore {
    records: HashMap<EntityId, DatasourceConfig>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<&DatasourceConfig> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merges `patch` into the record for `id`, creating a default record first if absent.
    pub fn update(&mut self, id: &EntityId, patch: ConfigPatch) {
        let record = self.records.entry(id.clone()).or_default();
        patch.apply_to(record);
    }

    /// Rebuilds the store to exactly one default record per id, dropping all others.
    pub fn reset<'a>(&mut self, ids: impl IntoIterator<Item = &'a EntityId>) {
        self.records = ids
            .into_iter()
            .map(|id| (id.clone(), DatasourceConfig::default()))
            .collect();
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// True iff every id has a record satisfying `predicate`.
    ///
    /// An empty id list is vacuously ready; callers gate on having children first.
    pub fn all_ready<'a, P>(&self, ids: impl IntoIterator<Item = &'a EntityId>, predicate: P) -> bool
    where
        P: Fn(&DatasourceConfig) -> bool,
    {
        ids.into_iter()
            .all(|id| self.records.get(id).is_some_and(&predicate))
    }
}
