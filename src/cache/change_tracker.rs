//! Ids inserted, updated and deleted during a transaction
//!
//! Append-only; read by commit listeners.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    inserted: BTreeMap<String, BTreeSet<String>>,
    updated: BTreeMap<String, BTreeSet<String>>,
    deleted: BTreeMap<String, BTreeSet<String>>,
}

fn add<I>(target: &mut BTreeMap<String, BTreeSet<String>>, entity: &str, ids: I)
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    target
        .entry(entity.to_string())
        .or_default()
        .extend(ids.into_iter().map(Into::into));
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_inserted_entities<I>(&mut self, entity: &str, ids: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        add(&mut self.inserted, entity, ids);
    }

    pub fn add_updated_entities<I>(&mut self, entity: &str, ids: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        add(&mut self.updated, entity, ids);
    }

    pub fn add_deleted_entities<I>(&mut self, entity: &str, ids: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        add(&mut self.deleted, entity, ids);
    }

    pub fn inserted(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.inserted.get(entity)
    }

    pub fn updated(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.updated.get(entity)
    }

    pub fn deleted(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.deleted.get(entity)
    }

    pub fn all_inserted(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.inserted
    }

    pub fn all_updated(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.updated
    }

    pub fn all_deleted(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}
