//! Rows fetched during a transaction, keyed by (entity type, id)

use crate::executor::RawRow;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Whether a saved id was already cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    New,
    Updated,
}

#[derive(Debug, Default)]
pub struct EntityCache {
    rows: BTreeMap<String, BTreeMap<String, Arc<RawRow>>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest row for `id`, replacing any earlier one
    pub fn save(&mut self, entity: &str, id: &str, row: RawRow) -> SaveOutcome {
        let previous = self
            .rows
            .entry(entity.to_string())
            .or_default()
            .insert(id.to_string(), Arc::new(row));
        match previous {
            Some(_) => SaveOutcome::Updated,
            None => SaveOutcome::New,
        }
    }

    pub fn get(&self, entity: &str, id: &str) -> Option<Arc<RawRow>> {
        self.rows.get(entity).and_then(|rows| rows.get(id)).cloned()
    }

    pub fn contains(&self, entity: &str, id: &str) -> bool {
        self.rows.get(entity).is_some_and(|rows| rows.contains_key(id))
    }

    pub fn all_of_type(&self, entity: &str) -> Vec<Arc<RawRow>> {
        self.rows
            .get(entity)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, entity: &str, id: &str) -> Option<Arc<RawRow>> {
        self.rows.get_mut(entity).and_then(|rows| rows.remove(id))
    }

    pub fn len_of_type(&self, entity: &str) -> usize {
        self.rows.get(entity).map_or(0, BTreeMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RawRow {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn test_save_reports_new_then_updated() {
        let mut cache = EntityCache::new();
        assert_eq!(cache.save("Ship", "1", row(json!({"id": 1, "name": "a"}))), SaveOutcome::New);
        assert_eq!(
            cache.save("Ship", "1", row(json!({"id": 1, "name": "b"}))),
            SaveOutcome::Updated
        );
        let latest = cache.get("Ship", "1").expect("cached");
        assert_eq!(latest["name"], json!("b"));
    }

    #[test]
    fn test_types_are_separate() {
        let mut cache = EntityCache::new();
        cache.save("Ship", "1", row(json!({"id": 1})));
        assert!(cache.get("Call", "1").is_none());
        assert_eq!(cache.all_of_type("Ship").len(), 1);
        assert!(cache.all_of_type("Call").is_empty());
    }

    #[test]
    fn test_remove_hides_row() {
        let mut cache = EntityCache::new();
        cache.save("Ship", "1", row(json!({"id": 1})));
        cache.save("Ship", "2", row(json!({"id": 2})));
        assert!(cache.remove("Ship", "1").is_some());
        assert!(cache.get("Ship", "1").is_none());
        assert!(!cache.contains("Ship", "1"));
        assert_eq!(cache.len_of_type("Ship"), 1);
        assert!(cache.remove("Ship", "1").is_none());
    }
}
