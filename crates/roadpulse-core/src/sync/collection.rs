//! Ordered, duplicate-free incident collection.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{Incident, IncidentId};
use crate::store::IncidentChange;

/// What a merge did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    Removed,
    Unchanged,
}

/// Incidents sorted by `created_at` descending, at most one per id.
///
/// Ties on `created_at` are ordered by id so the order is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentCollection {
    items: Vec<Incident>,
}

impl IncidentCollection {
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn as_slice(&self) -> &[Incident] {
        &self.items
    }

    pub fn get(&self, id: &IncidentId) -> Option<&Incident> {
        self.items.iter().find(|incident| &incident.id == id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Apply one change.
    ///
    /// Inserts of a known id replace it, updates of an unknown id insert it,
    /// and deletes of an unknown id do nothing.
    pub fn merge(&mut self, change: IncidentChange) -> MergeOutcome {
        match change {
            IncidentChange::Insert(incident) | IncidentChange::Update(incident) => {
                self.upsert(incident)
            }
            IncidentChange::Delete(id) => self.remove(&id),
        }
    }

    /// Replace the contents with `records`, keeping local entries whose ids
    /// are in `preserve` exactly as they are.
    pub fn reconcile(&mut self, records: Vec<Incident>, preserve: &HashSet<IncidentId>) {
        let incoming: HashSet<IncidentId> = records.iter().map(|record| record.id.clone()).collect();
        let stale: Vec<IncidentId> = self
            .items
            .iter()
            .filter(|incident| !incoming.contains(&incident.id) && !preserve.contains(&incident.id))
            .map(|incident| incident.id.clone())
            .collect();
        for id in stale {
            self.merge(IncidentChange::Delete(id));
        }
        for record in records {
            if !preserve.contains(&record.id) {
                self.merge(IncidentChange::Insert(record));
            }
        }
    }

    fn upsert(&mut self, incident: Incident) -> MergeOutcome {
        let outcome = match self.index_of(&incident.id) {
            Some(index) => {
                self.items.remove(index);
                MergeOutcome::Replaced
            }
            None => MergeOutcome::Inserted,
        };
        let position = self
            .items
            .partition_point(|existing| display_order(existing, &incident) == Ordering::Less);
        self.items.insert(position, incident);
        outcome
    }

    fn remove(&mut self, id: &IncidentId) -> MergeOutcome {
        match self.index_of(id) {
            Some(index) => {
                self.items.remove(index);
                MergeOutcome::Removed
            }
            None => MergeOutcome::Unchanged,
        }
    }

    fn index_of(&self, id: &IncidentId) -> Option<usize> {
        self.items.iter().position(|incident| &incident.id == id)
    }
}

/// Newest first, then by id.
fn display_order(left: &Incident, right: &Incident) -> Ordering {
    right
        .created_at
        .cmp(&left.created_at)
        .then_with(|| left.id.cmp(&right.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::incident;
    use pretty_assertions::assert_eq;

    fn ids(collection: &IncidentCollection) -> Vec<&str> {
        collection
            .as_slice()
            .iter()
            .map(|incident| incident.id.as_str())
            .collect()
    }

    fn assert_sorted(collection: &IncidentCollection) {
        let sorted = collection
            .as_slice()
            .windows(2)
            .all(|pair| display_order(&pair[0], &pair[1]) == Ordering::Less);
        assert!(sorted, "collection out of order: {:?}", ids(collection));
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut collection = IncidentCollection::new();
        assert_eq!(
            collection.merge(IncidentChange::Insert(incident("1", 100))),
            MergeOutcome::Inserted
        );
        assert_eq!(
            collection.merge(IncidentChange::Insert(incident("1", 100))),
            MergeOutcome::Replaced
        );
        assert_eq!(collection.as_slice().len(), 1);
    }

    #[test]
    fn update_before_insert_is_tolerated() {
        let mut collection = IncidentCollection::new();
        assert_eq!(
            collection.merge(IncidentChange::Update(incident("7", 50))),
            MergeOutcome::Inserted
        );
        assert!(collection.get(&IncidentId::from("7")).is_some());

        collection.merge(IncidentChange::Insert(incident("7", 50)));
        assert_eq!(ids(&collection), vec!["7"]);
    }

    #[test]
    fn delete_of_unknown_id_is_a_noop() {
        let mut collection = IncidentCollection::new();
        collection.merge(IncidentChange::Insert(incident("1", 100)));
        let before = collection.clone();

        assert_eq!(
            collection.merge(IncidentChange::Delete(IncidentId::from("missing"))),
            MergeOutcome::Unchanged
        );
        assert_eq!(collection, before);
    }

    #[test]
    fn authoritative_update_replaces_whole_record() {
        let mut collection = IncidentCollection::new();
        let mut optimistic = incident("1", 100);
        optimistic.likes = 5;
        collection.merge(IncidentChange::Insert(optimistic));

        let mut authoritative = incident("1", 100);
        authoritative.likes = 3;
        authoritative.title = "Cleared".to_string();
        collection.merge(IncidentChange::Update(authoritative.clone()));

        assert_eq!(collection.get(&IncidentId::from("1")), Some(&authoritative));
    }

    #[test]
    fn stream_insert_lands_in_timestamp_order() {
        let mut collection = IncidentCollection::new();
        collection.merge(IncidentChange::Insert(incident("1", 100)));
        collection.merge(IncidentChange::Insert(incident("2", 90)));
        collection.merge(IncidentChange::Insert(incident("3", 150)));
        assert_eq!(ids(&collection), vec!["3", "1", "2"]);
    }

    #[test]
    fn order_holds_after_every_merge() {
        let changes = vec![
            IncidentChange::Insert(incident("a", 30)),
            IncidentChange::Insert(incident("b", 10)),
            IncidentChange::Update(incident("c", 20)),
            IncidentChange::Insert(incident("d", 30)),
            IncidentChange::Delete(IncidentId::from("b")),
            IncidentChange::Update(incident("a", 5)),
            IncidentChange::Insert(incident("e", 40)),
            IncidentChange::Delete(IncidentId::from("zz")),
            IncidentChange::Insert(incident("b", 25)),
        ];

        let mut collection = IncidentCollection::new();
        for change in changes {
            collection.merge(change);
            assert_sorted(&collection);
        }
        assert_eq!(ids(&collection), vec!["e", "d", "b", "c", "a"]);
    }

    #[test]
    fn reconcile_replaces_contents_but_keeps_preserved_ids() {
        let mut collection = IncidentCollection::new();
        collection.merge(IncidentChange::Insert(incident("old", 10)));
        collection.merge(IncidentChange::Insert(incident("streamed", 200)));

        let mut stale_copy = incident("streamed", 200);
        stale_copy.likes = 99;
        let preserve = HashSet::from([IncidentId::from("streamed")]);
        collection.reconcile(vec![incident("1", 100), stale_copy], &preserve);

        assert_eq!(ids(&collection), vec!["streamed", "1"]);
        assert_eq!(
            collection.get(&IncidentId::from("streamed")).map(|i| i.likes),
            Some(0)
        );
    }
}
