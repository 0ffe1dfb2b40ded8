//! The content store that supplies and accepts reconciled records is an
//! external collaborator, out of scope per spec §1. This module only pins
//! down the interface the session orchestrator drives it through, plus an
//! in-memory implementation for tests.

use crate::item::{Id, Item};

/// Ordered `(timestamp, id)` set that can be sealed for a reconciliation
/// round and that hands events to/from the orchestrator by id.
///
/// Durability, persistence across restarts, and how `event_json` is
/// produced/stored are left to the implementer (spec.md §9, "Open question
/// — event fetch phase"); this trait only fixes the shape the orchestrator
/// needs.
pub trait ContentStore: Send {
    /// All items currently held, used to build the `Storage` a
    /// reconciliation round seals and reconciles against.
    fn items(&self) -> Vec<Item>;

    /// The full event payload for `id`, if this store holds it. Returned as
    /// a JSON string so the orchestrator can embed it directly into an
    /// `EVENT` envelope without understanding its schema.
    fn fetch_event(&self, id: &Id) -> Option<String>;

    /// Record a peer-supplied event. `event_json` is whatever payload
    /// arrived in an `EVENT` envelope; this store is responsible for
    /// deriving the `(timestamp, id)` pair from it and persisting it so a
    /// later reconciliation round sees it.
    fn store_event(&mut self, event_json: &str);
}

/// Minimal `ContentStore` used by tests and the in-process demo wiring:
/// every item is its own "event" (the json body is just its hex id), with
/// no real parsing.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    items: Vec<Item>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: Item) {
        self.items.push(item);
    }
}

impl ContentStore for InMemoryContentStore {
    fn items(&self) -> Vec<Item> {
        self.items.clone()
    }

    fn fetch_event(&self, id: &Id) -> Option<String> {
        self.items
            .iter()
            .find(|item| &item.id == id)
            .map(|item| format!(r#"{{"id":"{}","created_at":{}}}"#, item.id.to_hex(), item.timestamp))
    }

    fn store_event(&mut self, event_json: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(event_json) else {
            tracing::warn!("content store: malformed event json, dropping");
            return;
        };
        let (Some(id_hex), Some(timestamp)) = (
            value.get("id").and_then(|v| v.as_str()),
            value.get("created_at").and_then(|v| v.as_u64()),
        ) else {
            tracing::warn!("content store: event json missing id/created_at, dropping");
            return;
        };
        let Ok(id) = Id::from_hex(id_hex) else {
            tracing::warn!("content store: event id is not valid hex, dropping");
            return;
        };
        self.items.push(Item::new(timestamp, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(byte: u8) -> Id {
        Id::new([byte; 32])
    }

    #[test]
    fn fetch_round_trips_through_store_event() {
        let mut store = InMemoryContentStore::new();
        store.insert(Item::new(10, id_of(0xaa)));

        let json = store.fetch_event(&id_of(0xaa)).unwrap();

        let mut other = InMemoryContentStore::new();
        other.store_event(&json);
        assert_eq!(other.items(), vec![Item::new(10, id_of(0xaa))]);
    }

    #[test]
    fn malformed_event_json_is_dropped_not_panicked() {
        let mut store = InMemoryContentStore::new();
        store.store_event("not json");
        store.store_event(r#"{"id":"zz"}"#);
        assert!(store.items().is_empty());
    }
}
