//! Property-based tests for key selectors, merges and reconciliation
//!
//! These tests use proptest to check invariants over generated inputs:
//! - List selectors never hold duplicates and keep every input key
//! - Coverage is reflexive and `All` covers every selector
//! - Merges never lose a field the incoming value leaves empty
//! - Loading All leaves exactly the remote key set in the cache

use proptest::prelude::*;
use resource_kit::entity::merge_json;
use resource_kit::{CachedMapResource, InMemoryLoader, Includes, ResourceEntity, ResourceKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Item {
    id: u32,
    label: Option<String>,
    note: Option<String>,
}

impl ResourceEntity for Item {
    type Key = u32;

    fn resource_key(&self) -> Self::Key {
        self.id
    }

    fn resource_prefix() -> &'static str {
        "item"
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Test: list() drops duplicates but keeps every key
    #[test]
    fn prop_list_dedupes(keys in prop::collection::vec(0u32..20, 0..40)) {
        let selector = ResourceKey::list(keys.clone());
        let listed = selector.keys();

        let unique: BTreeSet<u32> = listed.iter().copied().collect();
        prop_assert_eq!(unique.len(), listed.len());
        for key in &keys {
            prop_assert!(selector.includes(key));
        }
    }

    /// Test: coverage is reflexive, All covers everything, nothing but All covers All
    #[test]
    fn prop_covers(keys in prop::collection::vec(0u32..50, 1..20), extra in 50u32..100) {
        let selector = ResourceKey::list(keys.clone());
        prop_assert!(selector.covers(&selector));
        prop_assert!(ResourceKey::All.covers(&selector));
        prop_assert!(!selector.covers(&ResourceKey::All));
        prop_assert!(selector.covers(&ResourceKey::Key(keys[0])));
        prop_assert!(!selector.covers(&ResourceKey::Key(extra)));
    }

    /// Test: union of includes is a superset of both sides
    #[test]
    fn prop_includes_union(
        a in prop::collection::btree_set("[a-z]{1,6}", 0..5),
        b in prop::collection::btree_set("[a-z]{1,6}", 0..5),
    ) {
        let a = Includes::of(a);
        let b = Includes::of(b);
        let union = a.union(&b);
        prop_assert!(union.is_superset(&a));
        prop_assert!(union.is_superset(&b));
    }

    /// Test: merge keeps base fields where the incoming value is empty
    #[test]
    fn prop_merge_keeps_absent_fields(
        base_label in proptest::option::of("[a-z]{1,8}"),
        base_note in proptest::option::of("[a-z]{1,8}"),
        label in proptest::option::of("[a-z]{1,8}"),
        note in proptest::option::of("[a-z]{1,8}"),
    ) {
        let base = Item { id: 1, label: base_label.clone(), note: base_note.clone() };
        let incoming = Item { id: 1, label: label.clone(), note: note.clone() };

        let merged = base.merge_from(&incoming).unwrap();
        prop_assert_eq!(merged.label, label.or(base_label));
        prop_assert_eq!(merged.note, note.or(base_note));
    }

    /// Test: merge_json with nulls kept is a plain top-level overwrite
    #[test]
    fn prop_patch_overwrites_given_fields(value in "[a-z]{0,8}", other in "[a-z]{0,8}") {
        let mut base = json!({ "label": other, "note": "kept" });
        merge_json(&mut base, json!({ "label": value.clone() }), true);
        prop_assert_eq!(&base["label"], &json!(value));
        prop_assert_eq!(&base["note"], &json!("kept"));
    }

    /// Test: after load_all the cache holds exactly the remote key set
    #[test]
    fn prop_load_all_reconciles(
        cached in prop::collection::btree_set(0u32..30, 0..15),
        remote in prop::collection::btree_set(0u32..30, 0..15),
    ) {
        let keys = runtime().block_on(async {
            let loader = InMemoryLoader::new();
            for id in &remote {
                loader.insert(Item { id: *id, label: None, note: None });
            }
            let resource = CachedMapResource::new(loader);
            resource
                .set_many(cached.iter().map(|id| Item { id: *id, label: None, note: None }).collect())
                .unwrap();

            resource.load_all().await.unwrap();
            resource.keys().into_iter().collect::<BTreeSet<u32>>()
        });
        prop_assert_eq!(keys, remote);
    }
}
