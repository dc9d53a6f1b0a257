//! Property tests over the attribute-hashed index.

use std::collections::BTreeMap;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use sanctum_keyring::{FileCollection, SecretValue};

fn small_attrs() -> impl Strategy<Value = BTreeMap<String, String>> {
    proptest::collection::btree_map("[a-d]{1,3}", "[x-z0-9]{1,3}", 1..4)
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds")
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// `search(query)` returns an item exactly when the query is contained
    /// in the item's attributes, judged at the hashed level.
    #[test]
    fn search_matches_containment(
        items in proptest::collection::vec(small_attrs(), 1..6),
        query in small_attrs(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        let mut collection = block_on(FileCollection::load(
            dir.path().join("k"),
            SecretValue::from_text("pw"),
            &cancel,
        ))
        .unwrap();

        for (index, attributes) in items.iter().enumerate() {
            collection
                .replace(attributes, &format!("item{}", index), &SecretValue::from_text("v"))
                .unwrap();
        }

        // Replacing deduplicates identical attribute sets; recover the
        // surviving plaintexts for the oracle.
        let stored: Vec<BTreeMap<String, String>> = collection
            .items()
            .iter()
            .map(|record| collection.decrypt(record).unwrap().attributes)
            .collect();

        let expected: Vec<&BTreeMap<String, String>> = stored
            .iter()
            .filter(|attributes| {
                query.iter().all(|(k, v)| attributes.get(k) == Some(v))
            })
            .collect();

        let found = collection.search(&query);
        prop_assert_eq!(found.len(), expected.len());
        for (record, attributes) in found.iter().zip(expected) {
            let item = collection.decrypt(record).unwrap();
            prop_assert_eq!(&item.attributes, attributes);
        }
    }

    /// Hashing is deterministic under one derived key: equal attribute
    /// values produce identical index entries.
    #[test]
    fn equal_values_hash_identically(attributes in small_attrs()) {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        let mut collection = block_on(FileCollection::load(
            dir.path().join("k"),
            SecretValue::from_text("pw"),
            &cancel,
        ))
        .unwrap();

        collection.replace(&attributes, "a", &SecretValue::from_text("1")).unwrap();
        let first = collection.items()[0].hashed_attributes.clone();

        // Replacing with the same attributes reuses the same index entry.
        collection.replace(&attributes, "b", &SecretValue::from_text("2")).unwrap();
        prop_assert_eq!(collection.items().len(), 1);
        prop_assert_eq!(&collection.items()[0].hashed_attributes, &first);
    }
}
