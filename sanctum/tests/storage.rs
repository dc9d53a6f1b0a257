//! Storage layer behavior: collections, persistence, schema matching.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use sanctum::{
    AttributeType, Error, SchemaFlags, SearchFlags, SecretValue, Schema, Storage,
    COLLECTION_DEFAULT, COLLECTION_SESSION,
};

fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn open(path: &std::path::Path) -> Storage {
    Storage::open(path, "master password", &CancellationToken::new())
        .await
        .expect("storage opens")
}

#[tokio::test]
async fn store_lookup_clear_in_default_collection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.jwe");
    let cancel = CancellationToken::new();

    let storage = open(&path).await;
    let query = attrs(&[("service", "mail"), ("account", "joe")]);

    storage
        .store(
            None,
            &query,
            COLLECTION_DEFAULT,
            "Mail password",
            &SecretValue::from_text("test test\n"),
            &cancel,
        )
        .await
        .unwrap();

    let found = storage.lookup(None, &query, &cancel).await.unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"test test\n");

    // A subset of the attributes still finds it.
    let found = storage
        .lookup(None, &attrs(&[("service", "mail")]), &cancel)
        .await
        .unwrap();
    assert!(found.is_some());

    assert!(storage.clear(None, &query, &cancel).await.unwrap());
    assert!(!storage.clear(None, &query, &cancel).await.unwrap());
    assert!(storage.lookup(None, &query, &cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn default_collection_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.jwe");
    let cancel = CancellationToken::new();

    {
        let storage = open(&path).await;
        storage
            .store(
                None,
                &attrs(&[("k", "v")]),
                COLLECTION_DEFAULT,
                "label",
                &SecretValue::from_text("persisted"),
                &cancel,
            )
            .await
            .unwrap();
    }

    let storage = open(&path).await;
    let found = storage
        .lookup(None, &attrs(&[("k", "v")]), &cancel)
        .await
        .unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"persisted");
}

#[tokio::test]
async fn stored_file_is_a_flattened_jwe() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.jwe");
    let cancel = CancellationToken::new();

    let storage = open(&path).await;
    storage
        .store(
            None,
            &attrs(&[("k", "v")]),
            COLLECTION_DEFAULT,
            "label",
            &SecretValue::from_text("secret"),
            &cancel,
        )
        .await
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let object: serde_json::Value = serde_json::from_str(&text).unwrap();
    for member in ["protected", "encrypted_key", "iv", "ciphertext", "tag", "header"] {
        assert!(object.get(member).is_some(), "missing member {}", member);
    }
    assert_eq!(object["header"]["alg"], "dir");
    // Ciphertext only; the secret never appears in clear.
    assert!(!text.contains("secret"));
}

#[tokio::test]
async fn wrong_password_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.jwe");
    let cancel = CancellationToken::new();

    {
        let storage = open(&path).await;
        storage
            .store(
                None,
                &attrs(&[("k", "v")]),
                COLLECTION_DEFAULT,
                "label",
                &SecretValue::from_text("secret"),
                &cancel,
            )
            .await
            .unwrap();
    }

    let result = Storage::open(&path, "wrong password", &cancel).await;
    assert!(matches!(result, Err(Error::Protocol(_))));
}

#[tokio::test]
async fn session_collection_never_touches_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.jwe");
    let cancel = CancellationToken::new();

    let storage = open(&path).await;
    storage
        .store(
            None,
            &attrs(&[("k", "v")]),
            COLLECTION_SESSION,
            "label",
            &SecretValue::from_text("ephemeral"),
            &cancel,
        )
        .await
        .unwrap();

    // Nothing persisted.
    assert!(!path.exists());

    let found = storage
        .lookup(None, &attrs(&[("k", "v")]), &cancel)
        .await
        .unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"ephemeral");

    // Session removal reports success without I/O.
    assert!(storage
        .clear(None, &attrs(&[("k", "v")]), &cancel)
        .await
        .unwrap());
    assert!(!path.exists());
}

#[tokio::test]
async fn session_collection_shadows_default_on_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(&dir.path().join("default.jwe")).await;
    let cancel = CancellationToken::new();
    let query = attrs(&[("k", "v")]);

    storage
        .store(None, &query, COLLECTION_DEFAULT, "d", &SecretValue::from_text("stored"), &cancel)
        .await
        .unwrap();
    storage
        .store(None, &query, COLLECTION_SESSION, "s", &SecretValue::from_text("shadow"), &cancel)
        .await
        .unwrap();

    let found = storage.lookup(None, &query, &cancel).await.unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"shadow");
}

#[tokio::test]
async fn store_overwrites_matching_item() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(&dir.path().join("default.jwe")).await;
    let cancel = CancellationToken::new();
    let query = attrs(&[("k", "v")]);

    for text in ["one", "two"] {
        storage
            .store(
                None,
                &query,
                COLLECTION_DEFAULT,
                text,
                &SecretValue::from_text(text),
                &cancel,
            )
            .await
            .unwrap();
    }

    let found = storage
        .search(None, &query, SearchFlags { all: true }, &cancel)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].label, "two");
    assert_eq!(found[0].secret().as_bytes(), b"two");
}

#[tokio::test]
async fn schema_name_partitions_items() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(&dir.path().join("default.jwe")).await;
    let cancel = CancellationToken::new();

    let mail = Schema::new("org.example.Mail", SchemaFlags::default())
        .with_attribute("k", AttributeType::String);
    let chat = Schema::new("org.example.Chat", SchemaFlags::default())
        .with_attribute("k", AttributeType::String);
    let query = attrs(&[("k", "v")]);

    storage
        .store(Some(&mail), &query, COLLECTION_DEFAULT, "mail", &SecretValue::from_text("m"), &cancel)
        .await
        .unwrap();
    storage
        .store(Some(&chat), &query, COLLECTION_DEFAULT, "chat", &SecretValue::from_text("c"), &cancel)
        .await
        .unwrap();

    let found = storage.lookup(Some(&mail), &query, &cancel).await.unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"m");
    let found = storage.lookup(Some(&chat), &query, &cancel).await.unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"c");

    // Schema-less lookup sees both; search with all returns them.
    let found = storage
        .search(None, &query, SearchFlags { all: true }, &cancel)
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn invalid_attributes_are_rejected_before_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(&dir.path().join("default.jwe")).await;
    let cancel = CancellationToken::new();

    let schema = Schema::new("org.example.Typed", SchemaFlags::default())
        .with_attribute("number", AttributeType::Integer);

    let result = storage
        .store(
            Some(&schema),
            &attrs(&[("number", "not a number")]),
            COLLECTION_DEFAULT,
            "label",
            &SecretValue::from_text("x"),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
async fn cancelled_store_keeps_memory_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open(&dir.path().join("default.jwe")).await;
    let query = attrs(&[("k", "v")]);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = storage
        .store(
            None,
            &query,
            COLLECTION_DEFAULT,
            "label",
            &SecretValue::from_text("kept in memory"),
            &cancelled,
        )
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));

    // The mutation happened; only persistence was cancelled.
    let found = storage
        .lookup(None, &query, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"kept in memory");
}

#[tokio::test]
async fn garbage_storage_file_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.jwe");
    tokio::fs::write(&path, b"{}").await.unwrap();

    let result = Storage::open(&path, "pw", &CancellationToken::new()).await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}
