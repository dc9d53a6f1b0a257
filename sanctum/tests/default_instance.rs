//! The environment-configured default instance.
//!
//! Kept in its own binary: these tests mutate process environment
//! variables, which must not race other tests.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use sanctum::{Error, SecretValue, Storage, COLLECTION_DEFAULT};

fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn default_instance_lifecycle() {
    let cancel = CancellationToken::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("default.jwe");

    // Without a password the instance refuses to come up.
    std::env::remove_var("SECRET_STORAGE_PASSWORD");
    std::env::set_var("SECRET_STORAGE_PATH", &path);
    Storage::reset_default();
    assert!(matches!(
        Storage::default_instance(&cancel).await,
        Err(Error::InvalidArgument(_))
    ));

    // With the environment in place, the instance is created lazily and
    // parent directories appear.
    std::env::set_var("SECRET_STORAGE_PASSWORD", "master password");
    let storage = Storage::default_instance(&cancel).await.unwrap();
    assert!(path.parent().unwrap().is_dir());

    // Repeated calls hand back the same instance.
    let again = Storage::default_instance(&cancel).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&storage, &again));

    storage
        .store(
            None,
            &attrs(&[("k", "v")]),
            COLLECTION_DEFAULT,
            "label",
            &SecretValue::from_text("kept"),
            &cancel,
        )
        .await
        .unwrap();

    // Reset drops the singleton; the next call reads the file fresh.
    Storage::reset_default();
    let fresh = Storage::default_instance(&cancel).await.unwrap();
    assert!(!std::sync::Arc::ptr_eq(&storage, &fresh));
    let found = fresh
        .lookup(None, &attrs(&[("k", "v")]), &cancel)
        .await
        .unwrap();
    assert_eq!(found.unwrap().as_bytes(), b"kept");

    Storage::reset_default();
    std::env::remove_var("SECRET_STORAGE_PASSWORD");
    std::env::remove_var("SECRET_STORAGE_PATH");
}
