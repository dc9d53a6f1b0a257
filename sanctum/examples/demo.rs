//! Sanctum — Interactive Demo
//!
//! Run with: `cargo run --example demo`
//!
//! Walks through the full surface: opening a storage file, store → lookup
//! → clear, the keyring collection engine, and a two-sided DH session
//! exchanging a secret.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use sanctum::{
    FileCollection, SearchFlags, SecretValue, SessionProposal, Storage, COLLECTION_DEFAULT,
    COLLECTION_SESSION,
};

fn section(title: &str) {
    println!("\n── {} ──", title);
}

fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let dir = std::env::temp_dir().join("sanctum-demo");
    tokio::fs::create_dir_all(&dir).await?;

    section("JWE storage: store / lookup / clear");
    let storage = Storage::open(dir.join("demo.jwe"), "master password", &cancel).await?;

    let mail = attrs(&[("service", "mail"), ("account", "joe")]);
    storage
        .store(
            None,
            &mail,
            COLLECTION_DEFAULT,
            "Mail password",
            &SecretValue::from_text("hunter2"),
            &cancel,
        )
        .await?;
    storage
        .store(
            None,
            &attrs(&[("service", "irc")]),
            COLLECTION_SESSION,
            "IRC password",
            &SecretValue::from_text("ephemeral"),
            &cancel,
        )
        .await?;

    let secret = storage.lookup(None, &mail, &cancel).await?.expect("stored");
    println!("  lookup(service=mail) -> {:?}", secret.as_text().unwrap());

    let found = storage
        .search(None, &BTreeMap::new(), SearchFlags { all: true }, &cancel)
        .await?;
    println!("  search({{}}) -> {} items", found.len());
    for item in &found {
        println!("    [{}] {:?}", item.label, item.attributes);
    }

    storage.clear(None, &mail, &cancel).await?;
    println!(
        "  after clear, lookup -> {:?}",
        storage.lookup(None, &mail, &cancel).await?
    );

    section("Keyring collection: attribute-hashed index on disk");
    let mut collection = FileCollection::load(
        dir.join("demo.keyring"),
        SecretValue::from_text("master password"),
        &cancel,
    )
    .await?;

    collection.replace(
        &attrs(&[("host", "db1"), ("role", "admin")]),
        "DB admin",
        &SecretValue::from_text("s3cret"),
    )?;
    collection.write(&cancel).await?;

    let matches = collection.search(&attrs(&[("host", "db1")]));
    let item = collection.decrypt(matches[0])?;
    println!(
        "  search(host=db1) -> [{}] value {:?}, created {}, modified {}",
        item.label,
        item.value.as_text().unwrap(),
        item.created,
        item.modified
    );
    println!(
        "  on disk: {} item(s), usage count {}",
        collection.items().len(),
        collection.usage_count()
    );

    section("DH session: both sides derive one AES-128 key");
    let ours = SessionProposal::new()?;
    let theirs = SessionProposal::new()?;
    let (our_public, their_public) = (ours.public_key(), theirs.public_key());

    let path = "/org/freedesktop/secrets/session/demo";
    let client = ours.establish(&their_public, path)?;
    let service = theirs.establish(&our_public, path)?;
    println!("  negotiated: {}", client.algorithm());

    let encoded = client.encode_secret(&SecretValue::from_text("test test\n"))?;
    println!(
        "  over the wire: iv {} bytes, ciphertext {} bytes",
        encoded.iv.len(),
        encoded.ciphertext.len()
    );
    let decoded = service.decode_secret(&encoded)?;
    println!("  peer decoded: {:?}", decoded.as_text().unwrap());

    println!("\nAll demos passed.");
    Ok(())
}
