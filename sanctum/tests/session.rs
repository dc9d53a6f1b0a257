//! Session handshake and transport codec behavior.

use sanctum::{Error, SecretValue, SessionProposal, ALGORITHMS_AES, ALGORITHMS_PLAIN};

const PATH: &str = "/org/freedesktop/secrets/session/s1";

/// Run both halves of a handshake in-process.
fn handshake() -> (sanctum::Session, sanctum::Session) {
    let ours = SessionProposal::new().unwrap();
    let theirs = SessionProposal::new().unwrap();
    assert_eq!(ours.algorithm(), ALGORITHMS_AES);

    let our_public = ours.public_key();
    let their_public = theirs.public_key();

    let client = ours.establish(&their_public, PATH).unwrap();
    let service = theirs.establish(&our_public, PATH).unwrap();
    (client, service)
}

#[test]
fn both_sides_derive_the_same_key() {
    let (client, service) = handshake();
    assert_eq!(client.algorithm(), ALGORITHMS_AES);
    assert_eq!(service.algorithm(), ALGORITHMS_AES);

    // The only observable proof of key agreement is a cross decode.
    let secret = SecretValue::from_text("test test\n");
    let encoded = client.encode_secret(&secret).unwrap();
    let decoded = service.decode_secret(&encoded).unwrap();
    assert_eq!(decoded.as_bytes(), b"test test\n");
    assert_eq!(decoded.content_type(), "text/plain");
}

#[test]
fn aes_tuples_have_iv_and_padded_ciphertext() {
    let (client, _service) = handshake();
    let encoded = client
        .encode_secret(&SecretValue::from_text("test test\n"))
        .unwrap();

    assert_eq!(encoded.path, PATH);
    assert_eq!(encoded.iv.len(), 16);
    assert_eq!(encoded.ciphertext.len() % 16, 0);
    assert!(!encoded.ciphertext.is_empty());
    // Never the plaintext on the wire.
    assert_ne!(encoded.ciphertext.get(..10), Some(&b"test test\n"[..]));
}

#[test]
fn roundtrip_through_the_same_session() {
    let (client, _service) = handshake();
    for text in ["", "x", "test test\n", &"long ".repeat(100)] {
        let secret = SecretValue::from_text(text);
        let encoded = client.encode_secret(&secret).unwrap();
        let decoded = client.decode_secret(&encoded).unwrap();
        assert_eq!(decoded, secret);
    }
}

#[test]
fn wrong_session_path_is_invalid() {
    let (client, service) = handshake();
    let mut encoded = client
        .encode_secret(&SecretValue::from_text("secret"))
        .unwrap();
    encoded.path = "/org/freedesktop/secrets/session/other".to_owned();

    assert!(matches!(
        service.decode_secret(&encoded),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn session_path_comparison_is_case_sensitive() {
    let (client, service) = handshake();
    let mut encoded = client
        .encode_secret(&SecretValue::from_text("secret"))
        .unwrap();
    encoded.path = encoded.path.to_uppercase();

    assert!(service.decode_secret(&encoded).is_err());
}

#[test]
fn malformed_aes_tuples_are_rejected() {
    let (client, service) = handshake();
    let good = client
        .encode_secret(&SecretValue::from_text("secret"))
        .unwrap();

    // Truncated IV.
    let mut bad = good.clone();
    bad.iv.truncate(12);
    assert!(service.decode_secret(&bad).is_err());

    // Ciphertext not a block multiple.
    let mut bad = good.clone();
    bad.ciphertext.pop();
    assert!(service.decode_secret(&bad).is_err());

    // Empty ciphertext.
    let mut bad = good.clone();
    bad.ciphertext.clear();
    assert!(service.decode_secret(&bad).is_err());

    // Garbled ciphertext fails the strict unpad.
    let mut bad = good;
    for byte in bad.ciphertext.iter_mut() {
        *byte ^= 0x55;
    }
    assert!(service.decode_secret(&bad).is_err());
}

#[test]
fn plain_fallback_carries_raw_bytes() {
    let proposal = SessionProposal::new().unwrap();
    let session = proposal.establish_plain(PATH);
    assert_eq!(session.algorithm(), ALGORITHMS_PLAIN);

    let secret = SecretValue::new(b"\x00\x01\x02", "application/octet-stream");
    let encoded = session.encode_secret(&secret).unwrap();
    assert!(encoded.iv.is_empty());
    assert_eq!(encoded.ciphertext, b"\x00\x01\x02");

    let decoded = session.decode_secret(&encoded).unwrap();
    assert_eq!(decoded, secret);
}

#[test]
fn plain_decode_rejects_unexpected_iv() {
    let session = SessionProposal::new().unwrap().establish_plain(PATH);
    let mut encoded = session
        .encode_secret(&SecretValue::from_text("secret"))
        .unwrap();
    encoded.iv = vec![0u8; 16];
    assert!(matches!(
        session.decode_secret(&encoded),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn negotiate_prefers_the_encrypted_algorithm() {
    let mut service = None;
    let session = sanctum::negotiate(|algorithm, input| {
        assert_eq!(algorithm, ALGORITHMS_AES);
        let theirs = SessionProposal::new().unwrap();
        let output = theirs.public_key();
        service = Some(theirs.establish(input, PATH).unwrap());
        Ok(sanctum::OpenSessionReply {
            output,
            path: PATH.to_owned(),
        })
    })
    .unwrap();

    assert_eq!(session.algorithm(), ALGORITHMS_AES);

    let encoded = session
        .encode_secret(&SecretValue::from_text("negotiated"))
        .unwrap();
    let decoded = service.unwrap().decode_secret(&encoded).unwrap();
    assert_eq!(decoded.as_bytes(), b"negotiated");
}

#[test]
fn negotiate_falls_back_to_plain_on_not_supported() {
    let mut rounds = Vec::new();
    let session = sanctum::negotiate(|algorithm, input| {
        rounds.push(algorithm.to_owned());
        if algorithm == ALGORITHMS_AES {
            return Err(sanctum::OpenSessionError::NotSupported);
        }
        assert!(input.is_empty());
        Ok(sanctum::OpenSessionReply {
            output: Vec::new(),
            path: PATH.to_owned(),
        })
    })
    .unwrap();

    assert_eq!(rounds, [ALGORITHMS_AES, ALGORITHMS_PLAIN]);
    assert_eq!(session.algorithm(), ALGORITHMS_PLAIN);
    assert_eq!(session.path(), PATH);
}

#[test]
fn negotiate_surfaces_other_failures_as_protocol() {
    let result = sanctum::negotiate(|_algorithm, _input| {
        Err(sanctum::OpenSessionError::Failed("peer went away".to_owned()))
    });
    assert!(matches!(result, Err(Error::Protocol(_))));
}

#[test]
fn decoded_secrets_land_in_secure_memory() {
    let (client, service) = handshake();
    let encoded = client
        .encode_secret(&SecretValue::from_text("pageable? no"))
        .unwrap();
    let decoded = service.decode_secret(&encoded).unwrap();
    assert!(sanctum_secmem::check(decoded.as_bytes().as_ptr()));
}
