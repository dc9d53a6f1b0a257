//! Flattened JWE serialization of a single AES-GCM encryption, used for
//! master-key wrapping of stored collections.
//!
//! The object carries exactly the members `protected`, `encrypted_key`
//! (empty, direct mode), `iv`, `ciphertext`, `tag`, and `header`
//! (`{"alg": "dir"}`). The AEAD's additional data is the literal bytes of
//! the base64url-encoded `protected` member.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::{backend, CryptoBackend, GCM_IV_SIZE, GCM_TAG_SIZE};
use crate::base64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JweError {
    /// Malformed object: unknown algorithm, oversized IV or tag, bad JSON.
    InvalidArgument(&'static str),
    /// The AEAD refused; no further detail is reported.
    Crypto,
}

impl fmt::Display for JweError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JweError::InvalidArgument(what) => write!(f, "invalid JWE: {}", what),
            JweError::Crypto => write!(f, "JWE decryption failed"),
        }
    }
}

impl std::error::Error for JweError {}

/// The flattened JWE JSON object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwe {
    pub protected: String,
    pub encrypted_key: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
    pub header: Header,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
}

#[derive(Serialize, Deserialize)]
struct Protected {
    enc: String,
}

fn enc_to_key_len(enc: &str) -> Option<usize> {
    match enc {
        "A128GCM" => Some(16),
        "A192GCM" => Some(24),
        "A256GCM" => Some(32),
        _ => None,
    }
}

/// Encrypt `input` under `key` and serialize as a flattened JWE.
///
/// `iv` is for tests; the normal path draws a fresh 12-byte nonce.
pub fn symmetric_encrypt(
    input: &[u8],
    enc: &str,
    key: &[u8],
    iv: Option<&[u8]>,
) -> Result<Jwe, JweError> {
    let key_len =
        enc_to_key_len(enc).ok_or(JweError::InvalidArgument("unknown encryption algorithm"))?;
    if key.len() != key_len {
        return Err(JweError::InvalidArgument("key does not match algorithm"));
    }

    let mut nonce = [0u8; GCM_IV_SIZE];
    match iv {
        Some(iv) => {
            if iv.len() != GCM_IV_SIZE {
                return Err(JweError::InvalidArgument("IV is too large"));
            }
            nonce.copy_from_slice(iv);
        }
        None => backend()
            .fill_random(&mut nonce)
            .map_err(|_| JweError::Crypto)?,
    }

    let protected_json =
        serde_json::to_string(&Protected { enc: enc.to_owned() }).map_err(|_| JweError::Crypto)?;
    let protected = base64::encode(protected_json.as_bytes());

    let sealed = backend()
        .aes_gcm_seal(key, &nonce, protected.as_bytes(), input)
        .map_err(|_| JweError::Crypto)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - GCM_TAG_SIZE);

    Ok(Jwe {
        protected,
        encrypted_key: String::new(),
        iv: base64::encode(&nonce),
        ciphertext: base64::encode(ciphertext),
        tag: base64::encode(tag),
        header: Header {
            alg: "dir".to_owned(),
        },
    })
}

/// Authenticate and decrypt a flattened JWE under `key`.
pub fn symmetric_decrypt(jwe: &Jwe, key: &[u8]) -> Result<Vec<u8>, JweError> {
    let protected_json = base64::decode(&jwe.protected);
    let protected: Protected = serde_json::from_slice(&protected_json)
        .map_err(|_| JweError::InvalidArgument("protected header is not an object"))?;

    let key_len = enc_to_key_len(&protected.enc)
        .ok_or(JweError::InvalidArgument("unknown encryption algorithm"))?;
    if key.len() != key_len {
        return Err(JweError::InvalidArgument("key does not match algorithm"));
    }

    let iv = base64::decode(&jwe.iv);
    if iv.len() != GCM_IV_SIZE {
        return Err(JweError::InvalidArgument("IV is too large"));
    }

    let tag = base64::decode(&jwe.tag);
    if tag.len() != GCM_TAG_SIZE {
        return Err(JweError::InvalidArgument("tag is too large"));
    }

    let mut sealed = base64::decode(&jwe.ciphertext);
    sealed.extend_from_slice(&tag);

    backend()
        .aes_gcm_open(key, &iv, jwe.protected.as_bytes(), &sealed)
        .map_err(|_| JweError::Crypto)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0u8; 16];

    #[test]
    fn protected_header_names_the_algorithm() {
        let jwe = symmetric_encrypt(b"data", "A128GCM", &KEY, None).unwrap();
        let decoded = base64::decode(&jwe.protected);
        assert_eq!(decoded, br#"{"enc":"A128GCM"}"#);
        assert_eq!(jwe.header.alg, "dir");
        assert_eq!(jwe.encrypted_key, "");
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = symmetric_encrypt(b"data", "A128CBC-HS256", &KEY, None).unwrap_err();
        assert!(matches!(err, JweError::InvalidArgument(_)));
    }

    #[test]
    fn all_gcm_widths_roundtrip() {
        for (enc, key_len) in [("A128GCM", 16), ("A192GCM", 24), ("A256GCM", 32)] {
            let key = vec![0x33u8; key_len];
            let jwe = symmetric_encrypt(b"top secret", enc, &key, None).unwrap();
            assert_eq!(symmetric_decrypt(&jwe, &key).unwrap(), b"top secret");
        }
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let jwe = symmetric_encrypt(b"data", "A128GCM", &KEY, None).unwrap();
        let mut bad = jwe.clone();
        let mut raw = base64::decode(&bad.ciphertext);
        raw[0] ^= 0x01;
        bad.ciphertext = base64::encode(&raw);
        assert_eq!(symmetric_decrypt(&bad, &KEY), Err(JweError::Crypto));
    }

    #[test]
    fn tampered_protected_header_fails_closed() {
        let jwe = symmetric_encrypt(b"data", "A192GCM", &[0x11; 24], None).unwrap();
        let mut bad = jwe.clone();
        // Same algorithm, different whitespace: AAD no longer matches.
        bad.protected = base64::encode(br#"{"enc": "A192GCM"}"#);
        assert_eq!(symmetric_decrypt(&bad, &[0x11; 24]), Err(JweError::Crypto));
    }

    #[test]
    fn oversized_iv_is_invalid() {
        let mut jwe = symmetric_encrypt(b"data", "A128GCM", &KEY, None).unwrap();
        jwe.iv = base64::encode(&[0u8; 16]);
        assert!(matches!(
            symmetric_decrypt(&jwe, &KEY),
            Err(JweError::InvalidArgument(_))
        ));
    }

    #[test]
    fn json_shape_is_stable() {
        let jwe = symmetric_encrypt(b"data", "A128GCM", &KEY, Some(&[0u8; 12])).unwrap();
        let text = serde_json::to_string(&jwe).unwrap();
        let parsed: Jwe = serde_json::from_str(&text).unwrap();
        assert_eq!(symmetric_decrypt(&parsed, &KEY).unwrap(), b"data");
        for member in ["protected", "encrypted_key", "iv", "ciphertext", "tag", "header"] {
            assert!(text.contains(member), "missing member {}", member);
        }
    }
}
