//! The DH session transport codec.
//!
//! A session starts as a proposal carrying our ephemeral public value for
//! the IKE 1024-bit MODP group. The peer answers with its own public value
//! and a session path; both sides then hold the same AES-128 key derived
//! with HKDF-SHA-256 over the shared secret. A peer that does not support
//! encryption is accommodated by falling back to a plain session.
//!
//! After the handshake a session is stateless apart from its key and can
//! encode and decode transport tuples from any number of tasks.

use sanctum_crypto::{backend, dh, pkcs7, CryptoBackend, HkdfHash};
use sanctum_keyring::SecretValue;
use sanctum_secmem::SecureVec;

use crate::error::Error;

/// Wire name of the encrypted algorithm.
pub const ALGORITHMS_AES: &str = "dh-ietf1024-sha256-aes128-cbc-pkcs7";

/// Wire name of the plaintext fallback.
pub const ALGORITHMS_PLAIN: &str = "plain";

/// The group every AES session negotiates in.
const SESSION_GROUP: &str = "ietf-ike-grp-modp-1024";

/// Session keys are AES-128 keys.
const SESSION_KEY_SIZE: usize = 16;

const IV_SIZE: usize = 16;

/// The `(object_path, iv, ciphertext, content_type)` tuple a secret
/// travels as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSecret {
    /// Path of the session that encoded the secret.
    pub path: String,
    /// Empty for plain sessions; a fresh 16-byte nonce for AES.
    pub iv: Vec<u8>,
    /// The raw or encrypted secret bytes.
    pub ciphertext: Vec<u8>,
    pub content_type: String,
}

/// Our half of an OpenSession exchange, before the peer has answered.
pub struct SessionProposal {
    params: dh::Params,
    public: dh::PublicKey,
    private: dh::PrivateKey,
}

impl SessionProposal {
    /// Generate an ephemeral pair in the session group.
    pub fn new() -> Result<SessionProposal, Error> {
        let params = dh::Params::from_group_name(SESSION_GROUP)
            .ok_or_else(|| Error::Protocol("unknown session group".to_owned()))?;
        let (public, private) = params
            .generate_pair(0)
            .map_err(|_| Error::Protocol("couldn't generate session keypair".to_owned()))?;
        Ok(SessionProposal {
            params,
            public,
            private,
        })
    }

    /// The algorithm identifier to propose.
    pub fn algorithm(&self) -> &'static str {
        ALGORITHMS_AES
    }

    /// Our public value, as the OpenSession request argument.
    pub fn public_key(&self) -> Vec<u8> {
        self.public.to_bytes()
    }

    /// Complete the handshake from the peer's public value and the session
    /// path it assigned. Derives the 16-byte session key into secure
    /// memory.
    pub fn establish(self, peer_public: &[u8], path: &str) -> Result<Session, Error> {
        let peer = dh::PublicKey::from_bytes(peer_public)
            .ok_or_else(|| Error::Protocol("couldn't negotiate a valid session key".to_owned()))?;

        let ikm = self
            .params
            .derive_secret(&peer, &self.private)
            .map_err(|_| Error::Protocol("couldn't negotiate a valid session key".to_owned()))?;

        let mut key = SecureVec::zeroed(SESSION_KEY_SIZE);
        backend()
            .hkdf(HkdfHash::Sha256, &ikm, None, &[], &mut key)
            .map_err(|_| Error::Protocol("couldn't derive session key".to_owned()))?;

        tracing::debug!(path, "aes session established");
        Ok(Session {
            path: path.to_owned(),
            key: Some(key),
        })
    }

    /// The peer rejected encryption (`NOT_SUPPORTED`): fall back to a
    /// plain session on the given path. Discards the DH state.
    pub fn establish_plain(self, path: &str) -> Session {
        tracing::debug!(path, "plain session established");
        Session {
            path: path.to_owned(),
            key: None,
        }
    }
}

/// What the peer answers an OpenSession request with: its own output
/// value (the DH public value for AES, empty for plain) and the session
/// path it allocated.
#[derive(Clone, Debug)]
pub struct OpenSessionReply {
    pub output: Vec<u8>,
    pub path: String,
}

/// How a peer may refuse an OpenSession request.
#[derive(Clone, Debug)]
pub enum OpenSessionError {
    /// The proposed algorithm is not supported; the client retries plain.
    NotSupported,
    /// Anything else aborts the handshake.
    Failed(String),
}

/// Drive a full handshake against `exchange`, one OpenSession round trip
/// per call: `(algorithm, input) -> reply`.
///
/// Proposes the encrypted algorithm first and falls back to a plain
/// session when the peer answers `NotSupported`. Every other refusal
/// aborts the handshake.
pub fn negotiate<F>(mut exchange: F) -> Result<Session, Error>
where
    F: FnMut(&str, &[u8]) -> Result<OpenSessionReply, OpenSessionError>,
{
    let proposal = SessionProposal::new()?;
    let public = proposal.public_key();

    match exchange(ALGORITHMS_AES, &public) {
        Ok(reply) => proposal.establish(&reply.output, &reply.path),
        Err(OpenSessionError::NotSupported) => match exchange(ALGORITHMS_PLAIN, b"") {
            Ok(reply) => Ok(proposal.establish_plain(&reply.path)),
            Err(OpenSessionError::NotSupported) | Err(OpenSessionError::Failed(_)) => Err(
                Error::Protocol("couldn't communicate with the secret storage".to_owned()),
            ),
        },
        Err(OpenSessionError::Failed(message)) => Err(Error::Protocol(message)),
    }
}

/// An established transport session.
pub struct Session {
    path: String,
    /// AES-128 session key; `None` for plain sessions.
    key: Option<SecureVec>,
}

impl Session {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn algorithm(&self) -> &'static str {
        if self.key.is_some() {
            ALGORITHMS_AES
        } else {
            ALGORITHMS_PLAIN
        }
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Marshal a secret for this session.
    pub fn encode_secret(&self, value: &SecretValue) -> Result<TransportSecret, Error> {
        match &self.key {
            None => Ok(TransportSecret {
                path: self.path.clone(),
                iv: Vec::new(),
                ciphertext: value.as_bytes().to_vec(),
                content_type: value.content_type().to_owned(),
            }),
            Some(key) => {
                let secret = value.as_bytes();

                // Pad in secure memory; the buffer leaves it only once
                // encrypted.
                let mut padded = SecureVec::zeroed(pkcs7::padded_len(secret.len()));
                padded[..secret.len()].copy_from_slice(secret);
                pkcs7::pad_in_place(&mut padded, secret.len());

                let mut iv = vec![0u8; IV_SIZE];
                backend()
                    .fill_nonce(&mut iv)
                    .map_err(|_| Error::Protocol("couldn't encrypt secret".to_owned()))?;
                backend()
                    .aes_cbc_encrypt(key, &iv, &mut padded)
                    .map_err(|_| Error::Protocol("couldn't encrypt secret".to_owned()))?;

                Ok(TransportSecret {
                    path: self.path.clone(),
                    iv,
                    ciphertext: padded.to_vec(),
                    content_type: value.content_type().to_owned(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    /// Unmarshal a secret encoded for this session.
    ///
    /// A tuple carrying another session's path is invalid, as is any
    /// malformed IV, ciphertext length, or padding.
    pub fn decode_secret(&self, encoded: &TransportSecret) -> Result<SecretValue, Error> {
        if encoded.path != self.path {
            tracing::debug!(
                received = %encoded.path,
                ours = %self.path,
                "received a secret encoded with wrong session"
            );
            return Err(Error::InvalidArgument(
                "secret encoded with wrong session".to_owned(),
            ));
        }

        match &self.key {
            None => {
                if !encoded.iv.is_empty() {
                    return Err(Error::InvalidArgument(
                        "plain secret with invalid parameter".to_owned(),
                    ));
                }
                Ok(SecretValue::new(&encoded.ciphertext, &encoded.content_type))
            }
            Some(key) => {
                if encoded.iv.len() != IV_SIZE {
                    return Err(Error::InvalidArgument(
                        "encrypted secret with invalid parameter".to_owned(),
                    ));
                }
                if encoded.ciphertext.is_empty() || encoded.ciphertext.len() % 16 != 0 {
                    return Err(Error::InvalidArgument(
                        "encrypted secret with bad length".to_owned(),
                    ));
                }

                let mut padded = SecureVec::from_slice(&encoded.ciphertext);
                backend()
                    .aes_cbc_decrypt(key, &encoded.iv, &mut padded)
                    .map_err(|_| Error::Protocol("couldn't decrypt secret".to_owned()))?;

                let n_data = pkcs7::unpad(&padded).ok_or_else(|| {
                    Error::InvalidArgument("invalid or unencryptable secret".to_owned())
                })?;

                padded.resize(n_data);
                Ok(SecretValue::from_secure(padded, &encoded.content_type))
            }
        }
    }
}
