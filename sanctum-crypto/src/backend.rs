//! The crypto capability set and its linked backend.
//!
//! Everything above this module is written against [`CryptoBackend`];
//! exactly one implementation is compiled in and returned by [`backend()`].
//! The current backend is the RustCrypto family. MODP Diffie-Hellman sits
//! in [`crate::dh`], built on this module's randomness.

use core::fmt;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AES-GCM nonces are always 12 bytes here.
pub const GCM_IV_SIZE: usize = 12;

/// AES-GCM authentication tags are always 16 bytes.
pub const GCM_TAG_SIZE: usize = 16;

/// Uniform failure for every primitive: which step failed is not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoError;

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cryptographic operation failed")
    }
}

impl std::error::Error for CryptoError {}

/// Hashes selectable for HKDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HkdfHash {
    Sha1,
    Sha256,
}

/// The capability set the rest of the system depends on.
///
/// Output lengths are driven by the caller's buffers; `hkdf` enforces
/// `L ≤ 255 · hash_len`, and absent salt means `hash_len` zero bytes.
pub trait CryptoBackend: Send + Sync {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32];

    fn hkdf(
        &self,
        hash: HkdfHash,
        ikm: &[u8],
        salt: Option<&[u8]>,
        info: &[u8],
        output: &mut [u8],
    ) -> Result<(), CryptoError>;

    fn pbkdf2_sha256(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        output: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// In-place CBC over `data`, which must be a multiple of 16 bytes.
    /// Key width (16 or 32 bytes) selects the cipher.
    fn aes_cbc_encrypt(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError>;

    fn aes_cbc_decrypt(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError>;

    /// Seal with AES-GCM; the returned buffer is `ciphertext ∥ tag(16)`.
    /// Key width (16, 24, or 32 bytes) selects the cipher.
    fn aes_gcm_seal(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Open `ciphertext ∥ tag(16)`, authenticating `aad`.
    fn aes_gcm_open(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn fill_random(&self, buffer: &mut [u8]) -> Result<(), CryptoError>;

    /// Nonce-grade randomness; IVs and salts, not keys.
    fn fill_nonce(&self, buffer: &mut [u8]) -> Result<(), CryptoError>;
}

/// The one backend linked into this build.
pub fn backend() -> &'static RustCryptoBackend {
    &RustCryptoBackend
}

// ---------------------------------------------------------------------------
// RustCrypto implementation
// ---------------------------------------------------------------------------

pub struct RustCryptoBackend;

impl CryptoBackend for RustCryptoBackend {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32] {
        let mut mac =
            <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac takes keys of any size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn hkdf(
        &self,
        hash: HkdfHash,
        ikm: &[u8],
        salt: Option<&[u8]>,
        info: &[u8],
        output: &mut [u8],
    ) -> Result<(), CryptoError> {
        match hash {
            HkdfHash::Sha1 => Hkdf::<Sha1>::new(salt, ikm)
                .expand(info, output)
                .map_err(|_| CryptoError),
            HkdfHash::Sha256 => Hkdf::<Sha256>::new(salt, ikm)
                .expand(info, output)
                .map_err(|_| CryptoError),
        }
    }

    fn pbkdf2_sha256(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        output: &mut [u8],
    ) -> Result<(), CryptoError> {
        if iterations == 0 || output.is_empty() {
            return Err(CryptoError);
        }
        pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, output);
        Ok(())
    }

    fn aes_cbc_encrypt(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        if data.len() % 16 != 0 {
            return Err(CryptoError);
        }
        match key.len() {
            16 => {
                let mut cipher = cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                    .map_err(|_| CryptoError)?;
                for block in data.chunks_exact_mut(16) {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
                Ok(())
            }
            32 => {
                let mut cipher = cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                    .map_err(|_| CryptoError)?;
                for block in data.chunks_exact_mut(16) {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
                Ok(())
            }
            _ => Err(CryptoError),
        }
    }

    fn aes_cbc_decrypt(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        if data.len() % 16 != 0 {
            return Err(CryptoError);
        }
        match key.len() {
            16 => {
                let mut cipher = cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                    .map_err(|_| CryptoError)?;
                for block in data.chunks_exact_mut(16) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
                Ok(())
            }
            32 => {
                let mut cipher = cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                    .map_err(|_| CryptoError)?;
                for block in data.chunks_exact_mut(16) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
                Ok(())
            }
            _ => Err(CryptoError),
        }
    }

    fn aes_gcm_seal(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if iv.len() != GCM_IV_SIZE {
            return Err(CryptoError);
        }
        let nonce = Nonce::from_slice(iv);
        let payload = Payload { msg: plaintext, aad };
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| CryptoError)?
                .encrypt(nonce, payload)
                .map_err(|_| CryptoError),
            24 => Aes192Gcm::new_from_slice(key)
                .map_err(|_| CryptoError)?
                .encrypt(nonce, payload)
                .map_err(|_| CryptoError),
            32 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| CryptoError)?
                .encrypt(nonce, payload)
                .map_err(|_| CryptoError),
            _ => Err(CryptoError),
        }
    }

    fn aes_gcm_open(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if iv.len() != GCM_IV_SIZE || ciphertext.len() < GCM_TAG_SIZE {
            return Err(CryptoError);
        }
        let nonce = Nonce::from_slice(iv);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| CryptoError)?
                .decrypt(nonce, payload)
                .map_err(|_| CryptoError),
            24 => Aes192Gcm::new_from_slice(key)
                .map_err(|_| CryptoError)?
                .decrypt(nonce, payload)
                .map_err(|_| CryptoError),
            32 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| CryptoError)?
                .decrypt(nonce, payload)
                .map_err(|_| CryptoError),
            _ => Err(CryptoError),
        }
    }

    fn fill_random(&self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::getrandom(buffer).map_err(|_| CryptoError)
    }

    fn fill_nonce(&self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        // The OS generator serves both grades.
        getrandom::getrandom(buffer).map_err(|_| CryptoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 1.
    #[test]
    fn hmac_sha256_vector() {
        let mac = backend().hmac_sha256(&[0x0B; 20], b"Hi There");
        assert_eq!(
            hex::encode(mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn cbc_roundtrip_both_widths() {
        for key_len in [16usize, 32] {
            let key = vec![0x42u8; key_len];
            let iv = [0x24u8; 16];
            let mut data = *b"exactly 32 bytes of cbc payload!";
            let original = data;

            backend().aes_cbc_encrypt(&key, &iv, &mut data).unwrap();
            assert_ne!(data, original);
            backend().aes_cbc_decrypt(&key, &iv, &mut data).unwrap();
            assert_eq!(data, original);
        }
    }

    #[test]
    fn cbc_rejects_partial_blocks() {
        let mut data = [0u8; 15];
        assert_eq!(
            backend().aes_cbc_encrypt(&[0u8; 16], &[0u8; 16], &mut data),
            Err(CryptoError)
        );
    }

    #[test]
    fn gcm_seal_appends_tag_and_authenticates_aad() {
        let key = [7u8; 16];
        let iv = [9u8; 12];
        let sealed = backend().aes_gcm_seal(&key, &iv, b"aad", b"secret").unwrap();
        assert_eq!(sealed.len(), 6 + GCM_TAG_SIZE);

        let opened = backend().aes_gcm_open(&key, &iv, b"aad", &sealed).unwrap();
        assert_eq!(opened, b"secret");

        assert_eq!(
            backend().aes_gcm_open(&key, &iv, b"wrong", &sealed),
            Err(CryptoError)
        );
    }

    #[test]
    fn random_fills_buffers() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        backend().fill_random(&mut a).unwrap();
        backend().fill_nonce(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
