//! MODP Diffie-Hellman over the IKE groups.
//!
//! Parameter sets are the fixed primes of RFC 2409 (groups 1 and 2) and
//! RFC 3526 (groups 5, 14, 15, 16, 18), generator 2, selectable by name.
//! Public values travel as unsigned big-endian byte strings; the shared
//! secret is left-padded with zeros to the prime length and held in secure
//! memory.

use num_bigint::BigUint;
use sanctum_secmem::SecureVec;

use crate::backend::{backend, CryptoBackend, CryptoError};

/// One named parameter set.
pub struct Group {
    pub name: &'static str,
    pub bits: u64,
    prime_hex: &'static str,
}

/// The IKE MODP groups, smallest first.
pub const GROUPS: &[Group] = &[
    Group { name: "ietf-ike-grp-modp-768", bits: 768, prime_hex: MODP_768 },
    Group { name: "ietf-ike-grp-modp-1024", bits: 1024, prime_hex: MODP_1024 },
    Group { name: "ietf-ike-grp-modp-1536", bits: 1536, prime_hex: MODP_1536 },
    Group { name: "ietf-ike-grp-modp-2048", bits: 2048, prime_hex: MODP_2048 },
    Group { name: "ietf-ike-grp-modp-3072", bits: 3072, prime_hex: MODP_3072 },
    Group { name: "ietf-ike-grp-modp-4096", bits: 4096, prime_hex: MODP_4096 },
    Group { name: "ietf-ike-grp-modp-8192", bits: 8192, prime_hex: MODP_8192 },
];

/// Prime and generator for one group, parsed and ready for arithmetic.
pub struct Params {
    prime: BigUint,
    base: BigUint,
    bits: u64,
}

/// A public value `g^x mod p`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(BigUint);

/// A private exponent. Not serializable; lives only inside a session.
pub struct PrivateKey(BigUint);

impl Params {
    /// Look a group up by its IKE name.
    pub fn from_group_name(name: &str) -> Option<Params> {
        let group = GROUPS.iter().find(|g| g.name == name)?;
        let prime = BigUint::parse_bytes(group.prime_hex.as_bytes(), 16)
            .expect("group primes are valid hex");
        debug_assert_eq!(prime.bits(), group.bits);
        Some(Params {
            prime,
            base: BigUint::from(2u32),
            bits: group.bits,
        })
    }

    /// Prime size in bits.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Prime size in bytes; also the length of derived secrets.
    pub fn prime_len(&self) -> usize {
        (self.bits as usize + 7) / 8
    }

    /// Generate `(x, g^x mod p)`.
    ///
    /// `bits == 0` uses the full prime width. The private value is drawn
    /// from strong randomness, is never zero, and has its high bits cleared
    /// below `p_bits − 1` so it stays strictly under the prime.
    pub fn generate_pair(&self, bits: u64) -> Result<(PublicKey, PrivateKey), CryptoError> {
        let pbits = self.bits;
        if pbits < 2 {
            return Err(CryptoError);
        }

        let bits = if bits == 0 { pbits } else { bits };
        if bits > pbits {
            return Err(CryptoError);
        }

        let keep = bits.min(pbits - 1) as usize;
        let mask = (BigUint::from(1u32) << keep) - 1u32;

        let mut buffer = vec![0u8; (bits as usize + 7) / 8];
        let private = loop {
            backend().fill_random(&mut buffer)?;
            let mut candidate = BigUint::from_bytes_be(&buffer);
            candidate &= &mask;
            if candidate != BigUint::from(0u32) {
                break candidate;
            }
        };

        let public = self.base.modpow(&private, &self.prime);
        Ok((PublicKey(public), PrivateKey(private)))
    }

    /// `peer^x mod p`, left-padded with zeros to the prime length.
    pub fn derive_secret(
        &self,
        peer: &PublicKey,
        private: &PrivateKey,
    ) -> Result<SecureVec, CryptoError> {
        let shared = peer.0.modpow(&private.0, &self.prime);

        let n_prime = self.prime_len();
        let bytes = shared.to_bytes_be();
        if bytes.len() > n_prime {
            return Err(CryptoError);
        }

        let mut secret = SecureVec::zeroed(n_prime);
        secret[n_prime - bytes.len()..].copy_from_slice(&bytes);
        Ok(secret)
    }
}

impl PublicKey {
    /// Import an unsigned big-endian public value.
    pub fn from_bytes(bytes: &[u8]) -> Option<PublicKey> {
        if bytes.is_empty() {
            return None;
        }
        Some(PublicKey(BigUint::from_bytes_be(bytes)))
    }

    /// Export as a minimal unsigned big-endian byte string.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }
}

// ---------------------------------------------------------------------------
// Group primes (RFC 2409 §6.1-6.2, RFC 3526 §2-7)
// ---------------------------------------------------------------------------

const MODP_768: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A63A3620FFFFFFFFFFFFFFFF",
);

const MODP_1024: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF",
);

const MODP_1536: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF",
);

const MODP_2048: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const MODP_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33",
    "A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864",
    "D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2",
    "08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

const MODP_4096: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33",
    "A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864",
    "D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2",
    "08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A92108011A723C12A787E6D7",
    "88719A10BDBA5B2699C327186AF4E23C1A946834B6150BDA2583E9CA2AD44CE8",
    "DBBBC2DB04DE8EF92E8EFC141FBECAA6287C59474E6BC05D99B2964FA090C3A2",
    "233BA186515BE7ED1F612970CEE2D7AFB81BDD762170481CD0069127D5B05AA9",
    "93B4EA988D8FDDC186FFB7DC90A6C08F4DF435C934063199FFFFFFFFFFFFFFFF",
);

const MODP_8192: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33",
    "A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864",
    "D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2",
    "08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A92108011A723C12A787E6D7",
    "88719A10BDBA5B2699C327186AF4E23C1A946834B6150BDA2583E9CA2AD44CE8",
    "DBBBC2DB04DE8EF92E8EFC141FBECAA6287C59474E6BC05D99B2964FA090C3A2",
    "233BA186515BE7ED1F612970CEE2D7AFB81BDD762170481CD0069127D5B05AA9",
    "93B4EA988D8FDDC186FFB7DC90A6C08F4DF435C93402849236C3FAB4D27C7026",
    "C1D4DCB2602646DEC9751E763DBA37BDF8FF9406AD9E530EE5DB382F413001AE",
    "B06A53ED9027D831179727B0865A8918DA3EDBEBCF9B14ED44CE6CBACED4BB1B",
    "DB7F1447E6CC254B332051512BD7AF426FB8F401378CD2BF5983CA01C64B92EC",
    "F032EA15D1721D03F482D7CE6E74FEF6D55E702F46980C82B5A84031900B1C9E",
    "59E7C97FBEC7E8F323A97A7E36CC88BE0F1D45B7FF585AC54BD407B22B4154AA",
    "CC8F6D7EBF48E1D814CC5ED20F8037E0A79715EEF29BE32806A1D58BB7C5DA76",
    "F550AA3D8A1FBFF0EB19CCB1A313D55CDA56C9EC2EF29632387FE8D76E3C0468",
    "043E8F663F4860EE12BF2D5B0B7474D6E694F91E6DBE115974A3926F12FEE5E4",
    "38777CB6A932DF8CD8BEC4D073B931BA3BC832B68D9DD300741FA7BF8AFC47ED",
    "2576F6936BA424663AAB639C5AE4F5683423B4742BF1C978238F16CBE39D652D",
    "E3FDB8BEFC848AD922222E04A4037C0713EB57A81A23F0C73473FC646CEA306B",
    "4BCBC8862F8385DDFA9D4B7FA2C087E879683303ED5BDD3A062B3CF5B3A278A6",
    "6D2A13F83F44F82DDF310EE074AB6A364597E899A0255DC164F31CC50846851D",
    "F9AB48195DED7EA1B1D510BD7EE74D73FAF36BC31ECFA268359046F4EB879F92",
    "4009438B481C6CD7889A002ED5EE382BC9190DA6FC026E479558E4475677E9AA",
    "9E3050E2765694DFC81F56E880B96E7160C980DD98EDD3DFFFFFFFFFFFFFFFFF",
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_group_parses_at_its_advertised_width() {
        for group in GROUPS {
            let params = Params::from_group_name(group.name).unwrap();
            assert_eq!(params.bits(), group.bits);
            assert_eq!(params.prime_len(), group.bits as usize / 8);
        }
    }

    #[test]
    fn unknown_group_is_none() {
        assert!(Params::from_group_name("ietf-ike-grp-modp-512").is_none());
    }

    #[test]
    fn generated_private_values_stay_below_the_prime() {
        let params = Params::from_group_name("ietf-ike-grp-modp-768").unwrap();
        for _ in 0..8 {
            let (public, private) = params.generate_pair(0).unwrap();
            assert!(private.0.bits() < params.bits());
            assert!(private.0 != BigUint::from(0u32));
            assert!(public.0 < params.prime);
        }
    }

    #[test]
    fn oversized_bit_request_is_refused() {
        let params = Params::from_group_name("ietf-ike-grp-modp-768").unwrap();
        assert!(params.generate_pair(769).is_err());
    }

    #[test]
    fn both_sides_agree_on_the_secret() {
        let params = Params::from_group_name("ietf-ike-grp-modp-1024").unwrap();
        let (pub_a, priv_a) = params.generate_pair(0).unwrap();
        let (pub_b, priv_b) = params.generate_pair(0).unwrap();

        let secret_a = params.derive_secret(&pub_b, &priv_a).unwrap();
        let secret_b = params.derive_secret(&pub_a, &priv_b).unwrap();

        assert_eq!(secret_a.as_slice(), secret_b.as_slice());
        assert_eq!(secret_a.len(), params.prime_len());
    }

    #[test]
    fn public_keys_roundtrip_through_bytes() {
        let params = Params::from_group_name("ietf-ike-grp-modp-1024").unwrap();
        let (public, _private) = params.generate_pair(0).unwrap();
        let bytes = public.to_bytes();
        assert_eq!(PublicKey::from_bytes(&bytes).unwrap(), public);
        assert!(PublicKey::from_bytes(&[]).is_none());
    }
}
