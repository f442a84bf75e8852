//! Proof of discrete-log equivalence (PoDLE).
//!
//! A taker proves that its CoinJoin input pubkey `P = k*G` and a second
//! point `P2 = k*J_i` share the same private key, without revealing `k`.
//! The commitment `H(P2)` is sent at `!fill` time; the full proof is
//! revealed at `!auth`. `J_i` is a NUMS point: an alternate generator with
//! unknown discrete log, derived by a transparent algorithm so both sides
//! can regenerate it. The algorithm is network-visible and must not change.

use crate::foundation::util::encoding::parse_hex_array;
use crate::foundation::{CoinjoinError, Hash32, Outpoint, Result};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const G_COMPRESSED: [u8; 33] = [
    0x02, 0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87, 0x0b, 0x07, 0x02, 0x9b,
    0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b, 0x16, 0xf8, 0x17, 0x98,
];

pub const G_UNCOMPRESSED: [u8; 65] = [
    0x04, 0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87, 0x0b, 0x07, 0x02, 0x9b,
    0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b, 0x16, 0xf8, 0x17, 0x98, 0x48, 0x3a, 0xda, 0x77, 0x26,
    0xa3, 0xc4, 0x65, 0x5d, 0xa4, 0xfb, 0xfc, 0x0e, 0x11, 0x08, 0xa8, 0xfd, 0x17, 0xb4, 0x48, 0xa6, 0x85, 0x54, 0x19,
    0x9c, 0x47, 0xd0, 0x8f, 0xfb, 0x10, 0xd4, 0xb8,
];

/// Curve order n, big-endian.
const CURVE_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, 0xba, 0xae, 0xdc,
    0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

/// Retry indices a maker accepts by default. Index 0 is the preferred
/// first use; takers fall back to 1 then 2 after a rejected commitment.
pub const DEFAULT_INDEX_RANGE: [u8; 3] = [0, 1, 2];

static NUMS_TABLE: OnceLock<Vec<PublicKey>> = OnceLock::new();

/// Derive the NUMS point for `index` from scratch.
///
/// For each serialization of G (compressed then uncompressed) and each
/// counter in 0..=255, hash `G_ser || index || counter` and treat the
/// digest as an even-Y compressed x coordinate; the first candidate that
/// lies on the curve wins. Results are consensus-visible between peers,
/// so this listing is bit-exact by contract.
pub fn generate_nums_point(index: u8) -> Result<PublicKey> {
    for g_encoded in [&G_COMPRESSED[..], &G_UNCOMPRESSED[..]] {
        for counter in 0..=255u8 {
            let mut hasher = Sha256::new();
            hasher.update(g_encoded);
            hasher.update([index]);
            hasher.update([counter]);
            let x: Hash32 = hasher.finalize().into();

            let mut candidate = [0u8; 33];
            candidate[0] = 0x02;
            candidate[1..].copy_from_slice(&x);
            if let Ok(point) = PublicKey::from_slice(&candidate) {
                return Ok(point);
            }
        }
    }
    // Unreachable for any index in practice; the double loop exists to
    // guarantee completeness.
    Err(CoinjoinError::crypto("nums", format!("no curve point found for index {index}")))
}

/// Cached NUMS point lookup. The whole table is generated on first use.
pub fn nums_point(index: u8) -> Result<PublicKey> {
    if let Some(table) = NUMS_TABLE.get() {
        return Ok(table[index as usize]);
    }
    let mut table = Vec::with_capacity(256);
    for i in 0..=255u8 {
        table.push(generate_nums_point(i)?);
    }
    Ok(NUMS_TABLE.get_or_init(|| table)[index as usize])
}

/// A generated PoDLE: the commitment sent at `!fill` plus the revelation
/// fields sent at `!auth`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Podle {
    pub commitment: Hash32,
    pub p: [u8; 33],
    pub p2: [u8; 33],
    pub s: Hash32,
    pub e: Hash32,
    pub utxo: Outpoint,
    pub index: u8,
}

impl Podle {
    /// Wire form of the commitment: `'P' + hex(commitment)`, 65 chars.
    /// The leading `P` tags the commitment type as standard PoDLE.
    pub fn commitment_str(&self) -> String {
        format!("P{}", hex::encode(self.commitment))
    }

    /// Wire form of the revelation: `P|P2|s|e|txid:vout`.
    pub fn serialize_revelation(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            hex::encode(self.p),
            hex::encode(self.p2),
            hex::encode(self.s),
            hex::encode(self.e),
            self.utxo,
        )
    }
}

/// Revelation fields as parsed off the wire, before verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodleReveal {
    pub p: [u8; 33],
    pub p2: [u8; 33],
    pub s: Hash32,
    pub e: Hash32,
    pub utxo: Outpoint,
}

impl PodleReveal {
    pub fn parse(wire: &str) -> Result<Self> {
        let parts: Vec<&str> = wire.split('|').collect();
        if parts.len() != 5 {
            return Err(CoinjoinError::PodleMalformed(format!("revelation has {} fields, expected 5", parts.len())));
        }
        Ok(Self {
            p: parse_hex_array::<33>(parts[0]).map_err(|e| CoinjoinError::PodleMalformed(format!("P: {e}")))?,
            p2: parse_hex_array::<33>(parts[1]).map_err(|e| CoinjoinError::PodleMalformed(format!("P2: {e}")))?,
            s: parse_hex_array::<32>(parts[2]).map_err(|e| CoinjoinError::PodleMalformed(format!("s: {e}")))?,
            e: parse_hex_array::<32>(parts[3]).map_err(|e| CoinjoinError::PodleMalformed(format!("e: {e}")))?,
            utxo: parts[4].parse().map_err(|e| CoinjoinError::PodleMalformed(format!("utxo: {e}")))?,
        })
    }
}

/// Parse a wire commitment string (`'P' + 64 hex chars`).
pub fn parse_commitment(wire: &str) -> Result<Hash32> {
    let hex_part = wire
        .strip_prefix('P')
        .ok_or_else(|| CoinjoinError::PodleMalformed("commitment missing 'P' type tag".into()))?;
    parse_hex_array::<32>(hex_part).map_err(|e| CoinjoinError::PodleMalformed(format!("commitment: {e}")))
}

/// Generate a PoDLE for the UTXO private key `privkey` and NUMS `index`.
pub fn generate(privkey: &[u8; 32], utxo: Outpoint, index: u8) -> Result<Podle> {
    let secp = Secp256k1::new();
    let k = SecretKey::from_slice(privkey)
        .map_err(|err| CoinjoinError::PodleMalformed(format!("invalid private key value: {err}")))?;
    let j = nums_point(index)?;

    let p = PublicKey::from_secret_key(&secp, &k);
    let p2 = j.mul_tweak(&secp, &Scalar::from(k))?;
    let commitment: Hash32 = Sha256::digest(p2.serialize()).into();

    // Uniform nonce; rejection sampling inside SecretKey::new.
    let r = SecretKey::new(&mut rand::thread_rng());
    let kg = PublicKey::from_secret_key(&secp, &r);
    let kj = j.mul_tweak(&secp, &Scalar::from(r))?;

    let e = challenge_hash(&kg, &kj, &p, &p2);
    let e_scalar = scalar_mod_n(e)?;
    // s = r + e*k  (mod n)
    let s = k.mul_tweak(&e_scalar)?.add_tweak(&Scalar::from(r))?;

    Ok(Podle { commitment, p: p.serialize(), p2: p2.serialize(), s: s.secret_bytes(), e, utxo, index })
}

/// Verify a revelation against a previously received commitment.
///
/// The revelation does not carry the NUMS index; every index in
/// `accepted_indices` is tried and the matching one is returned.
pub fn verify(reveal: &PodleReveal, commitment: &Hash32, accepted_indices: &[u8]) -> Result<u8> {
    let secp = Secp256k1::new();

    let p = PublicKey::from_slice(&reveal.p)
        .map_err(|err| CoinjoinError::PodleMalformed(format!("P not on curve: {err}")))?;
    let p2 = PublicKey::from_slice(&reveal.p2)
        .map_err(|err| CoinjoinError::PodleMalformed(format!("P2 not on curve: {err}")))?;

    let observed: Hash32 = Sha256::digest(p2.serialize()).into();
    if &observed != commitment {
        return Err(CoinjoinError::PodleCommitmentMismatch);
    }

    let s = SecretKey::from_slice(&reveal.s).map_err(|_| CoinjoinError::PodleProofInvalid)?;
    let e_scalar = scalar_mod_n(reveal.e)?;

    // K_G = s*G - e*P and K_J = s*J - e*P2; combine() fails only when the
    // sum is the point at infinity, which no honest proof produces.
    let neg_ep = p.mul_tweak(&secp, &e_scalar).map_err(|_| CoinjoinError::PodleProofInvalid)?.negate(&secp);
    let kg = PublicKey::from_secret_key(&secp, &s).combine(&neg_ep).map_err(|_| CoinjoinError::PodleProofInvalid)?;

    let neg_ep2 = p2.mul_tweak(&secp, &e_scalar).map_err(|_| CoinjoinError::PodleProofInvalid)?.negate(&secp);

    for &index in accepted_indices {
        let j = nums_point(index)?;
        let sj = j.mul_tweak(&secp, &Scalar::from(s)).map_err(|_| CoinjoinError::PodleProofInvalid)?;
        let kj = match sj.combine(&neg_ep2) {
            Ok(point) => point,
            Err(_) => continue,
        };
        if challenge_hash(&kg, &kj, &p, &p2) == reveal.e {
            return Ok(index);
        }
    }
    Err(CoinjoinError::PodleProofInvalid)
}

fn challenge_hash(kg: &PublicKey, kj: &PublicKey, p: &PublicKey, p2: &PublicKey) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(kg.serialize());
    hasher.update(kj.serialize());
    hasher.update(p.serialize());
    hasher.update(p2.serialize());
    hasher.finalize().into()
}

/// Interpret 32 big-endian bytes as a scalar mod n. Any 256-bit value is
/// below 2n, so one conditional subtraction fully reduces.
fn scalar_mod_n(bytes: Hash32) -> Result<Scalar> {
    let mut reduced = bytes;
    if ge_order(&reduced) {
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let diff = i16::from(reduced[i]) - i16::from(CURVE_ORDER[i]) - borrow;
            if diff < 0 {
                reduced[i] = (diff + 256) as u8;
                borrow = 1;
            } else {
                reduced[i] = diff as u8;
                borrow = 0;
            }
        }
    }
    Scalar::from_be_bytes(reduced).map_err(|_| CoinjoinError::PodleProofInvalid)
}

fn ge_order(bytes: &Hash32) -> bool {
    for i in 0..32 {
        match bytes[i].cmp(&CURVE_ORDER[i]) {
            std::cmp::Ordering::Greater => return true,
            std::cmp::Ordering::Less => return false,
            std::cmp::Ordering::Equal => continue,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_outpoint(fill: u8, vout: u32) -> Outpoint {
        Outpoint::new([fill; 32].into(), vout)
    }

    /// Vectors recomputed with the reference generation algorithm; index 0
    /// matches the long-published value.
    const NUMS_VECTORS: [(u8, &str); 7] = [
        (0, "0296f47ec8e6d6a9c3379c2ce983a6752bcfa88d46f2a6ffe0dd12c9ae76d01a1f"),
        (1, "023f9976b86d3f1426638da600348d96dc1f1eb0bd5614cc50db9e9a067c0464a2"),
        (2, "023745b000f6db094a794d9ee08637d714393cd009f86087438ac3804e929bfe89"),
        (5, "02bbc5c4393395a38446e2bd4d638b7bfd864afb5ffaf4bed4caf797df0e657434"),
        (9, "021b739f21b981c2dcbaf9af4d89223a282939a92aee079e94a46c273759e5b42e"),
        (100, "02aacc3145d04972d0527c4458629d328219feda92bef6ef6025878e3a252e105a"),
        (255, "02a0a8694820c794852110e5939a2c03f8482f81ed57396042c6b34557f6eb430a"),
    ];

    #[test]
    fn nums_generation_matches_vectors() {
        for (index, expected) in NUMS_VECTORS {
            let point = generate_nums_point(index).expect("nums point");
            assert_eq!(hex::encode(point.serialize()), expected, "index {index}");
        }
    }

    #[test]
    fn nums_cache_agrees_with_generation() {
        for index in [0u8, 7, 42, 255] {
            assert_eq!(nums_point(index).unwrap(), generate_nums_point(index).unwrap());
        }
    }

    #[test]
    fn generator_constants_consistent() {
        assert_eq!(G_COMPRESSED[0], 0x02);
        assert_eq!(G_UNCOMPRESSED[0], 0x04);
        assert_eq!(&G_UNCOMPRESSED[1..33], &G_COMPRESSED[1..33]);
        // scalar 1 times G reproduces the compressed constant
        let secp = Secp256k1::new();
        let mut one = [0u8; 32];
        one[31] = 1;
        let g = PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&one).unwrap());
        assert_eq!(g.serialize(), G_COMPRESSED);
    }

    #[test]
    fn generate_then_verify_roundtrip() {
        let podle = generate(&[5u8; 32], test_outpoint(0xd0, 3), 0).expect("generate");
        assert_eq!(podle.commitment, <Hash32>::from(Sha256::digest(podle.p2)));
        let reveal =
            PodleReveal { p: podle.p, p2: podle.p2, s: podle.s, e: podle.e, utxo: podle.utxo };
        let index = verify(&reveal, &podle.commitment, &DEFAULT_INDEX_RANGE).expect("verify");
        assert_eq!(index, 0);
    }

    #[test]
    fn all_default_indices_verify() {
        for index in DEFAULT_INDEX_RANGE {
            let podle = generate(&[9u8; 32], test_outpoint(0xaa, 1), index).expect("generate");
            let reveal =
                PodleReveal { p: podle.p, p2: podle.p2, s: podle.s, e: podle.e, utxo: podle.utxo };
            assert_eq!(verify(&reveal, &podle.commitment, &DEFAULT_INDEX_RANGE).unwrap(), index);
        }
    }

    #[test]
    fn high_index_verifies_when_accepted() {
        let podle = generate(&[11u8; 32], test_outpoint(0xbb, 9), 255).expect("generate");
        let reveal = PodleReveal { p: podle.p, p2: podle.p2, s: podle.s, e: podle.e, utxo: podle.utxo };
        // not in the default range
        assert!(matches!(
            verify(&reveal, &podle.commitment, &DEFAULT_INDEX_RANGE),
            Err(CoinjoinError::PodleProofInvalid)
        ));
        assert_eq!(verify(&reveal, &podle.commitment, &[255]).unwrap(), 255);
    }

    #[test]
    fn same_key_different_index_shares_p_not_p2() {
        let a = generate(&[3u8; 32], test_outpoint(0xcc, 2), 0).unwrap();
        let b = generate(&[3u8; 32], test_outpoint(0xcc, 2), 1).unwrap();
        assert_eq!(a.p, b.p);
        assert_ne!(a.p2, b.p2);
        assert_ne!(a.commitment, b.commitment);
    }

    #[test]
    fn zero_private_key_rejected() {
        assert!(matches!(generate(&[0u8; 32], test_outpoint(1, 0), 0), Err(CoinjoinError::PodleMalformed(_))));
    }

    #[test]
    fn wrong_commitment_detected() {
        let podle = generate(&[6u8; 32], test_outpoint(0xee, 4), 0).unwrap();
        let reveal = PodleReveal { p: podle.p, p2: podle.p2, s: podle.s, e: podle.e, utxo: podle.utxo };
        assert!(matches!(
            verify(&reveal, &[0u8; 32], &DEFAULT_INDEX_RANGE),
            Err(CoinjoinError::PodleCommitmentMismatch)
        ));
    }

    #[test]
    fn tampered_signature_rejected() {
        let podle = generate(&[7u8; 32], test_outpoint(0xff, 5), 0).unwrap();
        let mut s = podle.s;
        s[31] ^= 1;
        let reveal = PodleReveal { p: podle.p, p2: podle.p2, s, e: podle.e, utxo: podle.utxo };
        assert!(verify(&reveal, &podle.commitment, &DEFAULT_INDEX_RANGE).is_err());
    }

    #[test]
    fn revelation_wire_roundtrip() {
        let podle = generate(&[8u8; 32], test_outpoint(0x12, 6), 2).unwrap();
        let wire = podle.serialize_revelation();
        assert_eq!(wire.split('|').count(), 5);
        let parsed = PodleReveal::parse(&wire).expect("parse");
        assert_eq!(parsed.p, podle.p);
        assert_eq!(parsed.p2, podle.p2);
        assert_eq!(parsed.s, podle.s);
        assert_eq!(parsed.e, podle.e);
        assert_eq!(parsed.utxo, podle.utxo);
        assert_eq!(verify(&parsed, &podle.commitment, &DEFAULT_INDEX_RANGE).unwrap(), 2);
    }

    #[test]
    fn revelation_wrong_part_count_rejected() {
        assert!(PodleReveal::parse("a|b|c").is_err());
    }

    #[test]
    fn commitment_string_format() {
        let podle = generate(&[2u8; 32], test_outpoint(0x21, 0), 0).unwrap();
        let wire = podle.commitment_str();
        assert_eq!(wire.len(), 65);
        assert!(wire.starts_with('P'));
        assert_eq!(parse_commitment(&wire).unwrap(), podle.commitment);
        assert!(parse_commitment(&wire[1..]).is_err());
    }

    #[test]
    fn scalar_reduction_wraps_order() {
        // n itself reduces to zero, which Scalar accepts; n+1 reduces to one.
        let mut n_plus_one = CURVE_ORDER;
        n_plus_one[31] += 1;
        let reduced = scalar_mod_n(n_plus_one).unwrap();
        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(reduced, Scalar::from_be_bytes(one).unwrap());
    }
}
