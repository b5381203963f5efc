//! Group arithmetic helpers over secp256k1.
//!
//! Thin layer over `k256`: polynomial evaluation, commitment evaluation,
//! Lagrange interpolation, canonical encodings, domain-separated hashing, and
//! the ECDH-based encryption used for deal shares. The curve arithmetic
//! itself is entirely `k256`'s.

use aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field, PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};

use crate::{
    types::{ParticipantIndex, PriShare, SessionId},
    Error, Result,
};

const DOMAIN_DEAL_KEY: &[u8] = b"tpre/v1/deal-key";
const DOMAIN_PEDERSEN_BASE: &[u8] = b"tpre/v1/pedersen-base";

/// Nonce length of the deal-share AEAD, prefixed to the ciphertext
const NONCE_LEN: usize = 12;

/// Polynomial evaluation x-coordinate for a participant index.
///
/// Indexes are zero-based list positions; evaluation happens at `index + 1`
/// so that x is never the secret's own coordinate at zero.
pub fn x_coordinate(index: ParticipantIndex) -> Scalar {
    Scalar::from(index as u64 + 1)
}

/// Sample a random polynomial of degree `threshold - 1`
pub fn random_polynomial(threshold: u32, rng: &mut impl CryptoRngCore) -> Vec<Scalar> {
    (0..threshold).map(|_| Scalar::random(&mut *rng)).collect()
}

/// Evaluate a scalar polynomial at a participant's x-coordinate
pub fn eval_polynomial(coefficients: &[Scalar], index: ParticipantIndex) -> Scalar {
    let x = x_coordinate(index);
    let mut result = Scalar::ZERO;
    let mut x_power = Scalar::ONE;

    for coef in coefficients {
        result += *coef * x_power;
        x_power *= x;
    }

    result
}

/// Commit to polynomial coefficients against a base point
pub fn commit_polynomial(coefficients: &[Scalar], base: &ProjectivePoint) -> Vec<ProjectivePoint> {
    coefficients.iter().map(|c| *base * c).collect()
}

/// Evaluate a commitment vector at a participant's x-coordinate
pub fn eval_commitments(commits: &[ProjectivePoint], index: ParticipantIndex) -> ProjectivePoint {
    let x = x_coordinate(index);
    let mut result = ProjectivePoint::IDENTITY;
    let mut x_power = Scalar::ONE;

    for commit in commits {
        result += *commit * x_power;
        x_power *= x;
    }

    result
}

/// Lagrange basis coefficient at zero for index `i` over the given index set
pub fn lagrange_coefficient(
    indices: &[ParticipantIndex],
    i: ParticipantIndex,
) -> Result<Scalar> {
    let xi = x_coordinate(i);
    let mut num = Scalar::ONE;
    let mut den = Scalar::ONE;

    for &j in indices {
        if j == i {
            continue;
        }
        let xj = x_coordinate(j);
        num *= xj;
        den *= xj - xi;
    }

    let inv = Option::<Scalar>::from(den.invert())
        .ok_or_else(|| Error::Internal("degenerate interpolation set".into()))?;
    Ok(num * inv)
}

/// Reconstruct the polynomial's secret (its value at zero) from `threshold`
/// distinct shares. Used for reference computations and tests; the protocol
/// itself never reconstructs the aggregate secret.
pub fn recover_secret(shares: &[PriShare], threshold: u32) -> Result<Scalar> {
    if (shares.len() as u32) < threshold {
        return Err(Error::InsufficientShares {
            required: threshold,
            collected: shares.len() as u32,
        });
    }
    let subset = &shares[..threshold as usize];
    let indices: Vec<ParticipantIndex> = subset.iter().map(|s| s.index).collect();
    for (i, idx) in indices.iter().enumerate() {
        if indices[..i].contains(idx) {
            return Err(Error::InvalidIndex(*idx));
        }
    }

    let mut secret = Scalar::ZERO;
    for share in subset {
        secret += share.value * lagrange_coefficient(&indices, share.index)?;
    }
    Ok(secret)
}

/// Canonical SEC1 compressed encoding of a point (1 byte for the identity)
pub fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Decode a canonical SEC1 point encoding, rejecting anything off-curve
pub fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|e| Error::MalformedEncoding(format!("point: {}", e)))?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::MalformedEncoding("point not on curve".into()))?;
    Ok(ProjectivePoint::from(affine))
}

/// Canonical 32-byte big-endian encoding of a scalar
pub fn encode_scalar(scalar: &Scalar) -> [u8; 32] {
    scalar.to_bytes().into()
}

/// Decode a canonical scalar encoding; values at or above the group order
/// are rejected, never reduced
pub fn decode_scalar(bytes: &[u8]) -> Result<Scalar> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::MalformedEncoding("scalar length".into()))?;
    Option::<Scalar>::from(Scalar::from_repr(array.into()))
        .ok_or_else(|| Error::MalformedEncoding("non-canonical scalar".into()))
}

/// Domain-separated SHA-256 over length-prefixed parts
pub fn hash_parts(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((domain.len() as u32).to_be_bytes());
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash arbitrary context to a scalar (challenge derivation)
pub fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Scalar {
    let digest = hash_parts(domain, parts);
    <Scalar as Reduce<U256>>::reduce_bytes(&digest.into())
}

/// Hash the participant set to a secondary base point with unknown discrete
/// log relative to the generator, by incrementing a counter until the digest
/// is a valid compressed x-coordinate.
pub fn pedersen_base(context: &[&[u8]]) -> ProjectivePoint {
    let mut counter = 0u32;
    loop {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(context.len() + 1);
        let counter_bytes = counter.to_be_bytes();
        parts.push(&counter_bytes);
        parts.extend_from_slice(context);
        let digest = hash_parts(DOMAIN_PEDERSEN_BASE, &parts);

        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest);
        if let Ok(point) = decode_point(&candidate) {
            return point;
        }
        counter += 1;
    }
}

fn deal_key(
    shared: &ProjectivePoint,
    dealer_pub: &ProjectivePoint,
    target_pub: &ProjectivePoint,
    session_id: &SessionId,
) -> [u8; 32] {
    hash_parts(
        DOMAIN_DEAL_KEY,
        &[
            &encode_point(shared),
            &encode_point(dealer_pub),
            &encode_point(target_pub),
            session_id,
        ],
    )
}

/// Encrypt a deal's `(share, blinding)` pair to a target participant.
///
/// Static-static ECDH between the dealer's long-term secret and the target's
/// long-term public key; the session id in the KDF context makes the key
/// unique per run. Output is `nonce || ciphertext`.
pub fn encrypt_share_pair(
    dealer_secret: &Scalar,
    target_pub: &ProjectivePoint,
    session_id: &SessionId,
    share: &Scalar,
    blinding: &Scalar,
    rng: &mut impl CryptoRngCore,
) -> Result<Vec<u8>> {
    let dealer_pub = ProjectivePoint::GENERATOR * dealer_secret;
    let shared = *target_pub * dealer_secret;
    let key = deal_key(&shared, &dealer_pub, target_pub, session_id);

    let mut plaintext = [0u8; 64];
    plaintext[..32].copy_from_slice(&encode_scalar(share));
    plaintext[32..].copy_from_slice(&encode_scalar(blinding));

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let mut out = nonce.to_vec();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| Error::Internal("share encryption failed".into()))?;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open an encrypted share pair addressed to this node
pub fn decrypt_share_pair(
    target_secret: &Scalar,
    dealer_pub: &ProjectivePoint,
    session_id: &SessionId,
    blob: &[u8],
) -> Result<(Scalar, Scalar)> {
    if blob.len() < NONCE_LEN {
        return Err(Error::Decryption("ciphertext too short".into()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    let target_pub = ProjectivePoint::GENERATOR * target_secret;
    let shared = *dealer_pub * target_secret;
    let key = deal_key(&shared, dealer_pub, &target_pub, session_id);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Decryption("AEAD open failed".into()))?;
    if plaintext.len() != 64 {
        return Err(Error::Decryption("unexpected share pair length".into()));
    }

    let share = decode_scalar(&plaintext[..32])?;
    let blinding = decode_scalar(&plaintext[32..])?;
    Ok((share, blinding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn polynomial_and_commitment_evaluation_agree() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let poly = random_polynomial(4, &mut rng);
        let commits = commit_polynomial(&poly, &ProjectivePoint::GENERATOR);

        for index in 0..6u32 {
            let share = eval_polynomial(&poly, index);
            assert_eq!(
                ProjectivePoint::GENERATOR * share,
                eval_commitments(&commits, index)
            );
        }
    }

    #[test]
    fn lagrange_recovers_the_constant_term() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let poly = random_polynomial(3, &mut rng);

        let shares: Vec<PriShare> = [4u32, 0, 2]
            .iter()
            .map(|&index| PriShare {
                index,
                value: eval_polynomial(&poly, index),
            })
            .collect();

        assert_eq!(recover_secret(&shares, 3).unwrap(), poly[0]);
    }

    #[test]
    fn recover_rejects_short_or_duplicate_sets() {
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        let poly = random_polynomial(3, &mut rng);
        let share = |index| PriShare {
            index,
            value: eval_polynomial(&poly, index),
        };

        let err = recover_secret(&[share(0), share(1)], 3).unwrap_err();
        assert!(matches!(err, Error::InsufficientShares { required: 3, collected: 2 }));

        let err = recover_secret(&[share(0), share(1), share(1)], 3).unwrap_err();
        assert!(matches!(err, Error::InvalidIndex(1)));
    }

    #[test]
    fn point_codec_round_trips_including_identity() {
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let point = ProjectivePoint::GENERATOR * Scalar::random(&mut rng);
        assert_eq!(decode_point(&encode_point(&point)).unwrap(), point);

        let identity = ProjectivePoint::IDENTITY;
        assert_eq!(decode_point(&encode_point(&identity)).unwrap(), identity);

        // 0x05 is not a valid SEC1 tag byte.
        assert!(decode_point(&[0x05; 33]).is_err());
        assert!(decode_point(b"short").is_err());
    }

    #[test]
    fn scalar_codec_round_trips_and_rejects_non_canonical() {
        let mut rng = ChaCha20Rng::seed_from_u64(19);
        let scalar = Scalar::random(&mut rng);
        assert_eq!(decode_scalar(&encode_scalar(&scalar)).unwrap(), scalar);
        assert_eq!(decode_scalar(&encode_scalar(&Scalar::ZERO)).unwrap(), Scalar::ZERO);

        // The group order itself is not a canonical scalar encoding.
        let order = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c,
            0xd0, 0x36, 0x41, 0x41,
        ];
        assert!(decode_scalar(&order).is_err());
        assert!(decode_scalar(&[1u8; 16]).is_err());
    }

    #[test]
    fn pedersen_base_is_deterministic_and_independent() {
        let a = pedersen_base(&[b"alpha", b"beta"]);
        let b = pedersen_base(&[b"alpha", b"beta"]);
        let c = pedersen_base(&[b"alpha", b"gamma"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, ProjectivePoint::IDENTITY);
        assert_ne!(a, ProjectivePoint::GENERATOR);
    }

    #[test]
    fn share_pair_encryption_round_trips() {
        let mut rng = OsRng;
        let dealer_secret = Scalar::random(&mut rng);
        let target_secret = Scalar::random(&mut rng);
        let dealer_pub = ProjectivePoint::GENERATOR * dealer_secret;
        let target_pub = ProjectivePoint::GENERATOR * target_secret;
        let sid = [9u8; 32];

        let share = Scalar::random(&mut rng);
        let blinding = Scalar::random(&mut rng);
        let blob =
            encrypt_share_pair(&dealer_secret, &target_pub, &sid, &share, &blinding, &mut rng)
                .unwrap();

        let (s, b) = decrypt_share_pair(&target_secret, &dealer_pub, &sid, &blob).unwrap();
        assert_eq!(s, share);
        assert_eq!(b, blinding);
    }

    #[test]
    fn share_pair_decryption_fails_on_tamper_or_wrong_key() {
        let mut rng = OsRng;
        let dealer_secret = Scalar::random(&mut rng);
        let target_secret = Scalar::random(&mut rng);
        let dealer_pub = ProjectivePoint::GENERATOR * dealer_secret;
        let target_pub = ProjectivePoint::GENERATOR * target_secret;
        let sid = [1u8; 32];

        let blob = encrypt_share_pair(
            &dealer_secret,
            &target_pub,
            &sid,
            &Scalar::ONE,
            &Scalar::ZERO,
            &mut rng,
        )
        .unwrap();

        let mut tampered = blob.clone();
        *tampered.last_mut().unwrap() ^= 0x01;
        assert!(matches!(
            decrypt_share_pair(&target_secret, &dealer_pub, &sid, &tampered),
            Err(Error::Decryption(_))
        ));

        let wrong_secret = Scalar::random(&mut rng);
        assert!(decrypt_share_pair(&wrong_secret, &dealer_pub, &sid, &blob).is_err());

        // A different session id derives a different key.
        assert!(decrypt_share_pair(&target_secret, &dealer_pub, &[2u8; 32], &blob).is_err());
    }
}
