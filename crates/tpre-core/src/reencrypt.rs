//! Threshold proxy re-encryption over a finalized distributed key.
//!
//! Secrets are stored encrypted toward the group public key `Y = x*G`, where
//! `x` is the aggregate secret no single node holds. A reader with keypair
//! `(q, Q)` asks each node for a re-encryption of the stored envelope; every
//! node answers with `x_i*(U + Q)` from its private share plus a
//! Chaum-Pedersen proof that the same share sits behind its public
//! commitment. Any `t` verified answers combine by Lagrange interpolation to
//! `x*(U + Q) = r*Y + q*Y`, from which only the reader can strip `q*Y` and
//! recover the KEM point `r*Y` that the envelope was sealed under. Neither
//! the nodes nor the combiner ever see the plaintext or the aggregate
//! secret.

use aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_core::CryptoRngCore;
use tracing::debug;

use crate::{
    group,
    types::{DistKeyShare, ParticipantIndex},
    Error, Result,
};

const DOMAIN_KEM: &[u8] = b"tpre/v1/kem";
const DOMAIN_REENCRYPT_PROOF: &[u8] = b"tpre/v1/reencrypt-proof";

/// Plaintext is sealed in chunks of this size, each an independent AEAD
/// message under the envelope key
const CHUNK_SIZE: usize = 4096;
const NONCE_LEN: usize = 12;

/// A stored secret: the encryption commitment `U = r*G` and the AEAD chunks
/// of the plaintext under the key derived from `r*Y`
#[derive(Debug, Clone, PartialEq)]
pub struct SecretEnvelope {
    pub enc_cmt: ProjectivePoint,
    pub enc_scrt: Vec<Vec<u8>>,
}

/// A reader's re-encryption request for one stored secret
#[derive(Debug, Clone, PartialEq)]
pub struct ReencryptRequest {
    pub org_id: String,
    pub secret_id: String,
    /// The reader's public key `Q`
    pub reader_public: ProjectivePoint,
}

/// One node's answer: its share applied to `U + Q`, with a proof of correct
/// re-encryption bound to the request
#[derive(Debug, Clone, PartialEq)]
pub struct ReencryptedShare {
    pub org_id: String,
    pub secret_id: String,
    pub reader_public: ProjectivePoint,
    pub index: ParticipantIndex,
    /// `x_i * (U + Q)`
    pub reencrypted: ProjectivePoint,
    /// Random oracle challenge `e`
    pub challenge: Scalar,
    /// Proof response `f = w - e*x_i`
    pub proof: Scalar,
}

/// Seal a plaintext toward the group public key
pub fn encrypt_secret(
    group_public: &ProjectivePoint,
    plaintext: &[u8],
    rng: &mut impl CryptoRngCore,
) -> Result<SecretEnvelope> {
    let r = Scalar::random(rng);
    let enc_cmt = ProjectivePoint::GENERATOR * r;
    let kem_point = group_public * &r;
    let cipher = envelope_cipher(&kem_point);

    let mut enc_scrt = Vec::with_capacity(plaintext.len().div_ceil(CHUNK_SIZE));
    for (i, chunk) in plaintext.chunks(CHUNK_SIZE).enumerate() {
        let sealed = cipher
            .encrypt(&chunk_nonce(i), chunk)
            .map_err(|_| Error::Internal("envelope encryption failed".into()))?;
        enc_scrt.push(sealed);
    }

    Ok(SecretEnvelope { enc_cmt, enc_scrt })
}

/// Answer a re-encryption request with this node's share of the key.
/// The proof ties the answer to the request's identifiers and reader key, so
/// a share produced for one request cannot be replayed against another.
pub fn handle_request(
    request: &ReencryptRequest,
    envelope: &SecretEnvelope,
    share: &DistKeyShare,
    rng: &mut impl CryptoRngCore,
) -> Result<ReencryptedShare> {
    let index = share.pri_share.index;
    let base = envelope.enc_cmt + request.reader_public;
    let reencrypted = base * share.pri_share.value;
    let share_public = group::eval_commitments(&share.commits, index);

    let w = Scalar::random(rng);
    let t1 = ProjectivePoint::GENERATOR * w;
    let t2 = base * w;
    let challenge = proof_challenge(
        request,
        index,
        &share_public,
        &base,
        &reencrypted,
        &t1,
        &t2,
    );
    let proof = w - challenge * share.pri_share.value;

    debug!(
        org_id = %request.org_id,
        secret_id = %request.secret_id,
        index,
        "re-encryption share produced"
    );
    Ok(ReencryptedShare {
        org_id: request.org_id.clone(),
        secret_id: request.secret_id.clone(),
        reader_public: request.reader_public,
        index,
        reencrypted,
        challenge,
        proof,
    })
}

/// Check one node's re-encrypted share against the group's commitment
/// vector and the stored envelope
pub fn verify_share(
    share: &ReencryptedShare,
    commits: &[ProjectivePoint],
    enc_cmt: &ProjectivePoint,
) -> Result<()> {
    let share_public = group::eval_commitments(commits, share.index);
    let base = *enc_cmt + share.reader_public;

    // T1' = f*G + e*Y_i and T2' = f*(U+Q) + e*xnc reproduce the prover's
    // nonce commitments exactly when the share is genuine.
    let t1 = ProjectivePoint::GENERATOR * share.proof + share_public * share.challenge;
    let t2 = base * share.proof + share.reencrypted * share.challenge;

    let request = ReencryptRequest {
        org_id: share.org_id.clone(),
        secret_id: share.secret_id.clone(),
        reader_public: share.reader_public,
    };
    let expected = proof_challenge(
        &request,
        share.index,
        &share_public,
        &base,
        &share.reencrypted,
        &t1,
        &t2,
    );
    if expected != share.challenge {
        return Err(Error::VerificationFailed(format!(
            "re-encryption proof from node {} does not verify",
            share.index
        )));
    }
    Ok(())
}

/// Combine `threshold` verified shares into `x*(U + Q)` by Lagrange
/// interpolation at zero
pub fn combine_shares(
    shares: &[ReencryptedShare],
    threshold: u32,
) -> Result<ProjectivePoint> {
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

    let mut combined = ProjectivePoint::IDENTITY;
    for share in subset {
        let lambda = group::lagrange_coefficient(&indices, share.index)?;
        combined += share.reencrypted * lambda;
    }
    debug!(shares = subset.len(), "re-encryption shares combined");
    Ok(combined)
}

/// Reader-side recovery: strip `q*Y` from the combined point, rebuild the
/// envelope key from `r*Y`, and open the chunks
pub fn decrypt_secret(
    envelope: &SecretEnvelope,
    combined: &ProjectivePoint,
    reader_secret: &Scalar,
    group_public: &ProjectivePoint,
) -> Result<Vec<u8>> {
    let kem_point = combined - &(group_public * reader_secret);
    let cipher = envelope_cipher(&kem_point);

    let mut plaintext = Vec::new();
    for (i, sealed) in envelope.enc_scrt.iter().enumerate() {
        let chunk = cipher
            .decrypt(&chunk_nonce(i), sealed.as_slice())
            .map_err(|_| Error::Decryption(format!("envelope chunk {i} failed to open")))?;
        plaintext.extend_from_slice(&chunk);
    }
    Ok(plaintext)
}

fn envelope_cipher(kem_point: &ProjectivePoint) -> ChaCha20Poly1305 {
    let key_bytes = group::hash_parts(DOMAIN_KEM, &[&group::encode_point(kem_point)]);
    ChaCha20Poly1305::new(Key::from_slice(&key_bytes))
}

/// Per-chunk nonce: the chunk counter in the nonce tail. Keys are unique per
/// envelope, so counter nonces cannot collide across envelopes.
fn chunk_nonce(index: usize) -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[NONCE_LEN - 8..].copy_from_slice(&(index as u64).to_be_bytes());
    nonce.into()
}

fn proof_challenge(
    request: &ReencryptRequest,
    index: ParticipantIndex,
    share_public: &ProjectivePoint,
    base: &ProjectivePoint,
    reencrypted: &ProjectivePoint,
    t1: &ProjectivePoint,
    t2: &ProjectivePoint,
) -> Scalar {
    group::hash_to_scalar(
        DOMAIN_REENCRYPT_PROOF,
        &[
            request.org_id.as_bytes(),
            request.secret_id.as_bytes(),
            &group::encode_point(&request.reader_public),
            &index.to_be_bytes(),
            &group::encode_point(share_public),
            &group::encode_point(base),
            &group::encode_point(reencrypted),
            &group::encode_point(t1),
            &group::encode_point(t2),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriShare;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    struct Fixture {
        group_secret: Scalar,
        group_public: ProjectivePoint,
        commits: Vec<ProjectivePoint>,
        shares: Vec<DistKeyShare>,
    }

    /// Synthesize a consistent shared key directly from a polynomial, the
    /// same shape a finalized session produces
    fn shared_key(n: u32, threshold: u32, rng: &mut ChaCha8Rng) -> Fixture {
        let poly = group::random_polynomial(threshold, rng);
        let commits = group::commit_polynomial(&poly, &ProjectivePoint::GENERATOR);
        let shares = (0..n)
            .map(|index| DistKeyShare {
                pri_share: PriShare {
                    index,
                    value: group::eval_polynomial(&poly, index),
                },
                commits: commits.clone(),
            })
            .collect();
        Fixture {
            group_secret: poly[0],
            group_public: commits[0],
            commits,
            shares,
        }
    }

    fn request(reader_secret: &Scalar) -> ReencryptRequest {
        ReencryptRequest {
            org_id: "org-1".into(),
            secret_id: "secret-1".into(),
            reader_public: ProjectivePoint::GENERATOR * reader_secret,
        }
    }

    #[test]
    fn full_round_trip_recovers_plaintext() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let fixture = shared_key(5, 3, &mut rng);

        // Long enough to span several chunks.
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let envelope = encrypt_secret(&fixture.group_public, &plaintext, &mut rng).unwrap();
        assert_eq!(envelope.enc_scrt.len(), 3);

        let reader_secret = Scalar::random(&mut rng);
        let req = request(&reader_secret);

        let shares: Vec<ReencryptedShare> = fixture
            .shares
            .iter()
            .take(3)
            .map(|s| handle_request(&req, &envelope, s, &mut rng).unwrap())
            .collect();
        for share in &shares {
            verify_share(share, &fixture.commits, &envelope.enc_cmt).unwrap();
        }

        let combined = combine_shares(&shares, 3).unwrap();
        let recovered =
            decrypt_secret(&envelope, &combined, &reader_secret, &fixture.group_public).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn any_share_subset_combines_identically() {
        let mut rng = ChaCha8Rng::seed_from_u64(22);
        let fixture = shared_key(5, 3, &mut rng);
        let envelope = encrypt_secret(&fixture.group_public, b"payload", &mut rng).unwrap();

        let reader_secret = Scalar::random(&mut rng);
        let req = request(&reader_secret);
        let all: Vec<ReencryptedShare> = fixture
            .shares
            .iter()
            .map(|s| handle_request(&req, &envelope, s, &mut rng).unwrap())
            .collect();

        // Reference: the aggregate secret applied to U + Q directly.
        let base = envelope.enc_cmt + req.reader_public;
        let expected = base * fixture.group_secret;

        let first = combine_shares(&all[..3], 3).unwrap();
        let last = combine_shares(&all[2..], 3).unwrap();
        assert_eq!(first, expected);
        assert_eq!(last, expected);
    }

    #[test]
    fn too_few_shares_are_refused() {
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let fixture = shared_key(4, 3, &mut rng);
        let envelope = encrypt_secret(&fixture.group_public, b"x", &mut rng).unwrap();

        let reader_secret = Scalar::random(&mut rng);
        let req = request(&reader_secret);
        let shares: Vec<ReencryptedShare> = fixture
            .shares
            .iter()
            .take(2)
            .map(|s| handle_request(&req, &envelope, s, &mut rng).unwrap())
            .collect();

        let err = combine_shares(&shares, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientShares {
                required: 3,
                collected: 2
            }
        ));

        let duplicated = vec![shares[0].clone(), shares[0].clone(), shares[1].clone()];
        let err = combine_shares(&duplicated, 3).unwrap_err();
        assert!(matches!(err, Error::InvalidIndex(0)));
    }

    #[test]
    fn proof_rejects_tampered_shares() {
        let mut rng = ChaCha8Rng::seed_from_u64(24);
        let fixture = shared_key(3, 2, &mut rng);
        let envelope = encrypt_secret(&fixture.group_public, b"top", &mut rng).unwrap();

        let reader_secret = Scalar::random(&mut rng);
        let req = request(&reader_secret);
        let share = handle_request(&req, &envelope, &fixture.shares[0], &mut rng).unwrap();
        verify_share(&share, &fixture.commits, &envelope.enc_cmt).unwrap();

        // A substituted re-encryption point fails.
        let mut forged = share.clone();
        forged.reencrypted = ProjectivePoint::GENERATOR * Scalar::from(99u64);
        assert!(verify_share(&forged, &fixture.commits, &envelope.enc_cmt).is_err());

        // Rebinding a valid share to another request fails.
        let mut rebound = share.clone();
        rebound.org_id = "org-2".into();
        assert!(verify_share(&rebound, &fixture.commits, &envelope.enc_cmt).is_err());

        // Claiming another node's index fails.
        let mut misattributed = share.clone();
        misattributed.index = 1;
        assert!(verify_share(&misattributed, &fixture.commits, &envelope.enc_cmt).is_err());
    }

    #[test]
    fn wrong_reader_cannot_open() {
        let mut rng = ChaCha8Rng::seed_from_u64(25);
        let fixture = shared_key(3, 2, &mut rng);
        let envelope = encrypt_secret(&fixture.group_public, b"sealed", &mut rng).unwrap();

        let reader_secret = Scalar::random(&mut rng);
        let req = request(&reader_secret);
        let shares: Vec<ReencryptedShare> = fixture
            .shares
            .iter()
            .take(2)
            .map(|s| handle_request(&req, &envelope, s, &mut rng).unwrap())
            .collect();
        let combined = combine_shares(&shares, 2).unwrap();

        let interloper = Scalar::random(&mut rng);
        let err =
            decrypt_secret(&envelope, &combined, &interloper, &fixture.group_public).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));

        let recovered =
            decrypt_secret(&envelope, &combined, &reader_secret, &fixture.group_public).unwrap();
        assert_eq!(recovered, b"sealed");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let mut rng = ChaCha8Rng::seed_from_u64(26);
        let fixture = shared_key(3, 2, &mut rng);

        let envelope = encrypt_secret(&fixture.group_public, b"", &mut rng).unwrap();
        assert!(envelope.enc_scrt.is_empty());

        let reader_secret = Scalar::random(&mut rng);
        let req = request(&reader_secret);
        let shares: Vec<ReencryptedShare> = fixture
            .shares
            .iter()
            .take(2)
            .map(|s| handle_request(&req, &envelope, s, &mut rng).unwrap())
            .collect();
        let combined = combine_shares(&shares, 2).unwrap();
        let recovered =
            decrypt_secret(&envelope, &combined, &reader_secret, &fixture.group_public).unwrap();
        assert!(recovered.is_empty());
    }
}
