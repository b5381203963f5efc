//! Core types for the threshold DKG and re-encryption protocol.

use k256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    elliptic_curve::{sec1::ToEncodedPoint, Field},
    ProjectivePoint, Scalar,
};
use rand_core::CryptoRngCore;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// Position of a participant in the globally agreed, order-significant list.
/// Used (offset by one) as the polynomial evaluation x-coordinate.
pub type ParticipantIndex = u32;

/// Per-dealer session identifier, binding deals to one protocol run
pub type SessionId = [u8; 32];

/// Long-term keypair of a node.
///
/// The secret is read-only after construction and never serialized; it signs
/// protocol messages and opens encrypted shares addressed to this node.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NodeKey {
    secret: Scalar,
    // Public material, not wiped.
    #[zeroize(skip)]
    public: ProjectivePoint,
}

impl NodeKey {
    /// Generate a fresh long-term keypair
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        let secret = Scalar::random(rng);
        Self::from_secret(secret)
    }

    /// Build a keypair from an existing long-term secret
    pub fn from_secret(secret: Scalar) -> Self {
        let public = ProjectivePoint::GENERATOR * secret;
        Self { secret, public }
    }

    /// The node's long-term public key
    pub fn public(&self) -> ProjectivePoint {
        self.public
    }

    pub(crate) fn secret(&self) -> &Scalar {
        &self.secret
    }

    /// Sign a message payload with the long-term key
    pub fn sign(&self, msg: &[u8]) -> Result<Signature> {
        let signing_key = SigningKey::from_bytes(&self.secret.to_bytes())
            .map_err(|_| Error::Internal("long-term secret is not a signing key".into()))?;
        Ok(signing_key.sign(msg))
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the secret, even in debug output.
        f.debug_struct("NodeKey")
            .field("public", &hex::encode(self.public.to_affine().to_encoded_point(true)))
            .finish()
    }
}

/// Verify a signature against a participant's long-term public key
pub fn verify_signature(public: &ProjectivePoint, msg: &[u8], sig: &Signature) -> Result<()> {
    let encoded = public.to_affine().to_encoded_point(true);
    let key = VerifyingKey::from_sec1_bytes(encoded.as_bytes())
        .map_err(|_| Error::InvalidSignature)?;
    key.verify(msg, sig).map_err(|_| Error::InvalidSignature)
}

/// One participant's share of the aggregate secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriShare {
    /// The owning participant's global index; never renumbered
    pub index: ParticipantIndex,
    /// Polynomial evaluation at this participant's x-coordinate
    pub value: Scalar,
}

/// Final per-participant DKG output: the private share of the aggregate
/// secret plus the aggregate public commitment vector.
///
/// Immutable once finalized. `commits[0]` is the distributed public key; the
/// full vector lets anyone derive any participant's public share, which is
/// what re-encryption proof verification checks against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistKeyShare {
    pub pri_share: PriShare,
    pub commits: Vec<ProjectivePoint>,
}

impl DistKeyShare {
    /// The distributed public key
    pub fn public_key(&self) -> ProjectivePoint {
        self.commits[0]
    }

    /// Check this share against the aggregate commitment vector
    pub fn verify(&self) -> Result<()> {
        let expected = crate::group::eval_commitments(&self.commits, self.pri_share.index);
        if ProjectivePoint::GENERATOR * self.pri_share.value == expected {
            Ok(())
        } else {
            Err(Error::VerificationFailed(
                "private share does not match commitment vector".into(),
            ))
        }
    }
}

/// Configuration for one DKG session.
///
/// The participant list is order-significant and must be identical on every
/// node; a participant's index is its position in this list.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Long-term public keys of all participants, in the agreed order
    pub participants: Vec<ProjectivePoint>,

    /// Minimum number of shares required to operate on the key
    pub threshold: u32,

    /// How long to wait for all peers' readiness signals before dealing
    pub ready_timeout: Duration,

    /// Session-wide deadline; certification not reached in time aborts
    pub session_deadline: Duration,
}

impl SessionConfig {
    pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_SESSION_DEADLINE: Duration = Duration::from_secs(60);

    /// Create a session configuration, validating the threshold bounds
    pub fn new(participants: Vec<ProjectivePoint>, threshold: u32) -> Result<Self> {
        let n = participants.len();
        if n == 0 {
            return Err(Error::InvalidConfig("participant list is empty".into()));
        }
        if threshold < 1 {
            return Err(Error::InvalidConfig("threshold must be at least 1".into()));
        }
        if threshold as usize > n {
            return Err(Error::InvalidConfig(format!(
                "threshold {} exceeds participant count {}",
                threshold, n
            )));
        }
        for (i, a) in participants.iter().enumerate() {
            if participants[..i].contains(a) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate participant public key at index {}",
                    i
                )));
            }
        }

        Ok(Self {
            participants,
            threshold,
            ready_timeout: Self::DEFAULT_READY_TIMEOUT,
            session_deadline: Self::DEFAULT_SESSION_DEADLINE,
        })
    }

    /// Number of participants
    pub fn n(&self) -> u32 {
        self.participants.len() as u32
    }

    /// Resolve a node's own index by matching its derived public key against
    /// the participant list. Absence is fatal, never silently defaulted.
    pub fn resolve_index(&self, key: &NodeKey) -> Result<ParticipantIndex> {
        let public = key.public();
        self.participants
            .iter()
            .position(|p| *p == public)
            .map(|i| i as ParticipantIndex)
            .ok_or(Error::NotAParticipant)
    }

    /// Public key of the participant at `index`
    pub fn participant(&self, index: ParticipantIndex) -> Result<&ProjectivePoint> {
        self.participants
            .get(index as usize)
            .ok_or(Error::InvalidIndex(index))
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_session_deadline(mut self, deadline: Duration) -> Self {
        self.session_deadline = deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn participants(n: usize) -> (Vec<NodeKey>, Vec<ProjectivePoint>) {
        let keys: Vec<NodeKey> = (0..n).map(|_| NodeKey::generate(&mut OsRng)).collect();
        let publics = keys.iter().map(|k| k.public()).collect();
        (keys, publics)
    }

    #[test]
    fn config_rejects_bad_thresholds() {
        let (_, publics) = participants(3);
        assert!(SessionConfig::new(publics.clone(), 0).is_err());
        assert!(SessionConfig::new(publics.clone(), 4).is_err());
        assert!(SessionConfig::new(publics.clone(), 1).is_ok());
        assert!(SessionConfig::new(publics, 3).is_ok());
        assert!(SessionConfig::new(vec![], 1).is_err());
    }

    #[test]
    fn config_rejects_duplicate_participants() {
        let (_, mut publics) = participants(3);
        publics.push(publics[0]);
        assert!(SessionConfig::new(publics, 2).is_err());
    }

    #[test]
    fn index_resolution_matches_list_position() {
        let (keys, publics) = participants(4);
        let cfg = SessionConfig::new(publics, 2).unwrap();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(cfg.resolve_index(key).unwrap(), i as u32);
        }

        let outsider = NodeKey::generate(&mut OsRng);
        assert!(matches!(
            cfg.resolve_index(&outsider),
            Err(Error::NotAParticipant)
        ));
    }

    #[test]
    fn signatures_verify_against_public_key() {
        let key = NodeKey::generate(&mut OsRng);
        let sig = key.sign(b"payload").unwrap();
        assert!(verify_signature(&key.public(), b"payload", &sig).is_ok());
        assert!(verify_signature(&key.public(), b"other", &sig).is_err());

        let other = NodeKey::generate(&mut OsRng);
        assert!(verify_signature(&other.public(), b"payload", &sig).is_err());
    }

    #[test]
    fn debug_output_hides_secret() {
        let key = NodeKey::from_secret(Scalar::from(7u64));
        let repr = format!("{:?}", key);
        assert!(!repr.contains(&hex::encode(Scalar::from(7u64).to_bytes())));
    }
}
