//! DKG protocol messages.
//!
//! Typed forms consumed by the engine; `crate::wire` maps them to and from
//! the JSON wire schemas. Every message is signed by its sender's long-term
//! key over a domain-tagged, length-prefixed payload of its fields.

use k256::{ecdsa::Signature, ProjectivePoint, Scalar};

use crate::{
    group,
    types::{ParticipantIndex, SessionId},
    Error, Result,
};

const READY_TAG: u8 = 0x01;
const DEAL_TAG: u8 = 0x02;
const RESPONSE_TAG: u8 = 0x03;
const JUSTIFICATION_TAG: u8 = 0x04;
const SECRET_COMMITS_TAG: u8 = 0x05;

/// Verifier's verdict on one deal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Complaint,
    Approve,
}

impl ResponseStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            ResponseStatus::Complaint => 0,
            ResponseStatus::Approve => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(ResponseStatus::Complaint),
            1 => Ok(ResponseStatus::Approve),
            other => Err(Error::MalformedEncoding(format!(
                "unknown response status {}",
                other
            ))),
        }
    }
}

/// Hash binding the agreed participant set and threshold; folded into every
/// session identifier and the readiness signal
pub fn group_context(participants: &[ProjectivePoint], threshold: u32) -> [u8; 32] {
    let encoded: Vec<Vec<u8>> = participants.iter().map(group::encode_point).collect();
    let mut parts: Vec<&[u8]> = encoded.iter().map(|p| p.as_slice()).collect();
    let threshold_bytes = threshold.to_be_bytes();
    parts.push(&threshold_bytes);
    group::hash_parts(b"tpre/v1/group-context", &parts)
}

fn payload(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.push(tag);
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Readiness signal: this participant's listeners are attached and deals may
/// be sent to it
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    pub index: ParticipantIndex,
    pub context: [u8; 32],
    pub signature: Signature,
}

impl Ready {
    pub fn signing_payload(index: ParticipantIndex, context: &[u8; 32]) -> Vec<u8> {
        payload(READY_TAG, &[&index.to_be_bytes(), context])
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        Self::signing_payload(self.index, &self.context)
    }
}

/// One dealer's encrypted share for one target, with the dealer's Pedersen
/// commitment vector
#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub dealer_index: ParticipantIndex,
    pub target_index: ParticipantIndex,
    /// AEAD blob holding the `(share, blinding)` pair, openable only by the
    /// target's long-term key
    pub encrypted_share: Vec<u8>,
    pub commitments: Vec<ProjectivePoint>,
    pub session_id: SessionId,
    pub signature: Signature,
}

impl Deal {
    pub fn signing_payload(
        dealer_index: ParticipantIndex,
        target_index: ParticipantIndex,
        encrypted_share: &[u8],
        commitments: &[ProjectivePoint],
        session_id: &SessionId,
    ) -> Vec<u8> {
        let encoded: Vec<Vec<u8>> = commitments.iter().map(group::encode_point).collect();
        let dealer_bytes = dealer_index.to_be_bytes();
        let target_bytes = target_index.to_be_bytes();
        let mut parts: Vec<&[u8]> = vec![&dealer_bytes, &target_bytes, encrypted_share];
        parts.extend(encoded.iter().map(|p| p.as_slice()));
        parts.push(session_id);
        payload(DEAL_TAG, &parts)
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        Self::signing_payload(
            self.dealer_index,
            self.target_index,
            &self.encrypted_share,
            &self.commitments,
            &self.session_id,
        )
    }
}

/// A verifier's signed verdict on one dealer's deal
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub session_id: SessionId,
    pub dealer_index: ParticipantIndex,
    /// Index of the responding verifier
    pub index: ParticipantIndex,
    pub status: ResponseStatus,
    pub signature: Signature,
}

impl Response {
    pub fn signing_payload(
        session_id: &SessionId,
        dealer_index: ParticipantIndex,
        index: ParticipantIndex,
        status: ResponseStatus,
    ) -> Vec<u8> {
        payload(
            RESPONSE_TAG,
            &[
                session_id,
                &dealer_index.to_be_bytes(),
                &index.to_be_bytes(),
                &[status.as_byte()],
            ],
        )
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        Self::signing_payload(&self.session_id, self.dealer_index, self.index, self.status)
    }
}

/// A dealer's answer to a complaint: the disputed plaintext share pair, which
/// every participant can re-check against the Pedersen commitments
#[derive(Debug, Clone, PartialEq)]
pub struct Justification {
    pub session_id: SessionId,
    pub dealer_index: ParticipantIndex,
    /// The complaining verifier whose share is revealed
    pub target_index: ParticipantIndex,
    pub share: Scalar,
    pub blinding: Scalar,
    pub signature: Signature,
}

impl Justification {
    pub fn signing_payload(
        session_id: &SessionId,
        dealer_index: ParticipantIndex,
        target_index: ParticipantIndex,
        share: &Scalar,
        blinding: &Scalar,
    ) -> Vec<u8> {
        payload(
            JUSTIFICATION_TAG,
            &[
                session_id,
                &dealer_index.to_be_bytes(),
                &target_index.to_be_bytes(),
                &group::encode_scalar(share),
                &group::encode_scalar(blinding),
            ],
        )
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        Self::signing_payload(
            &self.session_id,
            self.dealer_index,
            self.target_index,
            &self.share,
            &self.blinding,
        )
    }
}

/// A certified dealer's Feldman commitment reveal, tying its dealt shares to
/// the public contribution that ends up in the aggregate key
#[derive(Debug, Clone, PartialEq)]
pub struct SecretCommits {
    pub index: ParticipantIndex,
    pub commitments: Vec<ProjectivePoint>,
    pub session_id: SessionId,
    pub signature: Signature,
}

impl SecretCommits {
    pub fn signing_payload(
        index: ParticipantIndex,
        commitments: &[ProjectivePoint],
        session_id: &SessionId,
    ) -> Vec<u8> {
        let encoded: Vec<Vec<u8>> = commitments.iter().map(group::encode_point).collect();
        let index_bytes = index.to_be_bytes();
        let mut parts: Vec<&[u8]> = vec![&index_bytes];
        parts.extend(encoded.iter().map(|p| p.as_slice()));
        parts.push(session_id);
        payload(SECRET_COMMITS_TAG, &parts)
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        Self::signing_payload(self.index, &self.commitments, &self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_round_trip() {
        for status in [ResponseStatus::Approve, ResponseStatus::Complaint] {
            assert_eq!(ResponseStatus::from_byte(status.as_byte()).unwrap(), status);
        }
        assert!(ResponseStatus::from_byte(7).is_err());
    }

    #[test]
    fn signing_payloads_are_domain_separated() {
        let sid = [3u8; 32];
        let response =
            Response::signing_payload(&sid, 0, 1, ResponseStatus::Approve);
        let ready = Ready::signing_payload(0, &sid);
        assert_ne!(response, ready);

        // Status flips change the payload.
        assert_ne!(
            Response::signing_payload(&sid, 0, 1, ResponseStatus::Approve),
            Response::signing_payload(&sid, 0, 1, ResponseStatus::Complaint)
        );
    }

    #[test]
    fn group_context_depends_on_order_and_threshold() {
        let a = ProjectivePoint::GENERATOR;
        let b = ProjectivePoint::GENERATOR * Scalar::from(2u64);

        let ctx_ab = group_context(&[a, b], 2);
        let ctx_ba = group_context(&[b, a], 2);
        let ctx_t1 = group_context(&[a, b], 1);

        assert_ne!(ctx_ab, ctx_ba);
        assert_ne!(ctx_ab, ctx_t1);
    }
}
