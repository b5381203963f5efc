//! Secret-sharing engine: the synchronous core of the DKG.
//!
//! One [`Generator`] per participant tracks every dealer (itself included) in
//! an index-addressed table, verifies deals against their Pedersen
//! commitments, tallies approve/complain responses, resolves complaints
//! through justifications, checks Feldman reveals, and finally sums the
//! qualified dealers' contributions into a [`DistKeyShare`].
//!
//! The engine is purely synchronous; [`Session`](super::Session) drives it
//! from the topic tasks under one lock and broadcasts whatever it emits.

use k256::{ProjectivePoint, Scalar};
use rand_core::CryptoRngCore;
#[cfg(test)]
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::{
    dkg::messages::{
        group_context, Deal, Justification, Ready, Response, ResponseStatus, SecretCommits,
    },
    group,
    types::{
        verify_signature, DistKeyShare, NodeKey, ParticipantIndex, PriShare, SessionConfig,
        SessionId,
    },
    Error, Result,
};

const DOMAIN_SESSION_ID: &[u8] = b"tpre/v1/session-id";

/// Why a dealer was permanently removed from the qualified set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealerFault {
    /// A complaint was answered with a justification that fails verification
    InvalidJustification,
    /// The Feldman reveal contradicts the dealt shares
    InvalidSecretCommits,
    /// Certified, but no Feldman reveal arrived before the deadline
    MissingSecretCommits,
    /// Not certified before the deadline
    Unresponsive,
}

/// Certification state of one dealer as seen by this participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealerStatus {
    /// No deal processed yet
    Pending,
    /// Deal processed; approvals still accumulating
    Dealt,
    /// Enough approvals, no open complaint; Feldman reveal outstanding
    Certified,
    /// Certified with a verified Feldman reveal
    Qualified,
    /// Permanently excluded
    Excluded(DealerFault),
}

/// What changed after ingesting a response
#[derive(Debug, Default)]
pub struct CertificationUpdate {
    /// Dealer whose deal became certified with this response
    pub certified: Option<ParticipantIndex>,
    /// Produced when this node is the dealer being complained about;
    /// must be broadcast on the response topic
    pub justification: Option<Justification>,
}

/// This node's own dealing state, kept only as long as complaints may arrive
struct DealerState {
    session_id: SessionId,
    feldman: Vec<ProjectivePoint>,
    /// Plaintext `(share, blinding)` pair per target, retained to answer
    /// complaints
    share_pairs: Vec<(Scalar, Scalar)>,
}

/// Everything known about one dealer, index-addressed
struct DealerRecord {
    /// The deal addressed to this participant, once accepted
    deal: Option<ReceivedDeal>,
    /// Verdict per verifier, exactly as received (never rewritten)
    verdicts: Vec<Option<ResponseStatus>>,
    /// Complaints answered by a valid justification
    resolved: Vec<bool>,
    /// Verified Feldman commitment vector
    feldman: Option<Vec<ProjectivePoint>>,
    excluded: Option<DealerFault>,
    /// Responses that arrived before the deal, one slot per verifier
    pending_responses: Vec<Option<Response>>,
    /// Justifications that arrived before the deal or before the complaint
    /// they answer, one slot per complained-about target
    pending_justifications: Vec<Option<Justification>>,
    /// Feldman reveal seen before the dealer was locally certified
    pending_commits: Option<SecretCommits>,
}

impl DealerRecord {
    fn new(n: usize) -> Self {
        Self {
            deal: None,
            verdicts: vec![None; n],
            resolved: vec![false; n],
            feldman: None,
            excluded: None,
            pending_responses: vec![None; n],
            pending_justifications: vec![None; n],
            pending_commits: None,
        }
    }

    fn approvals(&self) -> u32 {
        self.verdicts
            .iter()
            .zip(&self.resolved)
            .filter(|(v, r)| {
                matches!(v, Some(ResponseStatus::Approve))
                    || (matches!(v, Some(ResponseStatus::Complaint)) && **r)
            })
            .count() as u32
    }

    fn unresolved_complaints(&self) -> u32 {
        self.verdicts
            .iter()
            .zip(&self.resolved)
            .filter(|(v, r)| matches!(v, Some(ResponseStatus::Complaint)) && !**r)
            .count() as u32
    }

    fn is_certified(&self, threshold: u32) -> bool {
        self.excluded.is_none()
            && self.deal.is_some()
            && self.approvals() >= threshold
            && self.unresolved_complaints() == 0
    }

    fn all_verdicts_in(&self) -> bool {
        self.verdicts.iter().all(|v| v.is_some())
    }
}

/// The accepted deal from one dealer to this participant
struct ReceivedDeal {
    /// The wire message, kept for duplicate detection; absent for the deal
    /// this node dealt to itself
    raw: Option<Deal>,
    session_id: SessionId,
    commitments: Vec<ProjectivePoint>,
    /// Decrypted `(share, blinding)`; absent while our own complaint about
    /// this dealer is unresolved
    share_pair: Option<(Scalar, Scalar)>,
}

/// Secret-sharing engine for one participant in one session
pub struct Generator {
    config: SessionConfig,
    key: NodeKey,
    me: ParticipantIndex,
    context: [u8; 32],
    pedersen_base: ProjectivePoint,
    dealer: Option<DealerState>,
    records: Vec<DealerRecord>,
    own_commits_issued: bool,
}

impl Generator {
    /// Validate the configuration and resolve this node's own index.
    /// Fails before any deal is generated if the node is not a participant
    /// or the threshold bounds do not hold.
    pub fn new(config: SessionConfig, key: NodeKey) -> Result<Self> {
        if config.threshold as usize > config.participants.len() {
            return Err(Error::InvalidConfig(
                "threshold exceeds participant count".into(),
            ));
        }
        let me = config.resolve_index(&key)?;
        let context = group_context(&config.participants, config.threshold);
        let pedersen_base = group::pedersen_base(&[&context]);
        let n = config.participants.len();

        Ok(Self {
            config,
            key,
            me,
            context,
            pedersen_base,
            dealer: None,
            records: (0..n).map(|_| DealerRecord::new(n)).collect(),
            own_commits_issued: false,
        })
    }

    pub fn my_index(&self) -> ParticipantIndex {
        self.me
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Certification state of a dealer as seen locally
    pub fn dealer_status(&self, dealer: ParticipantIndex) -> Result<DealerStatus> {
        let record = self.record(dealer)?;
        Ok(if let Some(fault) = record.excluded {
            DealerStatus::Excluded(fault)
        } else if record.feldman.is_some() && record.is_certified(self.config.threshold) {
            DealerStatus::Qualified
        } else if record.is_certified(self.config.threshold) {
            DealerStatus::Certified
        } else if record.deal.is_some() {
            DealerStatus::Dealt
        } else {
            DealerStatus::Pending
        })
    }

    /// Build this node's signed readiness signal
    pub fn ready_message(&self) -> Result<Ready> {
        let signature = self
            .key
            .sign(&Ready::signing_payload(self.me, &self.context))?;
        Ok(Ready {
            index: self.me,
            context: self.context,
            signature,
        })
    }

    /// Check a peer's readiness signal, returning its index
    pub fn verify_ready(&self, ready: &Ready) -> Result<ParticipantIndex> {
        let public = self.config.participant(ready.index)?;
        if ready.context != self.context {
            return Err(Error::VerificationFailed(
                "readiness signal for a different group".into(),
            ));
        }
        verify_signature(public, &ready.signing_bytes(), &ready.signature)?;
        Ok(ready.index)
    }

    /// Sample the private polynomial pair, commit, and emit one deal per
    /// other participant plus this dealer's own approval response.
    ///
    /// The polynomial coefficients are wiped before returning; only the
    /// per-target share pairs survive, to answer complaints.
    pub fn generate_deals(
        &mut self,
        rng: &mut impl CryptoRngCore,
    ) -> Result<(Vec<Deal>, Response)> {
        if self.dealer.is_some() {
            return Err(Error::Internal("deals already generated".into()));
        }
        let n = self.config.participants.len();
        let t = self.config.threshold;

        let mut share_poly = group::random_polynomial(t, rng);
        let mut blinding_poly = group::random_polynomial(t, rng);

        // C_j = a_j*G + b_j*H
        let pedersen: Vec<ProjectivePoint> = share_poly
            .iter()
            .zip(&blinding_poly)
            .map(|(a, b)| ProjectivePoint::GENERATOR * a + self.pedersen_base * b)
            .collect();
        let feldman = group::commit_polynomial(&share_poly, &ProjectivePoint::GENERATOR);

        let session_id = self.session_id_for(self.me, &pedersen);
        let share_pairs: Vec<(Scalar, Scalar)> = (0..n as u32)
            .map(|i| {
                (
                    group::eval_polynomial(&share_poly, i),
                    group::eval_polynomial(&blinding_poly, i),
                )
            })
            .collect();

        for coef in share_poly.iter_mut().chain(blinding_poly.iter_mut()) {
            *coef = Scalar::ZERO;
        }

        let mut deals = Vec::with_capacity(n - 1);
        for target in 0..n as u32 {
            if target == self.me {
                continue;
            }
            let target_pub = self.config.participant(target)?;
            let (share, blinding) = &share_pairs[target as usize];
            let encrypted_share = group::encrypt_share_pair(
                self.key.secret(),
                target_pub,
                &session_id,
                share,
                blinding,
                rng,
            )?;
            let signature = self.key.sign(&Deal::signing_payload(
                self.me,
                target,
                &encrypted_share,
                &pedersen,
                &session_id,
            ))?;
            deals.push(Deal {
                dealer_index: self.me,
                target_index: target,
                encrypted_share,
                commitments: pedersen.clone(),
                session_id,
                signature,
            });
        }

        // Apply the own deal directly; no self-encryption round trip.
        let own_pair = share_pairs[self.me as usize];
        let record = &mut self.records[self.me as usize];
        record.deal = Some(ReceivedDeal {
            raw: None,
            session_id,
            commitments: pedersen,
            share_pair: Some(own_pair),
        });
        record.verdicts[self.me as usize] = Some(ResponseStatus::Approve);

        let response = self.signed_response(session_id, self.me, ResponseStatus::Approve)?;
        self.dealer = Some(DealerState {
            session_id,
            feldman,
            share_pairs,
        });

        info!(
            index = self.me,
            n,
            threshold = t,
            session_id = %hex::encode(&session_id[..8]),
            "deals generated"
        );
        Ok((deals, response))
    }

    /// Process a deal addressed to this participant, producing the signed
    /// verdict to broadcast. Deals for other targets must be discarded by the
    /// caller. Crypto failures yield a Complaint; authentication failures
    /// reject the message without a verdict.
    pub fn process_deal(&mut self, deal: &Deal) -> Result<Option<Response>> {
        if deal.target_index != self.me {
            return Err(Error::Internal("deal not addressed to this node".into()));
        }
        if deal.dealer_index == self.me {
            // Own deal is applied at generation time.
            return Ok(None);
        }
        let dealer_pub = *self.config.participant(deal.dealer_index)?;
        verify_signature(&dealer_pub, &deal.signing_bytes(), &deal.signature)?;

        let expected_sid = self.session_id_for(deal.dealer_index, &deal.commitments);
        if deal.session_id != expected_sid {
            return Err(Error::VerificationFailed(
                "deal session id does not match this session".into(),
            ));
        }

        if let Some(received) = &self.records[deal.dealer_index as usize].deal {
            if received.raw.as_ref() == Some(deal) {
                debug!(dealer = deal.dealer_index, "duplicate deal ignored");
                return Ok(None);
            }
            return Err(Error::VerificationFailed(format!(
                "conflicting deal from dealer {}",
                deal.dealer_index
            )));
        }

        let threshold = self.config.threshold;
        let verdict = self.check_deal(deal, threshold);
        let share_pair = match verdict {
            Ok(pair) => Some(pair),
            Err(ref reason) => {
                warn!(dealer = deal.dealer_index, %reason, "deal rejected, complaining");
                None
            }
        };
        let status = if share_pair.is_some() {
            ResponseStatus::Approve
        } else {
            ResponseStatus::Complaint
        };

        let record = &mut self.records[deal.dealer_index as usize];
        record.deal = Some(ReceivedDeal {
            raw: Some(deal.clone()),
            session_id: deal.session_id,
            commitments: deal.commitments.clone(),
            share_pair,
        });
        record.verdicts[self.me as usize] = Some(status);

        let approve = status == ResponseStatus::Approve;
        debug!(dealer = deal.dealer_index, approve, "deal processed");
        let response = self.signed_response(deal.session_id, deal.dealer_index, status)?;
        self.replay_pending(deal.dealer_index)?;
        Ok(Some(response))
    }

    /// Decrypt and verify one deal; the error is the complaint reason
    fn check_deal(&self, deal: &Deal, threshold: u32) -> Result<(Scalar, Scalar)> {
        if deal.commitments.len() != threshold as usize {
            return Err(Error::VerificationFailed(format!(
                "commitment vector length {} != threshold {}",
                deal.commitments.len(),
                threshold
            )));
        }
        let dealer_pub = self.config.participant(deal.dealer_index)?;
        let (share, blinding) = group::decrypt_share_pair(
            self.key.secret(),
            dealer_pub,
            &deal.session_id,
            &deal.encrypted_share,
        )?;

        let lhs = ProjectivePoint::GENERATOR * share + self.pedersen_base * blinding;
        let rhs = group::eval_commitments(&deal.commitments, self.me);
        if lhs != rhs {
            return Err(Error::VerificationFailed(
                "share does not open the Pedersen commitments".into(),
            ));
        }
        Ok((share, blinding))
    }

    /// Ingest a verifier's response. Responses that precede their deal are
    /// buffered and replayed once the deal arrives.
    pub fn process_response(&mut self, response: &Response) -> Result<CertificationUpdate> {
        let verifier_pub = self.config.participant(response.index)?;
        self.record(response.dealer_index)?;
        verify_signature(verifier_pub, &response.signing_bytes(), &response.signature)?;

        let record = &mut self.records[response.dealer_index as usize];
        if record.deal.is_none() {
            return match &record.pending_responses[response.index as usize] {
                None => {
                    debug!(
                        dealer = response.dealer_index,
                        verifier = response.index,
                        "response buffered before its deal"
                    );
                    record.pending_responses[response.index as usize] = Some(response.clone());
                    Ok(CertificationUpdate::default())
                }
                Some(pending) if pending.status == response.status => {
                    Ok(CertificationUpdate::default())
                }
                Some(_) => Err(Error::VerificationFailed(format!(
                    "conflicting buffered response from verifier {}",
                    response.index
                ))),
            };
        }

        self.apply_response(response)
    }

    fn apply_response(&mut self, response: &Response) -> Result<CertificationUpdate> {
        let threshold = self.config.threshold;
        let record = &mut self.records[response.dealer_index as usize];
        let deal = record
            .deal
            .as_ref()
            .ok_or_else(|| Error::Internal("response applied before deal".into()))?;
        if response.session_id != deal.session_id {
            return Err(Error::VerificationFailed(
                "response bound to a different session id".into(),
            ));
        }

        let was_certified = record.is_certified(threshold);
        match record.verdicts[response.index as usize] {
            None => record.verdicts[response.index as usize] = Some(response.status),
            Some(existing) if existing == response.status => {
                return Ok(CertificationUpdate::default())
            }
            Some(_) => {
                return Err(Error::VerificationFailed(format!(
                    "conflicting response for dealer {} from verifier {}",
                    response.dealer_index, response.index
                )))
            }
        }

        let mut update = CertificationUpdate::default();

        if response.status == ResponseStatus::Complaint {
            warn!(
                dealer = response.dealer_index,
                verifier = response.index,
                "complaint recorded"
            );
            if response.dealer_index == self.me {
                update.justification = Some(self.justify(response.index)?);
            } else if let Some(pending) =
                self.records[response.dealer_index as usize].pending_justifications
                    [response.index as usize]
                    .take()
            {
                // The dealer's answer raced ahead of the complaint.
                self.apply_justification(&pending)?;
            }
        }

        let record = &self.records[response.dealer_index as usize];
        if !was_certified && record.is_certified(threshold) {
            info!(dealer = response.dealer_index, "dealer certified");
            update.certified = Some(response.dealer_index);
            self.drain_pending_commits(response.dealer_index)?;
        }
        Ok(update)
    }

    /// Build, self-apply, and sign the justification answering a complaint
    /// about this node's own deal
    fn justify(&mut self, target: ParticipantIndex) -> Result<Justification> {
        let dealer = self
            .dealer
            .as_ref()
            .ok_or_else(|| Error::Internal("complaint about undealt deal".into()))?;
        let (share, blinding) = dealer.share_pairs[target as usize];
        let signature = self.key.sign(&Justification::signing_payload(
            &dealer.session_id,
            self.me,
            target,
            &share,
            &blinding,
        ))?;
        let justification = Justification {
            session_id: dealer.session_id,
            dealer_index: self.me,
            target_index: target,
            share,
            blinding,
            signature,
        };
        // Our own justification is correct by construction.
        self.records[self.me as usize].resolved[target as usize] = true;
        info!(target, "justification issued for own deal");
        Ok(justification)
    }

    /// Ingest a dealer's justification for a complaint. Buffered if the deal
    /// or the complaint it answers has not arrived yet.
    pub fn process_justification(&mut self, justification: &Justification) -> Result<()> {
        let dealer_pub = *self.config.participant(justification.dealer_index)?;
        self.record(justification.target_index)?;
        verify_signature(
            &dealer_pub,
            &justification.signing_bytes(),
            &justification.signature,
        )?;

        let record = &mut self.records[justification.dealer_index as usize];
        if record.excluded.is_some() {
            return Ok(());
        }
        if record.resolved[justification.target_index as usize] {
            return Ok(());
        }

        let complaint_seen = matches!(
            record.verdicts[justification.target_index as usize],
            Some(ResponseStatus::Complaint)
        );
        if record.deal.is_none() || !complaint_seen {
            debug!(
                dealer = justification.dealer_index,
                target = justification.target_index,
                "justification buffered"
            );
            record.pending_justifications[justification.target_index as usize] =
                Some(justification.clone());
            return Ok(());
        }

        self.apply_justification(justification)
    }

    fn apply_justification(&mut self, justification: &Justification) -> Result<()> {
        let threshold = self.config.threshold;
        let dealer_idx = justification.dealer_index as usize;
        let (sid, commitments) = {
            let deal = self.records[dealer_idx]
                .deal
                .as_ref()
                .ok_or_else(|| Error::Internal("justification applied before deal".into()))?;
            (deal.session_id, deal.commitments.clone())
        };
        if justification.session_id != sid {
            return Err(Error::VerificationFailed(
                "justification bound to a different session id".into(),
            ));
        }

        let lhs = ProjectivePoint::GENERATOR * justification.share
            + self.pedersen_base * justification.blinding;
        let rhs = group::eval_commitments(&commitments, justification.target_index);

        let was_certified = self.records[dealer_idx].is_certified(threshold);
        if lhs != rhs {
            warn!(
                dealer = justification.dealer_index,
                target = justification.target_index,
                "invalid justification, dealer excluded"
            );
            self.records[dealer_idx].excluded = Some(DealerFault::InvalidJustification);
            return Ok(());
        }

        let record = &mut self.records[dealer_idx];
        record.resolved[justification.target_index as usize] = true;
        if justification.target_index == self.me {
            // The revealed pair is our share; it just became public, but it
            // still aggregates like any other.
            if let Some(deal) = record.deal.as_mut() {
                deal.share_pair
                    .get_or_insert((justification.share, justification.blinding));
            }
        }
        info!(
            dealer = justification.dealer_index,
            target = justification.target_index,
            "complaint resolved by justification"
        );

        if !was_certified && self.records[dealer_idx].is_certified(threshold) {
            self.drain_pending_commits(justification.dealer_index)?;
        }
        Ok(())
    }

    /// Ingest a dealer's Feldman reveal. Held back until the dealer is
    /// locally certified; checked against the share from its deal.
    pub fn process_secret_commits(&mut self, sc: &SecretCommits) -> Result<()> {
        let dealer_pub = *self.config.participant(sc.index)?;
        verify_signature(&dealer_pub, &sc.signing_bytes(), &sc.signature)?;

        let threshold = self.config.threshold;
        let record = &mut self.records[sc.index as usize];
        if record.excluded.is_some() {
            return Ok(());
        }
        if let Some(existing) = &record.feldman {
            if *existing == sc.commitments {
                return Ok(());
            }
            return Err(Error::VerificationFailed(format!(
                "conflicting secret commits from dealer {}",
                sc.index
            )));
        }

        if !record.is_certified(threshold) {
            match &record.pending_commits {
                Some(pending) if *pending != *sc => {
                    return Err(Error::VerificationFailed(format!(
                        "conflicting secret commits from dealer {}",
                        sc.index
                    )))
                }
                _ => {
                    debug!(dealer = sc.index, "secret commits buffered until certified");
                    record.pending_commits = Some(sc.clone());
                    return Ok(());
                }
            }
        }

        self.apply_secret_commits(sc)
    }

    fn apply_secret_commits(&mut self, sc: &SecretCommits) -> Result<()> {
        let me = self.me;
        let record = &mut self.records[sc.index as usize];
        let deal = record
            .deal
            .as_ref()
            .ok_or_else(|| Error::Internal("secret commits applied before deal".into()))?;
        if sc.session_id != deal.session_id {
            return Err(Error::VerificationFailed(
                "secret commits bound to a different session id".into(),
            ));
        }
        let (share, _) = deal
            .share_pair
            .ok_or_else(|| Error::Internal("certified dealer without a share".into()))?;

        if sc.commitments.len() != self.config.threshold as usize {
            warn!(dealer = sc.index, "secret commits with bad length, dealer excluded");
            record.excluded = Some(DealerFault::InvalidSecretCommits);
            return Ok(());
        }
        let expected = group::eval_commitments(&sc.commitments, me);
        if ProjectivePoint::GENERATOR * share != expected {
            warn!(dealer = sc.index, "secret commits contradict dealt share, dealer excluded");
            record.excluded = Some(DealerFault::InvalidSecretCommits);
            return Ok(());
        }

        record.feldman = Some(sc.commitments.clone());
        info!(dealer = sc.index, "secret commits verified");
        Ok(())
    }

    fn drain_pending_commits(&mut self, dealer: ParticipantIndex) -> Result<()> {
        if let Some(sc) = self.records[dealer as usize].pending_commits.take() {
            self.apply_secret_commits(&sc)?;
        }
        Ok(())
    }

    /// Emit this dealer's Feldman reveal once its own deal is certified.
    /// Returns `None` until then, and never emits twice.
    pub fn maybe_own_secret_commits(&mut self) -> Result<Option<SecretCommits>> {
        if self.own_commits_issued {
            return Ok(None);
        }
        let threshold = self.config.threshold;
        if !self.records[self.me as usize].is_certified(threshold) {
            return Ok(None);
        }
        let dealer = self
            .dealer
            .as_ref()
            .ok_or_else(|| Error::Internal("certified before dealing".into()))?;

        let signature = self.key.sign(&SecretCommits::signing_payload(
            self.me,
            &dealer.feldman,
            &dealer.session_id,
        ))?;
        let sc = SecretCommits {
            index: self.me,
            commitments: dealer.feldman.clone(),
            session_id: dealer.session_id,
            signature,
        };
        self.own_commits_issued = true;
        self.records[self.me as usize].feldman = Some(sc.commitments.clone());
        info!(index = self.me, "own secret commits issued");
        Ok(Some(sc))
    }

    /// True once every dealer is fully resolved: excluded, or qualified with
    /// all verdicts in. The session finalizes early when this holds.
    pub fn all_resolved(&self) -> bool {
        let t = self.config.threshold;
        self.records.iter().all(|r| {
            r.excluded.is_some()
                || (r.is_certified(t) && r.all_verdicts_in() && r.feldman.is_some())
        })
    }

    /// Deadline policy: exclude every dealer that is not certified with a
    /// verified Feldman reveal. After this, `finalize` reflects whatever
    /// survived.
    pub fn resolve_missing(&mut self) {
        let t = self.config.threshold;
        for (idx, record) in self.records.iter_mut().enumerate() {
            if record.excluded.is_some() {
                continue;
            }
            if !record.is_certified(t) {
                warn!(dealer = idx, "dealer unresponsive at deadline, excluded");
                record.excluded = Some(DealerFault::Unresponsive);
            } else if record.feldman.is_none() {
                warn!(dealer = idx, "no secret commits at deadline, dealer excluded");
                record.excluded = Some(DealerFault::MissingSecretCommits);
            }
        }
    }

    /// Indices of currently qualified dealers
    pub fn qualified(&self) -> Vec<ParticipantIndex> {
        let t = self.config.threshold;
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.excluded.is_none() && r.is_certified(t) && r.feldman.is_some())
            .map(|(i, _)| i as ParticipantIndex)
            .collect()
    }

    /// Sum the qualified dealers' shares and Feldman vectors into the final
    /// DistKeyShare. Fails if fewer than `t` dealers qualify.
    pub fn finalize(&self) -> Result<DistKeyShare> {
        let qualified = self.qualified();
        let t = self.config.threshold;
        if (qualified.len() as u32) < t {
            return Err(Error::InsufficientQualifiedDealers {
                required: t,
                qualified: qualified.len() as u32,
            });
        }

        let mut share = Scalar::ZERO;
        let mut commits = vec![ProjectivePoint::IDENTITY; t as usize];
        for &dealer in &qualified {
            let record = &self.records[dealer as usize];
            let (s, _) = record
                .deal
                .as_ref()
                .and_then(|d| d.share_pair)
                .ok_or_else(|| Error::Internal("qualified dealer without share".into()))?;
            let feldman = record
                .feldman
                .as_ref()
                .ok_or_else(|| Error::Internal("qualified dealer without commits".into()))?;
            share += s;
            for (acc, c) in commits.iter_mut().zip(feldman) {
                *acc += c;
            }
        }

        let dist = DistKeyShare {
            pri_share: PriShare {
                index: self.me,
                value: share,
            },
            commits,
        };
        dist.verify()?;

        info!(
            index = self.me,
            qualified = qualified.len(),
            public_key = %hex::encode(group::encode_point(&dist.public_key())),
            "distributed key share finalized"
        );
        Ok(dist)
    }

    /// Per-dealer session id, binding the dealer, the agreed group, and the
    /// Pedersen commitments
    fn session_id_for(
        &self,
        dealer: ParticipantIndex,
        commitments: &[ProjectivePoint],
    ) -> SessionId {
        let dealer_pub = group::encode_point(&self.config.participants[dealer as usize]);
        let encoded: Vec<Vec<u8>> = commitments.iter().map(group::encode_point).collect();
        let mut parts: Vec<&[u8]> = vec![&dealer_pub, &self.context];
        parts.extend(encoded.iter().map(|c| c.as_slice()));
        group::hash_parts(DOMAIN_SESSION_ID, &parts)
    }

    fn signed_response(
        &self,
        session_id: SessionId,
        dealer_index: ParticipantIndex,
        status: ResponseStatus,
    ) -> Result<Response> {
        let signature = self.key.sign(&Response::signing_payload(
            &session_id,
            dealer_index,
            self.me,
            status,
        ))?;
        Ok(Response {
            session_id,
            dealer_index,
            index: self.me,
            status,
            signature,
        })
    }

    /// Replay buffered responses and justifications after their deal arrived
    fn replay_pending(&mut self, dealer: ParticipantIndex) -> Result<()> {
        let n = self.records.len();
        for verifier in 0..n {
            let buffered = self.records[dealer as usize].pending_responses[verifier].take();
            if let Some(response) = buffered {
                debug!(dealer, verifier, "replaying buffered response");
                if let Err(err) = self.apply_response(&response) {
                    warn!(dealer, verifier, %err, "buffered response rejected");
                }
            }
        }
        for target in 0..n {
            let complaint_seen = matches!(
                self.records[dealer as usize].verdicts[target],
                Some(ResponseStatus::Complaint)
            );
            if !complaint_seen {
                continue;
            }
            let buffered = self.records[dealer as usize].pending_justifications[target].take();
            if let Some(justification) = buffered {
                debug!(dealer, target, "replaying buffered justification");
                if let Err(err) = self.apply_justification(&justification) {
                    warn!(dealer, target, %err, "buffered justification rejected");
                }
            }
        }
        Ok(())
    }

    fn record(&self, dealer: ParticipantIndex) -> Result<&DealerRecord> {
        self.records
            .get(dealer as usize)
            .ok_or(Error::InvalidIndex(dealer))
    }

    /// Constant-time comparison of a candidate share against the dealt one;
    /// used by tests to assert share agreement without exposing values.
    #[cfg(test)]
    pub(crate) fn share_matches(&self, dealer: ParticipantIndex, candidate: &Scalar) -> bool {
        self.records[dealer as usize]
            .deal
            .as_ref()
            .and_then(|d| d.share_pair)
            .map(|(s, _)| bool::from(s.ct_eq(candidate)))
            .unwrap_or(false)
    }
}
