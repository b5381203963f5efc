//! Async session: drives one [`Generator`] over a topic transport.
//!
//! All mutable protocol state lives in the engine behind a single lock; the
//! per-topic listener tasks only decode, dispatch under that lock, and
//! publish whatever the engine hands back. Listeners re-attach with backoff
//! on transport errors and are torn down together when the session
//! completes, is cancelled, or hits its deadline.

use std::sync::Arc;

use rand::rngs::OsRng;
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinSet,
    time::{interval, sleep},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    dkg::Generator,
    transport::{Subscription, Topic, Transport},
    types::{DistKeyShare, NodeKey, ParticipantIndex, SessionConfig},
    wire::{self, ResponseMessage},
    Error, Result,
};

const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(250);
const RETRY_ATTEMPTS: usize = 4;
const READY_REBROADCAST: std::time::Duration = std::time::Duration::from_millis(200);

/// Lifecycle of one key-generation session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet running
    Init,
    /// Waiting for peers and broadcasting deals
    Dealing,
    /// Ingesting deals and responses; own deal not yet certified
    Collecting,
    /// Own Feldman reveal published; waiting for every dealer to resolve
    Certifying,
    /// DistKeyShare produced
    Finalized,
    /// Cancelled, deadline failure, or unrecoverable error
    Aborted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Init => "init",
            SessionState::Dealing => "dealing",
            SessionState::Collecting => "collecting",
            SessionState::Certifying => "certifying",
            SessionState::Finalized => "finalized",
            SessionState::Aborted => "aborted",
        })
    }
}

/// One participant's key-generation session.
///
/// [`Session::run`] drives the protocol to completion and returns the
/// finalized share. The session can be observed through [`Session::watch_state`]
/// and stopped from anywhere with [`Session::cancel`]; a cancelled or
/// deadline-expired session never yields a share.
pub struct Session {
    config: SessionConfig,
    key: NodeKey,
    me: ParticipantIndex,
    state: watch::Sender<SessionState>,
    cancel: watch::Sender<bool>,
}

impl Session {
    /// Validate the configuration and membership before any network I/O
    pub fn new(config: SessionConfig, key: NodeKey) -> Result<Self> {
        let me = config.resolve_index(&key)?;
        let (state, _) = watch::channel(SessionState::Init);
        let (cancel, _) = watch::channel(false);
        Ok(Self {
            config,
            key,
            me,
            state,
            cancel,
        })
    }

    pub fn my_index(&self) -> ParticipantIndex {
        self.me
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions as they happen
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Ask a running session to stop. Listener tasks terminate promptly and
    /// the session resolves to `Aborted`.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Run the session to completion over the given transport.
    ///
    /// Subscribes to every topic before publishing anything, waits out the
    /// readiness barrier, deals, then collects until every dealer is
    /// resolved or the session deadline forces a resolution. A session runs
    /// at most once; calling this again after it resolves is an error.
    #[instrument(skip_all, fields(index = self.me))]
    pub async fn run<T>(&self, transport: T) -> Result<DistKeyShare>
    where
        T: Transport + Clone + 'static,
    {
        // A session runs once; after Finalized or Aborted it is read-only.
        let started = self.state.send_if_modified(|state| {
            if *state == SessionState::Init {
                *state = SessionState::Dealing;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::Internal(format!(
                "session already {}",
                *self.state.borrow()
            )));
        }

        let engine = Arc::new(Mutex::new(Generator::new(
            self.config.clone(),
            self.key.clone(),
        )?));

        let mut cancelled = self.cancel.subscribe();
        if *cancelled.borrow_and_update() {
            self.state.send_replace(SessionState::Aborted);
            return Err(Error::Cancelled);
        }

        let driver = Driver {
            engine: Arc::clone(&engine),
            transport,
            done: Arc::new(Notify::new()),
            state: self.state.clone(),
            me: self.me,
        };

        let result = tokio::select! {
            result = driver.drive(&self.config) => result,
            _ = sleep(self.config.session_deadline) => {
                warn!("session deadline reached");
                self.resolve_deadline(&engine).await
            }
            _ = cancelled.changed() => {
                info!("session cancelled");
                Err(Error::Cancelled)
            }
        };

        match &result {
            Ok(_) => self.state.send_replace(SessionState::Finalized),
            Err(err) => {
                warn!(%err, "session failed");
                self.state.send_replace(SessionState::Aborted)
            }
        };
        result
    }

    /// Deadline policy: exclude whatever never resolved and finalize with
    /// the dealers that did. Only meaningful once dealing has happened.
    async fn resolve_deadline(&self, engine: &Mutex<Generator>) -> Result<DistKeyShare> {
        let state = *self.state.borrow();
        if !matches!(state, SessionState::Collecting | SessionState::Certifying) {
            return Err(Error::DeadlineExceeded(state.to_string()));
        }
        let mut engine = engine.lock().await;
        engine.resolve_missing();
        engine.finalize()
    }
}

/// The spawned side of a session: everything the topic tasks share
struct Driver<T> {
    engine: Arc<Mutex<Generator>>,
    transport: T,
    done: Arc<Notify>,
    state: watch::Sender<SessionState>,
    me: ParticipantIndex,
}

impl<T: Clone> Clone for Driver<T> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            transport: self.transport.clone(),
            done: Arc::clone(&self.done),
            state: self.state.clone(),
            me: self.me,
        }
    }
}

impl<T> Driver<T>
where
    T: Transport + Clone + 'static,
{
    async fn drive(&self, config: &SessionConfig) -> Result<DistKeyShare> {
        // Subscriptions come first: a peer that exits its barrier may
        // publish deals immediately, and they must land in our buffers.
        let mut ready = TopicListener::attach(self.transport.clone(), Topic::Ready).await?;
        let deals = TopicListener::attach(self.transport.clone(), Topic::Deal).await?;
        let responses = TopicListener::attach(self.transport.clone(), Topic::Response).await?;
        let commits = TopicListener::attach(self.transport.clone(), Topic::SecretCommits).await?;

        self.barrier(config, &mut ready).await?;

        let (deal_msgs, own_response) = {
            let mut engine = self.engine.lock().await;
            engine.generate_deals(&mut OsRng)?
        };
        for deal in &deal_msgs {
            self.publish(Topic::Deal, wire::encode_deal(deal)).await;
        }
        self.publish(Topic::Response, wire::encode_response(&own_response))
            .await;
        self.state.send_replace(SessionState::Collecting);

        let notified = self.done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        // A single-participant session is already resolved here.
        self.after_mutation().await;

        let mut tasks = JoinSet::new();
        {
            let driver = self.clone();
            tasks.spawn(async move { driver.deal_loop(deals).await });
        }
        {
            let driver = self.clone();
            tasks.spawn(async move { driver.response_loop(responses).await });
        }
        {
            let driver = self.clone();
            tasks.spawn(async move { driver.commits_loop(commits).await });
        }

        notified.await;
        tasks.abort_all();

        info!("all dealers resolved, finalizing");
        let engine = self.engine.lock().await;
        engine.finalize()
    }

    /// Readiness barrier: rebroadcast our signed ready signal until every
    /// participant has been heard from, or the configured timeout passes.
    /// Rebroadcasting makes the barrier robust to signals lost before a
    /// peer's subscriptions existed.
    async fn barrier(
        &self,
        config: &SessionConfig,
        ready: &mut TopicListener<T>,
    ) -> Result<()> {
        let message = self.engine.lock().await.ready_message()?;
        let encoded = wire::encode_ready(&message)?;

        let n = config.n() as usize;
        let mut seen = vec![false; n];
        seen[self.me as usize] = true;
        let mut remaining = n - 1;
        if remaining == 0 {
            return Ok(());
        }

        let timeout = sleep(config.ready_timeout);
        tokio::pin!(timeout);
        let mut rebroadcast = interval(READY_REBROADCAST);

        loop {
            tokio::select! {
                _ = rebroadcast.tick() => {
                    self.publish(Topic::Ready, Ok(encoded.clone())).await;
                }
                payload = ready.next() => {
                    let signal = match wire::decode_ready(&payload) {
                        Ok(signal) => signal,
                        Err(err) => {
                            warn!(%err, "undecodable readiness signal dropped");
                            continue;
                        }
                    };
                    let verified = self.engine.lock().await.verify_ready(&signal);
                    match verified {
                        Ok(index) if !seen[index as usize] => {
                            seen[index as usize] = true;
                            remaining -= 1;
                            debug!(peer = index, remaining, "peer ready");
                            if remaining == 0 {
                                info!("all participants ready");
                                return Ok(());
                            }
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "readiness signal rejected"),
                    }
                }
                _ = &mut timeout => {
                    warn!(missing = remaining, "readiness barrier timed out, proceeding");
                    return Ok(());
                }
            }
        }
    }

    async fn deal_loop(self, mut listener: TopicListener<T>) {
        loop {
            let payload = listener.next().await;
            let deal = match wire::decode_deal(&payload) {
                Ok(deal) => deal,
                Err(err) => {
                    warn!(%err, "undecodable deal dropped");
                    continue;
                }
            };
            if deal.target_index != self.me {
                continue;
            }

            let response = {
                let mut engine = self.engine.lock().await;
                match engine.process_deal(&deal) {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(dealer = deal.dealer_index, %err, "deal rejected");
                        None
                    }
                }
            };
            if let Some(response) = &response {
                self.publish(Topic::Response, wire::encode_response(response))
                    .await;
            }
            self.after_mutation().await;
        }
    }

    async fn response_loop(self, mut listener: TopicListener<T>) {
        loop {
            let payload = listener.next().await;
            let message = match wire::decode_response_message(&payload) {
                Ok(message) => message,
                Err(err) => {
                    warn!(%err, "undecodable response dropped");
                    continue;
                }
            };

            match message {
                ResponseMessage::Response(response) => {
                    let update = {
                        let mut engine = self.engine.lock().await;
                        engine.process_response(&response)
                    };
                    match update {
                        Ok(update) => {
                            if let Some(justification) = &update.justification {
                                self.publish(
                                    Topic::Response,
                                    wire::encode_justification(justification),
                                )
                                .await;
                            }
                        }
                        Err(err) => warn!(
                            dealer = response.dealer_index,
                            verifier = response.index,
                            %err,
                            "response rejected"
                        ),
                    }
                }
                ResponseMessage::Justification(justification) => {
                    let result = {
                        let mut engine = self.engine.lock().await;
                        engine.process_justification(&justification)
                    };
                    if let Err(err) = result {
                        warn!(
                            dealer = justification.dealer_index,
                            target = justification.target_index,
                            %err,
                            "justification rejected"
                        );
                    }
                }
            }
            self.after_mutation().await;
        }
    }

    async fn commits_loop(self, mut listener: TopicListener<T>) {
        loop {
            let payload = listener.next().await;
            let sc = match wire::decode_secret_commits(&payload) {
                Ok(sc) => sc,
                Err(err) => {
                    warn!(%err, "undecodable secret commits dropped");
                    continue;
                }
            };
            let result = {
                let mut engine = self.engine.lock().await;
                engine.process_secret_commits(&sc)
            };
            if let Err(err) = result {
                warn!(dealer = sc.index, %err, "secret commits rejected");
            }
            self.after_mutation().await;
        }
    }

    /// After any engine mutation: publish our own Feldman reveal the moment
    /// our deal is certified, and wake the driver once every dealer is
    /// resolved.
    async fn after_mutation(&self) {
        let (own_commits, resolved) = {
            let mut engine = self.engine.lock().await;
            let own_commits = match engine.maybe_own_secret_commits() {
                Ok(own_commits) => own_commits,
                Err(err) => {
                    warn!(%err, "failed to issue own secret commits");
                    None
                }
            };
            (own_commits, engine.all_resolved())
        };

        if let Some(sc) = &own_commits {
            self.state.send_replace(SessionState::Certifying);
            self.publish(Topic::SecretCommits, wire::encode_secret_commits(sc))
                .await;
        }
        if resolved {
            self.done.notify_waiters();
        }
    }

    /// Publish with bounded retries. A message that cannot be placed on the
    /// wire is logged and given up on; the session deadline bounds the
    /// consequences.
    async fn publish(&self, topic: Topic, payload: Result<Vec<u8>>) {
        let bytes = match payload {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%topic, %err, "failed to encode outbound message");
                return;
            }
        };
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.transport.publish(topic, &bytes).await {
                Ok(()) => return,
                Err(err) => {
                    warn!(%topic, attempt, %err, "publish failed");
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
        warn!(%topic, "message dropped after repeated publish failures");
    }
}

/// A per-topic subscription that re-attaches itself with backoff instead of
/// surfacing transport errors to the protocol
struct TopicListener<T> {
    transport: T,
    topic: Topic,
    subscription: Box<dyn Subscription>,
}

impl<T: Transport> TopicListener<T> {
    async fn attach(transport: T, topic: Topic) -> Result<Self> {
        let mut last = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match transport.subscribe(topic).await {
                Ok(subscription) => {
                    return Ok(Self {
                        transport,
                        topic,
                        subscription,
                    })
                }
                Err(err) => {
                    warn!(%topic, attempt, %err, "subscribe failed");
                    last = Some(err);
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Transport(format!("cannot subscribe to {topic}"))))
    }

    /// Next payload on the topic. Transport failures are logged and retried
    /// here forever; a broken topic never takes the session down with it.
    async fn next(&mut self) -> Vec<u8> {
        loop {
            match self.subscription.recv().await {
                Ok(payload) => return payload,
                Err(err) => {
                    warn!(topic = %self.topic, %err, "receive failed, re-attaching");
                    sleep(RETRY_BACKOFF).await;
                    match self.transport.subscribe(self.topic).await {
                        Ok(subscription) => self.subscription = subscription,
                        Err(err) => {
                            warn!(topic = %self.topic, %err, "re-subscribe failed, will retry");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryHub;
    use k256::ProjectivePoint;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::time::Duration;

    fn make_sessions(n: usize, threshold: u32, seed: u64) -> (Vec<Arc<Session>>, MemoryHub) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let keys: Vec<NodeKey> = (0..n).map(|_| NodeKey::generate(&mut rng)).collect();
        let participants: Vec<ProjectivePoint> = keys.iter().map(|k| k.public()).collect();
        let config = SessionConfig::new(participants, threshold)
            .unwrap()
            .with_ready_timeout(Duration::from_millis(500))
            .with_session_deadline(Duration::from_secs(20));

        let sessions = keys
            .into_iter()
            .map(|key| Arc::new(Session::new(config.clone(), key).unwrap()))
            .collect();
        (sessions, MemoryHub::new())
    }

    async fn run_all(sessions: &[Arc<Session>], hub: &MemoryHub) -> Vec<Result<DistKeyShare>> {
        let handles: Vec<_> = sessions
            .iter()
            .map(|session| {
                let session = Arc::clone(session);
                let transport = hub.attach();
                tokio::spawn(async move { session.run(transport).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn full_session_converges_for_various_sizes() {
        for (n, threshold) in [(1u32, 1u32), (3, 2), (4, 3), (5, 5)] {
            let (sessions, hub) = make_sessions(n as usize, threshold, 31 + n as u64);
            let results = run_all(&sessions, &hub).await;

            let shares: Vec<DistKeyShare> =
                results.into_iter().map(|r| r.unwrap()).collect();
            for share in &shares {
                assert_eq!(share.commits, shares[0].commits);
                assert_eq!(share.commits.len(), threshold as usize);
                share.verify().unwrap();
            }
            for session in &sessions {
                assert_eq!(session.state(), SessionState::Finalized);
            }
        }
    }

    #[tokio::test]
    async fn shares_recover_one_secret() {
        let (sessions, hub) = make_sessions(4, 3, 41);
        let results = run_all(&sessions, &hub).await;
        let shares: Vec<DistKeyShare> = results.into_iter().map(|r| r.unwrap()).collect();

        let pri: Vec<_> = shares.iter().map(|s| s.pri_share.clone()).collect();
        let secret = crate::group::recover_secret(&pri[..3], 3).unwrap();
        assert_eq!(
            ProjectivePoint::GENERATOR * secret,
            shares[0].public_key()
        );
        let again = crate::group::recover_secret(&pri[1..], 3).unwrap();
        assert_eq!(secret, again);
    }

    #[tokio::test]
    async fn cancellation_aborts_without_share() {
        let (sessions, hub) = make_sessions(3, 2, 51);
        // Only one participant shows up; it will sit in the barrier.
        let session = Arc::clone(&sessions[0]);
        let transport = hub.attach();
        let handle = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run(transport).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[tokio::test]
    async fn deadline_excludes_offline_dealer() {
        let mut rng = ChaCha8Rng::seed_from_u64(61);
        let keys: Vec<NodeKey> = (0..3).map(|_| NodeKey::generate(&mut rng)).collect();
        let participants: Vec<ProjectivePoint> = keys.iter().map(|k| k.public()).collect();
        let config = SessionConfig::new(participants, 2)
            .unwrap()
            .with_ready_timeout(Duration::from_millis(200))
            .with_session_deadline(Duration::from_secs(2));

        let hub = MemoryHub::new();
        // Participant 2 never runs.
        let sessions: Vec<Arc<Session>> = keys
            .into_iter()
            .take(2)
            .map(|key| Arc::new(Session::new(config.clone(), key).unwrap()))
            .collect();
        let results = run_all(&sessions, &hub).await;

        let shares: Vec<DistKeyShare> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(shares[0].commits, shares[1].commits);
        for (session, share) in sessions.iter().zip(&shares) {
            assert_eq!(session.state(), SessionState::Finalized);
            share.verify().unwrap();
        }
    }

    #[tokio::test]
    async fn deadline_aborts_below_threshold() {
        let mut rng = ChaCha8Rng::seed_from_u64(71);
        let keys: Vec<NodeKey> = (0..3).map(|_| NodeKey::generate(&mut rng)).collect();
        let participants: Vec<ProjectivePoint> = keys.iter().map(|k| k.public()).collect();
        let config = SessionConfig::new(participants, 3)
            .unwrap()
            .with_ready_timeout(Duration::from_millis(200))
            .with_session_deadline(Duration::from_secs(2));

        let hub = MemoryHub::new();
        let sessions: Vec<Arc<Session>> = keys
            .into_iter()
            .take(2)
            .map(|key| Arc::new(Session::new(config.clone(), key).unwrap()))
            .collect();
        let results = run_all(&sessions, &hub).await;

        for (session, result) in sessions.iter().zip(results) {
            assert!(matches!(
                result,
                Err(Error::InsufficientQualifiedDealers { required: 3, .. })
            ));
            assert_eq!(session.state(), SessionState::Aborted);
        }
    }

    #[test]
    fn foreign_key_is_rejected_before_io() {
        let mut rng = ChaCha8Rng::seed_from_u64(81);
        let keys: Vec<NodeKey> = (0..3).map(|_| NodeKey::generate(&mut rng)).collect();
        let participants: Vec<ProjectivePoint> = keys.iter().map(|k| k.public()).collect();
        let config = SessionConfig::new(participants, 2).unwrap();

        let outsider = NodeKey::generate(&mut rng);
        assert!(matches!(
            Session::new(config, outsider),
            Err(Error::NotAParticipant)
        ));
    }

    #[tokio::test]
    async fn finished_session_refuses_to_run_again() {
        let (sessions, hub) = make_sessions(1, 1, 101);
        let session = Arc::clone(&sessions[0]);

        let share = session.run(hub.attach()).await.unwrap();
        assert_eq!(session.state(), SessionState::Finalized);

        // A terminal session stays read-only.
        let rerun = session.run(hub.attach()).await;
        assert!(matches!(rerun, Err(Error::Internal(_))));
        assert_eq!(session.state(), SessionState::Finalized);
        share.verify().unwrap();
    }

    #[tokio::test]
    async fn state_transitions_are_observable() {
        let (sessions, hub) = make_sessions(3, 2, 91);
        let mut watcher = sessions[0].watch_state();
        assert_eq!(*watcher.borrow(), SessionState::Init);

        let results = run_all(&sessions, &hub).await;
        for result in results {
            result.unwrap();
        }

        // The watcher observes the terminal state without polling the
        // intermediate ones.
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), SessionState::Finalized);
    }
}
