//! In-memory message store for tests and local use.
//!
//! Supports a manual clock, fault injection, held calls and forced feed
//! disconnects.

use super::{ChangeFeed, MessageStore, ProfileDirectory, Subscription, DEFAULT_FEED_CAPACITY};
use crate::session::Session;
use async_trait::async_trait;
use dmsync_core::{ReadState, ReceiptTransition};
use dmsync_types::{
    BulkReadReceipt, DmError, LiveEvent, MarkOutcome, Message, MessageId, Pair, Timestamp, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::warn;

/// In-memory message store.
///
/// Clones share rows and feed; each clone carries its own session. Events
/// are published while the row lock is held, so feed order is commit order.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
    session: Session,
}

#[derive(Debug)]
struct MemoryStoreInner {
    rows: BTreeMap<MessageId, Message>,
    next_id: MessageId,
    manual_clock: Option<Timestamp>,
    last_created: Timestamp,
    feed: ChangeFeed,
    feed_capacity: usize,
    faults: Faults,
    holds: Holds,
}

#[derive(Debug, Default)]
struct Faults {
    send: Option<String>,
    history: Option<String>,
    mark_read_bulk: Option<String>,
    mark_read_one: Option<String>,
    recent_per_peer: Option<String>,
    unread: Option<String>,
    subscribe: Option<String>,
}

/// Calls parked until the test releases them.
#[derive(Debug, Default)]
struct Holds {
    history: Option<(UserId, Arc<Notify>)>,
    mark_read_one: Option<(MessageId, Arc<Notify>)>,
}

impl MemoryStore {
    /// Create an empty store with an anonymous session.
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create an empty store whose subscribers lag after `capacity` frames.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                rows: BTreeMap::new(),
                next_id: MessageId::new(1),
                manual_clock: None,
                last_created: Timestamp::from_millis(0),
                feed: ChangeFeed::new(capacity),
                feed_capacity: capacity,
                faults: Faults::default(),
                holds: Holds::default(),
            })),
            session: Session::anonymous(),
        }
    }

    /// A handle on the same data acting for `session`.
    pub fn with_session(&self, session: Session) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            session,
        }
    }

    /// A handle on the same data verified as `user`.
    pub fn session_for(&self, user: UserId) -> Self {
        self.with_session(Session::verified(user))
    }

    /// Freeze the clock at `now`; later sends use it instead of wall time.
    pub fn set_clock(&self, now: Timestamp) {
        self.lock().manual_clock = Some(now);
    }

    /// Move the manual clock forward.
    pub fn advance_clock(&self, millis: i64) {
        let mut inner = self.lock();
        let now = inner.manual_clock.unwrap_or_else(Timestamp::now);
        inner.manual_clock = Some(Timestamp::from_millis(now.as_millis() + millis));
    }

    /// Every stored row, in id order.
    pub fn rows(&self) -> Vec<Message> {
        self.lock().rows.values().cloned().collect()
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().feed.subscriber_count()
    }

    /// Close the feed under every current subscriber.
    pub fn disconnect_subscribers(&self) {
        let mut inner = self.lock();
        inner.feed = ChangeFeed::new(inner.feed_capacity);
    }

    /// Cause the next send() to fail with a transient error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().faults.send = Some(error.to_string());
    }

    /// Cause the next history() to fail with a transient error.
    pub fn fail_next_history(&self, error: &str) {
        self.lock().faults.history = Some(error.to_string());
    }

    /// Cause the next mark_read_bulk() to fail with a transient error.
    pub fn fail_next_mark_read_bulk(&self, error: &str) {
        self.lock().faults.mark_read_bulk = Some(error.to_string());
    }

    /// Cause the next mark_read_one() to fail with a transient error.
    pub fn fail_next_mark_read_one(&self, error: &str) {
        self.lock().faults.mark_read_one = Some(error.to_string());
    }

    /// Cause the next recent_per_peer() to fail with a transient error.
    pub fn fail_next_recent_per_peer(&self, error: &str) {
        self.lock().faults.recent_per_peer = Some(error.to_string());
    }

    /// Cause the next unread_count() or unread_ids() to fail with a transient error.
    pub fn fail_next_unread(&self, error: &str) {
        self.lock().faults.unread = Some(error.to_string());
    }

    /// Cause the next subscribe() to fail with a transient error.
    pub fn fail_next_subscribe(&self, error: &str) {
        self.lock().faults.subscribe = Some(error.to_string());
    }

    /// Park the next history() involving `member` until the returned gate
    /// is notified.
    pub fn hold_next_history(&self, member: UserId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().holds.history = Some((member, Arc::clone(&gate)));
        gate
    }

    /// Park the next mark_read_one() of `message_id` until the returned gate
    /// is notified.
    pub fn hold_next_mark_read_one(&self, message_id: MessageId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().holds.mark_read_one = Some((message_id, Arc::clone(&gate)));
        gate
    }

    /// Holds set but not yet reached by a call.
    pub fn pending_holds(&self) -> usize {
        let inner = self.lock();
        usize::from(inner.holds.history.is_some())
            + usize::from(inner.holds.mark_read_one.is_some())
    }

    fn take_history_hold(&self, user_a: UserId, user_b: UserId) -> Option<Arc<Notify>> {
        let mut inner = self.lock();
        let held = inner
            .holds
            .history
            .as_ref()
            .is_some_and(|(member, _)| *member == user_a || *member == user_b);
        if held {
            inner.holds.history.take().map(|(_, gate)| gate)
        } else {
            None
        }
    }

    fn take_mark_hold(&self, message_id: MessageId) -> Option<Arc<Notify>> {
        let mut inner = self.lock();
        let held = inner
            .holds
            .mark_read_one
            .as_ref()
            .is_some_and(|(id, _)| *id == message_id);
        if held {
            inner.holds.mark_read_one.take().map(|(_, gate)| gate)
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn now(&self) -> Timestamp {
        self.manual_clock.unwrap_or_else(Timestamp::now)
    }

    /// Commit time that never runs backwards.
    fn next_created_at(&mut self) -> Timestamp {
        let now = self.now().max(self.last_created);
        self.last_created = now;
        now
    }

    fn publish(&self, event: LiveEvent) {
        if let Err(e) = self.feed.publish(&event) {
            warn!(error = %e, kind = event.kind(), "failed to publish live event");
        }
    }
}

fn injected(fault: &mut Option<String>) -> Result<(), DmError> {
    match fault.take() {
        Some(error) => Err(DmError::TransientNetwork(error)),
        None => Ok(()),
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    fn session(&self) -> &Session {
        &self.session
    }

    async fn send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, DmError> {
        self.session.require(sender_id)?;
        Message::validate_content(content)?;
        if sender_id == receiver_id {
            return Err(DmError::Validation(
                "cannot send a message to yourself".into(),
            ));
        }

        let mut inner = self.lock();
        injected(&mut inner.faults.send)?;

        let id = inner.next_id;
        inner.next_id = id.next();
        let message = Message {
            id,
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at: inner.next_created_at(),
            read_at: None,
        };
        inner.rows.insert(id, message.clone());
        inner.publish(LiveEvent::Created(message.clone()));
        Ok(message)
    }

    async fn history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<Message>, DmError> {
        self.session.require_any(&[user_a, user_b])?;
        if let Some(gate) = self.take_history_hold(user_a, user_b) {
            gate.notified().await;
        }
        let mut inner = self.lock();
        injected(&mut inner.faults.history)?;

        let pair = Pair::new(user_a, user_b);
        let mut rows: Vec<Message> = inner
            .rows
            .values()
            .filter(|m| m.pair() == pair)
            .cloned()
            .collect();
        rows.sort_by_key(Message::order_key);
        Ok(rows)
    }

    async fn mark_read_bulk(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
    ) -> Result<BulkReadReceipt, DmError> {
        self.session.require(receiver_id)?;
        let mut inner = self.lock();
        injected(&mut inner.faults.mark_read_bulk)?;

        let now = inner.now();
        let mut transitioned = Vec::new();
        for row in inner.rows.values_mut() {
            if row.sender_id != sender_id || row.receiver_id != receiver_id {
                continue;
            }
            let (state, transition) = ReadState::of(row).mark(now);
            if transition == ReceiptTransition::Applied {
                row.read_at = state.read_at();
                transitioned.push(row.clone());
            }
        }
        for row in &transitioned {
            inner.publish(LiveEvent::Updated(row.clone()));
        }
        Ok(BulkReadReceipt { transitioned })
    }

    async fn mark_read_one(
        &self,
        message_id: MessageId,
        expected_receiver_id: UserId,
    ) -> Result<MarkOutcome, DmError> {
        self.session.require(expected_receiver_id)?;
        if let Some(gate) = self.take_mark_hold(message_id) {
            gate.notified().await;
        }
        let mut inner = self.lock();
        injected(&mut inner.faults.mark_read_one)?;

        let now = inner.now();
        let row = inner
            .rows
            .get_mut(&message_id)
            .ok_or_else(|| DmError::NotFound(format!("message {}", message_id)))?;
        if row.receiver_id != expected_receiver_id {
            return if row.involves(expected_receiver_id) {
                Ok(MarkOutcome::NotAddressed(row.clone()))
            } else {
                Err(DmError::NotFound(format!("message {}", message_id)))
            };
        }

        let (state, transition) = ReadState::of(row).mark(now);
        match transition {
            ReceiptTransition::Applied => {
                row.read_at = state.read_at();
                let row = row.clone();
                inner.publish(LiveEvent::Updated(row.clone()));
                Ok(MarkOutcome::Transitioned(row))
            }
            ReceiptTransition::AlreadyRead => Ok(MarkOutcome::AlreadyRead(row.clone())),
        }
    }

    async fn recent_per_peer(&self, user: UserId) -> Result<Vec<Message>, DmError> {
        self.session.require(user)?;
        let mut inner = self.lock();
        injected(&mut inner.faults.recent_per_peer)?;

        let mut latest: HashMap<UserId, &Message> = HashMap::new();
        for row in inner.rows.values() {
            let Some(peer) = row.peer_of(user) else {
                continue;
            };
            let slot = latest.entry(peer).or_insert(row);
            if row.order_key() > slot.order_key() {
                *slot = row;
            }
        }
        let mut rows: Vec<Message> = latest.into_values().cloned().collect();
        rows.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
        Ok(rows)
    }

    async fn unread_count(&self, user: UserId) -> Result<u64, DmError> {
        Ok(self.unread_ids(user).await?.len() as u64)
    }

    async fn unread_ids(&self, user: UserId) -> Result<Vec<MessageId>, DmError> {
        self.session.require(user)?;
        let mut inner = self.lock();
        injected(&mut inner.faults.unread)?;

        Ok(inner
            .rows
            .values()
            .filter(|m| m.is_unread_for(user))
            .map(|m| m.id)
            .collect())
    }

    async fn subscribe(&self, user: UserId) -> Result<Subscription, DmError> {
        self.session.require(user)?;
        let mut inner = self.lock();
        injected(&mut inner.faults.subscribe)?;
        Ok(inner.feed.subscribe(user))
    }
}

/// In-memory profile directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryProfiles {
    inner: Arc<Mutex<MemoryProfilesInner>>,
}

#[derive(Debug, Default)]
struct MemoryProfilesInner {
    names: HashMap<UserId, String>,
    lookups: Vec<Vec<UserId>>,
    fail_next: Option<String>,
}

impl MemoryProfiles {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or rename a user.
    pub fn insert(&self, user: UserId, name: &str) {
        self.lock().names.insert(user, name.to_string());
    }

    /// Every batch of ids looked up so far.
    pub fn lookups(&self) -> Vec<Vec<UserId>> {
        self.lock().lookups.clone()
    }

    /// Cause the next lookup to fail with a transient error.
    pub fn fail_next_lookup(&self, error: &str) {
        self.lock().fail_next = Some(error.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, MemoryProfilesInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfiles {
    async fn display_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, DmError> {
        let mut inner = self.lock();
        injected(&mut inner.fail_next)?;
        inner.lookups.push(ids.to_vec());
        Ok(ids
            .iter()
            .filter_map(|id| inner.names.get(id).map(|name| (*id, name.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        store: MemoryStore,
        alice: UserId,
        bob: UserId,
    }

    fn two_users() -> Fixture {
        Fixture {
            store: MemoryStore::new(),
            alice: UserId::new(),
            bob: UserId::new(),
        }
    }

    // ===========================================
    // Send
    // ===========================================

    #[tokio::test]
    async fn send_assigns_ids_and_publishes() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        let mut feed = t.store.session_for(t.bob).subscribe(t.bob).await.unwrap();

        let m1 = alice.send(t.alice, t.bob, "hi").await.unwrap();
        let m2 = alice.send(t.alice, t.bob, "again").await.unwrap();

        assert!(m1.id < m2.id);
        assert!(m1.created_at <= m2.created_at);
        assert!(m1.read_at.is_none());
        assert_eq!(feed.next().await.unwrap(), LiveEvent::Created(m1));
        assert_eq!(feed.next().await.unwrap(), LiveEvent::Created(m2));
    }

    #[tokio::test]
    async fn send_rejects_blank_content() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        let result = alice.send(t.alice, t.bob, "   ").await;
        assert!(matches!(result, Err(DmError::Validation(_))));
        assert!(t.store.rows().is_empty());
    }

    #[tokio::test]
    async fn send_requires_sender_session() {
        let t = two_users();
        let anonymous = t.store.clone();
        assert!(matches!(
            anonymous.send(t.alice, t.bob, "hi").await,
            Err(DmError::Unauthenticated(_))
        ));

        let bob = t.store.session_for(t.bob);
        assert!(matches!(
            bob.send(t.alice, t.bob, "spoofed").await,
            Err(DmError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn send_to_self_is_rejected() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        assert!(matches!(
            alice.send(t.alice, t.alice, "note").await,
            Err(DmError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn injected_send_failure_is_transient() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        t.store.fail_next_send("connection reset");

        let err = alice.send(t.alice, t.bob, "hi").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(t.store.rows().is_empty());
        assert!(alice.send(t.alice, t.bob, "hi").await.is_ok());
    }

    // ===========================================
    // History and recent_per_peer
    // ===========================================

    #[tokio::test]
    async fn history_is_ordered_and_pair_scoped() {
        let t = two_users();
        let carol = UserId::new();
        let alice = t.store.session_for(t.alice);
        let bob = t.store.session_for(t.bob);
        t.store.set_clock(Timestamp::from_millis(1_000));

        alice.send(t.alice, t.bob, "one").await.unwrap();
        alice.send(t.alice, carol, "elsewhere").await.unwrap();
        t.store.advance_clock(5);
        bob.send(t.bob, t.alice, "two").await.unwrap();

        let history = alice.history(t.bob, t.alice).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn history_requires_membership() {
        let t = two_users();
        let outsider = t.store.session_for(UserId::new());
        assert!(matches!(
            outsider.history(t.alice, t.bob).await,
            Err(DmError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn clock_never_runs_backwards() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        t.store.set_clock(Timestamp::from_millis(5_000));
        let first = alice.send(t.alice, t.bob, "a").await.unwrap();
        t.store.set_clock(Timestamp::from_millis(1_000));
        let second = alice.send(t.alice, t.bob, "b").await.unwrap();
        assert!(second.order_key() > first.order_key());
    }

    #[tokio::test]
    async fn recent_per_peer_keeps_latest_per_pair() {
        let t = two_users();
        let carol = UserId::new();
        let alice = t.store.session_for(t.alice);
        let bob = t.store.session_for(t.bob);
        let carol_handle = t.store.session_for(carol);

        alice.send(t.alice, t.bob, "old").await.unwrap();
        let latest_carol = carol_handle.send(carol, t.alice, "hey").await.unwrap();
        let latest_bob = bob.send(t.bob, t.alice, "new").await.unwrap();

        let recent = alice.recent_per_peer(t.alice).await.unwrap();
        assert_eq!(recent, vec![latest_bob, latest_carol]);
    }

    // ===========================================
    // Read marking
    // ===========================================

    #[tokio::test]
    async fn bulk_marks_only_unread_from_sender() {
        let t = two_users();
        let carol = UserId::new();
        let alice = t.store.session_for(t.alice);
        let bob = t.store.session_for(t.bob);
        let carol_handle = t.store.session_for(carol);

        bob.send(t.bob, t.alice, "1").await.unwrap();
        bob.send(t.bob, t.alice, "2").await.unwrap();
        carol_handle.send(carol, t.alice, "c").await.unwrap();
        alice.send(t.alice, t.bob, "mine").await.unwrap();

        let receipt = alice.mark_read_bulk(t.alice, t.bob).await.unwrap();
        assert_eq!(receipt.count(), 2);
        assert_eq!(alice.unread_count(t.alice).await.unwrap(), 1);

        let again = alice.mark_read_bulk(t.alice, t.bob).await.unwrap();
        assert_eq!(again.count(), 0);
    }

    #[tokio::test]
    async fn bulk_requires_receiver_session() {
        let t = two_users();
        let bob = t.store.session_for(t.bob);
        assert!(matches!(
            bob.mark_read_bulk(t.alice, t.bob).await,
            Err(DmError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn mark_one_is_idempotent() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        let bob = t.store.session_for(t.bob);
        let m = bob.send(t.bob, t.alice, "hi").await.unwrap();

        let first = alice.mark_read_one(m.id, t.alice).await.unwrap();
        assert!(first.transitioned());
        let read_at = first.message().read_at;
        assert!(read_at.is_some());

        let second = alice.mark_read_one(m.id, t.alice).await.unwrap();
        assert!(!second.transitioned());
        assert_eq!(second.message().read_at, read_at);
    }

    #[tokio::test]
    async fn mark_one_by_sender_is_noop() {
        let t = two_users();
        let bob = t.store.session_for(t.bob);
        let m = bob.send(t.bob, t.alice, "hi").await.unwrap();

        let outcome = bob.mark_read_one(m.id, t.bob).await.unwrap();
        assert!(matches!(outcome, MarkOutcome::NotAddressed(_)));
        assert!(!outcome.transitioned());
        assert!(t.store.rows()[0].read_at.is_none());
    }

    #[tokio::test]
    async fn mark_one_hides_foreign_rows() {
        let t = two_users();
        let bob = t.store.session_for(t.bob);
        let m = bob.send(t.bob, t.alice, "hi").await.unwrap();

        let carol = UserId::new();
        assert!(matches!(
            t.store.session_for(carol).mark_read_one(m.id, carol).await,
            Err(DmError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mark_one_for_someone_else_is_unauthenticated() {
        let t = two_users();
        let bob = t.store.session_for(t.bob);
        let m = bob.send(t.bob, t.alice, "hi").await.unwrap();

        assert!(matches!(
            bob.mark_read_one(m.id, t.alice).await,
            Err(DmError::Unauthenticated(_))
        ));
        assert!(t.store.rows()[0].read_at.is_none());
    }

    #[tokio::test]
    async fn mark_one_unknown_id_is_not_found() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        assert!(matches!(
            alice.mark_read_one(MessageId::new(99), t.alice).await,
            Err(DmError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn marks_publish_updates_once() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        let bob = t.store.session_for(t.bob);
        let m = bob.send(t.bob, t.alice, "hi").await.unwrap();
        let mut feed = alice.subscribe(t.alice).await.unwrap();

        alice.mark_read_bulk(t.alice, t.bob).await.unwrap();
        alice.mark_read_one(m.id, t.alice).await.unwrap();

        let event = feed.next().await.unwrap();
        assert!(matches!(event, LiveEvent::Updated(ref row) if row.id == m.id));
        assert!(feed.try_next().is_none());
    }

    // ===========================================
    // Feed
    // ===========================================

    #[tokio::test]
    async fn disconnect_makes_subscribers_stale() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        let mut feed = alice.subscribe(t.alice).await.unwrap();
        assert_eq!(t.store.subscriber_count(), 1);

        t.store.disconnect_subscribers();
        assert!(feed.next().await.unwrap_err().requires_resync());
        assert_eq!(t.store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_requires_own_session() {
        let t = two_users();
        let bob = t.store.session_for(t.bob);
        assert!(bob.subscribe(t.alice).await.is_err());

        t.store.fail_next_subscribe("refused");
        assert!(bob.subscribe(t.bob).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn held_history_waits_for_release() {
        let t = two_users();
        let alice = t.store.session_for(t.alice);
        alice.send(t.alice, t.bob, "hi").await.unwrap();
        let gate = t.store.hold_next_history(t.bob);
        assert_eq!(t.store.pending_holds(), 1);

        let reader = t.store.session_for(t.bob);
        let (alice_id, bob_id) = (t.alice, t.bob);
        let pending = tokio::spawn(async move { reader.history(alice_id, bob_id).await });
        while t.store.pending_holds() > 0 {
            tokio::task::yield_now().await;
        }

        // Commits made while the call is parked are visible once released.
        alice.send(t.alice, t.bob, "while held").await.unwrap();
        assert!(!pending.is_finished());
        gate.notify_one();
        assert_eq!(pending.await.unwrap().unwrap().len(), 2);

        // Only the next call is held.
        assert_eq!(alice.history(t.alice, t.bob).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn held_mark_applies_after_release() {
        let t = two_users();
        let sent = t
            .store
            .session_for(t.alice)
            .send(t.alice, t.bob, "hi")
            .await
            .unwrap();
        let gate = t.store.hold_next_mark_read_one(sent.id);
        gate.notify_one();

        let outcome = t
            .store
            .session_for(t.bob)
            .mark_read_one(sent.id, t.bob)
            .await
            .unwrap();
        assert!(outcome.transitioned());
        assert_eq!(t.store.pending_holds(), 0);
    }

    // ===========================================
    // Profiles
    // ===========================================

    #[tokio::test]
    async fn profiles_resolve_known_ids_in_one_batch() {
        let profiles = MemoryProfiles::new();
        let known = UserId::new();
        let unknown = UserId::new();
        profiles.insert(known, "Kim");

        let names = profiles.display_names(&[known, unknown]).await.unwrap();
        assert_eq!(names.get(&known).map(String::as_str), Some("Kim"));
        assert!(!names.contains_key(&unknown));
        assert_eq!(profiles.lookups(), vec![vec![known, unknown]]);
    }
}
