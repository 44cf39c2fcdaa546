//! MessagingClient - the main interface for dmsync.
//!
//! This module provides [`MessagingClient`], the API applications use to
//! mount live views over a [`MessageStore`]: the inbox, one open thread and
//! the unread badge.
//!
//! # Architecture
//!
//! MessagingClient keeps pure projections (from dmsync-core) behind one lock
//! and drives the change-feed state machine, interpreting its actions as
//! real subscribe / re-pull / back-off I/O.
//!
//! ```text
//! Application → MessagingClient → MessageStore → change feed
//!                   ↓                              ↓
//!              dmsync-core projections  ←  dispatcher
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dmsync_client::{ClientConfig, MemoryProfiles, MemoryStore, MessagingClient};
//!
//! let store = MemoryStore::new().session_for(me);
//! let client = MessagingClient::new(store, MemoryProfiles::new(), ClientConfig::default())?;
//!
//! let mut inbox = client.open_inbox(me).await?;
//! let thread = client.open_thread(me, peer).await?;
//! client.send_message(peer, "hi").await?;
//! let rows = inbox.changed().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dmsync_core::{
    Backoff, FeedAction, FeedEvent, FeedNotice, FeedState, MarkRequest, ReceiptTrigger, ThreadTag,
};
use dmsync_types::{ConversationSummary, DmError, LiveEvent, Message, UserId};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{BadgeView, FollowUp, InboxView, ThreadView, Views};
use crate::store::{MessageStore, ProfileDirectory, Subscription};
use crate::view::{LiveView, ThreadSnapshot};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The store rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] DmError),

    /// The operation needs a view that is not open.
    #[error("not mounted: {0}")]
    NotMounted(&'static str),

    /// A newer request replaced this one before it completed.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl ClientError {
    /// The underlying store error, if any.
    pub fn store_error(&self) -> Option<&DmError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Configuration for MessagingClient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Retries for reads failing with a transient error.
    pub read_retries: u32,
    /// First retry delay; doubles per attempt.
    pub retry_base: Duration,
    /// Upper bound on any retry or resubscribe delay.
    pub feed_backoff_cap: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_retries: 3,
            retry_base: Duration::from_millis(100),
            feed_backoff_cap: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Set the number of read retries.
    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    /// Set the first retry delay.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Set the backoff cap.
    pub fn with_feed_backoff_cap(mut self, cap: Duration) -> Self {
        self.feed_backoff_cap = cap;
        self
    }

    /// The backoff schedule shared by read retries and resubscription.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.retry_base, self.feed_backoff_cap)
    }
}

/// The main messaging client.
///
/// Bound to the store session's user. Views share one feed subscription,
/// opened with the first view and closed with the last.
pub struct MessagingClient<S: MessageStore + 'static, P: ProfileDirectory + 'static> {
    shared: Arc<Shared<S, P>>,
}

struct Shared<S: MessageStore + 'static, P: ProfileDirectory + 'static> {
    store: S,
    profiles: P,
    config: ClientConfig,
    backoff: Backoff,
    me: UserId,
    // Lock order: feed, then views.
    feed: Mutex<FeedControl>,
    views: Mutex<Views>,
}

#[derive(Default)]
struct FeedControl {
    state: FeedState,
    driver: Option<JoinHandle<()>>,
}

impl FeedControl {
    fn apply(&mut self, event: FeedEvent, backoff: &Backoff) -> Vec<FeedAction> {
        let state = std::mem::take(&mut self.state);
        let (next, actions) = state.on_event(event, backoff);
        self.state = next;
        for action in &actions {
            if let FeedAction::Emit(notice) = action {
                log_notice(notice);
            }
        }
        actions
    }

    fn stop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

fn log_notice(notice: &FeedNotice) {
    match notice {
        FeedNotice::Live => info!("live feed is current"),
        FeedNotice::Lost { reason } => warn!(%reason, "live feed lost, resubscribing"),
        FeedNotice::ReconnectFailed { attempt, error } => {
            warn!(attempt, %error, "live feed resubscribe failed")
        }
    }
}

fn reconnect_delay(actions: &[FeedAction]) -> Option<Duration> {
    actions.iter().find_map(|action| match action {
        FeedAction::StartReconnectTimer { delay } => Some(*delay),
        _ => None,
    })
}

impl<S: MessageStore + 'static, P: ProfileDirectory + 'static> MessagingClient<S, P> {
    /// Create a client for the store session's user.
    pub fn new(store: S, profiles: P, config: ClientConfig) -> Result<Self, ClientError> {
        let me = store.session().require_user()?;
        let backoff = config.backoff();
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                profiles,
                config,
                backoff,
                me,
                feed: Mutex::new(FeedControl::default()),
                views: Mutex::new(Views::default()),
            }),
        })
    }

    /// The user this client acts for.
    pub fn user_id(&self) -> UserId {
        self.shared.me
    }

    /// Get a reference to the store (for testing).
    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// Current state of the live feed.
    pub async fn feed_state(&self) -> FeedState {
        self.shared.feed.lock().await.state.clone()
    }

    /// Mount the inbox: one row per peer, most recent conversation first.
    pub async fn open_inbox(
        &self,
        user_id: UserId,
    ) -> Result<LiveView<Vec<ConversationSummary>>, ClientError> {
        self.ensure_self(user_id)?;
        let view = {
            let mut views = self.shared.views.lock().await;
            if let Some(inbox) = &views.inbox {
                return Ok(inbox.view());
            }
            let inbox = InboxView::new(self.shared.me);
            let view = inbox.view();
            views.inbox = Some(inbox);
            view
        };

        self.shared.mount().await;
        if let Err(e) = self.shared.load_inbox().await {
            self.shared.views.lock().await.inbox = None;
            self.shared.unmount_if_idle().await;
            return Err(e.into());
        }
        Ok(view)
    }

    /// Unmount the inbox.
    pub async fn close_inbox(&self) {
        self.shared.views.lock().await.inbox = None;
        self.shared.unmount_if_idle().await;
    }

    /// Open the thread with `peer_id`, replacing any open thread.
    ///
    /// History and the bulk read-marking run together; the new `read_at`
    /// values arrive through the live feed.
    pub async fn open_thread(
        &self,
        user_id: UserId,
        peer_id: UserId,
    ) -> Result<LiveView<ThreadSnapshot>, ClientError> {
        self.ensure_self(user_id)?;
        if peer_id == self.shared.me {
            return Err(DmError::Validation("cannot open a thread with yourself".into()).into());
        }

        let (tag, view) = {
            let mut views = self.shared.views.lock().await;
            views.generation += 1;
            let tag = ThreadTag {
                peer: peer_id,
                generation: views.generation,
            };
            let thread = ThreadView::new(self.shared.me, tag);
            let view = thread.view();
            views.thread = Some(thread);
            (tag, view)
        };
        info!(peer = %peer_id, generation = tag.generation, "opening thread");

        self.shared.mount().await;
        match self.shared.load_thread(tag).await {
            Ok(()) => Ok(view),
            Err(ClientError::Cancelled(reason)) => Err(ClientError::Cancelled(reason)),
            Err(e) => {
                {
                    let mut views = self.shared.views.lock().await;
                    if views.open_thread_tag() == Some(tag) {
                        views.thread = None;
                    }
                }
                self.shared.unmount_if_idle().await;
                Err(e)
            }
        }
    }

    /// Close the open thread. Responses still in flight for it are dropped.
    pub async fn close_thread(&self) {
        let closed = self.shared.views.lock().await.thread.take();
        if let Some(thread) = closed {
            info!(peer = %thread.projection.peer(), "closed thread");
        }
        self.shared.unmount_if_idle().await;
    }

    /// Mount the unread badge.
    pub async fn unread_badge(&self, user_id: UserId) -> Result<LiveView<u64>, ClientError> {
        self.ensure_self(user_id)?;
        let view = {
            let mut views = self.shared.views.lock().await;
            if let Some(badge) = &views.badge {
                return Ok(badge.view());
            }
            let badge = BadgeView::new(self.shared.me);
            let view = badge.view();
            views.badge = Some(badge);
            view
        };

        self.shared.mount().await;
        if let Err(e) = self.shared.reload_badge().await {
            self.shared.views.lock().await.badge = None;
            self.shared.unmount_if_idle().await;
            return Err(e.into());
        }
        Ok(view)
    }

    /// Unmount the unread badge.
    pub async fn close_badge(&self) {
        self.shared.views.lock().await.badge = None;
        self.shared.unmount_if_idle().await;
    }

    /// Send a message to `peer_id`.
    ///
    /// Never retried. The message reaches open views only through the
    /// live feed.
    pub async fn send_message(&self, peer_id: UserId, content: &str) -> Result<Message, ClientError> {
        let message = self
            .shared
            .store
            .send(self.shared.me, peer_id, content)
            .await?;
        info!(message_id = %message.id, peer = %peer_id, "sent message");
        Ok(message)
    }

    /// Re-pull every mounted view from the store.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        if self.shared.views.lock().await.is_empty() {
            return Err(ClientError::NotMounted("no view is open"));
        }
        self.shared.resync_views().await
    }

    fn ensure_self(&self, user_id: UserId) -> Result<(), ClientError> {
        if user_id == self.shared.me {
            Ok(())
        } else {
            Err(DmError::Unauthenticated(format!("client is not bound to {}", user_id)).into())
        }
    }
}

impl<S: MessageStore + 'static, P: ProfileDirectory + 'static> Drop for MessagingClient<S, P> {
    fn drop(&mut self) {
        match self.shared.feed.try_lock() {
            Ok(mut feed) => feed.stop(),
            Err(_) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let shared = Arc::clone(&self.shared);
                    handle.spawn(async move { shared.feed.lock().await.stop() });
                }
            }
        }
    }
}

impl<S: MessageStore + 'static, P: ProfileDirectory + 'static> Shared<S, P> {
    /// Open the feed subscription if no view had it open.
    async fn mount(self: &Arc<Self>) {
        let mut feed = self.feed.lock().await;
        if !matches!(feed.state, FeedState::Idle) {
            return;
        }
        let actions = feed.apply(FeedEvent::ViewsMounted, &self.backoff);
        if !actions.contains(&FeedAction::Subscribe) {
            return;
        }

        let (subscription, delay) = match self.store.subscribe(self.me).await {
            Ok(subscription) => {
                feed.apply(FeedEvent::Subscribed, &self.backoff);
                (Some(subscription), None)
            }
            Err(e) => {
                error!(error = %e, "live feed subscribe failed");
                let actions = feed.apply(
                    FeedEvent::SubscribeFailed {
                        error: e.to_string(),
                    },
                    &self.backoff,
                );
                (None, reconnect_delay(&actions))
            }
        };
        feed.driver = Some(tokio::spawn(Arc::clone(self).drive_feed(subscription, delay)));
    }

    /// Close the feed subscription once no view is left.
    async fn unmount_if_idle(&self) {
        let mut feed = self.feed.lock().await;
        if !self.views.lock().await.is_empty() {
            return;
        }
        feed.apply(FeedEvent::ViewsUnmounted, &self.backoff);
        feed.stop();
    }

    async fn feed_event(&self, event: FeedEvent) -> Vec<FeedAction> {
        self.feed.lock().await.apply(event, &self.backoff)
    }

    /// Pump the subscription into the views; resubscribe and re-pull on loss.
    async fn drive_feed(
        self: Arc<Self>,
        mut subscription: Option<Subscription>,
        mut delay: Option<Duration>,
    ) {
        loop {
            let mut live = match subscription.take() {
                Some(live) => live,
                None => {
                    if let Some(delay) = delay.take() {
                        tokio::time::sleep(delay).await;
                        self.feed_event(FeedEvent::ReconnectTimer).await;
                    }
                    match self.resubscribe().await {
                        Ok(live) => live,
                        Err(actions) => match reconnect_delay(&actions) {
                            Some(next) => {
                                delay = Some(next);
                                continue;
                            }
                            None => return,
                        },
                    }
                }
            };

            let reason = loop {
                match live.next().await {
                    Ok(event) => self.dispatch(&event).await,
                    Err(e) => break e.to_string(),
                }
            };
            drop(live);
            self.feed_event(FeedEvent::StreamLost { reason }).await;
        }
    }

    /// Subscribe and, if the state machine asks for it, re-pull every view.
    ///
    /// On failure returns the actions of the failure transition.
    async fn resubscribe(&self) -> Result<Subscription, Vec<FeedAction>> {
        let live = match self.store.subscribe(self.me).await {
            Ok(live) => live,
            Err(e) => {
                return Err(self
                    .feed_event(FeedEvent::SubscribeFailed {
                        error: e.to_string(),
                    })
                    .await)
            }
        };
        let actions = self.feed_event(FeedEvent::Subscribed).await;
        if actions.contains(&FeedAction::ResyncViews) {
            if let Err(e) = self.resync_views().await {
                error!(error = %e, "re-pulling views failed");
                return Err(self
                    .feed_event(FeedEvent::ResyncFailed {
                        error: e.to_string(),
                    })
                    .await);
            }
            self.feed_event(FeedEvent::ResyncCompleted).await;
        }
        Ok(live)
    }

    async fn dispatch(self: &Arc<Self>, event: &LiveEvent) {
        let follow_ups = self.views.lock().await.route(event);
        for follow_up in follow_ups {
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.run_follow_up(follow_up).await });
        }
    }

    async fn run_follow_up(&self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::MarkOne(request) => self.mark_arrival(request).await,
            FollowUp::ResolveInboxNames(peers) => self.resolve_inbox_names(peers).await,
        }
    }

    async fn resync_views(&self) -> Result<(), ClientError> {
        let (inbox, thread, badge) = {
            let views = self.views.lock().await;
            (
                views.inbox.is_some(),
                views.open_thread_tag(),
                views.badge.is_some(),
            )
        };
        info!(inbox, thread = thread.is_some(), badge, "re-pulling views");

        if inbox {
            self.load_inbox().await?;
        }
        if let Some(tag) = thread {
            match self.load_thread(tag).await {
                Ok(()) | Err(ClientError::Cancelled(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if badge {
            self.reload_badge().await?;
        }
        Ok(())
    }

    async fn load_inbox(&self) -> Result<(), DmError> {
        let recent = self
            .read_with_retry("recent_per_peer", || self.store.recent_per_peer(self.me))
            .await?;
        let peers = {
            let mut views = self.views.lock().await;
            let Some(inbox) = views.inbox.as_mut() else {
                return Ok(());
            };
            inbox.projection.forget_name_requests();
            inbox.projection.seed(recent);
            inbox.publish();
            inbox.projection.take_unresolved_peers()
        };
        self.resolve_inbox_names(peers).await;
        Ok(())
    }

    async fn resolve_inbox_names(&self, peers: Vec<UserId>) {
        if peers.is_empty() {
            return;
        }
        let names = self
            .read_with_retry("display_names", || self.profiles.display_names(&peers))
            .await;

        let mut views = self.views.lock().await;
        let Some(inbox) = views.inbox.as_mut() else {
            return;
        };
        match names {
            Ok(names) => {
                if inbox.projection.set_display_names(names) {
                    inbox.publish();
                }
            }
            Err(e) => {
                warn!(error = %e, peers = peers.len(), "display name lookup failed");
                inbox.projection.forget_name_requests();
            }
        }
    }

    /// Pull history, names and the bulk read-marking for `tag` together.
    async fn load_thread(&self, tag: ThreadTag) -> Result<(), ClientError> {
        let request = MarkRequest::opened(tag);
        let members = [self.me, tag.peer];
        let (history, bulk, names) = tokio::join!(
            self.read_with_retry("history", || self.store.history(self.me, tag.peer)),
            self.store.mark_read_bulk(self.me, tag.peer),
            self.read_with_retry("display_names", || self.profiles.display_names(&members)),
        );

        let (bulk_failed, due) = {
            let mut views = self.views.lock().await;
            let bulk_failed = match &bulk {
                Ok(receipt) => {
                    debug!(peer = %tag.peer, transitioned = receipt.count(), "bulk read receipt");
                    if let Some(badge) = views.badge.as_mut() {
                        if badge.counter.confirm_read(&receipt.transitioned) {
                            badge.publish();
                        }
                    }
                    false
                }
                Err(e) => {
                    error!(peer = %tag.peer, error = %e, "bulk read-marking failed");
                    true
                }
            };

            if !request.is_current(views.open_thread_tag()) {
                warn!(peer = %tag.peer, generation = tag.generation, "dropping stale thread load");
                return Err(ClientError::Cancelled(format!(
                    "thread with {} was replaced",
                    tag.peer
                )));
            }
            let rows = history?;
            let mut due = Vec::new();
            if let Some(thread) = views.thread.as_mut() {
                thread.projection.load_history(rows);
                match names {
                    Ok(names) => {
                        thread.projection.set_display_names(names);
                    }
                    Err(e) => warn!(error = %e, "thread display name lookup failed"),
                }
                // Rows the bulk mark missed were committed after it ran.
                if let Ok(receipt) = &bulk {
                    due = thread
                        .projection
                        .claim_receipts()
                        .into_iter()
                        .filter(|id| !receipt.transitioned.iter().any(|m| m.id == *id))
                        .map(|id| MarkRequest::arrived(tag, id))
                        .collect();
                }
                thread.publish();
            }
            (bulk_failed, due)
        };

        // The outcome of a failed mark is unknown; re-derive the count.
        if bulk_failed {
            if let Err(e) = self.reload_badge().await {
                error!(error = %e, "unread badge reload failed");
            }
        }
        for arrival in due {
            debug!(peer = %tag.peer, "marking message committed after bulk read");
            self.mark_arrival(arrival).await;
        }
        Ok(())
    }

    async fn mark_arrival(&self, request: MarkRequest) {
        let ReceiptTrigger::ArrivedWhileOpen { message_id } = request.trigger else {
            return;
        };
        let result = self.store.mark_read_one(message_id, self.me).await;

        let mut views = self.views.lock().await;
        let current = request.is_current(views.open_thread_tag());
        match result {
            Ok(outcome) => {
                debug!(
                    message_id = %message_id,
                    transitioned = outcome.transitioned(),
                    "read receipt"
                );
                if let Some(badge) = views.badge.as_mut() {
                    if badge.counter.confirm_read([outcome.message()]) {
                        badge.publish();
                    }
                }
                match views.thread.as_mut() {
                    Some(thread) if current => {
                        let change = thread.projection.apply_confirmed(outcome.message().clone());
                        if change.is_visible() {
                            thread.publish();
                        }
                    }
                    _ => warn!(message_id = %message_id, "dropping stale read receipt"),
                }
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "read receipt failed");
                if let (true, Some(thread)) = (current, views.thread.as_mut()) {
                    thread.projection.release_receipt(message_id);
                }
                drop(views);
                if let Err(e) = self.reload_badge().await {
                    error!(error = %e, "unread badge reload failed");
                }
            }
        }
    }

    /// Re-seed the badge from an unread snapshot.
    async fn reload_badge(&self) -> Result<(), DmError> {
        let token = {
            let mut views = self.views.lock().await;
            let Some(badge) = views.badge.as_mut() else {
                return Ok(());
            };
            badge.counter.begin_resync();
            badge.reload += 1;
            badge.reload
        };

        let ids = self
            .read_with_retry("unread_ids", || self.store.unread_ids(self.me))
            .await?;

        let mut views = self.views.lock().await;
        if let Some(badge) = views.badge.as_mut() {
            if badge.reload == token {
                badge.counter.seed(ids);
                badge.publish();
            }
        }
        Ok(())
    }

    async fn read_with_retry<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, DmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DmError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.read_retries => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt);
                    warn!(operation, attempt, error = %e, ?delay, "read failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
