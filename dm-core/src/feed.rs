//! Live feed state machine for dmsync.
//!
//! This module provides a pure, side-effect-free state machine for the
//! change-feed subscription that backs every mounted view. It takes events
//! as input and produces a new state plus a list of actions to execute.
//!
//! The actual I/O (subscribing, re-pulling views) is performed by
//! dmsync-client, not by this module.

use std::time::Duration;

/// Feed subscription state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    /// No view is mounted; no subscription.
    Idle,
    /// Subscription request in flight.
    Subscribing {
        /// Failed attempts since the feed was last live.
        attempt: u32,
        /// Whether mounted views must be re-pulled once subscribed.
        resync: bool,
    },
    /// Subscribed; open views are being re-pulled from the store.
    Resyncing,
    /// Subscribed and every mounted view is current.
    Live,
    /// Subscription failed, waiting to retry.
    Reconnecting {
        /// Number of failed attempts so far.
        attempt: u32,
    },
}

impl FeedState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (dmsync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: FeedEvent, backoff: &Backoff) -> (Self, Vec<FeedAction>) {
        match (self, event) {
            // From Idle
            (Self::Idle, FeedEvent::ViewsMounted) => (
                Self::Subscribing {
                    attempt: 0,
                    resync: false,
                },
                vec![FeedAction::Subscribe],
            ),

            // From Subscribing
            (Self::Subscribing { resync: false, .. }, FeedEvent::Subscribed) => {
                (Self::Live, vec![FeedAction::Emit(FeedNotice::Live)])
            }
            (Self::Subscribing { resync: true, .. }, FeedEvent::Subscribed) => {
                (Self::Resyncing, vec![FeedAction::ResyncViews])
            }
            (Self::Subscribing { attempt, .. }, FeedEvent::SubscribeFailed { error }) => {
                let next_attempt = attempt.saturating_add(1);
                (
                    Self::Reconnecting {
                        attempt: next_attempt,
                    },
                    vec![
                        FeedAction::Emit(FeedNotice::ReconnectFailed {
                            attempt: next_attempt,
                            error,
                        }),
                        FeedAction::StartReconnectTimer {
                            delay: backoff.delay(next_attempt),
                        },
                    ],
                )
            }

            // From Resyncing
            (Self::Resyncing, FeedEvent::ResyncCompleted) => {
                (Self::Live, vec![FeedAction::Emit(FeedNotice::Live)])
            }
            (Self::Resyncing, FeedEvent::ResyncFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    FeedAction::Unsubscribe,
                    FeedAction::Emit(FeedNotice::ReconnectFailed { attempt: 1, error }),
                    FeedAction::StartReconnectTimer {
                        delay: backoff.delay(1),
                    },
                ],
            ),

            // Lag or disconnect: resubscribe first, then re-pull
            (Self::Live | Self::Resyncing, FeedEvent::StreamLost { reason }) => (
                Self::Subscribing {
                    attempt: 0,
                    resync: true,
                },
                vec![
                    FeedAction::Emit(FeedNotice::Lost { reason }),
                    FeedAction::Subscribe,
                ],
            ),

            // From Reconnecting
            (Self::Reconnecting { attempt }, FeedEvent::ReconnectTimer) => (
                Self::Subscribing {
                    attempt,
                    resync: true,
                },
                vec![FeedAction::Subscribe],
            ),

            // Last view unmounted
            (Self::Reconnecting { .. }, FeedEvent::ViewsUnmounted) => {
                (Self::Idle, vec![FeedAction::CancelReconnect])
            }
            (
                Self::Subscribing { .. } | Self::Resyncing | Self::Live,
                FeedEvent::ViewsUnmounted,
            ) => (Self::Idle, vec![FeedAction::Unsubscribe]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if events are currently flowing.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Live | Self::Resyncing)
    }

    /// Check if a (re)subscription is pending.
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Subscribing { .. } | Self::Reconnecting { .. })
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the feed lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The first view was mounted.
    ViewsMounted,
    /// The last view was unmounted.
    ViewsUnmounted,
    /// The store accepted the subscription.
    Subscribed,
    /// The store rejected or failed the subscription.
    SubscribeFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The subscription lagged or closed.
    StreamLost {
        /// Reason reported by the subscription.
        reason: String,
    },
    /// Mounted views were re-pulled.
    ResyncCompleted,
    /// Re-pulling a view failed after retries.
    ResyncFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the dmsync-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedAction {
    /// Open a new subscription (dropping any previous one).
    Subscribe,
    /// Drop the current subscription.
    Unsubscribe,
    /// Re-pull every mounted view from the store.
    ResyncViews,
    /// Start a timer for resubscribing.
    StartReconnectTimer {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Report a lifecycle change.
    Emit(FeedNotice),
}

/// Lifecycle notices for logs and status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedNotice {
    /// Events are flowing and views are current.
    Live,
    /// The subscription was lost.
    Lost {
        /// Reason reported by the subscription.
        reason: String,
    },
    /// A resubscription attempt failed.
    ReconnectFailed {
        /// Which attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
}

/// Exponential backoff with jitter.
///
/// Formula: min(cap, base * 2^(attempt - 1)) + random(0..=jitter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay for the first retry.
    pub base: Duration,
    /// Upper bound before jitter.
    pub cap: Duration,
    /// Maximum random jitter added to every delay.
    pub jitter: Duration,
}

impl Backoff {
    /// Build a backoff with jitter equal to `base`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: base,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.base.saturating_mul(1u32 << exponent).min(self.cap);
        scaled + random_jitter(self.jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10))
    }
}

/// Random duration in `0..=max`, or zero if the OS RNG is unavailable.
fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1))
}
