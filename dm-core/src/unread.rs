//! Unread counter for the badge.
//!
//! The counter is the set of ids of unread incoming messages, so its value is
//! never negative and a read confirmed twice (own mark call plus another
//! tab's update event) only removes once. Ids confirmed read are retired, so
//! a creation event delivered twice does not count them again.
//!
//! While the snapshot query is in flight, events and confirmations are
//! buffered and replayed on top of the snapshot. Because the subscription is
//! opened before the query, every change committed after the snapshot is in
//! that backlog or still to come.

use std::collections::BTreeSet;

use dmsync_types::{LiveEvent, Message, MessageId, UserId};

/// Retired ids kept once no snapshot bounds them.
const RETIRED_CAP: usize = 4096;

#[derive(Debug, Clone)]
enum Pending {
    Event { event: LiveEvent, suppress: bool },
    Confirmed(Vec<MessageId>),
}

#[derive(Debug, Clone)]
enum Phase {
    Loading { backlog: Vec<Pending> },
    Ready,
}

/// Live count of unread incoming messages for one user.
#[derive(Debug, Clone)]
pub struct UnreadCounter {
    me: UserId,
    unread: BTreeSet<MessageId>,
    retired: BTreeSet<MessageId>,
    phase: Phase,
}

impl UnreadCounter {
    /// Create a counter waiting for its first snapshot.
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            unread: BTreeSet::new(),
            retired: BTreeSet::new(),
            phase: Phase::Loading {
                backlog: Vec::new(),
            },
        }
    }

    /// The user being counted for.
    pub fn me(&self) -> UserId {
        self.me
    }

    /// Current count.
    pub fn count(&self) -> u64 {
        self.unread.len() as u64
    }

    /// Whether a snapshot has been applied.
    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready)
    }

    /// Whether `id` is currently counted.
    pub fn contains(&self, id: MessageId) -> bool {
        self.unread.contains(&id)
    }

    /// Apply a snapshot of unread ids and replay anything buffered.
    ///
    /// Retired ids older than every id in the snapshot are dropped. They were
    /// read before the snapshot, so a creation event still in the feed for
    /// one is followed by its update.
    pub fn seed(&mut self, ids: Vec<MessageId>) {
        if let Some(oldest) = ids.iter().min().copied() {
            self.retired = self.retired.split_off(&oldest);
        }
        self.unread = ids.into_iter().filter(|id| !self.retired.contains(id)).collect();
        let backlog = match std::mem::replace(&mut self.phase, Phase::Ready) {
            Phase::Loading { backlog } => backlog,
            Phase::Ready => Vec::new(),
        };
        for pending in backlog {
            match pending {
                Pending::Event { event, suppress } => {
                    self.observe(&event, suppress);
                }
                Pending::Confirmed(ids) => self.remove_ids(ids),
            }
        }
    }

    /// Start buffering again ahead of a fresh snapshot.
    pub fn begin_resync(&mut self) {
        self.phase = Phase::Loading {
            backlog: Vec::new(),
        };
    }

    /// Apply a live event. Returns whether the count changed.
    ///
    /// `suppress` is set when the thread with the sender is open: the
    /// message is being marked read on arrival and must not bump the badge.
    pub fn observe(&mut self, event: &LiveEvent, suppress: bool) -> bool {
        if let Phase::Loading { backlog } = &mut self.phase {
            backlog.push(Pending::Event {
                event: event.clone(),
                suppress,
            });
            return false;
        }

        let message = event.message();
        if message.receiver_id != self.me {
            return false;
        }
        match event {
            LiveEvent::Created(_) if message.read_at.is_none() && !suppress => {
                !self.retired.contains(&message.id) && self.unread.insert(message.id)
            }
            _ if message.read_at.is_some() => {
                self.retire(message.id);
                self.unread.remove(&message.id)
            }
            _ => false,
        }
    }

    /// Apply rows whose read transition the store has confirmed.
    pub fn confirm_read<'a>(&mut self, rows: impl IntoIterator<Item = &'a Message>) -> bool {
        let ids: Vec<MessageId> = rows
            .into_iter()
            .filter(|m| m.receiver_id == self.me && m.read_at.is_some())
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            return false;
        }
        if let Phase::Loading { backlog } = &mut self.phase {
            backlog.push(Pending::Confirmed(ids));
            return false;
        }
        let before = self.unread.len();
        self.remove_ids(ids);
        self.unread.len() != before
    }

    fn remove_ids(&mut self, ids: Vec<MessageId>) {
        for id in ids {
            self.unread.remove(&id);
            self.retire(id);
        }
    }

    fn retire(&mut self, id: MessageId) {
        self.retired.insert(id);
        while self.retired.len() > RETIRED_CAP {
            self.retired.pop_first();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmsync_types::Timestamp;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn msg(id: u64, from: UserId, to: UserId) -> Message {
        Message {
            id: MessageId::new(id),
            sender_id: from,
            receiver_id: to,
            content: format!("m{}", id),
            created_at: Timestamp::from_millis(id as i64),
            read_at: None,
        }
    }

    fn read(mut m: Message) -> Message {
        m.read_at = Some(Timestamp::from_millis(10_000 + m.id.value() as i64));
        m
    }

    fn ready(me: UserId) -> UnreadCounter {
        let mut counter = UnreadCounter::new(me);
        counter.seed(Vec::new());
        counter
    }

    #[test]
    fn seed_sets_count() {
        let mut counter = UnreadCounter::new(UserId::new());
        assert!(!counter.is_ready());
        counter.seed(vec![MessageId::new(1), MessageId::new(2)]);
        assert!(counter.is_ready());
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn incoming_create_increments() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = ready(me);

        assert!(counter.observe(&LiveEvent::Created(msg(1, peer, me)), false));
        assert_eq!(counter.count(), 1);
        assert!(!counter.observe(&LiveEvent::Created(msg(2, me, peer)), false));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn suppressed_create_does_not_increment() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = ready(me);

        assert!(!counter.observe(&LiveEvent::Created(msg(1, peer, me)), true));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn double_confirmation_decrements_once() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = UnreadCounter::new(me);
        counter.seed(vec![MessageId::new(1), MessageId::new(2)]);

        let row = read(msg(1, peer, me));
        assert!(counter.confirm_read([&row]));
        assert!(!counter.observe(&LiveEvent::Updated(row.clone()), false));
        assert!(!counter.confirm_read([&row]));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn confirmation_of_unknown_id_never_goes_negative() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = ready(me);
        let row = read(msg(5, peer, me));
        counter.confirm_read([&row]);
        counter.observe(&LiveEvent::Updated(row), false);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn redelivered_create_after_read_is_not_counted() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = ready(me);
        let created = LiveEvent::Created(msg(1, peer, me));

        counter.observe(&created, false);
        counter.observe(&LiveEvent::Updated(read(msg(1, peer, me))), false);
        assert!(!counter.observe(&created, false));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn foreign_confirmations_are_ignored() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = UnreadCounter::new(me);
        counter.seed(vec![MessageId::new(1)]);

        // The peer reading my message does not touch my badge.
        let theirs = read(msg(1, me, peer));
        assert!(!counter.confirm_read([&theirs]));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn backlog_replays_on_top_of_snapshot() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = UnreadCounter::new(me);

        counter.observe(&LiveEvent::Created(msg(3, peer, me)), false);
        counter.confirm_read([&read(msg(1, peer, me))]);
        assert_eq!(counter.count(), 0);

        // Snapshot taken before 3 was sent and before 1 was read.
        counter.seed(vec![MessageId::new(1), MessageId::new(2)]);
        assert_eq!(counter.count(), 2);
        assert!(counter.contains(MessageId::new(2)));
        assert!(counter.contains(MessageId::new(3)));
    }

    #[test]
    fn resync_rebuffers() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = ready(me);
        counter.observe(&LiveEvent::Created(msg(1, peer, me)), false);

        counter.begin_resync();
        assert!(!counter.is_ready());
        counter.observe(&LiveEvent::Created(msg(2, peer, me)), false);
        counter.seed(vec![MessageId::new(1)]);
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn reseed_drops_retired_ids_below_snapshot() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = ready(me);
        for id in 1..=5 {
            counter.observe(&LiveEvent::Updated(read(msg(id, peer, me))), false);
        }
        assert_eq!(counter.retired.len(), 5);

        counter.begin_resync();
        counter.seed(vec![MessageId::new(4), MessageId::new(7)]);

        // 4 and 5 may still be answered by a late update; 1..=3 cannot.
        assert_eq!(
            counter.retired.iter().map(|id| id.value()).collect::<Vec<_>>(),
            vec![4, 5]
        );
        // A retired id in the snapshot was read after the snapshot was taken.
        assert_eq!(counter.count(), 1);
        assert!(counter.contains(MessageId::new(7)));
    }

    #[test]
    fn empty_snapshot_keeps_retired_ids_within_cap() {
        let me = UserId::new();
        let peer = UserId::new();
        let mut counter = ready(me);
        let total = RETIRED_CAP as u64 + 10;
        for id in 1..=total {
            counter.confirm_read([&read(msg(id, peer, me))]);
        }
        assert_eq!(counter.retired.len(), RETIRED_CAP);
        assert!(!counter.retired.contains(&MessageId::new(10)));
        assert!(counter.retired.contains(&MessageId::new(total)));

        counter.begin_resync();
        counter.seed(Vec::new());
        assert_eq!(counter.retired.len(), RETIRED_CAP);
        assert!(!counter.observe(&LiveEvent::Created(msg(total, peer, me)), false));
    }

    // ========================================================================
    // Randomized interleavings
    // ========================================================================

    /// Simulated store: rows plus the feed of committed events.
    struct World {
        me: UserId,
        peers: Vec<UserId>,
        rows: Vec<Message>,
        feed: Vec<LiveEvent>,
    }

    impl World {
        fn send(&mut self, from: UserId, to: UserId) {
            let id = self.rows.len() as u64 + 1;
            let m = msg(id, from, to);
            self.rows.push(m.clone());
            self.feed.push(LiveEvent::Created(m));
        }

        /// Conditional mark of every unread row from `sender`; returns transitioned rows.
        fn mark_bulk(&mut self, sender: UserId) -> Vec<Message> {
            let me = self.me;
            let mut done = Vec::new();
            for row in self.rows.iter_mut() {
                if row.sender_id == sender && row.is_unread_for(me) {
                    *row = read(row.clone());
                    done.push(row.clone());
                }
            }
            for row in &done {
                self.feed.push(LiveEvent::Updated(row.clone()));
            }
            done
        }

        fn mark_one(&mut self, id: MessageId) -> Option<Message> {
            let me = self.me;
            let row = self.rows.iter_mut().find(|r| r.id == id)?;
            if !row.is_unread_for(me) {
                return None;
            }
            *row = read(row.clone());
            let row = row.clone();
            self.feed.push(LiveEvent::Updated(row.clone()));
            Some(row)
        }

        fn unread_ids(&self) -> Vec<MessageId> {
            self.rows
                .iter()
                .filter(|r| r.is_unread_for(self.me))
                .map(|r| r.id)
                .collect()
        }
    }

    #[test]
    fn count_matches_store_under_random_interleavings() {
        for seed in [1u64, 7, 42, 1337, 9001] {
            let mut rng = StdRng::seed_from_u64(seed);
            let me = UserId::new();
            let mut world = World {
                me,
                peers: (0..3).map(|_| UserId::new()).collect(),
                rows: Vec::new(),
                feed: Vec::new(),
            };
            let mut counter = UnreadCounter::new(me);
            let mut delivered = 0usize;
            let mut snapshot_at: Option<usize> = Some(rng.gen_range(0..20));
            let mut snapshot: Option<Vec<MessageId>> = None;

            for step in 0..200 {
                let peer = world.peers[rng.gen_range(0..world.peers.len())];
                match rng.gen_range(0..6) {
                    0 | 1 => world.send(peer, me),
                    2 => world.send(me, peer),
                    3 => {
                        let rows = world.mark_bulk(peer);
                        counter.confirm_read(rows.iter());
                    }
                    4 => {
                        if !world.rows.is_empty() {
                            let id = MessageId::new(rng.gen_range(1..=world.rows.len() as u64));
                            if let Some(row) = world.mark_one(id) {
                                counter.confirm_read([&row]);
                            }
                        }
                    }
                    _ => {
                        // Deliver a random number of pending feed events.
                        let pending = world.feed.len() - delivered;
                        let n = rng.gen_range(0..=pending);
                        for event in &world.feed[delivered..delivered + n] {
                            counter.observe(event, false);
                        }
                        delivered += n;
                    }
                }

                // Snapshot query runs, its answer lands later.
                if snapshot_at == Some(step) {
                    snapshot = Some(world.unread_ids());
                    snapshot_at = None;
                }
                if step % 17 == 0 {
                    if let Some(ids) = snapshot.take() {
                        counter.seed(ids);
                    }
                }
            }

            if let Some(ids) = snapshot.take() {
                counter.seed(ids);
            }
            for event in &world.feed[delivered..] {
                counter.observe(event, false);
            }

            assert_eq!(
                counter.count(),
                world.unread_ids().len() as u64,
                "seed {} diverged",
                seed
            );
        }
    }
}
