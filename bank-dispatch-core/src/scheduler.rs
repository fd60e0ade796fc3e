//! Delay scheduler for action lists
//!
//! Provides timer bookkeeping for delayed actions with support for:
//! - Effective delay computation (absolute or relative)
//! - Per-group cancellation
//! - Synchronous cancellation: a cancelled timer never expires
//!
//! Timers are entries in a [`DelayQueue`]; the scheduler keeps a table from
//! [`TimerId`] to the dispatch group, action and run source of each timer.
//! The queue is polled by the engine runtime (or drained directly in tests).
//!
//! # Example
//!
//! ```ignore
//! use bank_dispatch_core::scheduler::{effective_delays, DelayScheduler};
//!
//! let mut scheduler = DelayScheduler::new();
//! for (action, delay) in actions.iter().zip(effective_delays(&actions, relative)) {
//!     if delay > 0 {
//!         scheduler.arm(group.clone(), action.clone(), source.clone(), Duration::from_millis(delay));
//!     }
//! }
//!
//! // Cancel every timer of one group
//! scheduler.cancel_group(&group);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::poll_fn;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::time::delay_queue::{self, DelayQueue};

use crate::action::Action;
use crate::bank::{GroupKey, RunSource};

/// Effective delay of every action in a list, in milliseconds.
///
/// In relative mode each action waits for the cumulative delay of all actions
/// up to and including itself. In absolute mode each delay stands alone.
pub fn effective_delays(actions: &[Action], relative: bool) -> Vec<u64> {
    let mut total = 0u64;
    actions
        .iter()
        .map(|action| {
            if relative {
                total = total.saturating_add(action.delay);
                total
            } else {
                action.delay
            }
        })
        .collect()
}

/// Identifies one armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

struct TimerEntry {
    key: delay_queue::Key,
    deadline: Instant,
    group: GroupKey,
    action: Action,
    source: Option<RunSource>,
}

/// A timer that has fired and been removed from the table.
#[derive(Clone, Debug, PartialEq)]
pub struct Expired {
    pub id: TimerId,
    pub deadline: Instant,
    pub group: GroupKey,
    pub action: Action,
    pub source: Option<RunSource>,
}

/// Table of pending delayed actions.
///
/// Arming requires a tokio runtime with the time driver enabled.
pub struct DelayScheduler {
    queue: DelayQueue<TimerId>,
    timers: HashMap<TimerId, TimerEntry>,
    next_id: u64,
}

impl Default for DelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayScheduler {
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            timers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Arm a timer that yields `action` after `delay`.
    pub fn arm(
        &mut self,
        group: GroupKey,
        action: Action,
        source: Option<RunSource>,
        delay: Duration,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let deadline = Instant::now() + delay;
        let key = self.queue.insert_at(id, deadline);
        self.timers.insert(
            id,
            TimerEntry {
                key,
                deadline,
                group,
                action,
                source,
            },
        );
        id
    }

    /// Cancel one timer. Unknown ids are a no-op.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(entry) => {
                self.queue.try_remove(&entry.key);
                true
            }
            None => false,
        }
    }

    /// Cancel every timer of a group, returning how many were cancelled.
    pub fn cancel_group(&mut self, group: &GroupKey) -> usize {
        let ids: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, entry)| &entry.group == group)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids.len()
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        self.timers.clear();
        self.queue.clear();
        count
    }

    /// Whether any timer of `group` is still pending.
    pub fn has_group(&self, group: &GroupKey) -> bool {
        self.timers.values().any(|entry| &entry.group == group)
    }

    pub fn group_len(&self, group: &GroupKey) -> usize {
        self.timers
            .values()
            .filter(|entry| &entry.group == group)
            .count()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Poll for the next expired timer.
    ///
    /// Returns `Ready(None)` when nothing is armed.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<Expired>> {
        loop {
            match self.queue.poll_expired(cx) {
                Poll::Ready(Some(fired)) => {
                    let id = fired.into_inner();
                    // Entries cancelled through the table never reach here,
                    // but a missing entry is simply skipped.
                    if let Some(entry) = self.timers.remove(&id) {
                        return Poll::Ready(Some(Expired {
                            id,
                            deadline: entry.deadline,
                            group: entry.group,
                            action: entry.action,
                            source: entry.source,
                        }));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Wait for the next expired timer.
    pub async fn next_expired(&mut self) -> Option<Expired> {
        poll_fn(|cx| self.poll_expired(cx)).await
    }

    /// Poll for every timer that has expired so far.
    ///
    /// The batch is ordered by deadline, then by arming order, so actions
    /// sharing a deadline fire in list order. Pending while nothing is due.
    pub fn poll_batch(&mut self, cx: &mut Context<'_>) -> Poll<Vec<Expired>> {
        let mut batch = Vec::new();
        while let Poll::Ready(Some(fired)) = self.poll_expired(cx) {
            batch.push(fired);
        }
        if batch.is_empty() {
            return Poll::Pending;
        }
        batch.sort_by_key(|expired| (expired.deadline, expired.id));
        Poll::Ready(batch)
    }

    /// Take every timer that has already expired, without waiting.
    pub fn drain_expired(&mut self) -> Vec<Expired> {
        let mut cx = Context::from_waker(Waker::noop());
        match self.poll_batch(&mut cx) {
            Poll::Ready(batch) => batch,
            Poll::Pending => Vec::new(),
        }
    }
}

impl fmt::Debug for DelayScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayScheduler")
            .field("pending", &self.timers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
