// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! One-shot timers delivering [`MainMessage`]s back to the main loop.
//!
//! Timers are a consumed capability: the host server can plug in its own
//! timer wheel. [`ThreadedTimers`] is the standalone implementation, one
//! worker thread over a deadline heap. All timers are fire-at-relative-delay
//! and one-shot; re-arming a timer always means cancel-then-schedule.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::message::{MainMessage, MessageSender};

/// Handle for a scheduled timer, used only to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// One-shot timer scheduling. The fired timer posts its message to the main
/// loop; the message, not a callback, carries the context.
pub trait TimerService: Send + Sync {
    fn schedule(&self, delay: Duration, msg: MainMessage) -> TimerId;
    fn cancel(&self, id: TimerId);
}

struct Entry {
    deadline: Instant,
    id: TimerId,
    msg: MainMessage,
}

// Min-heap by deadline on top of std's max-heap.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for Entry {}

struct State {
    queue: BinaryHeap<Entry>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
    shutdown: bool,
}

struct Inner {
    state: Mutex<State>,
    cond: Condvar,
}

/// Thread-backed [`TimerService`]. Fired messages are posted through the
/// given [`MessageSender`].
pub struct ThreadedTimers {
    inner: Arc<Inner>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ThreadedTimers {
    pub fn new(sender: MessageSender) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_id: 1,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let worker_inner = inner.clone();
        let worker = thread::Builder::new()
            .name("bt-audio-timers".into())
            .spawn(move || Self::run(worker_inner, sender))
            .ok();
        Self { inner, worker }
    }

    fn run(inner: Arc<Inner>, sender: MessageSender) {
        let mut state = inner.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            // Fire everything due, skipping cancelled entries.
            let now = Instant::now();
            while state.queue.peek().map_or(false, |e| e.deadline <= now) {
                if let Some(entry) = state.queue.pop() {
                    if !state.cancelled.remove(&entry.id) {
                        sender.post(entry.msg);
                    }
                }
            }
            match state.queue.peek().map(|e| e.deadline) {
                Some(deadline) => {
                    let _ = inner.cond.wait_until(&mut state, deadline);
                }
                None => inner.cond.wait(&mut state),
            }
        }
    }
}

impl TimerService for ThreadedTimers {
    fn schedule(&self, delay: Duration, msg: MainMessage) -> TimerId {
        let mut state = self.inner.state.lock();
        let id = TimerId(state.next_id);
        state.next_id += 1;
        state.queue.push(Entry { deadline: Instant::now() + delay, id, msg });
        self.inner.cond.notify_one();
        id
    }

    fn cancel(&self, id: TimerId) {
        let mut state = self.inner.state.lock();
        if state.queue.iter().any(|e| e.id == id) {
            state.cancelled.insert(id);
        }
    }
}

impl Drop for ThreadedTimers {
    fn drop(&mut self) {
        self.inner.state.lock().shutdown = true;
        self.inner.cond.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::main_message_channel;

    #[test]
    fn scheduled_timer_fires_message() {
        let (tx, mut rx) = main_message_channel();
        let timers = ThreadedTimers::new(tx);
        let _id = timers
            .schedule(Duration::from_millis(5), MainMessage::CancelSuspend { device: "d".into() });

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Ok(Some(msg)) = rx.try_next() {
                assert_eq!(msg, MainMessage::CancelSuspend { device: "d".into() });
                break;
            }
            assert!(Instant::now() < deadline, "timer did not fire");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let (tx, mut rx) = main_message_channel();
        let timers = ThreadedTimers::new(tx);
        let id = timers
            .schedule(Duration::from_millis(20), MainMessage::CancelSuspend { device: "d".into() });
        timers.cancel(id);

        thread::sleep(Duration::from_millis(60));
        // Channel is open (timers hold the sender) but nothing was posted.
        assert!(rx.try_next().is_err());
    }
}
