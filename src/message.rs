// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The typed message channel between the audio I/O thread (and timers) and
//! the main loop.
//!
//! Profile switches and suspend scheduling originate inside stream device
//! callbacks on the audio thread, but mutate main-thread-owned timer and
//! registry state. Every such request is a self-contained value posted to a
//! single bounded queue the main loop drains in FIFO order; the posting
//! thread never waits for completion. FIFO ordering is what guarantees that
//! a `CancelSuspend` posted after a successful write cannot overtake an
//! earlier `ScheduleSuspend` posted on back-pressure.

use futures::channel::mpsc;
use tracing::warn;

use crate::types::Direction;

/// Queue depth for the main-loop channel. Deep enough that a burst of
/// per-device timer and audio-thread messages never drops.
const MAIN_QUEUE_DEPTH: usize = 64;

/// A request processed by the main loop. Carries the device's object path
/// by value so the payload is self-contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainMessage {
    /// Disarm the pending suspend timer for a device, if any.
    CancelSuspend { device: String },
    /// Arm the suspend timer for a device. Idempotent: an already-armed
    /// timer is left untouched.
    ScheduleSuspend { device: String, delay_ms: u64 },
    /// Re-evaluate and re-activate the device's virtual iodevs after a
    /// profile change. `direction` identifies the triggering iodev.
    SwitchProfile { device: String, direction: Direction },
    /// Like `SwitchProfile`, but the triggering iodev is re-enabled even if
    /// it was not in the active device list before the switch.
    SwitchProfileEnableDev { device: String, direction: Direction },
    /// Connection-watch timer tick for a device.
    ConnectionWatchTick { device: String },
    /// The suspend timer for a device fired.
    SuspendTimeout { device: String },
    /// Deferred re-enable of an output iodev after a profile switch.
    EnableDevAfterSwitch { device: String, direction: Direction },
    /// A virtual iodev whose last usable node was removed while the device
    /// was open has now closed; destroy it.
    DestroyOrphanedIodev { device: String, direction: Direction },
}

/// Cloneable posting side of the main-loop queue.
#[derive(Clone)]
pub struct MessageSender(mpsc::Sender<MainMessage>);

impl MessageSender {
    /// Post a message without waiting. Dropping on overflow is logged; the
    /// queue is sized so this does not happen in practice.
    pub fn post(&self, msg: MainMessage) {
        let mut sender = self.0.clone();
        if let Err(e) = sender.try_send(msg) {
            warn!("main message queue full, dropping {:?}", e.into_inner());
        }
    }
}

/// Create the main-loop message channel.
pub fn main_message_channel() -> (MessageSender, mpsc::Receiver<MainMessage>) {
    let (tx, rx) = mpsc::channel(MAIN_QUEUE_DEPTH);
    (MessageSender(tx), rx)
}
