// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-remote-device profile and lifecycle state.
//!
//! A [`BtDevice`] tracks which profiles the remote advertises and which are
//! currently connected, and runs the connection watcher: after the baseband
//! link comes up, profile connections are retried on a fixed period until
//! both required profiles are up or the retry budget runs out.
//!
//! All mutation happens on the main loop. The only state the audio thread
//! reads is [`DeviceShared`], behind a mutex, because the virtual device's
//! switch policy needs the active profile and the input-open flag inside
//! I/O callbacks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bt_io::BtVirtualIodev;
use crate::message::MainMessage;
use crate::timer::{TimerId, TimerService};
use crate::transport::RemoteDevice;
use crate::types::{Direction, Profile, A2DP_SINK_UUID, HFP_HF_UUID};

/// Ticks before the connection watcher gives up on a device.
pub const CONN_WATCH_MAX_RETRIES: u32 = 30;
/// Period of the connection watcher.
pub const CONN_WATCH_PERIOD_MS: u64 = 2000;
/// A profile connect attempt is issued only every this many watcher ticks.
const CONN_WATCH_CONNECT_EVERY: u32 = 3;
/// Delay before re-enabling an output device after a profile switch. Some
/// headsets fail playback when the A2DP stream starts too soon after the
/// HFP one stops.
pub const PROFILE_SWITCH_DELAY_MS: u64 = 500;

/// Device state shared with the audio thread. The switch policy in
/// [`crate::bt_io`] reads and writes this from inside I/O callbacks.
#[derive(Debug)]
pub struct DeviceShared {
    /// Which profile family currently drives audio. Mutated only by the
    /// switch policy, never directly by I/O code.
    pub active_profile: Profile,
    /// An input virtual device exists for this remote.
    pub input_device_exists: bool,
    /// The input virtual device is open (capturing).
    pub input_device_open: bool,
    /// The output virtual device has an A2DP-source node.
    pub a2dp_node_exists: bool,
}

impl Default for DeviceShared {
    fn default() -> Self {
        Self {
            active_profile: Profile::empty(),
            input_device_exists: false,
            input_device_open: false,
            a2dp_node_exists: false,
        }
    }
}

pub type SharedDeviceState = Arc<Mutex<DeviceShared>>;

pub fn new_shared_state() -> SharedDeviceState {
    Arc::new(Mutex::new(DeviceShared::default()))
}

/// What the main loop should do after a connection-watch tick.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnWatchVerdict {
    /// Still waiting on a profile; the watcher re-armed itself.
    Waiting,
    /// Retry budget exhausted; schedule an immediate suspend.
    GiveUp,
    /// Required profiles resolved. Start what is connected; `suspend_gateway`
    /// asks for any running voice gateway to be suspended first (the remote
    /// streams A2DP and does not support HFP/HSP at all).
    Ready { start_a2dp: bool, suspend_gateway: bool, start_gateway: bool },
}

/// State for one remote Bluetooth device.
pub struct BtDevice {
    remote: Arc<dyn RemoteDevice>,
    object_path: String,
    /// Profiles the remote advertises (from its service class UUIDs).
    profiles: Profile,
    /// Profiles currently signaled connected.
    connected_profiles: Profile,
    connected: bool,
    use_hardware_volume: bool,
    shared: SharedDeviceState,
    /// Virtual iodevs by direction, shared with the audio thread.
    iodevs: [Option<Arc<Mutex<BtVirtualIodev>>>; 2],
    conn_watch_retries: u32,
    conn_watch_timer: Option<TimerId>,
    suspend_timer: Option<TimerId>,
    switch_timers: Vec<TimerId>,
}

impl BtDevice {
    pub fn new(remote: Arc<dyn RemoteDevice>) -> Self {
        let object_path = remote.object_path().to_string();
        Self {
            remote,
            object_path,
            profiles: Profile::empty(),
            connected_profiles: Profile::empty(),
            connected: false,
            use_hardware_volume: false,
            shared: new_shared_state(),
            iodevs: [None, None],
            conn_watch_retries: 0,
            conn_watch_timer: None,
            suspend_timer: None,
            switch_timers: Vec::new(),
        }
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn remote(&self) -> &Arc<dyn RemoteDevice> {
        &self.remote
    }

    pub fn shared(&self) -> &SharedDeviceState {
        &self.shared
    }

    pub fn profiles(&self) -> Profile {
        self.profiles
    }

    pub fn connected_profiles(&self) -> Profile {
        self.connected_profiles
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_supported_profiles(&mut self, profiles: Profile) {
        self.profiles = profiles;
    }

    /// Record a profile advertised via a service class UUID.
    pub fn add_supported_profile(&mut self, uuid: &str) {
        if let Some(profile) = Profile::from_uuid(uuid) {
            self.profiles |= profile;
        }
    }

    pub fn set_use_hardware_volume(&mut self, use_hardware_volume: bool) {
        self.use_hardware_volume = use_hardware_volume;
    }

    pub fn use_hardware_volume(&self) -> bool {
        self.use_hardware_volume
    }

    pub fn profile_connected(&mut self, profile: Profile) {
        self.connected_profiles |= profile;
    }

    pub fn profile_disconnected(&mut self, profile: Profile) {
        self.connected_profiles -= profile;
    }

    pub fn iodev(&self, direction: Direction) -> Option<&Arc<Mutex<BtVirtualIodev>>> {
        self.iodevs[direction.index()].as_ref()
    }

    pub fn set_iodev(&mut self, direction: Direction, iodev: Arc<Mutex<BtVirtualIodev>>) {
        self.iodevs[direction.index()] = Some(iodev);
    }

    pub fn take_iodev(&mut self, direction: Direction) -> Option<Arc<Mutex<BtVirtualIodev>>> {
        self.iodevs[direction.index()].take()
    }

    /// Handle a link-connected state change. Connecting starts the watcher;
    /// disconnecting cancels it and clears the connected profile set. The
    /// caller tears down any running profile audio on disconnect.
    pub fn set_connected(&mut self, connected: bool, timers: &dyn TimerService) {
        if connected && !self.connected {
            info!(device = %self.object_path, "connected, starting connection watch");
            self.start_connection_watch(timers);
        } else if !connected && self.connected {
            info!(device = %self.object_path, "disconnected");
            if let Some(id) = self.conn_watch_timer.take() {
                timers.cancel(id);
            }
            self.connected_profiles = Profile::empty();
        }
        self.connected = connected;
    }

    fn start_connection_watch(&mut self, timers: &dyn TimerService) {
        self.conn_watch_retries = CONN_WATCH_MAX_RETRIES;
        self.arm_watch_timer(timers);
    }

    fn arm_watch_timer(&mut self, timers: &dyn TimerService) {
        if let Some(id) = self.conn_watch_timer.take() {
            timers.cancel(id);
        }
        self.conn_watch_timer = Some(timers.schedule(
            Duration::from_millis(CONN_WATCH_PERIOD_MS),
            MainMessage::ConnectionWatchTick { device: self.object_path.clone() },
        ));
    }

    /// One tick of the connection watcher. Issues throttled profile connect
    /// attempts while a required profile is missing; reports a verdict once
    /// everything supported is connected or the budget is exhausted.
    pub fn connection_watch_tick(&mut self, timers: &dyn TimerService) -> ConnWatchVerdict {
        self.conn_watch_timer = None;
        if self.conn_watch_retries == 0 {
            warn!(device = %self.object_path, "connection watch exhausted its retries");
            return ConnWatchVerdict::GiveUp;
        }

        if self.profiles.contains(Profile::A2DP_SINK)
            && !self.connected_profiles.contains(Profile::A2DP_SINK)
        {
            if self.conn_watch_retries % CONN_WATCH_CONNECT_EVERY == 0 {
                debug!(device = %self.object_path, "requesting A2DP sink connection");
                if let Err(e) = self.remote.connect_profile(A2DP_SINK_UUID) {
                    warn!(device = %self.object_path, "A2DP connect attempt failed: {}", e);
                }
            }
            self.conn_watch_retries -= 1;
            self.arm_watch_timer(timers);
            return ConnWatchVerdict::Waiting;
        }

        if self.profiles.contains(Profile::HFP_HANDSFREE)
            && !self.connected_profiles.contains(Profile::HFP_HANDSFREE)
        {
            if self.conn_watch_retries % CONN_WATCH_CONNECT_EVERY == 0 {
                debug!(device = %self.object_path, "requesting HFP hands-free connection");
                if let Err(e) = self.remote.connect_profile(HFP_HF_UUID) {
                    warn!(device = %self.object_path, "HFP connect attempt failed: {}", e);
                }
            }
            self.conn_watch_retries -= 1;
            self.arm_watch_timer(timers);
            return ConnWatchVerdict::Waiting;
        }

        let mut verdict =
            ConnWatchVerdict::Ready { start_a2dp: false, suspend_gateway: false, start_gateway: false };
        if let ConnWatchVerdict::Ready { start_a2dp, suspend_gateway, start_gateway } = &mut verdict
        {
            if self.connected_profiles.contains(Profile::A2DP_SINK) {
                *start_a2dp = true;
                // Mutual exclusivity heuristic: a sink with no voice profile
                // at all cannot be running a gateway we should keep.
                *suspend_gateway =
                    !self.profiles.intersects(Profile::HFP_HANDSFREE | Profile::HSP_HEADSET);
            }
            if self.connected_profiles.contains(Profile::HFP_HANDSFREE) {
                *start_gateway = true;
            }
        }
        verdict
    }

    pub fn suspend_timer(&self) -> Option<TimerId> {
        self.suspend_timer
    }

    /// Arm the suspend timer unless one is already pending. Idempotent: a
    /// second call before the first fires leaves the original delay alone.
    pub fn schedule_suspend(&mut self, delay_ms: u64, timers: &dyn TimerService) {
        if self.suspend_timer.is_some() {
            return;
        }
        debug!(device = %self.object_path, delay_ms, "suspend scheduled");
        self.suspend_timer = Some(timers.schedule(
            Duration::from_millis(delay_ms),
            MainMessage::SuspendTimeout { device: self.object_path.clone() },
        ));
    }

    pub fn cancel_suspend(&mut self, timers: &dyn TimerService) {
        if let Some(id) = self.suspend_timer.take() {
            debug!(device = %self.object_path, "suspend cancelled");
            timers.cancel(id);
        }
    }

    /// The suspend timer fired; clear the handle so a new one can be armed.
    pub fn clear_suspend_timer(&mut self) {
        self.suspend_timer = None;
    }

    pub fn push_switch_timer(&mut self, id: TimerId) {
        self.switch_timers.push(id);
    }

    pub fn forget_switch_timers(&mut self) -> Vec<TimerId> {
        std::mem::take(&mut self.switch_timers)
    }

    /// Cancel every outstanding timer. Used on device removal.
    pub fn cancel_all_timers(&mut self, timers: &dyn TimerService) {
        if let Some(id) = self.conn_watch_timer.take() {
            timers.cancel(id);
        }
        if let Some(id) = self.suspend_timer.take() {
            timers.cancel(id);
        }
        for id in std::mem::take(&mut self.switch_timers) {
            timers.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeRemote, FakeTimers};
    use assert_matches::assert_matches;

    fn make_device(timers: &FakeTimers) -> (BtDevice, Arc<FakeRemote>) {
        let remote = Arc::new(FakeRemote::new("/dev/headset", "00:11:22:33:44:55", b"Headset"));
        let mut dev = BtDevice::new(remote.clone());
        dev.set_supported_profiles(Profile::A2DP_SINK | Profile::HFP_HANDSFREE);
        dev.set_connected(true, timers);
        (dev, remote)
    }

    #[test]
    fn connecting_starts_the_watcher() {
        let timers = FakeTimers::new();
        let (dev, _remote) = make_device(&timers);
        assert!(dev.is_connected());
        assert_eq!(timers.pending_count(), 1);
        let (_, delay, msg) = timers.last_scheduled().unwrap();
        assert_eq!(delay, Duration::from_millis(CONN_WATCH_PERIOD_MS));
        assert_matches!(msg, MainMessage::ConnectionWatchTick { .. });
    }

    #[test]
    fn watcher_throttles_connect_attempts() {
        let timers = FakeTimers::new();
        let (mut dev, remote) = make_device(&timers);

        // Retries 30, 29, 28: only the tick with retries % 3 == 0 connects.
        for _ in 0..3 {
            assert_eq!(dev.connection_watch_tick(&timers), ConnWatchVerdict::Waiting);
        }
        assert_eq!(remote.connect_profile_calls(), vec![A2DP_SINK_UUID.to_string()]);

        // Next throttle window targets A2DP again until it connects.
        for _ in 0..3 {
            assert_eq!(dev.connection_watch_tick(&timers), ConnWatchVerdict::Waiting);
        }
        assert_eq!(remote.connect_profile_calls().len(), 2);
    }

    #[test]
    fn watcher_moves_to_hfp_once_a2dp_connects() {
        let timers = FakeTimers::new();
        let (mut dev, remote) = make_device(&timers);
        dev.profile_connected(Profile::A2DP_SINK);

        assert_eq!(dev.connection_watch_tick(&timers), ConnWatchVerdict::Waiting);
        assert_eq!(remote.connect_profile_calls(), vec![HFP_HF_UUID.to_string()]);
    }

    #[test]
    fn watcher_terminal_verdict_starts_connected_profiles() {
        let timers = FakeTimers::new();
        let (mut dev, _remote) = make_device(&timers);
        dev.profile_connected(Profile::A2DP_SINK | Profile::HFP_HANDSFREE);
        timers.clear();

        assert_eq!(
            dev.connection_watch_tick(&timers),
            ConnWatchVerdict::Ready {
                start_a2dp: true,
                suspend_gateway: false,
                start_gateway: true
            }
        );
        // Terminal: the watcher does not re-arm.
        assert_eq!(timers.pending_count(), 0);
    }

    #[test]
    fn a2dp_only_device_suspends_any_gateway() {
        let timers = FakeTimers::new();
        let remote = Arc::new(FakeRemote::new("/dev/speaker", "aa:bb:cc:dd:ee:ff", b"Speaker"));
        let mut dev = BtDevice::new(remote);
        dev.set_supported_profiles(Profile::A2DP_SINK);
        dev.set_connected(true, &timers);
        dev.profile_connected(Profile::A2DP_SINK);

        assert_eq!(
            dev.connection_watch_tick(&timers),
            ConnWatchVerdict::Ready {
                start_a2dp: true,
                suspend_gateway: true,
                start_gateway: false
            }
        );
    }

    #[test]
    fn watcher_gives_up_after_retry_budget() {
        let timers = FakeTimers::new();
        let (mut dev, _remote) = make_device(&timers);
        for _ in 0..CONN_WATCH_MAX_RETRIES {
            assert_eq!(dev.connection_watch_tick(&timers), ConnWatchVerdict::Waiting);
        }
        assert_eq!(dev.connection_watch_tick(&timers), ConnWatchVerdict::GiveUp);
    }

    #[test]
    fn disconnect_cancels_watcher_and_clears_profiles() {
        let timers = FakeTimers::new();
        let (mut dev, _remote) = make_device(&timers);
        dev.profile_connected(Profile::A2DP_SINK);

        dev.set_connected(false, &timers);
        assert!(!dev.is_connected());
        assert_eq!(dev.connected_profiles(), Profile::empty());
        assert_eq!(timers.pending_count(), 0);
    }

    #[test]
    fn suspend_scheduling_is_idempotent() {
        let timers = FakeTimers::new();
        let (mut dev, _remote) = make_device(&timers);
        timers.clear();

        dev.schedule_suspend(5000, &timers);
        dev.schedule_suspend(0, &timers);
        assert_eq!(timers.pending_count(), 1);
        let (_, delay, _) = timers.last_scheduled().unwrap();
        assert_eq!(delay, Duration::from_millis(5000));

        dev.cancel_suspend(&timers);
        assert_eq!(timers.pending_count(), 0);
        // A new suspend can be armed after cancellation.
        dev.schedule_suspend(0, &timers);
        assert_eq!(timers.pending_count(), 1);
    }
}
