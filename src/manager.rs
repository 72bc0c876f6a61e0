// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The main-thread context object owning all Bluetooth audio state: the
//! device registry, the singleton A2DP slot, the connected audio gateways,
//! and the main-loop message pump that serializes every mutation requested
//! from the audio thread or a timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::a2dp::{A2dpEncoder, A2dpStreamDevice};
use crate::audio_dispatch::SharedDispatch;
use crate::bt_io::BtVirtualIodev;
use crate::clock::Clock;
use crate::device::{BtDevice, ConnWatchVerdict, PROFILE_SWITCH_DELAY_MS};
use crate::error::Error;
use crate::hfp::{HfpStreamDevice, SlcEvent};
use crate::iodev::{DeviceList, IodevId, PhysicalAudioDevice};
use crate::message::{main_message_channel, MainMessage, MessageSender};
use crate::timer::TimerService;
use crate::transport::{RemoteDevice, Transport};
use crate::types::{Direction, Profile};

/// Callback invoked when the connection watcher decides a profile should
/// start streaming. The host reacts by negotiating the transport and
/// calling back into [`BtAudioManager::a2dp_configured`] or
/// [`BtAudioManager::ag_connected`].
pub type ProfileStarter = Box<dyn FnMut(&str) + Send>;

/// Observer of hardware volume changes on the active output node.
pub type VolumeObserver = Box<dyn Fn(&str, u8) + Send>;

/// Process-wide Bluetooth audio state. One per server.
pub struct BtAudioManager {
    devices: HashMap<String, BtDevice>,
    /// Object path of the device owning the single A2DP stream, if any.
    connected_a2dp: Option<String>,
    /// Object paths of devices with connected audio gateways.
    connected_ags: Vec<String>,
    timers: Arc<dyn TimerService>,
    device_list: Box<dyn DeviceList>,
    dispatch: SharedDispatch,
    clock: Arc<dyn Clock>,
    sender: MessageSender,
    receiver: Option<mpsc::Receiver<MainMessage>>,
    next_iodev_id: IodevId,
    on_start_a2dp: Option<ProfileStarter>,
    on_start_gateway: Option<ProfileStarter>,
    volume_observer: Option<VolumeObserver>,
}

impl BtAudioManager {
    pub fn new(
        timers: Arc<dyn TimerService>,
        device_list: Box<dyn DeviceList>,
        dispatch: SharedDispatch,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (sender, receiver) = main_message_channel();
        Self {
            devices: HashMap::new(),
            connected_a2dp: None,
            connected_ags: Vec::new(),
            timers,
            device_list,
            dispatch,
            clock,
            sender,
            receiver: Some(receiver),
            next_iodev_id: 0,
            on_start_a2dp: None,
            on_start_gateway: None,
            volume_observer: None,
        }
    }

    /// A posting handle for timers, stream devices, and the host glue.
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    pub fn set_a2dp_starter(&mut self, starter: ProfileStarter) {
        self.on_start_a2dp = Some(starter);
    }

    pub fn set_gateway_starter(&mut self, starter: ProfileStarter) {
        self.on_start_gateway = Some(starter);
    }

    pub fn set_volume_observer(&mut self, observer: VolumeObserver) {
        self.volume_observer = Some(observer);
    }

    pub fn device(&self, path: &str) -> Option<&BtDevice> {
        self.devices.get(path)
    }

    pub fn device_mut(&mut self, path: &str) -> Option<&mut BtDevice> {
        self.devices.get_mut(path)
    }

    pub fn connected_a2dp(&self) -> Option<&str> {
        self.connected_a2dp.as_deref()
    }

    /// Register a device reported by the platform adapter layer.
    pub fn device_created(&mut self, remote: Arc<dyn RemoteDevice>) {
        let path = remote.object_path().to_string();
        info!(device = %path, address = %remote.address(), "Bluetooth device created");
        self.devices.entry(path).or_insert_with(|| BtDevice::new(remote));
    }

    /// Drop a device entirely: profiles down, timers cancelled, iodevs out
    /// of the active list.
    pub fn device_remove(&mut self, path: &str) {
        self.a2dp_suspend(path);
        self.ag_suspend(path);
        if let Some(mut dev) = self.devices.remove(path) {
            dev.cancel_all_timers(self.timers.as_ref());
            for direction in Direction::ALL {
                if let Some(iodev) = dev.take_iodev(direction) {
                    self.device_list.disable(iodev.lock().id());
                }
            }
            info!(device = %path, "Bluetooth device removed");
        }
    }

    /// Full teardown, for server shutdown or adapter reset.
    pub fn reset(&mut self) {
        let paths: Vec<String> = self.devices.keys().cloned().collect();
        for path in paths {
            self.device_remove(&path);
        }
    }

    /// Link-level connected property changed. Disconnection tears down any
    /// running profile audio for the device.
    pub fn set_connected(&mut self, path: &str, connected: bool) {
        if let Some(dev) = self.devices.get_mut(path) {
            dev.set_connected(connected, self.timers.as_ref());
        }
        if !connected {
            self.a2dp_suspend(path);
            self.ag_suspend(path);
        }
    }

    pub fn profile_connected(&mut self, path: &str, profile: Profile) {
        if let Some(dev) = self.devices.get_mut(path) {
            dev.profile_connected(profile);
        }
    }

    pub fn profile_disconnected(&mut self, path: &str, profile: Profile) {
        if let Some(dev) = self.devices.get_mut(path) {
            dev.profile_disconnected(profile);
        }
    }

    /// An A2DP transport finished configuration. At most one A2DP stream
    /// exists process-wide; a newly configured one replaces the old.
    pub fn a2dp_configured(
        &mut self,
        path: &str,
        transport: Box<dyn Transport>,
        encoder: Box<dyn A2dpEncoder>,
    ) -> Result<(), Error> {
        if !self.devices.contains_key(path) {
            return Err(Error::UnknownDevice(path.to_string()));
        }
        if let Some(existing) = self.connected_a2dp.take() {
            info!(old = %existing, new = %path, "replacing the connected A2DP stream");
            self.a2dp_suspend(&existing);
        }
        let stream = Box::new(A2dpStreamDevice::new(
            path,
            transport,
            encoder,
            self.dispatch.clone(),
            self.sender.clone(),
            self.clock.clone(),
        ));
        self.attach_node(path, Direction::Output, stream, Profile::A2DP_SOURCE)?;
        self.connected_a2dp = Some(path.to_string());
        Ok(())
    }

    /// An HFP/HSP service level connection came up; attach gateway nodes
    /// for both directions.
    pub fn ag_connected(&mut self, path: &str) -> Result<(), Error> {
        if !self.devices.contains_key(path) {
            return Err(Error::UnknownDevice(path.to_string()));
        }
        for direction in Direction::ALL {
            let remote = match self.devices.get(path) {
                Some(dev) => dev.remote().clone(),
                None => return Err(Error::UnknownDevice(path.to_string())),
            };
            let stream = Box::new(HfpStreamDevice::new(remote, direction));
            self.attach_node(path, direction, stream, Profile::HFP_AUDIOGATEWAY)?;
        }
        if !self.connected_ags.iter().any(|p| p == path) {
            self.connected_ags.push(path.to_string());
        }
        Ok(())
    }

    /// Wrap `stream` as a node on the device's virtual iodev for the
    /// direction, creating and enabling the iodev on its first node.
    fn attach_node(
        &mut self,
        path: &str,
        direction: Direction,
        stream: Box<dyn PhysicalAudioDevice>,
        profile: Profile,
    ) -> Result<(), Error> {
        let dev = match self.devices.get_mut(path) {
            Some(dev) => dev,
            None => return Err(Error::UnknownDevice(path.to_string())),
        };
        match dev.iodev(direction) {
            Some(iodev) => iodev.lock().append(stream, profile)?,
            None => {
                let id = self.next_iodev_id;
                self.next_iodev_id += 1;
                let iodev = Arc::new(Mutex::new(BtVirtualIodev::new(
                    id,
                    path,
                    dev.remote().name(),
                    direction,
                    dev.shared().clone(),
                    self.sender.clone(),
                    stream,
                    profile,
                )));
                dev.set_iodev(direction, iodev);
                self.device_list.enable(id);
            }
        }
        Ok(())
    }

    /// Tear down the A2DP stream for a device, if it has one.
    pub fn a2dp_suspend(&mut self, path: &str) {
        self.remove_node(path, Direction::Output, Profile::A2DP_SOURCE);
        if self.connected_a2dp.as_deref() == Some(path) {
            self.connected_a2dp = None;
        }
    }

    /// Tear down the audio gateway nodes for a device, if it has any.
    pub fn ag_suspend(&mut self, path: &str) {
        for direction in Direction::ALL {
            self.remove_node(path, direction, Profile::HFP_AUDIOGATEWAY);
        }
        self.connected_ags.retain(|p| p != path);
    }

    fn remove_node(&mut self, path: &str, direction: Direction, profile: Profile) {
        let Some(dev) = self.devices.get_mut(path) else { return };
        let Some(iodev) = dev.iodev(direction).cloned() else { return };
        let mut io = iodev.lock();
        match io.remove(profile) {
            Ok(()) => io.update_active_node(),
            Err(Error::NodeNotFound(_)) => {}
            Err(Error::NoNodesRemain) => {
                // Busy devices block destruction; the open stream keeps the
                // orphaned slot until it closes.
                if !io.is_open() {
                    let id = io.id();
                    drop(io);
                    dev.take_iodev(direction);
                    self.device_list.disable(id);
                    debug!(device = %path, ?direction, "virtual iodev destroyed");
                }
            }
            Err(e) => warn!(device = %path, "node removal failed: {e}"),
        }
    }

    /// Apply a hardware (AVRCP/HFP-reported) volume to the active output
    /// node. `volume` is already rescaled to 0..=100 by the caller.
    pub fn update_hardware_volume(&mut self, path: &str, volume: u8) {
        let Some(dev) = self.devices.get(path) else { return };
        if !dev.use_hardware_volume() {
            debug!(device = %path, "hardware volume ignored for this device");
            return;
        }
        if let Some(iodev) = dev.iodev(Direction::Output) {
            iodev.lock().set_volume(volume);
        }
        if let Some(observer) = &self.volume_observer {
            observer(path, volume);
        }
    }

    /// React to a telephony event decoded by an SLC channel.
    pub fn handle_slc_event(&mut self, path: &str, event: SlcEvent) {
        match event {
            SlcEvent::Initialized => {
                info!(device = %path, "service level connection initialized");
            }
            SlcEvent::SpeakerGain(volume) => self.update_hardware_volume(path, volume),
            SlcEvent::MicGain(gain) => {
                debug!(device = %path, gain, "hands-free microphone gain");
            }
            SlcEvent::Answer | SlcEvent::HangUp | SlcEvent::DialingStarted => {
                // Telephony itself lives with the host; nothing to drive
                // here beyond the indicator updates the channel already did.
                debug!(device = %path, ?event, "telephony event");
            }
        }
    }

    /// Dispatch one main-loop message. Everything the audio thread or a
    /// timer wants done lands here, in FIFO order.
    pub fn handle_message(&mut self, msg: MainMessage) {
        match msg {
            MainMessage::CancelSuspend { device } => {
                if let Some(dev) = self.devices.get_mut(&device) {
                    dev.cancel_suspend(self.timers.as_ref());
                }
            }
            MainMessage::ScheduleSuspend { device, delay_ms } => {
                if let Some(dev) = self.devices.get_mut(&device) {
                    dev.schedule_suspend(delay_ms, self.timers.as_ref());
                }
            }
            MainMessage::SwitchProfile { device, direction } => {
                self.switch_profile(&device, direction, false);
            }
            MainMessage::SwitchProfileEnableDev { device, direction } => {
                self.switch_profile(&device, direction, true);
            }
            MainMessage::ConnectionWatchTick { device } => {
                let verdict = match self.devices.get_mut(&device) {
                    Some(dev) => dev.connection_watch_tick(self.timers.as_ref()),
                    None => return,
                };
                self.apply_watch_verdict(&device, verdict);
            }
            MainMessage::SuspendTimeout { device } => {
                if let Some(dev) = self.devices.get_mut(&device) {
                    dev.clear_suspend_timer();
                }
                info!(device = %device, "suspend timeout, stopping profile audio");
                self.a2dp_suspend(&device);
                self.ag_suspend(&device);
            }
            MainMessage::EnableDevAfterSwitch { device, direction } => {
                let Some(dev) = self.devices.get(&device) else { return };
                if let Some(iodev) = dev.iodev(direction) {
                    self.device_list.enable(iodev.lock().id());
                }
            }
            MainMessage::DestroyOrphanedIodev { device, direction } => {
                let Some(dev) = self.devices.get_mut(&device) else { return };
                let Some(iodev) = dev.iodev(direction).cloned() else { return };
                let io = iodev.lock();
                if !io.is_open() && io.is_orphaned() {
                    let id = io.id();
                    drop(io);
                    dev.take_iodev(direction);
                    self.device_list.disable(id);
                    debug!(device = %device, ?direction, "orphaned virtual iodev destroyed");
                }
            }
        }
    }

    fn apply_watch_verdict(&mut self, path: &str, verdict: ConnWatchVerdict) {
        match verdict {
            ConnWatchVerdict::Waiting => {}
            ConnWatchVerdict::GiveUp => {
                if let Some(dev) = self.devices.get_mut(path) {
                    dev.schedule_suspend(0, self.timers.as_ref());
                }
            }
            ConnWatchVerdict::Ready { start_a2dp, suspend_gateway, start_gateway } => {
                if suspend_gateway {
                    for ag in std::mem::take(&mut self.connected_ags) {
                        self.ag_suspend(&ag);
                    }
                }
                if start_a2dp {
                    if let Some(cb) = self.on_start_a2dp.as_mut() {
                        cb(path);
                    }
                }
                if start_gateway {
                    if let Some(cb) = self.on_start_gateway.as_mut() {
                        cb(path);
                    }
                }
            }
        }
    }

    /// Profile switch on the main loop: take the device's iodevs out of
    /// the active list, reconcile active nodes, then re-activate: input
    /// immediately, output after a fixed delay since some headsets fail
    /// playback when A2DP restarts too soon after the HFP stream stops.
    fn switch_profile(&mut self, path: &str, trigger: Direction, enable_dev: bool) {
        let Some(dev) = self.devices.get_mut(path) else { return };
        let mut was_enabled = [false; 2];
        for direction in Direction::ALL {
            if let Some(iodev) = dev.iodev(direction) {
                let id = iodev.lock().id();
                was_enabled[direction.index()] = self.device_list.is_enabled(id);
                self.device_list.disable(id);
            }
        }
        for direction in Direction::ALL {
            let Some(iodev) = dev.iodev(direction).cloned() else { continue };
            let mut io = iodev.lock();
            io.update_active_node();
            let id = io.id();
            drop(io);
            if !(was_enabled[direction.index()] || (enable_dev && direction == trigger)) {
                continue;
            }
            match direction {
                Direction::Input => self.device_list.enable(id),
                Direction::Output => {
                    let timer = self.timers.schedule(
                        Duration::from_millis(PROFILE_SWITCH_DELAY_MS),
                        MainMessage::EnableDevAfterSwitch {
                            device: path.to_string(),
                            direction,
                        },
                    );
                    dev.push_switch_timer(timer);
                }
            }
        }
    }

    /// Drain the main-loop queue until every sender is gone. The host
    /// calls this from its main thread.
    pub fn run(&mut self) {
        let Some(mut receiver) = self.receiver.take() else { return };
        futures::executor::block_on(async {
            while let Some(msg) = receiver.next().await {
                self.handle_message(msg);
            }
        });
    }

    /// Non-blocking drain, for hosts that poll the queue from their own
    /// loop (and for tests).
    pub fn drain_messages(&mut self) {
        let Some(receiver) = self.receiver.as_mut() else { return };
        let mut pending = Vec::new();
        while let Ok(Some(msg)) = receiver.try_next() {
            pending.push(msg);
        }
        for msg in pending {
            self.handle_message(msg);
        }
    }
}
