// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The virtual Bluetooth audio device.
//!
//! One [`BtVirtualIodev`] exists per (device, direction). It owns one node
//! per connected profile, each wrapping the profile-specific stream device,
//! and silently redirects every I/O call to whichever node is active.
//! Profile preference:
//!
//! * Output prefers A2DP whenever legal: an A2DP node exists and no input
//!   device is open. Voice capture and A2DP are mutually exclusive on the
//!   same link.
//! * Input must use HFP/HSP. Asking an input device for formats while the
//!   device-level profile is still A2DP forces the gateway profile and asks
//!   the main loop for an asynchronous switch; the caller retries once the
//!   switch completes.
//!
//! Switching itself is never performed here. This code runs on the audio
//! thread; it only posts [`MainMessage`]s and lets the main loop move
//! devices in and out of the active list.

use std::mem;

use tracing::debug;

use crate::device::SharedDeviceState;
use crate::error::Error;
use crate::iodev::{AudioFormat, IodevId, PhysicalAudioDevice};
use crate::message::{MainMessage, MessageSender};
use crate::types::{Direction, Profile};

/// Node name used when the remote device's advertised name is not valid
/// UTF-8. Sanitization boundary: never assume the remote sends valid text.
pub const DEFAULT_NODE_NAME: &str = "BLUETOOTH";

const DEFAULT_NODE_VOLUME: u8 = 100;

/// One profile's entry on the virtual device. `profile` is a single bit, or
/// empty when the node has been orphaned by a removal; the orphaned active
/// slot is kept as stable storage for display attributes.
struct ProfileNode {
    profile: Profile,
    dev: Option<Box<dyn PhysicalAudioDevice>>,
    name: String,
    volume: u8,
}

/// The profile-multiplexing virtual device for one direction of one remote
/// Bluetooth device.
pub struct BtVirtualIodev {
    id: IodevId,
    device_path: String,
    direction: Direction,
    nodes: Vec<ProfileNode>,
    /// Index of the active node. Always a valid index into `nodes`.
    active: usize,
    shared: SharedDeviceState,
    sender: MessageSender,
    open: bool,
    fallback_format: AudioFormat,
}

impl BtVirtualIodev {
    /// Wrap `dev` as the first node for `profile`. `name` is the remote
    /// device's advertised name, validated here.
    pub fn new(
        id: IodevId,
        device_path: impl Into<String>,
        name: &[u8],
        direction: Direction,
        shared: SharedDeviceState,
        sender: MessageSender,
        dev: Box<dyn PhysicalAudioDevice>,
        profile: Profile,
    ) -> Self {
        let node_name = match std::str::from_utf8(name) {
            Ok(s) if !s.is_empty() => s.to_string(),
            _ => DEFAULT_NODE_NAME.to_string(),
        };
        let fallback_format = *dev.format();
        {
            let mut state = shared.lock();
            if direction == Direction::Input {
                state.input_device_exists = true;
            }
            if direction == Direction::Output && profile == Profile::A2DP_SOURCE {
                state.a2dp_node_exists = true;
            }
            if state.active_profile.is_empty() {
                state.active_profile = if profile.intersects(Profile::AUDIO_GATEWAY) {
                    Profile::AUDIO_GATEWAY
                } else {
                    profile
                };
            }
        }
        Self {
            id,
            device_path: device_path.into(),
            direction,
            nodes: vec![ProfileNode {
                profile,
                dev: Some(dev),
                name: node_name,
                volume: DEFAULT_NODE_VOLUME,
            }],
            active: 0,
            shared,
            sender,
            open: false,
            fallback_format,
        }
    }

    pub fn id(&self) -> IodevId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The profile bit of the active node. Empty when orphaned.
    pub fn active_node_profile(&self) -> Profile {
        self.nodes[self.active].profile
    }

    /// Display name of the active node.
    pub fn active_node_name(&self) -> &str {
        &self.nodes[self.active].name
    }

    pub fn has_node(&self, profile: Profile) -> bool {
        self.nodes.iter().any(|n| n.profile == profile)
    }

    /// True when no node has a stream device bound, i.e. only the orphaned
    /// active slot remains after removals.
    pub fn is_orphaned(&self) -> bool {
        self.nodes.iter().all(|n| n.dev.is_none())
    }

    fn active_dev(&mut self) -> Result<&mut Box<dyn PhysicalAudioDevice>, Error> {
        self.nodes[self.active].dev.as_mut().ok_or(Error::NoActiveDevice)
    }

    fn can_switch_to_a2dp(state: &crate::device::DeviceShared) -> bool {
        state.a2dp_node_exists && (!state.input_device_exists || !state.input_device_open)
    }

    /// Add a node for another profile. An A2DP-source node appended to an
    /// output device takes over immediately when A2DP is currently legal.
    pub fn append(
        &mut self,
        dev: Box<dyn PhysicalAudioDevice>,
        profile: Profile,
    ) -> Result<(), Error> {
        if self.nodes.iter().any(|n| n.profile == profile) {
            return Err(Error::AlreadyExists(profile));
        }
        let name = self.nodes[self.active].name.clone();
        self.nodes.push(ProfileNode {
            profile,
            dev: Some(dev),
            name,
            volume: DEFAULT_NODE_VOLUME,
        });
        if profile == Profile::A2DP_SOURCE && self.direction == Direction::Output {
            let mut state = self.shared.lock();
            state.a2dp_node_exists = true;
            if Self::can_switch_to_a2dp(&state) {
                state.active_profile = Profile::A2DP_SOURCE;
                drop(state);
                debug!(device = %self.device_path, "new A2DP node preferred, requesting switch");
                self.sender.post(MainMessage::SwitchProfile {
                    device: self.device_path.clone(),
                    direction: self.direction,
                });
            }
        }
        Ok(())
    }

    /// Dry run of [`BtVirtualIodev::remove`]: the profile that would become
    /// active if the node for `profile` were removed, without mutating any
    /// state. Empty means no usable node would remain and the virtual
    /// device should be destroyed.
    pub fn try_remove(&self, profile: Profile) -> Result<Profile, Error> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.profile == profile)
            .ok_or(Error::NodeNotFound(profile))?;
        if pos != self.active {
            return Ok(self.nodes[self.active].profile);
        }
        Ok(self
            .nodes
            .iter()
            .enumerate()
            .find(|(i, n)| *i != pos && n.dev.is_some() && !n.profile.is_empty())
            .map(|(_, n)| n.profile)
            .unwrap_or_else(Profile::empty))
    }

    /// Remove the node for `profile`. Removing the active node orphans the
    /// slot (it keeps display attributes) and adopts a surviving node's
    /// profile and device. Errors with [`Error::NoNodesRemain`] when nothing
    /// usable remains; the caller then tears the virtual device down.
    pub fn remove(&mut self, profile: Profile) -> Result<(), Error> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.profile == profile)
            .ok_or(Error::NodeNotFound(profile))?;
        if profile == Profile::A2DP_SOURCE && self.direction == Direction::Output {
            self.shared.lock().a2dp_node_exists = false;
        }
        if pos != self.active {
            self.nodes.remove(pos);
            if pos < self.active {
                self.active -= 1;
            }
            return Ok(());
        }

        self.nodes[pos].profile = Profile::empty();
        self.nodes[pos].dev = None;
        let donor = self.nodes.iter().position(|n| n.dev.is_some() && !n.profile.is_empty());
        match donor {
            Some(d) => {
                let donor_node = self.nodes.remove(d);
                if d < self.active {
                    self.active -= 1;
                }
                let slot = &mut self.nodes[self.active];
                slot.profile = donor_node.profile;
                slot.dev = donor_node.dev;
                let volume = slot.volume;
                if let Some(dev) = slot.dev.as_mut() {
                    dev.set_volume(volume);
                }
                Ok(())
            }
            None => Err(Error::NoNodesRemain),
        }
    }

    /// Reconcile the active node with the device-level active profile: if
    /// the active node's profile is no longer active, adopt a node whose
    /// profile is, then re-apply the node volume onto the adopted device.
    pub fn update_active_node(&mut self) {
        let active_profile = self.shared.lock().active_profile;
        if self.nodes[self.active].profile.intersects(active_profile) {
            return;
        }
        let pos = match self
            .nodes
            .iter()
            .position(|n| n.profile.intersects(active_profile) && n.dev.is_some())
        {
            Some(pos) => pos,
            None => return,
        };
        debug_assert_ne!(pos, self.active);
        let (first, second) = if pos < self.active {
            let (l, r) = self.nodes.split_at_mut(self.active);
            (&mut l[pos], &mut r[0])
        } else {
            let (l, r) = self.nodes.split_at_mut(pos);
            (&mut l[self.active], &mut r[0])
        };
        mem::swap(&mut first.profile, &mut second.profile);
        mem::swap(&mut first.dev, &mut second.dev);

        let volume = self.nodes[self.active].volume;
        if let Some(dev) = self.nodes[self.active].dev.as_mut() {
            dev.set_volume(volume);
        }
    }
}

impl PhysicalAudioDevice for BtVirtualIodev {
    fn open(&mut self) -> Result<(), Error> {
        self.active_dev()?.open()?;
        self.open = true;
        if self.direction == Direction::Input {
            self.shared.lock().input_device_open = true;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        // The active slot may have been orphaned while the device was open
        // (removal never destroys a busy device). The virtual device still
        // transitions to closed so the main loop can destroy it.
        let result = match self.nodes[self.active].dev.as_mut() {
            Some(dev) => dev.close(),
            None => Ok(()),
        };
        self.open = false;
        if self.direction == Direction::Input {
            let mut state = self.shared.lock();
            state.input_device_open = false;
            // Closing voice capture snaps output back to A2DP when the
            // device has an A2DP-capable output node.
            if state.active_profile.intersects(Profile::AUDIO_GATEWAY) && state.a2dp_node_exists {
                state.active_profile = Profile::A2DP_SOURCE;
                drop(state);
                self.sender.post(MainMessage::SwitchProfile {
                    device: self.device_path.clone(),
                    direction: self.direction,
                });
            }
        }
        if self.is_orphaned() {
            self.sender.post(MainMessage::DestroyOrphanedIodev {
                device: self.device_path.clone(),
                direction: self.direction,
            });
        }
        result
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn format(&self) -> &AudioFormat {
        match self.nodes[self.active].dev.as_ref() {
            Some(dev) => dev.format(),
            None => &self.fallback_format,
        }
    }

    fn update_supported_formats(&mut self) -> Result<(), Error> {
        if self.direction == Direction::Input {
            let mut state = self.shared.lock();
            if state.active_profile.intersects(Profile::A2DP_SOURCE | Profile::A2DP_SINK) {
                // A2DP never serves capture. Force the gateway profile and
                // have the main loop switch; the caller retries afterwards.
                state.active_profile = Profile::AUDIO_GATEWAY;
                drop(state);
                self.sender.post(MainMessage::SwitchProfileEnableDev {
                    device: self.device_path.clone(),
                    direction: self.direction,
                });
                return Err(Error::Again);
            }
        }
        self.active_dev()?.update_supported_formats()
    }

    fn frames_queued(&mut self) -> Result<usize, Error> {
        self.active_dev()?.frames_queued()
    }

    fn delay_frames(&mut self) -> Result<usize, Error> {
        self.active_dev()?.delay_frames()
    }

    fn get_buffer(&mut self, frames: usize) -> Result<&mut [u8], Error> {
        self.active_dev()?.get_buffer(frames)
    }

    fn put_buffer(&mut self, frames: usize) -> Result<(), Error> {
        self.active_dev()?.put_buffer(frames)
    }

    fn flush_buffer(&mut self) {
        if let Ok(dev) = self.active_dev() {
            dev.flush_buffer();
        }
    }

    fn set_volume(&mut self, volume: u8) {
        self.nodes[self.active].volume = volume;
        if let Some(dev) = self.nodes[self.active].dev.as_mut() {
            dev.set_volume(volume);
        }
    }

    fn buffer_size_frames(&self) -> usize {
        match self.nodes[self.active].dev.as_ref() {
            Some(dev) => dev.buffer_size_frames(),
            None => 0,
        }
    }
}
