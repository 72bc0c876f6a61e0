// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The capability interface between this crate and the host server's
//! generic audio device framework.
//!
//! [`PhysicalAudioDevice`] is the role every profile-specific stream device
//! implements and the virtual device delegates to. [`DeviceList`] is the
//! host's active-device list, which profile switching removes devices from
//! and re-adds them to.

use crate::error::Error;

/// Negotiated PCM format of a stream device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub frame_rate: u32,
    pub num_channels: u8,
    pub bytes_per_sample: u8,
}

impl AudioFormat {
    /// Stereo 16-bit at 44.1 kHz, the baseline A2DP SBC format.
    pub const A2DP_DEFAULT: AudioFormat =
        AudioFormat { frame_rate: 44100, num_channels: 2, bytes_per_sample: 2 };

    /// Narrow-band mono 16-bit, the SCO voice format.
    pub const SCO: AudioFormat =
        AudioFormat { frame_rate: 8000, num_channels: 1, bytes_per_sample: 2 };

    /// Bytes per audio frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.num_channels as usize * self.bytes_per_sample as usize
    }
}

/// One profile-specific audio stream implementation (A2DP or HFP/HSP),
/// driven by the audio I/O thread through the buffer protocol.
pub trait PhysicalAudioDevice: Send {
    fn open(&mut self) -> Result<(), Error>;

    fn close(&mut self) -> Result<(), Error>;

    fn is_open(&self) -> bool;

    fn format(&self) -> &AudioFormat;

    /// Query or refresh the formats the device can stream in.
    fn update_supported_formats(&mut self) -> Result<(), Error>;

    /// Frames buffered between the caller and the remote device.
    fn frames_queued(&mut self) -> Result<usize, Error>;

    /// `frames_queued` plus any fixed downstream depth (e.g. socket queue).
    fn delay_frames(&mut self) -> Result<usize, Error>;

    /// Hand out a contiguous write window of at most `frames` frames.
    fn get_buffer(&mut self, frames: usize) -> Result<&mut [u8], Error>;

    /// Commit `frames` frames previously written into the window.
    fn put_buffer(&mut self, frames: usize) -> Result<(), Error>;

    /// Drop any PCM buffered but not yet sent.
    fn flush_buffer(&mut self);

    /// Apply a volume in the 0..=100 scale.
    fn set_volume(&mut self, volume: u8);

    /// Capacity of the device buffer, in frames.
    fn buffer_size_frames(&self) -> usize;
}

/// Identifier of a virtual iodev within the host's device list.
pub type IodevId = u32;

/// The host server's active-device list.
pub trait DeviceList: Send {
    fn enable(&mut self, id: IodevId);
    fn disable(&mut self, id: IodevId);
    fn is_enabled(&self, id: IodevId) -> bool;
}
