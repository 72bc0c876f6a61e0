// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The HFP/HSP voice stream device: narrow-band PCM over a SCO link.
//!
//! Unlike A2DP there is no codec session and no back-pressure dance; the
//! SCO link is isochronous and the audio thread's pump moves fixed-size
//! packets. This device stages PCM in a ring and exposes the SCO socket
//! for the pump.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::iodev::{AudioFormat, PhysicalAudioDevice};
use crate::pcm_buffer::PcmBuffer;
use crate::transport::RemoteDevice;
use crate::types::Direction;

/// Staging capacity, in frames. Half a second of narrow-band audio.
pub const SCO_PCM_BUF_FRAMES: usize = 4096;

/// One direction of the voice stream for one remote device.
pub struct HfpStreamDevice {
    remote: Arc<dyn RemoteDevice>,
    direction: Direction,
    format: AudioFormat,
    pcm_buf: PcmBuffer,
    fd: Option<RawFd>,
    mtu: usize,
    open: bool,
    volume: u8,
}

impl HfpStreamDevice {
    pub fn new(remote: Arc<dyn RemoteDevice>, direction: Direction) -> Self {
        let format = AudioFormat::SCO;
        let pcm_buf = PcmBuffer::new(SCO_PCM_BUF_FRAMES * format.frame_bytes());
        Self { remote, direction, format, pcm_buf, fd: None, mtu: 0, open: false, volume: 100 }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The SCO socket, for the audio thread's packet pump.
    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// SCO packet size in bytes.
    pub fn packet_size(&self) -> usize {
        self.mtu
    }

    /// Volume last applied through the node, 0..=100. The gateway pushes
    /// this to the hands-free side over the SLC, not through the socket.
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Drain staged playback PCM into `dest` (the pump's packet buffer).
    /// Returns bytes copied.
    pub fn read_playback(&mut self, dest: &mut [u8]) -> usize {
        let readable = self.pcm_buf.readable();
        let n = readable.len().min(dest.len());
        dest[..n].copy_from_slice(&readable[..n]);
        self.pcm_buf.commit_read(n);
        n
    }

    /// Stage captured PCM from the SCO pump. Returns bytes accepted;
    /// overflow is dropped, as stale capture is worse than a gap.
    pub fn write_capture(&mut self, src: &[u8]) -> usize {
        let writable = self.pcm_buf.writable();
        let n = writable.len().min(src.len());
        writable[..n].copy_from_slice(&src[..n]);
        self.pcm_buf.commit_write(n);
        n
    }
}

impl PhysicalAudioDevice for HfpStreamDevice {
    fn open(&mut self) -> Result<(), Error> {
        let fd = self.remote.sco_connect()?;
        self.mtu = self.remote.sco_mtu(fd);
        self.fd = Some(fd);
        self.pcm_buf.reset();
        self.open = true;
        debug!(
            device = %self.remote.object_path(),
            direction = ?self.direction,
            mtu = self.mtu,
            "SCO stream opened"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.fd = None;
        self.pcm_buf.reset();
        self.open = false;
        debug!(device = %self.remote.object_path(), direction = ?self.direction, "SCO stream closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn update_supported_formats(&mut self) -> Result<(), Error> {
        // SCO is fixed narrow-band mono; nothing to negotiate.
        Ok(())
    }

    fn frames_queued(&mut self) -> Result<usize, Error> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        Ok(self.pcm_buf.level() / self.format.frame_bytes())
    }

    fn delay_frames(&mut self) -> Result<usize, Error> {
        // One in-flight SCO packet on top of the staged level.
        Ok(self.frames_queued()? + self.mtu / self.format.frame_bytes())
    }

    fn get_buffer(&mut self, frames: usize) -> Result<&mut [u8], Error> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        let frame_bytes = self.format.frame_bytes();
        let window = self.pcm_buf.writable();
        let len = window.len().min(frames * frame_bytes);
        let len = len - len % frame_bytes;
        Ok(&mut window[..len])
    }

    fn put_buffer(&mut self, frames: usize) -> Result<(), Error> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        self.pcm_buf.commit_write(frames * self.format.frame_bytes());
        Ok(())
    }

    fn flush_buffer(&mut self) {
        self.pcm_buf.reset();
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
    }

    fn buffer_size_frames(&self) -> usize {
        self.pcm_buf.capacity() / self.format.frame_bytes()
    }
}
