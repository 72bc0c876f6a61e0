// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The A2DP output stream device.
//!
//! PCM committed through the buffer protocol is staged in a ring buffer,
//! encoded, and flushed to the media socket. The socket's send buffer is
//! bounded to two MTUs so a slow or stalled link surfaces as
//! [`TransportError::WouldBlock`] quickly; flushing then hands off to the
//! audio thread's write-readiness callback and arms a grace-period suspend
//! in case the link never drains.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::a2dp::encoder::A2dpEncoder;
use crate::audio_dispatch::SharedDispatch;
use crate::clock::Clock;
use crate::error::Error;
use crate::iodev::{AudioFormat, PhysicalAudioDevice};
use crate::message::{MainMessage, MessageSender};
use crate::pcm_buffer::PcmBuffer;
use crate::transport::{Transport, TransportError};

/// Capacity of the PCM staging buffer, in frames.
pub const PCM_BUF_MAX_SIZE_FRAMES: usize = 4096 * 4;

/// How long a blocked media socket may stay blocked before the device is
/// suspended.
pub const SUSPEND_GRACE_MS: u64 = 5000;

/// An A2DP source stream bound to one remote device's media transport.
pub struct A2dpStreamDevice {
    device_path: String,
    transport: Box<dyn Transport>,
    encoder: Box<dyn A2dpEncoder>,
    format: AudioFormat,
    pcm_buf: PcmBuffer,
    mtu: usize,
    fd: Option<RawFd>,
    /// Fixed depth of the kernel send buffer, in frames. Writes beyond this
    /// block, so it is also the flush target level.
    sock_depth_frames: usize,
    /// Total frames committed by the audio thread since open.
    bt_written_frames: u64,
    /// When streaming started, i.e. when the socket pre-fill completed.
    stream_start: Instant,
    pre_fill_done: bool,
    open: bool,
    volume: u8,
    dispatch: SharedDispatch,
    sender: MessageSender,
    clock: Arc<dyn Clock>,
}

impl A2dpStreamDevice {
    pub fn new(
        device_path: impl Into<String>,
        transport: Box<dyn Transport>,
        encoder: Box<dyn A2dpEncoder>,
        dispatch: SharedDispatch,
        sender: MessageSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let format = AudioFormat::A2DP_DEFAULT;
        let pcm_buf = PcmBuffer::new(PCM_BUF_MAX_SIZE_FRAMES * format.frame_bytes());
        Self {
            device_path: device_path.into(),
            transport,
            encoder,
            format,
            pcm_buf,
            mtu: 0,
            fd: None,
            sock_depth_frames: 0,
            bt_written_frames: 0,
            stream_start: clock.now(),
            pre_fill_done: false,
            open: false,
            volume: 100,
            dispatch,
            sender,
            clock,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Frames sitting between the buffer protocol and the socket: staged
    /// PCM plus whatever the encoder has queued.
    fn local_level_frames(&self) -> usize {
        self.encoder.queued_frames() + self.pcm_buf.level() / self.format.frame_bytes()
    }

    /// Stuff the freshly-acquired socket with silence up to its send buffer
    /// bound. Starting from a full send buffer means the steady-state
    /// writes immediately see real back-pressure, which is what paces the
    /// stream to the link.
    ///
    /// Runs on the pump path, so hard I/O errors schedule an immediate
    /// suspend instead of failing the commit.
    fn pre_fill_socket(&mut self) {
        let frame_bytes = self.format.frame_bytes();
        let silence = vec![0u8; self.encoder.block_size(self.mtu).max(frame_bytes)];
        let target = 2 * self.mtu;
        let mut written = 0;
        while written < target {
            if let Err(e) = self.encoder.encode(&silence, frame_bytes, self.mtu) {
                warn!(device = %self.device_path, "A2DP encode failed during pre-fill: {e}");
                return;
            }
            match self.encoder.write(&mut *self.transport, self.mtu) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(TransportError::WouldBlock) => break,
                Err(e) => {
                    warn!(device = %self.device_path, "A2DP pre-fill write failed: {e}");
                    self.sender
                        .post(MainMessage::CancelSuspend { device: self.device_path.clone() });
                    self.sender.post(MainMessage::ScheduleSuspend {
                        device: self.device_path.clone(),
                        delay_ms: 0,
                    });
                    return;
                }
            }
        }
    }

    /// Encode staged PCM and push it to the socket. Runs until the local
    /// level drops to the socket depth, the socket pushes back, or the
    /// write fails.
    ///
    /// Called from `put_buffer` and from the audio thread's write-readiness
    /// callback.
    pub fn flush_data(&mut self) {
        let Some(fd) = self.fd else { return };
        let frame_bytes = self.format.frame_bytes();
        loop {
            loop {
                if self.pcm_buf.readable().is_empty() {
                    break;
                }
                let consumed =
                    match self.encoder.encode(self.pcm_buf.readable(), frame_bytes, self.mtu) {
                        Ok(n) => n,
                        Err(e) => {
                            warn!(device = %self.device_path, "A2DP encode failed: {e}");
                            return;
                        }
                    };
                if consumed == 0 {
                    break;
                }
                self.pcm_buf.commit_read(consumed);
            }

            match self.encoder.write(&mut *self.transport, self.mtu) {
                Ok(written) => {
                    self.sender
                        .post(MainMessage::CancelSuspend { device: self.device_path.clone() });
                    if written > 0 && self.local_level_frames() > self.sock_depth_frames {
                        continue;
                    }
                    self.dispatch.lock().enable_callback(fd, false);
                    return;
                }
                Err(TransportError::WouldBlock) => {
                    // Let the link drain for a grace period before giving
                    // up on the device; the next successful write cancels.
                    self.sender.post(MainMessage::ScheduleSuspend {
                        device: self.device_path.clone(),
                        delay_ms: SUSPEND_GRACE_MS,
                    });
                    self.dispatch.lock().enable_callback(fd, true);
                    return;
                }
                Err(e) => {
                    warn!(device = %self.device_path, "A2DP socket write failed: {e}");
                    self.sender
                        .post(MainMessage::CancelSuspend { device: self.device_path.clone() });
                    self.sender.post(MainMessage::ScheduleSuspend {
                        device: self.device_path.clone(),
                        delay_ms: 0,
                    });
                    return;
                }
            }
        }
    }
}

impl PhysicalAudioDevice for A2dpStreamDevice {
    fn open(&mut self) -> Result<(), Error> {
        let (fd, mtu) = self.transport.acquire()?;
        self.fd = Some(fd);
        self.mtu = mtu;
        self.sock_depth_frames = 2 * mtu / self.format.frame_bytes();
        // Bound the kernel queue so back-pressure shows up as WouldBlock
        // after two packets instead of seconds of buffered audio.
        self.transport.set_send_buffer_size(2 * mtu)?;
        self.transport.set_volume((self.volume as u32 * 127 / 100) as u8);

        self.dispatch.lock().add_write_callback(fd);
        self.dispatch.lock().enable_callback(fd, false);

        self.pcm_buf.reset();
        self.encoder.drain();
        self.bt_written_frames = 0;
        self.pre_fill_done = false;
        self.open = true;
        debug!(device = %self.device_path, mtu, "A2DP stream opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(fd) = self.fd.take() {
            // Must complete before buffers are reset: the audio thread may
            // be inside the write callback touching them.
            self.dispatch.lock().rm_callback_sync(fd);
        }
        self.transport.release(false);
        self.sender.post(MainMessage::CancelSuspend { device: self.device_path.clone() });
        self.pcm_buf.reset();
        self.encoder.drain();
        self.open = false;
        debug!(device = %self.device_path, "A2DP stream closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn update_supported_formats(&mut self) -> Result<(), Error> {
        // The format is fixed by the transport's codec configuration at
        // acquisition; nothing to refresh between opens.
        Ok(())
    }

    fn frames_queued(&mut self) -> Result<usize, Error> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        // Wall-clock estimate: everything committed minus what the link
        // must have played out by now. The local estimate is a floor, and
        // the buffer capacity a ceiling; the wall-clock term dominates when
        // writes run ahead of real time.
        let elapsed = self.clock.now().saturating_duration_since(self.stream_start);
        let played =
            (elapsed.as_micros() * self.format.frame_rate as u128 / 1_000_000) as u64;
        let estimated = self.bt_written_frames.saturating_sub(played) as usize;
        Ok(estimated.max(self.local_level_frames()).min(self.buffer_size_frames()))
    }

    fn delay_frames(&mut self) -> Result<usize, Error> {
        Ok(self.frames_queued()? + self.sock_depth_frames)
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
        self.bt_written_frames += frames as u64;
        if !self.pre_fill_done {
            self.pre_fill_socket();
            self.pre_fill_done = true;
            self.stream_start = self.clock.now();
        }
        self.flush_data();
        Ok(())
    }

    fn flush_buffer(&mut self) {
        self.pcm_buf.reset();
        self.encoder.drain();
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        if self.open {
            self.transport.set_volume((self.volume as u32 * 127 / 100) as u8);
        }
    }

    fn buffer_size_frames(&self) -> usize {
        self.pcm_buf.capacity() / self.format.frame_bytes()
    }
}
