// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Deterministic fakes for the capability traits, shared by the module
//! tests. Each fake exposes a cloneable handle onto its recorded state so
//! tests can assert on interactions after moving the fake into the code
//! under test.

use std::collections::{HashSet, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::a2dp::{A2dpEncoder, EncodeError};
use crate::audio_dispatch::AudioDispatch;
use crate::clock::Clock;
use crate::error::Error;
use crate::iodev::{AudioFormat, DeviceList, IodevId, PhysicalAudioDevice};
use crate::message::MainMessage;
use crate::timer::{TimerId, TimerService};
use crate::transport::{RemoteDevice, Transport, TransportError, TransportState};

/// A timer service that records schedules instead of firing them. Tests
/// drive "firing" themselves by handing the recorded message to the code
/// under test.
pub struct FakeTimers {
    state: Mutex<FakeTimerState>,
}

struct FakeTimerState {
    next_id: u64,
    pending: Vec<(TimerId, Duration, MainMessage)>,
}

impl FakeTimers {
    pub fn new() -> Self {
        Self { state: Mutex::new(FakeTimerState { next_id: 1, pending: Vec::new() }) }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn last_scheduled(&self) -> Option<(TimerId, Duration, MainMessage)> {
        self.state.lock().pending.last().cloned()
    }

    pub fn clear(&self) {
        self.state.lock().pending.clear();
    }
}

impl TimerService for FakeTimers {
    fn schedule(&self, delay: Duration, message: MainMessage) -> TimerId {
        let mut state = self.state.lock();
        let id = TimerId(state.next_id);
        state.next_id += 1;
        state.pending.push((id, delay, message));
        id
    }

    fn cancel(&self, id: TimerId) {
        self.state.lock().pending.retain(|(pending_id, _, _)| *pending_id != id);
    }
}

/// A remote device that records profile connection requests.
pub struct FakeRemote {
    object_path: String,
    address: String,
    name: Vec<u8>,
    connect_calls: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new(object_path: &str, address: &str, name: &[u8]) -> Self {
        Self {
            object_path: object_path.to_string(),
            address: address.to_string(),
            name: name.to_vec(),
            connect_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn connect_profile_calls(&self) -> Vec<String> {
        self.connect_calls.lock().clone()
    }
}

impl RemoteDevice for FakeRemote {
    fn object_path(&self) -> &str {
        &self.object_path
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> &[u8] {
        &self.name
    }

    fn connect_profile(&self, uuid: &str) -> Result<(), TransportError> {
        self.connect_calls.lock().push(uuid.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn sco_connect(&self) -> Result<RawFd, TransportError> {
        Ok(7)
    }

    fn sco_mtu(&self, _fd: RawFd) -> usize {
        48
    }
}

/// Recorded state of a [`FakeTransport`]. `capacity` models the kernel
/// send buffer: a write that would push `pending` past it returns
/// `WouldBlock`.
pub struct TransportShared {
    pub fd: RawFd,
    pub mtu: usize,
    pub capacity: usize,
    pub pending: usize,
    pub volume: Option<u8>,
    pub acquired: bool,
    pub released: bool,
    pub forced_write_results: VecDeque<Result<usize, TransportError>>,
}

pub type TransportHandle = Arc<Mutex<TransportShared>>;

pub struct FakeTransport {
    shared: TransportHandle,
    config: Vec<u8>,
}

impl FakeTransport {
    pub fn new(mtu: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(TransportShared {
                fd: 5,
                mtu,
                capacity: 0,
                pending: 0,
                volume: None,
                acquired: false,
                released: false,
                forced_write_results: VecDeque::new(),
            })),
            config: vec![0x21, 0x15, 0x02, 0x33],
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.shared.clone()
    }
}

impl Transport for FakeTransport {
    fn acquire(&mut self) -> Result<(RawFd, usize), TransportError> {
        let mut shared = self.shared.lock();
        shared.acquired = true;
        shared.released = false;
        Ok((shared.fd, shared.mtu))
    }

    fn try_acquire(&mut self) -> Result<(), TransportError> {
        self.acquire().map(|_| ())
    }

    fn release(&mut self, _blocking: bool) {
        let mut shared = self.shared.lock();
        shared.acquired = false;
        shared.released = true;
    }

    fn fd(&self) -> Option<RawFd> {
        let shared = self.shared.lock();
        shared.acquired.then_some(shared.fd)
    }

    fn write_mtu(&self) -> usize {
        self.shared.lock().mtu
    }

    fn configuration(&self) -> &[u8] {
        &self.config
    }

    fn state(&self) -> TransportState {
        if self.shared.lock().acquired {
            TransportState::Active
        } else {
            TransportState::Idle
        }
    }

    fn set_volume(&mut self, volume: u8) {
        self.shared.lock().volume = Some(volume);
    }

    fn set_send_buffer_size(&mut self, bytes: usize) -> Result<(), TransportError> {
        self.shared.lock().capacity = bytes;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut shared = self.shared.lock();
        if let Some(forced) = shared.forced_write_results.pop_front() {
            return forced;
        }
        if !shared.acquired {
            return Err(TransportError::NotAcquired);
        }
        if shared.pending + buf.len() > shared.capacity {
            return Err(TransportError::WouldBlock);
        }
        shared.pending += buf.len();
        Ok(buf.len())
    }
}

/// Recorded state of a [`FakeEncoder`]: every chunk consumed by `encode`
/// (in order) and the bytes currently queued for writing.
pub struct EncoderShared {
    pub encode_inputs: Vec<Vec<u8>>,
    pub queued: Vec<u8>,
}

pub type EncoderHandle = Arc<Mutex<EncoderShared>>;

/// A pass-through codec session: consumes fixed-size blocks into an
/// internal queue, writes them out verbatim.
pub struct FakeEncoder {
    shared: EncoderHandle,
    frame_bytes: usize,
}

impl FakeEncoder {
    pub const QUEUE_CAP: usize = 2048;
    pub const BLOCK: usize = 512;

    pub fn new(format: &AudioFormat) -> Self {
        Self {
            shared: Arc::new(Mutex::new(EncoderShared {
                encode_inputs: Vec::new(),
                queued: Vec::new(),
            })),
            frame_bytes: format.frame_bytes(),
        }
    }

    pub fn handle(&self) -> EncoderHandle {
        self.shared.clone()
    }
}

impl A2dpEncoder for FakeEncoder {
    fn encode(
        &mut self,
        pcm: &[u8],
        frame_bytes: usize,
        _mtu: usize,
    ) -> Result<usize, EncodeError> {
        let mut shared = self.shared.lock();
        let space = Self::QUEUE_CAP - shared.queued.len();
        let consumed = pcm.len().min(Self::BLOCK).min(space);
        let consumed = consumed - consumed % frame_bytes;
        if consumed == 0 {
            return Ok(0);
        }
        let chunk = pcm[..consumed].to_vec();
        shared.encode_inputs.push(chunk.clone());
        shared.queued.extend_from_slice(&chunk);
        Ok(consumed)
    }

    fn write(
        &mut self,
        transport: &mut dyn Transport,
        mtu: usize,
    ) -> Result<usize, TransportError> {
        let chunk: Vec<u8> = {
            let shared = self.shared.lock();
            if shared.queued.is_empty() {
                return Ok(0);
            }
            let len = shared.queued.len().min(mtu);
            shared.queued[..len].to_vec()
        };
        let written = transport.write(&chunk)?;
        self.shared.lock().queued.drain(..written);
        Ok(written)
    }

    fn queued_frames(&self) -> usize {
        self.shared.lock().queued.len() / self.frame_bytes
    }

    fn block_size(&self, _mtu: usize) -> usize {
        Self::BLOCK
    }

    fn drain(&mut self) {
        self.shared.lock().queued.clear();
    }
}

/// Recorded callback registrations of a [`FakeDispatch`].
#[derive(Default)]
pub struct DispatchShared {
    pub added: Vec<RawFd>,
    pub enabled: Vec<(RawFd, bool)>,
    pub removed_sync: Vec<RawFd>,
}

pub type DispatchHandle = Arc<Mutex<DispatchShared>>;

#[derive(Default)]
pub struct FakeDispatch {
    shared: DispatchHandle,
}

impl FakeDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> DispatchHandle {
        self.shared.clone()
    }
}

impl AudioDispatch for FakeDispatch {
    fn add_write_callback(&mut self, fd: RawFd) {
        self.shared.lock().added.push(fd);
    }

    fn enable_callback(&mut self, fd: RawFd, enabled: bool) {
        self.shared.lock().enabled.push((fd, enabled));
    }

    fn rm_callback_sync(&mut self, fd: RawFd) {
        self.shared.lock().removed_sync.push(fd);
    }
}

/// Recorded state of a [`FakeDeviceList`].
#[derive(Default)]
pub struct DeviceListShared {
    pub enabled: HashSet<IodevId>,
}

pub type DeviceListHandle = Arc<Mutex<DeviceListShared>>;

#[derive(Default)]
pub struct FakeDeviceList {
    shared: DeviceListHandle,
}

impl FakeDeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> DeviceListHandle {
        self.shared.clone()
    }
}

impl DeviceList for FakeDeviceList {
    fn enable(&mut self, id: IodevId) {
        self.shared.lock().enabled.insert(id);
    }

    fn disable(&mut self, id: IodevId) {
        self.shared.lock().enabled.remove(&id);
    }

    fn is_enabled(&self, id: IodevId) -> bool {
        self.shared.lock().enabled.contains(&id)
    }
}

/// A clock tests move forward by hand.
pub struct FakeClock {
    now: Mutex<Instant>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { now: Mutex::new(Instant::now()) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Recorded state of a [`FakePhysicalDevice`].
#[derive(Default)]
pub struct PhysicalShared {
    pub open: bool,
    pub volume: Option<u8>,
    pub format_queries: usize,
}

pub type PhysicalHandle = Arc<Mutex<PhysicalShared>>;

/// A stand-in profile stream device for virtual-device tests.
pub struct FakePhysicalDevice {
    shared: PhysicalHandle,
    format: AudioFormat,
    buffer: Vec<u8>,
}

impl FakePhysicalDevice {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            shared: Arc::new(Mutex::new(PhysicalShared::default())),
            buffer: vec![0; 256 * format.frame_bytes()],
            format,
        }
    }

    pub fn handle(&self) -> PhysicalHandle {
        self.shared.clone()
    }
}

impl PhysicalAudioDevice for FakePhysicalDevice {
    fn open(&mut self) -> Result<(), Error> {
        self.shared.lock().open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.shared.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn update_supported_formats(&mut self) -> Result<(), Error> {
        self.shared.lock().format_queries += 1;
        Ok(())
    }

    fn frames_queued(&mut self) -> Result<usize, Error> {
        Ok(0)
    }

    fn delay_frames(&mut self) -> Result<usize, Error> {
        Ok(0)
    }

    fn get_buffer(&mut self, frames: usize) -> Result<&mut [u8], Error> {
        let len = self.buffer.len().min(frames * self.format.frame_bytes());
        Ok(&mut self.buffer[..len])
    }

    fn put_buffer(&mut self, _frames: usize) -> Result<(), Error> {
        Ok(())
    }

    fn flush_buffer(&mut self) {}

    fn set_volume(&mut self, volume: u8) {
        self.shared.lock().volume = Some(volume);
    }

    fn buffer_size_frames(&self) -> usize {
        self.buffer.len() / self.format.frame_bytes()
    }
}
