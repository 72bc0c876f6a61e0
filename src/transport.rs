// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capability traits for the platform Bluetooth pieces this crate consumes:
//! the media transport of a configured A2DP endpoint, and the remote device
//! handle used for profile connection and SCO setup.
//!
//! The host's D-Bus layer implements these against BlueZ; tests implement
//! them with in-memory fakes.

use std::os::unix::io::RawFd;
use thiserror::Error;

/// Errors from the platform transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket cannot accept more data right now. This is back-pressure,
    /// not a failure; callers re-arm the write-ready callback and retry.
    #[error("Transport would block")]
    WouldBlock,

    /// The transport is not acquired, so there is no media socket.
    #[error("Transport not acquired")]
    NotAcquired,

    /// The platform refused the request (e.g. BlueZ denied acquisition).
    #[error("Request refused by the platform")]
    Refused,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// State of a media transport as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Pending,
    Active,
}

/// A configured media transport: the acquirable socket + MTU pair for one
/// (device, profile) combination.
pub trait Transport: Send {
    /// Acquire the media socket. Returns the fd and the write MTU.
    fn acquire(&mut self) -> Result<(RawFd, usize), TransportError>;

    /// Acquire only if the platform already considers the transport pending.
    fn try_acquire(&mut self) -> Result<(), TransportError>;

    /// Release the media socket. `blocking` is set during teardown, where
    /// the release must complete before the transport object goes away.
    fn release(&mut self, blocking: bool);

    /// The acquired socket fd, if any.
    fn fd(&self) -> Option<RawFd>;

    /// Max bytes per write to the media socket.
    fn write_mtu(&self) -> usize;

    /// The codec configuration bytes negotiated for this transport.
    fn configuration(&self) -> &[u8];

    fn state(&self) -> TransportState;

    /// Set the remote volume, range 0..=127 per the AVRCP absolute volume
    /// scale.
    fn set_volume(&mut self, volume: u8);

    /// Bound the kernel send buffer. A small bound (two MTUs) gives a
    /// controllable back-pressure point: writes start returning
    /// [`TransportError::WouldBlock`] once that much data is queued.
    fn set_send_buffer_size(&mut self, bytes: usize) -> Result<(), TransportError>;

    /// Write encoded media to the socket. Returns bytes written, or
    /// [`TransportError::WouldBlock`] when the send buffer is full.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;
}

/// A remote Bluetooth device as exposed by the platform adapter layer.
pub trait RemoteDevice: Send + Sync {
    /// The platform object path identifying this device. Stable for the
    /// lifetime of the device object and used as the registry key.
    fn object_path(&self) -> &str;

    fn address(&self) -> &str;

    /// The advertised device name, as raw bytes. Remote names are not
    /// guaranteed to be valid UTF-8; validation happens at node creation.
    fn name(&self) -> &[u8];

    /// Ask the platform to connect the profile identified by `uuid`.
    fn connect_profile(&self, uuid: &str) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;

    /// Open a SCO link to the device, returning the socket fd.
    fn sco_connect(&self) -> Result<RawFd, TransportError>;

    /// The SCO packet size for an open SCO socket.
    fn sco_mtu(&self, fd: RawFd) -> usize;
}
