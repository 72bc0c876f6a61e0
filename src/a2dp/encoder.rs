// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The A2DP codec session, consumed as a black box.
//!
//! The session owns the packetization state: PCM pushed in with
//! [`A2dpEncoder::encode`] accumulates into media packets that
//! [`A2dpEncoder::write`] sends to the transport. Nothing here knows about
//! SBC internals; the host links a concrete codec implementation.

use thiserror::Error;

use crate::transport::{Transport, TransportError};

/// Hard codec failure. Distinct from "no room for another block", which
/// `encode` reports as zero bytes consumed.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Codec rejected the input: {}", .0)]
    Codec(String),
}

/// One configured A2DP codec session.
pub trait A2dpEncoder: Send {
    /// Feed PCM to the session. Returns the number of bytes consumed from
    /// `pcm`; zero means the session has no room for another encoded block
    /// (or `pcm` is too short to produce one) and the caller should write
    /// out queued packets first.
    fn encode(&mut self, pcm: &[u8], frame_bytes: usize, mtu: usize)
        -> Result<usize, EncodeError>;

    /// Write queued packets to the transport, at most one socket write.
    /// Returns bytes written; zero when nothing is queued. Back-pressure is
    /// reported as [`TransportError::WouldBlock`].
    fn write(&mut self, transport: &mut dyn Transport, mtu: usize)
        -> Result<usize, TransportError>;

    /// PCM frames buffered inside the session (encoded but unsent).
    fn queued_frames(&self) -> usize;

    /// PCM bytes consumed per encoded block for the given MTU.
    fn block_size(&self, mtu: usize) -> usize;

    /// Drop all queued data.
    fn drain(&mut self);
}
