// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bluetooth audio profile multiplexing for an audio server.
//!
//! A remote Bluetooth audio device usually speaks more than one profile: A2DP
//! for high quality playback and HFP/HSP for bidirectional voice. This crate
//! presents one logical audio device per direction and direction-aware
//! switching between the profile-specific stream implementations while audio
//! streams may be open:
//!
//! * [`bt_io::BtVirtualIodev`] is the virtual device that owns one node per
//!   connected profile and redirects I/O to the preferred one.
//! * [`device::BtDevice`] holds per-remote-device profile state, including
//!   the connection watcher that retries profile connections after the link
//!   comes up.
//! * [`a2dp::A2dpStreamDevice`] is the buffered, back-pressure-aware A2DP
//!   stream.
//! * [`hfp::SlcChannel`] is the AT-command service level connection driving
//!   call state indicators for HFP/HSP.
//! * [`manager::BtAudioManager`] is the main-loop context that owns the
//!   device registry and serializes cross-thread requests.
//!
//! Platform pieces (BlueZ media transports, the host's device list, the
//! audio thread poll loop, timers, and the A2DP codec) are consumed through
//! the traits in [`transport`], [`iodev`], [`audio_dispatch`], [`timer`] and
//! [`a2dp::encoder`], so the state machines here are deterministic and
//! testable in isolation.

pub mod a2dp;
pub mod audio_dispatch;
pub mod bt_io;
pub mod clock;
pub mod device;
pub mod error;
pub mod hfp;
pub mod iodev;
pub mod manager;
pub mod message;
pub mod pcm_buffer;
pub mod timer;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::Error;
pub use types::{Direction, Profile};
