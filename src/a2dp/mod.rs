// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A2DP streaming: the codec session contract and the buffered,
//! back-pressure-aware stream device.

pub mod encoder;
pub mod iodev;

pub use encoder::{A2dpEncoder, EncodeError};
pub use iodev::{A2dpStreamDevice, PCM_BUF_MAX_SIZE_FRAMES};
