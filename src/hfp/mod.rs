// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! HFP/HSP audio gateway support: the AT-command service level connection
//! and the SCO voice stream device.

pub mod indicators;
pub mod iodev;
pub mod slc;

pub use indicators::{AgIndicators, Indicator};
pub use iodev::HfpStreamDevice;
pub use slc::{SlcChannel, SlcError, SlcEvent, AG_SUPPORTED_FEATURES};
