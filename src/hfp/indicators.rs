// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The audio gateway's indicator set as reported to the hands-free device.
//!
//! Indicator numbering is part of the wire contract: the position of each
//! indicator in the `AT+CIND=?` response fixes the index used in `+CIEV:`
//! notifications, and qualification suites check both.

/// One AG indicator, in `+CIND` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    BatteryCharge,
    Signal,
    Service,
    Call,
    CallSetup,
    CallHeld,
    Roam,
}

impl Indicator {
    /// The 1-based index used in `+CIEV: <index>,<value>`.
    pub fn index(&self) -> u8 {
        match self {
            Indicator::BatteryCharge => 1,
            Indicator::Signal => 2,
            Indicator::Service => 3,
            Indicator::Call => 4,
            Indicator::CallSetup => 5,
            Indicator::CallHeld => 6,
            Indicator::Roam => 7,
        }
    }
}

/// The supported-indicator list returned for `AT+CIND=?`. Order must match
/// [`Indicator::index`].
pub const CIND_SUPPORTED: &str = "(\"battchg\",(0-5)),(\"signal\",(0-5)),\
(\"service\",(0-1)),(\"call\",(0-1)),(\"callsetup\",(0-3)),\
(\"callheld\",(0-2)),(\"roam\",(0-1))";

/// Current indicator values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgIndicators {
    pub battery: u8,
    pub signal: u8,
    pub service: u8,
    pub call: u8,
    pub callsetup: u8,
    pub callheld: u8,
    pub roam: u8,
}

impl Default for AgIndicators {
    fn default() -> Self {
        // A plugged-in gateway with service: full battery and signal, no
        // call activity.
        Self { battery: 5, signal: 5, service: 1, call: 0, callsetup: 0, callheld: 0, roam: 0 }
    }
}

impl AgIndicators {
    /// Values formatted for the `AT+CIND?` response, in index order.
    pub fn status_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.battery,
            self.signal,
            self.service,
            self.call,
            self.callsetup,
            self.callheld,
            self.roam
        )
    }
}
