// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Common identifiers shared across the crate: the profile bitset, stream
//! direction, and the service UUIDs used when asking the adapter to connect
//! a specific profile.

use bitflags::bitflags;

bitflags! {
    /// Bluetooth audio profiles a remote device can advertise or have
    /// connected. One bit per (profile, role) pair.
    pub struct Profile: u32 {
        const A2DP_SOURCE      = 1 << 0;
        const A2DP_SINK        = 1 << 1;
        const AVRCP_REMOTE     = 1 << 2;
        const AVRCP_TARGET     = 1 << 3;
        const HFP_HANDSFREE    = 1 << 4;
        const HFP_AUDIOGATEWAY = 1 << 5;
        const HSP_HEADSET      = 1 << 6;
        const HSP_AUDIOGATEWAY = 1 << 7;
        /// The local gateway roles for voice audio. The device-level active
        /// profile is set to this pair (rather than a single bit) when voice
        /// capture is forced, since either profile can carry the SCO link.
        const AUDIO_GATEWAY = Self::HFP_AUDIOGATEWAY.bits | Self::HSP_AUDIOGATEWAY.bits;
    }
}

/// Service class UUID of the remote A2DP sink role.
pub const A2DP_SINK_UUID: &str = "0000110b-0000-1000-8000-00805f9b34fb";
/// Service class UUID of the remote A2DP source role.
pub const A2DP_SOURCE_UUID: &str = "0000110a-0000-1000-8000-00805f9b34fb";
/// Service class UUID of the remote HFP hands-free role.
pub const HFP_HF_UUID: &str = "0000111e-0000-1000-8000-00805f9b34fb";
/// Service class UUID of the remote HSP headset role.
pub const HSP_HS_UUID: &str = "00001108-0000-1000-8000-00805f9b34fb";

impl Profile {
    /// Map a remote service class UUID to the profile bit it advertises.
    pub fn from_uuid(uuid: &str) -> Option<Profile> {
        match uuid {
            A2DP_SOURCE_UUID => Some(Profile::A2DP_SOURCE),
            A2DP_SINK_UUID => Some(Profile::A2DP_SINK),
            "0000110c-0000-1000-8000-00805f9b34fb" => Some(Profile::AVRCP_TARGET),
            "0000110e-0000-1000-8000-00805f9b34fb" => Some(Profile::AVRCP_REMOTE),
            HFP_HF_UUID => Some(Profile::HFP_HANDSFREE),
            "0000111f-0000-1000-8000-00805f9b34fb" => Some(Profile::HFP_AUDIOGATEWAY),
            HSP_HS_UUID => Some(Profile::HSP_HEADSET),
            "00001112-0000-1000-8000-00805f9b34fb" => Some(Profile::HSP_AUDIOGATEWAY),
            _ => None,
        }
    }
}

/// Direction of an audio stream, from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    /// Index into per-direction arrays.
    pub fn index(self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_pair_covers_both_roles() {
        assert!(Profile::AUDIO_GATEWAY.contains(Profile::HFP_AUDIOGATEWAY));
        assert!(Profile::AUDIO_GATEWAY.contains(Profile::HSP_AUDIOGATEWAY));
        assert!(!Profile::AUDIO_GATEWAY.intersects(Profile::A2DP_SOURCE));
    }

    #[test]
    fn uuid_mapping() {
        assert_eq!(Profile::from_uuid(A2DP_SINK_UUID), Some(Profile::A2DP_SINK));
        assert_eq!(Profile::from_uuid(HFP_HF_UUID), Some(Profile::HFP_HANDSFREE));
        assert_eq!(Profile::from_uuid("not-a-uuid"), None);
    }
}
