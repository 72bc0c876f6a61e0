// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

use crate::transport::TransportError;
use crate::types::Profile;

/// Errors surfaced by the virtual device, the device registry and the
/// profile stream devices.
#[derive(Error, Debug)]
pub enum Error {
    /// The active node of a virtual device has no physical device bound,
    /// e.g. right after the node was orphaned by a removal. Delegated I/O
    /// operations fail with this until the next profile switch.
    #[error("No physical device bound to the active node")]
    NoActiveDevice,

    /// The operation cannot complete until an asynchronous profile switch
    /// finishes; the caller must retry.
    #[error("Profile switch in progress, retry")]
    Again,

    /// A node for this profile already exists on the virtual device.
    #[error("Node for profile {:?} already exists", .0)]
    AlreadyExists(Profile),

    /// No node for this profile exists on the virtual device.
    #[error("No node for profile {:?}", .0)]
    NodeNotFound(Profile),

    /// Removing the node left no valid active profile/device combination;
    /// the caller is responsible for tearing the virtual device down.
    #[error("No usable nodes remain on the virtual device")]
    NoNodesRemain,

    /// No device with this object path is registered.
    #[error("Unknown device {}", .0)]
    UnknownDevice(String),

    /// The device is not open where an open device was required.
    #[error("Device is not open")]
    NotOpen,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Whether this error asks the caller to retry after the pending
    /// asynchronous switch completes.
    pub fn is_retry(&self) -> bool {
        matches!(self, Error::Again)
    }
}
