// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Registration of write-readiness callbacks with the audio I/O thread.
//!
//! The audio thread owns the poll loop; stream devices only register their
//! socket and toggle interest. When the socket becomes writable the audio
//! thread calls back into the owning device's flush path.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;

/// Write-readiness callback registration with the audio I/O thread's poll
/// loop.
pub trait AudioDispatch: Send {
    /// Register `fd` for write-readiness callbacks. Registration starts
    /// disabled; interest is toggled with [`AudioDispatch::enable_callback`].
    fn add_write_callback(&mut self, fd: RawFd);

    /// Enable or disable write-readiness callbacks for a registered fd.
    /// Purely event-driven: a disabled callback is never polled.
    fn enable_callback(&mut self, fd: RawFd, enabled: bool);

    /// Remove the callback for `fd` and do not return until the audio
    /// thread is guaranteed not to be mid-callback. Callers free buffers
    /// the callback touches immediately after this returns, so the
    /// synchronous acknowledgement is load-bearing.
    fn rm_callback_sync(&mut self, fd: RawFd);
}

/// The dispatch handle shared between the main thread (device setup and
/// teardown) and stream devices.
pub type SharedDispatch = Arc<Mutex<dyn AudioDispatch>>;
