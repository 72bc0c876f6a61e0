// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A bounded byte ring buffer for staging PCM between the buffer protocol
//! and the encoder. Windows handed out are always contiguous; a window that
//! would wrap is clipped at the end of the storage.

pub struct PcmBuffer {
    data: Box<[u8]>,
    read_idx: usize,
    level: usize,
}

impl PcmBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { data: vec![0; capacity].into_boxed_slice(), read_idx: 0, level: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently buffered.
    pub fn level(&self) -> usize {
        self.level
    }

    /// The contiguous writable window. May be shorter than the total free
    /// space when the free region wraps.
    pub fn writable(&mut self) -> &mut [u8] {
        let cap = self.data.len();
        let write_idx = (self.read_idx + self.level) % cap;
        let len = (cap - self.level).min(cap - write_idx);
        &mut self.data[write_idx..write_idx + len]
    }

    /// Commit `len` bytes written into the window from [`PcmBuffer::writable`].
    pub fn commit_write(&mut self, len: usize) {
        debug_assert!(len <= self.capacity() - self.level);
        self.level += len;
    }

    /// The contiguous readable window.
    pub fn readable(&self) -> &[u8] {
        let len = self.level.min(self.data.len() - self.read_idx);
        &self.data[self.read_idx..self.read_idx + len]
    }

    /// Consume `len` bytes from the readable window.
    pub fn commit_read(&mut self, len: usize) {
        debug_assert!(len <= self.level);
        self.read_idx = (self.read_idx + len) % self.data.len();
        self.level -= len;
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.read_idx = 0;
        self.level = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let mut buf = PcmBuffer::new(8);
        let w = buf.writable();
        assert_eq!(w.len(), 8);
        w[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.commit_write(4);

        assert_eq!(buf.level(), 4);
        assert_eq!(buf.readable(), &[1, 2, 3, 4]);
        buf.commit_read(2);
        assert_eq!(buf.readable(), &[3, 4]);
        assert_eq!(buf.level(), 2);
    }

    #[test]
    fn windows_clip_at_wrap_point() {
        let mut buf = PcmBuffer::new(8);
        buf.writable()[..6].copy_from_slice(&[0; 6]);
        buf.commit_write(6);
        buf.commit_read(6);

        // Free space is 8 bytes but only 2 are contiguous before the wrap.
        assert_eq!(buf.writable().len(), 2);
        buf.commit_write(2);
        assert_eq!(buf.writable().len(), 6);
        buf.commit_write(6);
        assert_eq!(buf.level(), 8);
        assert_eq!(buf.writable().len(), 0);

        // Readable clips at the end of storage too.
        assert_eq!(buf.readable().len(), 2);
        buf.commit_read(2);
        assert_eq!(buf.readable().len(), 6);
    }

    #[test]
    fn reset_empties_the_buffer() {
        let mut buf = PcmBuffer::new(4);
        buf.commit_write(3);
        buf.reset();
        assert_eq!(buf.level(), 0);
        assert_eq!(buf.writable().len(), 4);
    }
}
