//! Non-owning byte region views used by send and receive calls.
//!
//! [`MutableBuffer`] is a receive target, [`ConstBuffer`] a send source.
//! Both borrow their storage, so any contiguous byte container (array,
//! `Vec`, slice, string) can back a transfer without copying.

use std::mem::MaybeUninit;
use std::ops::Deref;

/// Writable view over a contiguous byte region.
#[derive(Debug)]
pub struct MutableBuffer<'a> {
    data: &'a mut [u8],
}

impl<'a> MutableBuffer<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data
    }

    /// Shrink the view to its first `n` bytes (clamped to the current length).
    pub fn truncate(self, n: usize) -> MutableBuffer<'a> {
        let data = self.data;
        let n = n.min(data.len());
        MutableBuffer {
            data: &mut data[..n],
        }
    }

    /// Give up write access, e.g. to send back what was just received.
    pub fn freeze(self) -> ConstBuffer<'a> {
        ConstBuffer { data: self.data }
    }

    /// View the region as possibly-uninitialized bytes for `recv`-style calls.
    pub(crate) fn as_uninit(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: `u8` and `MaybeUninit<u8>` share a layout, and the socket
        // calls this is handed to only ever write initialized bytes.
        let ptr: *mut [u8] = &mut *self.data;
        unsafe { &mut *(ptr as *mut [MaybeUninit<u8>]) }
    }
}

impl Deref for MutableBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl<'a> From<&'a mut [u8]> for MutableBuffer<'a> {
    fn from(data: &'a mut [u8]) -> Self {
        Self::new(data)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for MutableBuffer<'a> {
    fn from(data: &'a mut [u8; N]) -> Self {
        Self::new(&mut data[..])
    }
}

impl<'a> From<&'a mut Vec<u8>> for MutableBuffer<'a> {
    fn from(data: &'a mut Vec<u8>) -> Self {
        Self::new(data.as_mut_slice())
    }
}

/// Read-only view over a contiguous byte region.
#[derive(Debug, Clone, Copy)]
pub struct ConstBuffer<'a> {
    data: &'a [u8],
}

impl<'a> ConstBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    /// The bytes after the first `n`, for resuming a partial send.
    pub fn advance(self, n: usize) -> ConstBuffer<'a> {
        let n = n.min(self.data.len());
        ConstBuffer {
            data: &self.data[n..],
        }
    }
}

impl Deref for ConstBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl<'a> From<&'a [u8]> for ConstBuffer<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for ConstBuffer<'a> {
    fn from(data: &'a [u8; N]) -> Self {
        Self::new(&data[..])
    }
}

impl<'a> From<&'a Vec<u8>> for ConstBuffer<'a> {
    fn from(data: &'a Vec<u8>) -> Self {
        Self::new(data.as_slice())
    }
}

impl<'a> From<&'a str> for ConstBuffer<'a> {
    fn from(data: &'a str) -> Self {
        Self::new(data.as_bytes())
    }
}

impl<'a> From<&'a String> for ConstBuffer<'a> {
    fn from(data: &'a String) -> Self {
        Self::new(data.as_bytes())
    }
}
