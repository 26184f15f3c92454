// Copyright 2024 Cosmian Tech SAS
// Changes made to the original code are
// licensed under the Business Source License version 1.1.
//
// Original code:
// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use pkcs11_sys::{CK_BYTE_PTR, CK_ULONG};

use crate::{MError, MResult};

/// Where a capability writes its output.
///
/// A null output pointer at the C interface turns into a length query: the
/// capability reports the length it would produce and nothing is written.
/// In both cases [`OutputBuffer::len`] ends up holding the produced (or
/// required) length, which the entry point copies back to `*pulLen`.
#[derive(Debug)]
pub struct OutputBuffer<'a> {
    buffer: Option<&'a mut [u8]>,
    len: usize,
}

impl<'a> OutputBuffer<'a> {
    #[must_use]
    pub const fn query() -> Self {
        Self {
            buffer: None,
            len: 0,
        }
    }

    #[must_use]
    pub const fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer: Some(buffer),
            len: 0,
        }
    }

    /// # Safety
    /// `ptr` must be null or valid for writes of `capacity` bytes for `'a`.
    pub(crate) unsafe fn from_raw(ptr: CK_BYTE_PTR, capacity: CK_ULONG) -> Self {
        if ptr.is_null() {
            Self::query()
        } else {
            Self::new(unsafe { std::slice::from_raw_parts_mut(ptr, capacity as usize) })
        }
    }

    #[must_use]
    pub const fn is_query(&self) -> bool {
        self.buffer.is_none()
    }

    /// Capacity of the caller buffer, `None` for a length query.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.buffer.as_ref().map(|b| b.len())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Answer a length query without producing the data.
    pub fn set_required_len(&mut self, len: usize) {
        self.len = len;
    }

    /// Copy `data` to the caller buffer, or only record its length when
    /// answering a query.
    pub fn write(&mut self, data: &[u8]) -> MResult<()> {
        self.len = data.len();
        match self.buffer.as_deref_mut() {
            None => Ok(()),
            Some(buffer) if buffer.len() < data.len() => Err(MError::BufferTooSmall),
            Some(buffer) => {
                buffer[..data.len()].copy_from_slice(data);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_records_length_only() {
        let mut out = OutputBuffer::query();
        assert!(out.is_query());
        out.write(b"signature").unwrap();
        assert_eq!(out.len(), 9);
        assert_eq!(out.capacity(), None);
    }

    #[test]
    fn write_into_large_enough_buffer() {
        let mut storage = [0_u8; 16];
        let mut out = OutputBuffer::new(&mut storage);
        out.write(b"abc").unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(&storage[..3], b"abc");
    }

    #[test]
    fn short_buffer_reports_required_length() {
        let mut storage = [0_u8; 2];
        let mut out = OutputBuffer::new(&mut storage);
        assert_eq!(out.write(b"abc"), Err(MError::BufferTooSmall));
        assert_eq!(out.len(), 3);
        assert_eq!(storage, [0, 0]);
    }
}
