// Copyright 2024 Cosmian Tech SAS
// Changes made to the original code are
// licensed under the Business Source License version 1.1.

use zeroize::{Zeroize, Zeroizing};

use crate::{MError, MResult};

/// Smallest capacity allocated on the first append.
const MIN_CAPACITY: usize = 256;

/// Default upper bound of the accumulated message, 1 MiB.
pub const DEFAULT_CRYPTO_BUFFER_LIMIT: usize = 1024 * 1024;

/// Session-owned accumulator used to sign, in a single shot, a message fed
/// through `C_SignUpdate` to a key that cannot stream.
///
/// Growth is amortized: when an append does not fit, the capacity becomes the
/// largest of 256 bytes, twice the current capacity and the required length,
/// capped by `limit`. The reservation is fallible, so an allocation failure
/// surfaces as `HostMemory` with the content left as it was.
pub(crate) struct CryptoBuffer {
    data: Zeroizing<Vec<u8>>,
    limit: usize,
}

impl std::fmt::Debug for CryptoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .field("limit", &self.limit)
            .finish()
    }
}

impl Default for CryptoBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CRYPTO_BUFFER_LIMIT)
    }
}

impl CryptoBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            data: Zeroizing::new(Vec::new()),
            limit,
        }
    }

    pub(crate) fn append(&mut self, part: &[u8]) -> MResult<()> {
        let required = self
            .data
            .len()
            .checked_add(part.len())
            .ok_or(MError::HostMemory)?;
        if required > self.limit {
            return Err(MError::HostMemory);
        }
        if required > self.data.capacity() {
            let target = MIN_CAPACITY
                .max(self.data.capacity().saturating_mul(2))
                .max(required)
                .min(self.limit);
            self.grow_to(target)?;
        }
        self.data.extend_from_slice(part);
        Ok(())
    }

    /// Move the content into a larger allocation, wiping the old one.
    fn grow_to(&mut self, capacity: usize) -> MResult<()> {
        let mut grown: Vec<u8> = Vec::new();
        grown
            .try_reserve_exact(capacity)
            .map_err(|_| MError::HostMemory)?;
        grown.extend_from_slice(&self.data);
        self.data.zeroize();
        self.data = Zeroizing::new(grown);
        Ok(())
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Wipe the content; the allocation is kept for the next message.
    pub(crate) fn clear(&mut self) {
        self.data.zeroize();
    }

    /// Wipe the content and give the allocation back.
    pub(crate) fn release(&mut self) {
        self.data.zeroize();
        self.data.shrink_to_fit();
    }
}
