// Copyright 2024 Cosmian Tech SAS
// Changes made to the original code are
// licensed under the Business Source License version 1.1.

use pkcs11_sys::CK_ULONG;

/// Low bits of a handle hold `index + 1`, so that a valid handle is never zero.
const INDEX_BITS: u32 = 16;
const INDEX_MASK: CK_ULONG = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: CK_ULONG = CK_ULONG::MAX >> INDEX_BITS;

/// Largest number of live entries.
pub(crate) const MAX_ENTRIES: usize = INDEX_MASK as usize;

#[derive(Debug)]
struct Entry<T> {
    generation: CK_ULONG,
    value: Option<T>,
}

/// Storage addressed by opaque handles.
///
/// A handle encodes a slot index and the generation of that slot; removing
/// an entry bumps the generation so that a stale handle never resolves to a
/// later occupant of the same index.
#[derive(Debug)]
pub(crate) struct HandleArena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

const fn encode(index: usize, generation: CK_ULONG) -> CK_ULONG {
    (generation << INDEX_BITS) | (index as CK_ULONG + 1)
}

const fn decode(handle: CK_ULONG) -> Option<(usize, CK_ULONG)> {
    let low = handle & INDEX_MASK;
    if low == 0 {
        return None;
    }
    Some(((low - 1) as usize, handle >> INDEX_BITS))
}

impl<T> HandleArena<T> {
    /// Store `value` and return its handle, `None` when the arena is full.
    pub(crate) fn insert(&mut self, value: T) -> Option<CK_ULONG> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.entries.len() >= MAX_ENTRIES {
                    return None;
                }
                self.entries.push(Entry {
                    generation: 0,
                    value: None,
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index];
        entry.value = Some(value);
        self.len += 1;
        Some(encode(index, entry.generation))
    }

    pub(crate) fn get(&self, handle: CK_ULONG) -> Option<&T> {
        let (index, generation) = decode(handle)?;
        self.entries
            .get(index)
            .filter(|entry| entry.generation == generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub(crate) fn remove(&mut self, handle: CK_ULONG) -> Option<T> {
        let (index, generation) = decode(handle)?;
        let entry = self.entries.get_mut(index)?;
        if entry.generation != generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = (entry.generation + 1) & GENERATION_MASK;
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    /// Remove and return every entry matching `predicate`.
    pub(crate) fn remove_where<F>(&mut self, mut predicate: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let handles: Vec<CK_ULONG> = self
            .iter()
            .filter(|(_, value)| predicate(value))
            .map(|(handle, _)| handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| self.remove(handle))
            .collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (CK_ULONG, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry
                .value
                .as_ref()
                .map(|value| (encode(index, entry.generation), value))
        })
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }
}
