// Copyright 2024 Cosmian Tech SAS
// Changes made to the original code are
// licensed under the Business Source License version 1.1.

use std::sync::{Arc, Mutex, RwLock};

use pkcs11_sys::{CK_FLAGS, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_SLOT_ID};
use tracing::{debug, info};

use crate::{MError, MResult, crypto_buffer::CryptoBuffer, handles::HandleArena, slots::Slot};

/// The operation a session is in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ActiveOperation {
    pub object: CK_OBJECT_HANDLE,
    pub mechanism: CK_MECHANISM_TYPE,
}

/// Call-sequencing state of one session.
///
/// At most one operation is active at any time. The crypto buffer is only
/// filled while a multi-part sign is emulated on a key that signs in a single
/// shot.
#[derive(Debug)]
pub(crate) struct Session {
    flags: CK_FLAGS,
    pub active_operation: Option<ActiveOperation>,
    pub crypto_buffer: CryptoBuffer,
}

impl Session {
    pub(crate) fn new(flags: CK_FLAGS, crypto_buffer_limit: usize) -> Self {
        Self {
            flags,
            active_operation: None,
            crypto_buffer: CryptoBuffer::new(crypto_buffer_limit),
        }
    }

    pub(crate) const fn flags(&self) -> CK_FLAGS {
        self.flags
    }

    /// Return to idle, wiping anything buffered for an emulated sign.
    pub(crate) fn end_operation(&mut self) {
        self.active_operation = None;
        self.crypto_buffer.clear();
    }

    /// Clear the active operation and release the crypto buffer.
    pub(crate) fn reset(&mut self) {
        self.active_operation = None;
        self.crypto_buffer.release();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reset();
    }
}

/// An open session and the slot it was opened on.
#[derive(Debug)]
pub(crate) struct SessionEntry {
    slot: Arc<Slot>,
    state: Mutex<Session>,
}

impl SessionEntry {
    /// Wait for any call in flight on the slot, then tear the session down.
    fn close(&self) -> MResult<()> {
        let _slot_guard = self.slot.lock()?;
        self.state.lock()?.reset();
        Ok(())
    }
}

/// The open sessions of the module, addressed by generation-checked handles.
#[derive(Debug, Default)]
pub(crate) struct Sessions {
    arena: RwLock<HandleArena<Arc<SessionEntry>>>,
}

impl Sessions {
    pub(crate) fn open(
        &self,
        slot: Arc<Slot>,
        flags: CK_FLAGS,
        crypto_buffer_limit: usize,
    ) -> MResult<CK_SESSION_HANDLE> {
        let slot_id = slot.id();
        let entry = Arc::new(SessionEntry {
            slot,
            state: Mutex::new(Session::new(flags, crypto_buffer_limit)),
        });
        let handle = self.arena.write()?.insert(entry).ok_or(MError::SessionCount)?;
        info!("session {handle} opened on slot {slot_id} with flags {flags:#x}");
        Ok(handle)
    }

    pub(crate) fn close(&self, handle: CK_SESSION_HANDLE) -> MResult<()> {
        let entry = self
            .arena
            .write()?
            .remove(handle)
            .ok_or(MError::SessionHandleInvalid(handle))?;
        entry.close()?;
        info!("session {handle} closed");
        Ok(())
    }

    pub(crate) fn close_all(&self, slot_id: CK_SLOT_ID) -> MResult<()> {
        let entries = self
            .arena
            .write()?
            .remove_where(|entry| entry.slot.id() == slot_id);
        for entry in &entries {
            entry.close()?;
        }
        info!("closed {} sessions on slot {slot_id}", entries.len());
        Ok(())
    }

    /// Resolve `handle`, acquire the lock of its slot, and run `f` on the
    /// session state. Both locks are released when `f` returns.
    pub(crate) fn with_session<R, F>(&self, handle: CK_SESSION_HANDLE, f: F) -> MResult<R>
    where
        F: FnOnce(&mut Session, &Slot) -> MResult<R>,
    {
        let entry = self
            .arena
            .read()?
            .get(handle)
            .cloned()
            .ok_or(MError::SessionHandleInvalid(handle))?;
        let _slot_guard = entry.slot.lock()?;
        let mut session = entry.state.lock()?;
        debug!(
            "session {handle}: slot {} locked, active operation: {:?}",
            entry.slot.id(),
            session.active_operation
        );
        f(&mut session, &entry.slot)
    }

    pub(crate) fn len(&self) -> MResult<usize> {
        Ok(self.arena.read()?.len())
    }
}
