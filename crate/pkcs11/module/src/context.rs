// Copyright 2024 Cosmian Tech SAS
// Changes made to the original code are
// licensed under the Business Source License version 1.1.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use pkcs11_sys::{
    CK_FLAGS, CK_SESSION_HANDLE, CK_SESSION_INFO, CK_SLOT_ID, CKF_RW_SESSION, CKF_SERIAL_SESSION,
    CKS_RO_USER_FUNCTIONS, CKS_RW_USER_FUNCTIONS,
};
use tracing::info;

use crate::{
    MError, MResult,
    sessions::{Session, Sessions},
    slots::{Slot, SlotRegistry},
    traits::{Backend, backend},
};

/// Module-wide state, present between `C_Initialize` and `C_Finalize`.
static CONTEXT: Lazy<RwLock<Option<Context>>> = Lazy::new(Default::default);

pub(crate) struct Context {
    backend: Arc<dyn Backend>,
    slots: SlotRegistry,
    sessions: Sessions,
}

impl Context {
    fn new(backend: Arc<dyn Backend>) -> Self {
        let slots = SlotRegistry::new(backend.tokens());
        Self {
            backend,
            slots,
            sessions: Sessions::default(),
        }
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) const fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    pub(crate) fn open_session(
        &self,
        slot_id: CK_SLOT_ID,
        flags: CK_FLAGS,
    ) -> MResult<CK_SESSION_HANDLE> {
        if flags & CKF_SERIAL_SESSION == 0 {
            return Err(MError::SessionParallelNotSupported);
        }
        let slot = self.slots.get(slot_id)?.clone();
        self.sessions
            .open(slot, flags, self.backend.crypto_buffer_limit())
    }

    pub(crate) fn close_session(&self, handle: CK_SESSION_HANDLE) -> MResult<()> {
        self.sessions.close(handle)
    }

    pub(crate) fn close_all_sessions(&self, slot_id: CK_SLOT_ID) -> MResult<()> {
        let slot = self.slots.get(slot_id)?;
        self.sessions.close_all(slot.id())
    }

    pub(crate) fn session_info(&self, handle: CK_SESSION_HANDLE) -> MResult<CK_SESSION_INFO> {
        self.with_session(handle, |session, slot| {
            let state = if session.flags() & CKF_RW_SESSION == 0 {
                CKS_RO_USER_FUNCTIONS
            } else {
                CKS_RW_USER_FUNCTIONS
            };
            Ok(CK_SESSION_INFO {
                slotID: slot.id(),
                state,
                flags: session.flags(),
                ulDeviceError: 0,
            })
        })
    }

    /// Run `f` on a session while holding the lock of its slot.
    pub(crate) fn with_session<R, F>(&self, handle: CK_SESSION_HANDLE, f: F) -> MResult<R>
    where
        F: FnOnce(&mut Session, &Slot) -> MResult<R>,
    {
        self.sessions.with_session(handle, f)
    }
}

/// Build the module state from the registered backend.
pub(crate) fn initialize() -> MResult<()> {
    let mut context = CONTEXT.write()?;
    if context.is_some() {
        return Err(MError::CryptokiAlreadyInitialized);
    }
    let backend = backend()?;
    info!(
        "initializing {} by {}",
        backend.library_description(),
        backend.manufacturer_id()
    );
    *context = Some(Context::new(backend));
    Ok(())
}

/// Drop the module state. Every open session is torn down.
pub(crate) fn finalize() -> MResult<()> {
    let context = CONTEXT
        .write()?
        .take()
        .ok_or(MError::CryptokiNotInitialized)?;
    let open = context.sessions.len()?;
    drop(context);
    info!("finalized, {open} sessions torn down");
    Ok(())
}

pub(crate) fn is_initialized() -> bool {
    CONTEXT.read().map(|c| c.is_some()).unwrap_or(false)
}

/// Run `f` against the initialized module state.
pub(crate) fn with_context<R, F>(f: F) -> MResult<R>
where
    F: FnOnce(&Context) -> MResult<R>,
{
    let context = CONTEXT.read()?;
    let context = context.as_ref().ok_or(MError::CryptokiNotInitialized)?;
    f(context)
}
