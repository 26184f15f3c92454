// Copyright 2024 Cosmian Tech SAS
// Changes made to the original code are
// licensed under the Business Source License version 1.1.

//! Session-scoped operation dispatcher for the Encrypt, Decrypt and Sign
//! families.
//!
//! Every function here runs with the slot lock held and the session state
//! borrowed mutably. The state of a session is either idle or holds one
//! active operation `(object, mechanism)`.

use std::sync::Arc;

use pkcs11_sys::CK_OBJECT_HANDLE;
use tracing::{debug, trace};

use crate::{
    MError, MResult,
    core::{mechanism::Mechanism, output::OutputBuffer},
    sessions::{ActiveOperation, Session},
    slots::Slot,
    traits::{CapabilityObject, Operation, require},
};

/// Start an operation: the session must be idle and `key` must resolve.
fn init(
    session: &mut Session,
    slot: &Slot,
    operation: Operation,
    mechanism: &Mechanism,
    key: CK_OBJECT_HANDLE,
    start: impl FnOnce(&dyn CapabilityObject) -> MResult<()>,
) -> MResult<()> {
    if let Some(active) = session.active_operation {
        debug!("{operation}: operation already active on object {}", active.object);
        return Err(MError::OperationActive);
    }
    let object = slot.find_object(key)?;
    require(&object, operation)?;
    start(object.as_ref())?;
    session.crypto_buffer.clear();
    session.active_operation = Some(ActiveOperation {
        object: object.handle(),
        mechanism: mechanism.mechanism_type(),
    });
    debug!(
        "{operation}: object {} active with mechanism {:#x}",
        object.handle(),
        mechanism.mechanism_type()
    );
    Ok(())
}

/// Resolve the object of the active operation.
fn active(
    session: &Session,
    slot: &Slot,
) -> MResult<(ActiveOperation, Arc<dyn CapabilityObject>)> {
    let active = session
        .active_operation
        .ok_or(MError::OperationNotInitialized)?;
    let object = slot.find_object(active.object)?;
    Ok((active, object))
}

/// End the active operation if the caller supplied an output buffer.
fn commit_unless_query(session: &mut Session, out: &OutputBuffer<'_>) {
    if !out.is_query() {
        trace!("output buffer supplied, session goes idle");
        session.end_operation();
    }
}

/// End the active operation if the call succeeded.
fn finish_on_success(session: &mut Session, result: MResult<()>) -> MResult<()> {
    if result.is_ok() {
        session.end_operation();
    }
    result
}

pub(crate) fn encrypt_init(
    session: &mut Session,
    slot: &Slot,
    mechanism: &Mechanism,
    key: CK_OBJECT_HANDLE,
) -> MResult<()> {
    init(session, slot, Operation::EncryptInit, mechanism, key, |object| {
        object.encrypt_init(mechanism)
    })
}

/// Single-shot encryption. The operation stays active until `encrypt_final`.
pub(crate) fn encrypt(
    session: &mut Session,
    slot: &Slot,
    data: &[u8],
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    require(&object, Operation::Encrypt)?;
    object.encrypt(active.mechanism, data, out)
}

pub(crate) fn encrypt_update(
    session: &mut Session,
    slot: &Slot,
    part: &[u8],
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    require(&object, Operation::EncryptUpdate)?;
    object.encrypt_update(active.mechanism, part, out)
}

pub(crate) fn encrypt_final(
    session: &mut Session,
    slot: &Slot,
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    require(&object, Operation::EncryptFinal)?;
    let result = object.encrypt_final(active.mechanism, out);
    finish_on_success(session, result)
}

pub(crate) fn decrypt_init(
    session: &mut Session,
    slot: &Slot,
    mechanism: &Mechanism,
    key: CK_OBJECT_HANDLE,
) -> MResult<()> {
    init(session, slot, Operation::DecryptInit, mechanism, key, |object| {
        object.decrypt_init(mechanism)
    })
}

/// Single-shot decryption. A real output buffer ends the operation whatever
/// the outcome; a length query keeps it active.
pub(crate) fn decrypt(
    session: &mut Session,
    slot: &Slot,
    encrypted_data: &[u8],
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    commit_unless_query(session, out);
    require(&object, Operation::Decrypt)?;
    object.decrypt(active.mechanism, encrypted_data, out)
}

pub(crate) fn decrypt_update(
    session: &mut Session,
    slot: &Slot,
    encrypted_part: &[u8],
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    require(&object, Operation::DecryptUpdate)?;
    object.decrypt_update(active.mechanism, encrypted_part, out)
}

pub(crate) fn decrypt_final(
    session: &mut Session,
    slot: &Slot,
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    require(&object, Operation::DecryptFinal)?;
    let result = object.decrypt_final(active.mechanism, out);
    finish_on_success(session, result)
}

pub(crate) fn sign_init(
    session: &mut Session,
    slot: &Slot,
    mechanism: &Mechanism,
    key: CK_OBJECT_HANDLE,
) -> MResult<()> {
    init(session, slot, Operation::SignInit, mechanism, key, |object| {
        object.sign_init(mechanism)
    })
}

/// Single-shot signature, same commit rule as [`decrypt`].
pub(crate) fn sign(
    session: &mut Session,
    slot: &Slot,
    data: &[u8],
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    commit_unless_query(session, out);
    require(&object, Operation::Sign)?;
    object.sign(active.mechanism, data, out)
}

/// Feed a part to a native multi-part signature, or accumulate it in the
/// session crypto buffer when the object only signs in a single shot.
pub(crate) fn sign_update(session: &mut Session, slot: &Slot, part: &[u8]) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    if object.supports(Operation::SignUpdate) {
        return object.sign_update(active.mechanism, part);
    }
    session.crypto_buffer.append(part)?;
    trace!(
        "buffered {} bytes for object {}, {} pending",
        part.len(),
        active.object,
        session.crypto_buffer.len()
    );
    Ok(())
}

/// Finish a multi-part signature.
///
/// Without a native `SignFinal` the object's single-shot `Sign` runs once over
/// everything buffered since `sign_init`. A real output buffer ends the
/// operation and empties the crypto buffer whatever the outcome.
pub(crate) fn sign_final(
    session: &mut Session,
    slot: &Slot,
    out: &mut OutputBuffer<'_>,
) -> MResult<()> {
    let (active, object) = active(session, slot)?;
    let result = if object.supports(Operation::SignFinal) {
        object.sign_final(active.mechanism, out)
    } else if object.supports(Operation::Sign) {
        debug!(
            "object {} has no native SignFinal, signing {} buffered bytes",
            active.object,
            session.crypto_buffer.len()
        );
        object.sign(active.mechanism, session.crypto_buffer.as_slice(), out)
    } else {
        require(&object, Operation::SignFinal)
    };
    commit_unless_query(session, out);
    result
}
