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

#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]
#![deny(unsafe_op_in_unsafe_fn)]
//avoid renaming all unused parameters with _ in all unused functions
#![allow(unused_variables)]

use std::slice;

use pkcs11_sys::{
    CK_ATTRIBUTE_PTR, CK_BBOOL, CK_BYTE_PTR, CK_C_INITIALIZE_ARGS_PTR, CK_FLAGS, CK_FUNCTION_LIST,
    CK_INFO, CK_INFO_PTR, CK_MECHANISM_INFO, CK_MECHANISM_INFO_PTR, CK_MECHANISM_PTR,
    CK_MECHANISM_TYPE, CK_MECHANISM_TYPE_PTR, CK_NOTIFY, CK_OBJECT_HANDLE, CK_OBJECT_HANDLE_PTR,
    CK_SESSION_HANDLE, CK_SESSION_HANDLE_PTR, CK_SESSION_INFO_PTR, CK_SLOT_ID, CK_SLOT_ID_PTR,
    CK_SLOT_INFO, CK_SLOT_INFO_PTR, CK_TOKEN_INFO, CK_TOKEN_INFO_PTR, CK_ULONG, CK_ULONG_PTR,
    CK_UNAVAILABLE_INFORMATION, CK_USER_TYPE, CK_UTF8CHAR_PTR, CK_VERSION, CK_VOID_PTR,
    CKF_HW_SLOT, CKF_TOKEN_INITIALIZED, CKF_TOKEN_PRESENT, CKF_USER_PIN_INITIALIZED,
    CKF_WRITE_PROTECTED, CRYPTOKI_VERSION_MAJOR, CRYPTOKI_VERSION_MINOR,
};
pub use pkcs11_sys::{CK_FUNCTION_LIST_PTR_PTR, CK_RV, CKR_OK};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::{
    context::with_context,
    core::{
        mechanism::{Mechanism, parse_mechanism},
        output::OutputBuffer,
        padded,
    },
    sessions::Session,
    slots::Slot,
};

pub mod core;
mod context;
mod crypto_buffer;
mod dispatcher;
mod error;
mod handles;
mod objects_store;
mod sessions;
mod slots;
pub mod traits;

pub use crypto_buffer::DEFAULT_CRYPTO_BUFFER_LIMIT;
pub use error::{MError, MResult};

fn result_to_rv<F>(name: &str, f: F) -> CK_RV
where
    F: FnOnce() -> MResult<()>,
{
    match f() {
        Ok(()) => CKR_OK,
        Err(e) => {
            debug!("{}: {}", name, e);
            e.into()
        }
    }
}

#[macro_export]
macro_rules! cryptoki_fn {
    (fn $name:ident ( $($arg:ident : $type:ty),* $(,)?) $body:block) => {
        #[tracing::instrument(level = tracing::Level::TRACE, ret)]
        #[unsafe(no_mangle)]
        pub extern "C" fn $name($($arg: $type),*) -> CK_RV {
            result_to_rv(stringify!($name), || $body)
        }
    };
    (unsafe fn $name:ident ( $($arg:ident : $type:ty),* $(,)?) $body:block) => {
        #[tracing::instrument(level = tracing::Level::TRACE, ret)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name($($arg: $type),*) -> CK_RV {
            result_to_rv(stringify!($name), || $body)
        }
    };
}

/// Entry points of families the device never implements: only the
/// initialization gate is evaluated.
macro_rules! cryptoki_fn_not_supported {
    ($name:ident, $($arg:ident: $type:ty),*) => {
        cryptoki_fn!(fn $name($($arg: $type),*) {
            initialized!();
            Err(MError::FunctionNotSupported)
        });
    };
}

#[macro_export]
macro_rules! not_null {
    ($ptr:expr) => {
        if $ptr.is_null() {
            return Err(MError::ArgumentsBad);
        }
    };
}

macro_rules! initialized {
    () => {
        if !context::is_initialized() {
            return Err(MError::CryptokiNotInitialized);
        }
    };
}

/// Resolve `handle` and run `f` under the lock of the session's slot.
fn with_session<R, F>(handle: CK_SESSION_HANDLE, f: F) -> MResult<R>
where
    F: FnOnce(&mut Session, &Slot) -> MResult<R>,
{
    with_context(|context| context.with_session(handle, f))
}

/// Run a `Decrypt`, `Sign` or `SignFinal` call. Once the caller supplies an
/// output buffer the call ends the active operation, and that holds for
/// argument errors raised before the operation is reached.
fn committing<F>(session: &mut Session, pOut: CK_BYTE_PTR, f: F) -> MResult<()>
where
    F: FnOnce(&mut Session) -> MResult<()>,
{
    let result = f(session);
    if !pOut.is_null() && matches!(result, Err(MError::ArgumentsBad)) {
        debug!("arguments rejected with an output buffer, session goes idle");
        session.end_operation();
    }
    result
}

/// Copy a caller input buffer. A null pointer is only accepted for an empty
/// input.
///
/// # Safety
/// `ptr` must be null or valid for reads of `len` bytes.
unsafe fn read_input(ptr: CK_BYTE_PTR, len: CK_ULONG) -> MResult<Zeroizing<Vec<u8>>> {
    if len == 0 {
        return Ok(Zeroizing::new(Vec::new()));
    }
    not_null!(ptr);
    Ok(Zeroizing::new(
        unsafe { slice::from_raw_parts(ptr, len as usize) }.to_vec(),
    ))
}

/// Run `f` against the caller output buffer, then report the produced (or
/// required) length through `pulLen`.
///
/// # Safety
/// `pOut` must be null or valid for writes of `*pulLen` bytes.
unsafe fn with_output<F>(pOut: CK_BYTE_PTR, pulLen: CK_ULONG_PTR, f: F) -> MResult<()>
where
    F: FnOnce(&mut OutputBuffer<'_>) -> MResult<()>,
{
    not_null!(pulLen);
    let mut out = unsafe { OutputBuffer::from_raw(pOut, *pulLen) };
    let result = f(&mut out);
    if matches!(result, Ok(()) | Err(MError::BufferTooSmall)) {
        unsafe { *pulLen = out.len() as CK_ULONG };
    }
    result
}

/// Size-query protocol for lists of fixed-size items.
///
/// # Safety
/// `pList` must be null or valid for writes of `*pulCount` items.
unsafe fn write_list<T: Copy>(items: &[T], pList: *mut T, pulCount: CK_ULONG_PTR) -> MResult<()> {
    not_null!(pulCount);
    if !pList.is_null() {
        if (unsafe { *pulCount } as usize) < items.len() {
            unsafe { *pulCount = items.len() as CK_ULONG };
            return Err(MError::BufferTooSmall);
        }
        unsafe { slice::from_raw_parts_mut(pList, items.len()) }.copy_from_slice(items);
    }
    unsafe { *pulCount = items.len() as CK_ULONG };
    Ok(())
}

/// # Safety
/// `pMechanism` must be null or point to a valid `CK_MECHANISM`.
unsafe fn read_mechanism(pMechanism: CK_MECHANISM_PTR) -> MResult<Mechanism> {
    not_null!(pMechanism);
    unsafe { parse_mechanism(pMechanism.read()) }
}

pub static mut FUNC_LIST: CK_FUNCTION_LIST = CK_FUNCTION_LIST {
    // In this structure 'version' is the cryptoki specification version number. The major and minor
    // versions must be set to 0x02 and 0x28 indicating a version 2.40 compatible structure.
    version: CK_VERSION { major: 2, minor: 40 },
    C_Initialize: Some(C_Initialize),
    C_Finalize: Some(C_Finalize),
    C_GetInfo: Some(C_GetInfo),
    C_GetFunctionList: None,
    C_GetSlotList: Some(C_GetSlotList),
    C_GetSlotInfo: Some(C_GetSlotInfo),
    C_GetTokenInfo: Some(C_GetTokenInfo),
    C_GetMechanismList: Some(C_GetMechanismList),
    C_GetMechanismInfo: Some(C_GetMechanismInfo),
    C_InitToken: Some(C_InitToken),
    C_InitPIN: Some(C_InitPIN),
    C_SetPIN: Some(C_SetPIN),
    C_OpenSession: Some(C_OpenSession),
    C_CloseSession: Some(C_CloseSession),
    C_CloseAllSessions: Some(C_CloseAllSessions),
    C_GetSessionInfo: Some(C_GetSessionInfo),
    C_GetOperationState: Some(C_GetOperationState),
    C_SetOperationState: Some(C_SetOperationState),
    C_Login: Some(C_Login),
    C_Logout: Some(C_Logout),
    C_CreateObject: Some(C_CreateObject),
    C_CopyObject: Some(C_CopyObject),
    C_DestroyObject: Some(C_DestroyObject),
    C_GetObjectSize: Some(C_GetObjectSize),
    C_GetAttributeValue: Some(C_GetAttributeValue),
    C_SetAttributeValue: Some(C_SetAttributeValue),
    C_FindObjectsInit: Some(C_FindObjectsInit),
    C_FindObjects: Some(C_FindObjects),
    C_FindObjectsFinal: Some(C_FindObjectsFinal),
    C_EncryptInit: Some(C_EncryptInit),
    C_Encrypt: Some(C_Encrypt),
    C_EncryptUpdate: Some(C_EncryptUpdate),
    C_EncryptFinal: Some(C_EncryptFinal),
    C_DecryptInit: Some(C_DecryptInit),
    C_Decrypt: Some(C_Decrypt),
    C_DecryptUpdate: Some(C_DecryptUpdate),
    C_DecryptFinal: Some(C_DecryptFinal),
    C_DigestInit: Some(C_DigestInit),
    C_Digest: Some(C_Digest),
    C_DigestUpdate: Some(C_DigestUpdate),
    C_DigestKey: Some(C_DigestKey),
    C_DigestFinal: Some(C_DigestFinal),
    C_SignInit: Some(C_SignInit),
    C_Sign: Some(C_Sign),
    C_SignUpdate: Some(C_SignUpdate),
    C_SignFinal: Some(C_SignFinal),
    C_SignRecoverInit: Some(C_SignRecoverInit),
    C_SignRecover: Some(C_SignRecover),
    C_VerifyInit: Some(C_VerifyInit),
    C_Verify: Some(C_Verify),
    C_VerifyUpdate: Some(C_VerifyUpdate),
    C_VerifyFinal: Some(C_VerifyFinal),
    C_VerifyRecoverInit: Some(C_VerifyRecoverInit),
    C_VerifyRecover: Some(C_VerifyRecover),
    C_DigestEncryptUpdate: Some(C_DigestEncryptUpdate),
    C_DecryptDigestUpdate: Some(C_DecryptDigestUpdate),
    C_SignEncryptUpdate: Some(C_SignEncryptUpdate),
    C_DecryptVerifyUpdate: Some(C_DecryptVerifyUpdate),
    C_GenerateKey: Some(C_GenerateKey),
    C_GenerateKeyPair: Some(C_GenerateKeyPair),
    C_WrapKey: Some(C_WrapKey),
    C_UnwrapKey: Some(C_UnwrapKey),
    C_DeriveKey: Some(C_DeriveKey),
    C_SeedRandom: Some(C_SeedRandom),
    C_GenerateRandom: Some(C_GenerateRandom),
    C_GetFunctionStatus: Some(C_GetFunctionStatus),
    C_CancelFunction: Some(C_CancelFunction),
    C_WaitForSlotEvent: Some(C_WaitForSlotEvent),
};

cryptoki_fn!(
    fn C_Initialize(pInitArgs: CK_VOID_PTR) {
        if !pInitArgs.is_null() {
            let args = unsafe { *(pInitArgs as CK_C_INITIALIZE_ARGS_PTR) };
            if !args.pReserved.is_null() {
                return Err(MError::ArgumentsBad);
            }
        }
        context::initialize()
    }
);

cryptoki_fn!(
    fn C_Finalize(pReserved: CK_VOID_PTR) {
        initialized!();
        if !pReserved.is_null() {
            return Err(MError::ArgumentsBad);
        }
        context::finalize()
    }
);

cryptoki_fn!(
    unsafe fn C_GetInfo(pInfo: CK_INFO_PTR) {
        initialized!();
        not_null!(pInfo);
        with_context(|context| {
            let backend = context.backend();
            let version = backend.library_version();
            let info = CK_INFO {
                cryptokiVersion: CK_VERSION {
                    major: CRYPTOKI_VERSION_MAJOR,
                    minor: CRYPTOKI_VERSION_MINOR,
                },
                manufacturerID: padded(&backend.manufacturer_id()),
                flags: 0,
                libraryDescription: padded(&backend.library_description()),
                libraryVersion: CK_VERSION {
                    major: version.major,
                    minor: version.minor,
                },
            };
            unsafe { *pInfo = info };
            Ok(())
        })
    }
);

cryptoki_fn!(
    unsafe fn C_GetSlotList(
        _tokenPresent: CK_BBOOL,
        pSlotList: CK_SLOT_ID_PTR,
        pulCount: CK_ULONG_PTR,
    ) {
        initialized!();
        with_context(|context| unsafe { write_list(&context.slots().ids(), pSlotList, pulCount) })
    }
);

cryptoki_fn!(
    unsafe fn C_GetSlotInfo(slotID: CK_SLOT_ID, pInfo: CK_SLOT_INFO_PTR) {
        initialized!();
        with_context(|context| {
            let slot = context.slots().get(slotID)?;
            not_null!(pInfo);
            let token = slot.token();
            let version = context.backend().library_version();
            let info = CK_SLOT_INFO {
                slotDescription: padded(&token.slot_description()),
                manufacturerID: padded(&token.manufacturer_id()),
                flags: CKF_TOKEN_PRESENT | CKF_HW_SLOT,
                hardwareVersion: CK_VERSION {
                    major: version.major,
                    minor: version.minor,
                },
                firmwareVersion: CK_VERSION {
                    major: version.major,
                    minor: version.minor,
                },
            };
            unsafe { *pInfo = info };
            Ok(())
        })
    }
);

cryptoki_fn!(
    unsafe fn C_GetTokenInfo(slotID: CK_SLOT_ID, pInfo: CK_TOKEN_INFO_PTR) {
        initialized!();
        with_context(|context| {
            let slot = context.slots().get(slotID)?;
            not_null!(pInfo);
            let token = slot.token();
            let info = CK_TOKEN_INFO {
                label: padded(&token.label()),
                manufacturerID: padded(&token.manufacturer_id()),
                model: padded(&token.model()),
                serialNumber: padded(&token.serial_number()),
                flags: CKF_TOKEN_INITIALIZED | CKF_WRITE_PROTECTED | CKF_USER_PIN_INITIALIZED,
                ulMaxSessionCount: CK_UNAVAILABLE_INFORMATION,
                ulSessionCount: CK_UNAVAILABLE_INFORMATION,
                ulMaxRwSessionCount: CK_UNAVAILABLE_INFORMATION,
                ulRwSessionCount: CK_UNAVAILABLE_INFORMATION,
                ulTotalPublicMemory: CK_UNAVAILABLE_INFORMATION,
                ulFreePublicMemory: CK_UNAVAILABLE_INFORMATION,
                ulTotalPrivateMemory: CK_UNAVAILABLE_INFORMATION,
                ulFreePrivateMemory: CK_UNAVAILABLE_INFORMATION,
                ..Default::default()
            };
            unsafe { *pInfo = info };
            Ok(())
        })
    }
);

cryptoki_fn!(
    unsafe fn C_GetMechanismList(
        slotID: CK_SLOT_ID,
        pMechanismList: CK_MECHANISM_TYPE_PTR,
        pulCount: CK_ULONG_PTR,
    ) {
        initialized!();
        with_context(|context| {
            let mechanisms: Vec<CK_MECHANISM_TYPE> = context
                .slots()
                .get(slotID)?
                .token()
                .mechanisms()
                .into_iter()
                .map(|(mechanism, _)| mechanism)
                .collect();
            unsafe { write_list(&mechanisms, pMechanismList, pulCount) }
        })
    }
);

cryptoki_fn!(
    unsafe fn C_GetMechanismInfo(
        slotID: CK_SLOT_ID,
        mechType: CK_MECHANISM_TYPE,
        pInfo: CK_MECHANISM_INFO_PTR,
    ) {
        initialized!();
        with_context(|context| {
            let slot = context.slots().get(slotID)?;
            not_null!(pInfo);
            let (_, mechanism_info) = slot
                .token()
                .mechanisms()
                .into_iter()
                .find(|(mechanism, _)| *mechanism == mechType)
                .ok_or(MError::MechanismInvalid(mechType))?;
            let info = CK_MECHANISM_INFO {
                ulMinKeySize: mechanism_info.min_key_size as CK_ULONG,
                ulMaxKeySize: mechanism_info.max_key_size as CK_ULONG,
                flags: mechanism_info.flags,
            };
            unsafe { *pInfo = info };
            Ok(())
        })
    }
);

cryptoki_fn!(
    fn C_InitToken(
        slotID: CK_SLOT_ID,
        _pPin: CK_UTF8CHAR_PTR,
        _ulPinLen: CK_ULONG,
        _pLabel: CK_UTF8CHAR_PTR,
    ) {
        initialized!();
        with_context(|context| {
            context.slots().get(slotID)?;
            Err(MError::TokenWriteProtected)
        })
    }
);

cryptoki_fn!(
    fn C_InitPIN(hSession: CK_SESSION_HANDLE, _pPin: CK_UTF8CHAR_PTR, _ulPinLen: CK_ULONG) {
        initialized!();
        with_session(hSession, |_, _| Err(MError::TokenWriteProtected))
    }
);

cryptoki_fn!(
    fn C_SetPIN(
        hSession: CK_SESSION_HANDLE,
        _pOldPin: CK_UTF8CHAR_PTR,
        _ulOldLen: CK_ULONG,
        _pNewPin: CK_UTF8CHAR_PTR,
        _ulNewLen: CK_ULONG,
    ) {
        initialized!();
        with_session(hSession, |_, _| Err(MError::TokenWriteProtected))
    }
);

cryptoki_fn!(
    unsafe fn C_OpenSession(
        slotID: CK_SLOT_ID,
        flags: CK_FLAGS,
        _pApplication: CK_VOID_PTR,
        _Notify: CK_NOTIFY,
        phSession: CK_SESSION_HANDLE_PTR,
    ) {
        initialized!();
        with_context(|context| {
            context.slots().get(slotID)?;
            not_null!(phSession);
            let handle = context.open_session(slotID, flags)?;
            unsafe { *phSession = handle };
            Ok(())
        })
    }
);

cryptoki_fn!(
    fn C_CloseSession(hSession: CK_SESSION_HANDLE) {
        initialized!();
        with_context(|context| context.close_session(hSession))
    }
);

cryptoki_fn!(
    fn C_CloseAllSessions(slotID: CK_SLOT_ID) {
        initialized!();
        info!("C_CloseAllSessions: slot: {:?}", slotID);
        with_context(|context| context.close_all_sessions(slotID))
    }
);

cryptoki_fn!(
    unsafe fn C_GetSessionInfo(hSession: CK_SESSION_HANDLE, pInfo: CK_SESSION_INFO_PTR) {
        initialized!();
        with_context(|context| {
            let info = context.session_info(hSession)?;
            not_null!(pInfo);
            unsafe { *pInfo = info };
            Ok(())
        })
    }
);

cryptoki_fn_not_supported!(
    C_GetOperationState,
    hSession: CK_SESSION_HANDLE,
    pOperationState: CK_BYTE_PTR,
    pulOperationStateLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_SetOperationState,
    hSession: CK_SESSION_HANDLE,
    pOperationState: CK_BYTE_PTR,
    ulOperationStateLen: CK_ULONG,
    hEncryptionKey: CK_OBJECT_HANDLE,
    hAuthenticationKey: CK_OBJECT_HANDLE
);

cryptoki_fn!(
    unsafe fn C_Login(
        hSession: CK_SESSION_HANDLE,
        userType: CK_USER_TYPE,
        pPin: CK_UTF8CHAR_PTR,
        ulPinLen: CK_ULONG,
    ) {
        initialized!();
        with_session(hSession, |_, slot| {
            let pin = unsafe { read_input(pPin, ulPinLen) }?;
            slot.token().login(userType, &pin)
        })
    }
);

cryptoki_fn!(
    fn C_Logout(hSession: CK_SESSION_HANDLE) {
        initialized!();
        with_session(hSession, |_, slot| slot.token().logout())
    }
);

cryptoki_fn_not_supported!(
    C_CreateObject,
    hSession: CK_SESSION_HANDLE,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulCount: CK_ULONG,
    phObject: CK_OBJECT_HANDLE_PTR
);

cryptoki_fn_not_supported!(
    C_CopyObject,
    hSession: CK_SESSION_HANDLE,
    hObject: CK_OBJECT_HANDLE,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulCount: CK_ULONG,
    phNewObject: CK_OBJECT_HANDLE_PTR
);

cryptoki_fn_not_supported!(
    C_DestroyObject,
    hSession: CK_SESSION_HANDLE,
    hObject: CK_OBJECT_HANDLE
);

cryptoki_fn_not_supported!(
    C_GetObjectSize,
    hSession: CK_SESSION_HANDLE,
    hObject: CK_OBJECT_HANDLE,
    pulSize: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_GetAttributeValue,
    hSession: CK_SESSION_HANDLE,
    hObject: CK_OBJECT_HANDLE,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulCount: CK_ULONG
);

cryptoki_fn_not_supported!(
    C_SetAttributeValue,
    hSession: CK_SESSION_HANDLE,
    hObject: CK_OBJECT_HANDLE,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulCount: CK_ULONG
);

cryptoki_fn_not_supported!(
    C_FindObjectsInit,
    hSession: CK_SESSION_HANDLE,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulCount: CK_ULONG
);

cryptoki_fn_not_supported!(
    C_FindObjects,
    hSession: CK_SESSION_HANDLE,
    phObject: CK_OBJECT_HANDLE_PTR,
    ulMaxObjectCount: CK_ULONG,
    pulObjectCount: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(C_FindObjectsFinal, hSession: CK_SESSION_HANDLE);

cryptoki_fn!(
    unsafe fn C_EncryptInit(
        hSession: CK_SESSION_HANDLE,
        pMechanism: CK_MECHANISM_PTR,
        hKey: CK_OBJECT_HANDLE,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            let mechanism = unsafe { read_mechanism(pMechanism) }?;
            dispatcher::encrypt_init(session, slot, &mechanism, hKey)
        })
    }
);

cryptoki_fn!(
    unsafe fn C_Encrypt(
        hSession: CK_SESSION_HANDLE,
        pData: CK_BYTE_PTR,
        ulDataLen: CK_ULONG,
        pEncryptedData: CK_BYTE_PTR,
        pulEncryptedDataLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            let data = unsafe { read_input(pData, ulDataLen) }?;
            unsafe {
                with_output(pEncryptedData, pulEncryptedDataLen, |out| {
                    dispatcher::encrypt(session, slot, &data, out)
                })
            }
        })
    }
);

cryptoki_fn!(
    unsafe fn C_EncryptUpdate(
        hSession: CK_SESSION_HANDLE,
        pPart: CK_BYTE_PTR,
        ulPartLen: CK_ULONG,
        pEncryptedPart: CK_BYTE_PTR,
        pulEncryptedPartLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            let part = unsafe { read_input(pPart, ulPartLen) }?;
            unsafe {
                with_output(pEncryptedPart, pulEncryptedPartLen, |out| {
                    dispatcher::encrypt_update(session, slot, &part, out)
                })
            }
        })
    }
);

cryptoki_fn!(
    unsafe fn C_EncryptFinal(
        hSession: CK_SESSION_HANDLE,
        pLastEncryptedPart: CK_BYTE_PTR,
        pulLastEncryptedPartLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| unsafe {
            with_output(pLastEncryptedPart, pulLastEncryptedPartLen, |out| {
                dispatcher::encrypt_final(session, slot, out)
            })
        })
    }
);

cryptoki_fn!(
    unsafe fn C_DecryptInit(
        hSession: CK_SESSION_HANDLE,
        pMechanism: CK_MECHANISM_PTR,
        hKey: CK_OBJECT_HANDLE,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            let mechanism = unsafe { read_mechanism(pMechanism) }?;
            dispatcher::decrypt_init(session, slot, &mechanism, hKey)
        })
    }
);

cryptoki_fn!(
    unsafe fn C_Decrypt(
        hSession: CK_SESSION_HANDLE,
        pEncryptedData: CK_BYTE_PTR,
        ulEncryptedDataLen: CK_ULONG,
        pData: CK_BYTE_PTR,
        pulDataLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            committing(session, pData, |session| {
                let encrypted_data = unsafe { read_input(pEncryptedData, ulEncryptedDataLen) }?;
                unsafe {
                    with_output(pData, pulDataLen, |out| {
                        dispatcher::decrypt(session, slot, &encrypted_data, out)
                    })
                }
            })
        })
    }
);

cryptoki_fn!(
    unsafe fn C_DecryptUpdate(
        hSession: CK_SESSION_HANDLE,
        pEncryptedPart: CK_BYTE_PTR,
        ulEncryptedPartLen: CK_ULONG,
        pPart: CK_BYTE_PTR,
        pulPartLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            let encrypted_part = unsafe { read_input(pEncryptedPart, ulEncryptedPartLen) }?;
            unsafe {
                with_output(pPart, pulPartLen, |out| {
                    dispatcher::decrypt_update(session, slot, &encrypted_part, out)
                })
            }
        })
    }
);

cryptoki_fn!(
    unsafe fn C_DecryptFinal(
        hSession: CK_SESSION_HANDLE,
        pLastPart: CK_BYTE_PTR,
        pulLastPartLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| unsafe {
            with_output(pLastPart, pulLastPartLen, |out| {
                dispatcher::decrypt_final(session, slot, out)
            })
        })
    }
);

cryptoki_fn_not_supported!(
    C_DigestInit,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR
);

cryptoki_fn_not_supported!(
    C_Digest,
    hSession: CK_SESSION_HANDLE,
    pData: CK_BYTE_PTR,
    ulDataLen: CK_ULONG,
    pDigest: CK_BYTE_PTR,
    pulDigestLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_DigestUpdate,
    hSession: CK_SESSION_HANDLE,
    pPart: CK_BYTE_PTR,
    ulPartLen: CK_ULONG
);

cryptoki_fn_not_supported!(C_DigestKey, hSession: CK_SESSION_HANDLE, hKey: CK_OBJECT_HANDLE);

cryptoki_fn_not_supported!(
    C_DigestFinal,
    hSession: CK_SESSION_HANDLE,
    pDigest: CK_BYTE_PTR,
    pulDigestLen: CK_ULONG_PTR
);

cryptoki_fn!(
    unsafe fn C_SignInit(
        hSession: CK_SESSION_HANDLE,
        pMechanism: CK_MECHANISM_PTR,
        hKey: CK_OBJECT_HANDLE,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            let mechanism = unsafe { read_mechanism(pMechanism) }?;
            dispatcher::sign_init(session, slot, &mechanism, hKey)
        })
    }
);

cryptoki_fn!(
    unsafe fn C_Sign(
        hSession: CK_SESSION_HANDLE,
        pData: CK_BYTE_PTR,
        ulDataLen: CK_ULONG,
        pSignature: CK_BYTE_PTR,
        pulSignatureLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            committing(session, pSignature, |session| {
                let data = unsafe { read_input(pData, ulDataLen) }?;
                unsafe {
                    with_output(pSignature, pulSignatureLen, |out| {
                        dispatcher::sign(session, slot, &data, out)
                    })
                }
            })
        })
    }
);

cryptoki_fn!(
    unsafe fn C_SignUpdate(hSession: CK_SESSION_HANDLE, pPart: CK_BYTE_PTR, ulPartLen: CK_ULONG) {
        initialized!();
        with_session(hSession, |session, slot| {
            let part = unsafe { read_input(pPart, ulPartLen) }?;
            dispatcher::sign_update(session, slot, &part)
        })
    }
);

cryptoki_fn!(
    unsafe fn C_SignFinal(
        hSession: CK_SESSION_HANDLE,
        pSignature: CK_BYTE_PTR,
        pulSignatureLen: CK_ULONG_PTR,
    ) {
        initialized!();
        with_session(hSession, |session, slot| {
            committing(session, pSignature, |session| unsafe {
                with_output(pSignature, pulSignatureLen, |out| {
                    dispatcher::sign_final(session, slot, out)
                })
            })
        })
    }
);

cryptoki_fn_not_supported!(
    C_SignRecoverInit,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    hKey: CK_OBJECT_HANDLE
);

cryptoki_fn_not_supported!(
    C_SignRecover,
    hSession: CK_SESSION_HANDLE,
    pData: CK_BYTE_PTR,
    ulDataLen: CK_ULONG,
    pSignature: CK_BYTE_PTR,
    pulSignatureLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_VerifyInit,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    hKey: CK_OBJECT_HANDLE
);

cryptoki_fn_not_supported!(
    C_Verify,
    hSession: CK_SESSION_HANDLE,
    pData: CK_BYTE_PTR,
    ulDataLen: CK_ULONG,
    pSignature: CK_BYTE_PTR,
    ulSignatureLen: CK_ULONG
);

cryptoki_fn_not_supported!(
    C_VerifyUpdate,
    hSession: CK_SESSION_HANDLE,
    pPart: CK_BYTE_PTR,
    ulPartLen: CK_ULONG
);

cryptoki_fn_not_supported!(
    C_VerifyFinal,
    hSession: CK_SESSION_HANDLE,
    pSignature: CK_BYTE_PTR,
    ulSignatureLen: CK_ULONG
);

cryptoki_fn_not_supported!(
    C_VerifyRecoverInit,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    hKey: CK_OBJECT_HANDLE
);

cryptoki_fn_not_supported!(
    C_VerifyRecover,
    hSession: CK_SESSION_HANDLE,
    pSignature: CK_BYTE_PTR,
    ulSignatureLen: CK_ULONG,
    pData: CK_BYTE_PTR,
    pulDataLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_DigestEncryptUpdate,
    hSession: CK_SESSION_HANDLE,
    pPart: CK_BYTE_PTR,
    ulPartLen: CK_ULONG,
    pEncryptedPart: CK_BYTE_PTR,
    pulEncryptedPartLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_DecryptDigestUpdate,
    hSession: CK_SESSION_HANDLE,
    pEncryptedPart: CK_BYTE_PTR,
    ulEncryptedPartLen: CK_ULONG,
    pPart: CK_BYTE_PTR,
    pulPartLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_SignEncryptUpdate,
    hSession: CK_SESSION_HANDLE,
    pPart: CK_BYTE_PTR,
    ulPartLen: CK_ULONG,
    pEncryptedPart: CK_BYTE_PTR,
    pulEncryptedPartLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_DecryptVerifyUpdate,
    hSession: CK_SESSION_HANDLE,
    pEncryptedPart: CK_BYTE_PTR,
    ulEncryptedPartLen: CK_ULONG,
    pPart: CK_BYTE_PTR,
    pulPartLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_GenerateKey,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulCount: CK_ULONG,
    phKey: CK_OBJECT_HANDLE_PTR
);

cryptoki_fn_not_supported!(
    C_GenerateKeyPair,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    pPublicKeyTemplate: CK_ATTRIBUTE_PTR,
    ulPublicKeyAttributeCount: CK_ULONG,
    pPrivateKeyTemplate: CK_ATTRIBUTE_PTR,
    ulPrivateKeyAttributeCount: CK_ULONG,
    phPublicKey: CK_OBJECT_HANDLE_PTR,
    phPrivateKey: CK_OBJECT_HANDLE_PTR
);

cryptoki_fn_not_supported!(
    C_WrapKey,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    hWrappingKey: CK_OBJECT_HANDLE,
    hKey: CK_OBJECT_HANDLE,
    pWrappedKey: CK_BYTE_PTR,
    pulWrappedKeyLen: CK_ULONG_PTR
);

cryptoki_fn_not_supported!(
    C_UnwrapKey,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    hUnwrappingKey: CK_OBJECT_HANDLE,
    pWrappedKey: CK_BYTE_PTR,
    ulWrappedKeyLen: CK_ULONG,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulAttributeCount: CK_ULONG,
    phKey: CK_OBJECT_HANDLE_PTR
);

cryptoki_fn_not_supported!(
    C_DeriveKey,
    hSession: CK_SESSION_HANDLE,
    pMechanism: CK_MECHANISM_PTR,
    hBaseKey: CK_OBJECT_HANDLE,
    pTemplate: CK_ATTRIBUTE_PTR,
    ulAttributeCount: CK_ULONG,
    phKey: CK_OBJECT_HANDLE_PTR
);

cryptoki_fn_not_supported!(
    C_SeedRandom,
    hSession: CK_SESSION_HANDLE,
    pSeed: CK_BYTE_PTR,
    ulSeedLen: CK_ULONG
);

cryptoki_fn_not_supported!(
    C_GenerateRandom,
    hSession: CK_SESSION_HANDLE,
    pRandomData: CK_BYTE_PTR,
    ulRandomLen: CK_ULONG
);

cryptoki_fn!(
    fn C_GetFunctionStatus(hSession: CK_SESSION_HANDLE) {
        initialized!();
        Err(MError::FunctionNotParallel)
    }
);

cryptoki_fn!(
    fn C_CancelFunction(hSession: CK_SESSION_HANDLE) {
        initialized!();
        Err(MError::FunctionNotParallel)
    }
);

cryptoki_fn_not_supported!(
    C_WaitForSlotEvent,
    flags: CK_FLAGS,
    pSlot: CK_SLOT_ID_PTR,
    pReserved: CK_VOID_PTR
);
