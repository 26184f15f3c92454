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

use pkcs11_sys::{
    CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID,
    CKR_ARGUMENTS_BAD, CKR_BUFFER_TOO_SMALL, CKR_CRYPTOKI_ALREADY_INITIALIZED,
    CKR_CRYPTOKI_NOT_INITIALIZED, CKR_DATA_LEN_RANGE, CKR_DEVICE_ERROR,
    CKR_ENCRYPTED_DATA_LEN_RANGE, CKR_FUNCTION_NOT_PARALLEL, CKR_FUNCTION_NOT_SUPPORTED,
    CKR_GENERAL_ERROR, CKR_HOST_MEMORY, CKR_MECHANISM_INVALID, CKR_MECHANISM_PARAM_INVALID,
    CKR_OBJECT_HANDLE_INVALID, CKR_OPERATION_ACTIVE, CKR_OPERATION_NOT_INITIALIZED,
    CKR_SESSION_COUNT, CKR_SESSION_HANDLE_INVALID, CKR_SESSION_PARALLEL_NOT_SUPPORTED,
    CKR_SLOT_ID_INVALID, CKR_TOKEN_WRITE_PROTECTED,
};
use thiserror::Error;

/// Outcome of a failed call, one variant per `CKR_*` value this module returns.
///
/// Capability objects may surface any other return value through [`MError::Rv`];
/// it reaches the caller untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MError {
    #[error("bad arguments")]
    ArgumentsBad,

    #[error("output buffer too small")]
    BufferTooSmall,

    #[error("cryptoki already initialized")]
    CryptokiAlreadyInitialized,

    #[error("cryptoki not initialized")]
    CryptokiNotInitialized,

    #[error("data length out of range")]
    DataLenRange,

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("encrypted data length out of range")]
    EncryptedDataLenRange,

    #[error("function not parallel")]
    FunctionNotParallel,

    #[error("function not supported")]
    FunctionNotSupported,

    #[error("general error: {0}")]
    GeneralError(String),

    #[error("host memory exhausted")]
    HostMemory,

    #[error("mechanism invalid: {0:#x}")]
    MechanismInvalid(CK_MECHANISM_TYPE),

    #[error("mechanism parameter invalid")]
    MechanismParamInvalid,

    #[error("object handle invalid: {0}")]
    ObjectHandleInvalid(CK_OBJECT_HANDLE),

    #[error("an operation is already active")]
    OperationActive,

    #[error("operation not initialized")]
    OperationNotInitialized,

    #[error("too many open sessions")]
    SessionCount,

    #[error("session handle invalid: {0}")]
    SessionHandleInvalid(CK_SESSION_HANDLE),

    #[error("parallel sessions are not supported")]
    SessionParallelNotSupported,

    #[error("slot id invalid: {0}")]
    SlotIdInvalid(CK_SLOT_ID),

    #[error("token is write protected")]
    TokenWriteProtected,

    #[error("token returned {0:#x}")]
    Rv(CK_RV),
}

pub type MResult<T> = Result<T, MError>;

impl From<MError> for CK_RV {
    fn from(e: MError) -> Self {
        match e {
            MError::ArgumentsBad => CKR_ARGUMENTS_BAD,
            MError::BufferTooSmall => CKR_BUFFER_TOO_SMALL,
            MError::CryptokiAlreadyInitialized => CKR_CRYPTOKI_ALREADY_INITIALIZED,
            MError::CryptokiNotInitialized => CKR_CRYPTOKI_NOT_INITIALIZED,
            MError::DataLenRange => CKR_DATA_LEN_RANGE,
            MError::DeviceError(_) => CKR_DEVICE_ERROR,
            MError::EncryptedDataLenRange => CKR_ENCRYPTED_DATA_LEN_RANGE,
            MError::FunctionNotParallel => CKR_FUNCTION_NOT_PARALLEL,
            MError::FunctionNotSupported => CKR_FUNCTION_NOT_SUPPORTED,
            MError::GeneralError(_) => CKR_GENERAL_ERROR,
            MError::HostMemory => CKR_HOST_MEMORY,
            MError::MechanismInvalid(_) => CKR_MECHANISM_INVALID,
            MError::MechanismParamInvalid => CKR_MECHANISM_PARAM_INVALID,
            MError::ObjectHandleInvalid(_) => CKR_OBJECT_HANDLE_INVALID,
            MError::OperationActive => CKR_OPERATION_ACTIVE,
            MError::OperationNotInitialized => CKR_OPERATION_NOT_INITIALIZED,
            MError::SessionCount => CKR_SESSION_COUNT,
            MError::SessionHandleInvalid(_) => CKR_SESSION_HANDLE_INVALID,
            MError::SessionParallelNotSupported => CKR_SESSION_PARALLEL_NOT_SUPPORTED,
            MError::SlotIdInvalid(_) => CKR_SLOT_ID_INVALID,
            MError::TokenWriteProtected => CKR_TOKEN_WRITE_PROTECTED,
            MError::Rv(rv) => rv,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::GeneralError(format!("lock poisoned: {e}"))
    }
}
