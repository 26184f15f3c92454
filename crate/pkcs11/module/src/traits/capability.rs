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

use std::sync::Arc;

use bitflags::bitflags;
use pkcs11_sys::{CK_MECHANISM_TYPE, CK_OBJECT_HANDLE};
use strum_macros::Display;

use crate::{
    MError, MResult,
    core::{mechanism::Mechanism, output::OutputBuffer},
};

bitflags! {
    /// The operations a key object implements natively.
    ///
    /// Any subset is legal; an absent bit is a fact the dispatcher checks
    /// before calling, never an error on its own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        const ENCRYPT_INIT = 0x0001;
        const ENCRYPT = 0x0002;
        const ENCRYPT_UPDATE = 0x0004;
        const ENCRYPT_FINAL = 0x0008;
        const DECRYPT_INIT = 0x0010;
        const DECRYPT = 0x0020;
        const DECRYPT_UPDATE = 0x0040;
        const DECRYPT_FINAL = 0x0080;
        const SIGN_INIT = 0x0100;
        const SIGN = 0x0200;
        const SIGN_UPDATE = 0x0400;
        const SIGN_FINAL = 0x0800;

        const ENCRYPT_ALL = Self::ENCRYPT_INIT.bits()
            | Self::ENCRYPT.bits()
            | Self::ENCRYPT_UPDATE.bits()
            | Self::ENCRYPT_FINAL.bits();
        const DECRYPT_ALL = Self::DECRYPT_INIT.bits()
            | Self::DECRYPT.bits()
            | Self::DECRYPT_UPDATE.bits()
            | Self::DECRYPT_FINAL.bits();
        const SIGN_ALL = Self::SIGN_INIT.bits()
            | Self::SIGN.bits()
            | Self::SIGN_UPDATE.bits()
            | Self::SIGN_FINAL.bits();
    }
}

/// One callable operation of a capability object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Operation {
    EncryptInit,
    Encrypt,
    EncryptUpdate,
    EncryptFinal,
    DecryptInit,
    Decrypt,
    DecryptUpdate,
    DecryptFinal,
    SignInit,
    Sign,
    SignUpdate,
    SignFinal,
}

impl Operation {
    #[must_use]
    pub const fn capability(self) -> Capabilities {
        match self {
            Self::EncryptInit => Capabilities::ENCRYPT_INIT,
            Self::Encrypt => Capabilities::ENCRYPT,
            Self::EncryptUpdate => Capabilities::ENCRYPT_UPDATE,
            Self::EncryptFinal => Capabilities::ENCRYPT_FINAL,
            Self::DecryptInit => Capabilities::DECRYPT_INIT,
            Self::Decrypt => Capabilities::DECRYPT,
            Self::DecryptUpdate => Capabilities::DECRYPT_UPDATE,
            Self::DecryptFinal => Capabilities::DECRYPT_FINAL,
            Self::SignInit => Capabilities::SIGN_INIT,
            Self::Sign => Capabilities::SIGN,
            Self::SignUpdate => Capabilities::SIGN_UPDATE,
            Self::SignFinal => Capabilities::SIGN_FINAL,
        }
    }
}

/// A key or credential held by a token.
///
/// Operations after `*_init` receive the mechanism type recorded at init time.
/// Every operation defaults to `FunctionNotSupported`; implementors override
/// the ones they advertise in [`CapabilityObject::capabilities`]. Errors
/// returned here reach the caller unchanged.
pub trait CapabilityObject: Send + Sync {
    /// Handle of the object, unique within its token.
    fn handle(&self) -> CK_OBJECT_HANDLE;

    fn label(&self) -> String;

    fn capabilities(&self) -> Capabilities;

    fn supports(&self, operation: Operation) -> bool {
        self.capabilities().contains(operation.capability())
    }

    fn encrypt_init(&self, mechanism: &Mechanism) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn encrypt(
        &self,
        mechanism: CK_MECHANISM_TYPE,
        data: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn encrypt_update(
        &self,
        mechanism: CK_MECHANISM_TYPE,
        part: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn encrypt_final(&self, mechanism: CK_MECHANISM_TYPE, out: &mut OutputBuffer<'_>) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn decrypt_init(&self, mechanism: &Mechanism) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn decrypt(
        &self,
        mechanism: CK_MECHANISM_TYPE,
        encrypted_data: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn decrypt_update(
        &self,
        mechanism: CK_MECHANISM_TYPE,
        encrypted_part: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn decrypt_final(&self, mechanism: CK_MECHANISM_TYPE, out: &mut OutputBuffer<'_>) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn sign_init(&self, mechanism: &Mechanism) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn sign(
        &self,
        mechanism: CK_MECHANISM_TYPE,
        data: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn sign_update(&self, mechanism: CK_MECHANISM_TYPE, part: &[u8]) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }

    fn sign_final(&self, mechanism: CK_MECHANISM_TYPE, out: &mut OutputBuffer<'_>) -> MResult<()> {
        Err(MError::FunctionNotSupported)
    }
}

impl std::fmt::Debug for dyn CapabilityObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityObject")
            .field("handle", &self.handle())
            .field("label", &self.label())
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

/// Look up `operation` on `object`, failing with `FunctionNotSupported` when
/// the object does not implement it.
pub(crate) fn require(
    object: &Arc<dyn CapabilityObject>,
    operation: Operation,
) -> MResult<()> {
    if object.supports(operation) {
        Ok(())
    } else {
        tracing::debug!(
            "object {} ({}) does not support {}",
            object.handle(),
            object.label(),
            operation
        );
        Err(MError::FunctionNotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SignOnly;

    impl CapabilityObject for SignOnly {
        fn handle(&self) -> CK_OBJECT_HANDLE {
            1
        }

        fn label(&self) -> String {
            "sign only".to_owned()
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::SIGN_INIT | Capabilities::SIGN
        }
    }

    #[test]
    fn absent_capabilities_are_queryable() {
        let object: Arc<dyn CapabilityObject> = Arc::new(SignOnly);
        assert!(object.supports(Operation::SignInit));
        assert!(object.supports(Operation::Sign));
        assert!(!object.supports(Operation::SignUpdate));
        assert_eq!(
            require(&object, Operation::EncryptInit),
            Err(MError::FunctionNotSupported)
        );
        assert_eq!(
            object.sign_update(0, b"part"),
            Err(MError::FunctionNotSupported)
        );
    }

    #[test]
    fn family_masks_cover_their_operations() {
        assert!(Capabilities::SIGN_ALL.contains(Operation::SignFinal.capability()));
        assert!(!Capabilities::SIGN_ALL.contains(Operation::Decrypt.capability()));
        assert_eq!(Capabilities::all().bits().count_ones(), 12);
    }
}
