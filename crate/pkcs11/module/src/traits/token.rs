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

use pkcs11_sys::{CK_FLAGS, CK_MECHANISM_TYPE, CK_USER_TYPE};

use crate::{MResult, traits::CapabilityObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MechanismInfo {
    pub min_key_size: usize,
    pub max_key_size: usize,
    pub flags: CK_FLAGS,
}

/// The device seen through one slot.
///
/// Presence detection and transport stay behind this trait: the module only
/// reads descriptive data, resolves capability objects and forwards
/// authentication.
pub trait Token: Send + Sync {
    fn slot_description(&self) -> String;

    fn manufacturer_id(&self) -> String;

    fn label(&self) -> String;

    fn model(&self) -> String;

    fn serial_number(&self) -> String;

    /// The capability objects reachable from sessions opened on this token.
    fn objects(&self) -> Vec<Arc<dyn CapabilityObject>>;

    fn mechanisms(&self) -> Vec<(CK_MECHANISM_TYPE, MechanismInfo)>;

    fn login(&self, user_type: CK_USER_TYPE, pin: &[u8]) -> MResult<()> {
        Ok(())
    }

    fn logout(&self) -> MResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("label", &self.label())
            .field("serial_number", &self.serial_number())
            .finish_non_exhaustive()
    }
}
