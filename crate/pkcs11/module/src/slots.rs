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

use std::sync::{Arc, Mutex, MutexGuard};

use pkcs11_sys::{CK_OBJECT_HANDLE, CK_SLOT_ID};
use tracing::{debug, info};

use crate::{
    MError, MResult,
    objects_store::ObjectsStore,
    traits::{CapabilityObject, Token},
};

/// A slot and the token it holds.
///
/// `lock` serializes every access to the token made on behalf of the
/// sessions opened on this slot.
#[derive(Debug)]
pub(crate) struct Slot {
    id: CK_SLOT_ID,
    token: Arc<dyn Token>,
    objects: ObjectsStore,
    lock: Mutex<()>,
}

impl Slot {
    pub(crate) fn new(id: CK_SLOT_ID, token: Arc<dyn Token>) -> Self {
        let objects = ObjectsStore::new(token.objects());
        info!(
            "slot {id}: token {:?} with {} objects",
            token.label(),
            objects.len()
        );
        Self {
            id,
            token,
            objects,
            lock: Mutex::new(()),
        }
    }

    pub(crate) const fn id(&self) -> CK_SLOT_ID {
        self.id
    }

    pub(crate) fn token(&self) -> &dyn Token {
        self.token.as_ref()
    }

    /// Acquire the slot lock; released when the guard drops.
    pub(crate) fn lock(&self) -> MResult<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| {
            MError::GeneralError(format!("slot {}: lock poisoned", self.id))
        })
    }

    pub(crate) fn find_object(
        &self,
        handle: CK_OBJECT_HANDLE,
    ) -> MResult<Arc<dyn CapabilityObject>> {
        let object = self.objects.get_using_handle(handle)?;
        debug!("slot {}: resolved object {} ({})", self.id, handle, object.label());
        Ok(object)
    }
}

/// The slots of an initialized module, in backend token order.
#[derive(Debug, Default)]
pub(crate) struct SlotRegistry {
    slots: Vec<Arc<Slot>>,
}

impl SlotRegistry {
    pub(crate) fn new(tokens: Vec<Arc<dyn Token>>) -> Self {
        let slots = tokens
            .into_iter()
            .enumerate()
            .map(|(index, token)| Arc::new(Slot::new(index as CK_SLOT_ID, token)))
            .collect();
        Self { slots }
    }

    pub(crate) fn get(&self, id: CK_SLOT_ID) -> MResult<&Arc<Slot>> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .ok_or(MError::SlotIdInvalid(id))
    }

    pub(crate) fn ids(&self) -> Vec<CK_SLOT_ID> {
        self.slots.iter().map(|slot| slot.id).collect()
    }
}
