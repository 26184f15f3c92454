use std::{collections::HashMap, sync::Arc};

use pkcs11_sys::CK_OBJECT_HANDLE;
use tracing::{debug, warn};

use crate::{MError, MResult, traits::CapabilityObject};

/// The capability objects of one slot, keyed by handle.
/// These objects are visible across all the sessions opened on the slot.
#[derive(Default, Debug)]
pub(crate) struct ObjectsStore {
    objects: HashMap<CK_OBJECT_HANDLE, Arc<dyn CapabilityObject>>,
}

impl ObjectsStore {
    pub(crate) fn new(objects: Vec<Arc<dyn CapabilityObject>>) -> Self {
        let mut store = Self::default();
        for object in objects {
            store.upsert(object);
        }
        store
    }

    /// Insert the object, replacing any object registered under the same handle
    pub(crate) fn upsert(&mut self, object: Arc<dyn CapabilityObject>) {
        let handle = object.handle();
        match self.objects.insert(handle, object) {
            Some(previous) => warn!(
                "STORE: object {} replaced by a new object with handle: {handle}",
                previous.label()
            ),
            None => debug!("STORE: inserting new object with handle: {handle}"),
        }
    }

    pub(crate) fn get_using_handle(
        &self,
        handle: CK_OBJECT_HANDLE,
    ) -> MResult<Arc<dyn CapabilityObject>> {
        self.objects
            .get(&handle)
            .cloned()
            .ok_or(MError::ObjectHandleInvalid(handle))
    }

    /// The number of objects in the store
    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}
