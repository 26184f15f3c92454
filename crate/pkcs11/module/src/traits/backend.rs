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

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::{
    MError, MResult,
    crypto_buffer::DEFAULT_CRYPTO_BUFFER_LIMIT,
    traits::{Token, Version},
};

static BACKEND: Lazy<RwLock<Option<Arc<dyn Backend>>>> = Lazy::new(Default::default);

/// Supplies the tokens this module exposes, one slot per token.
pub trait Backend: Send + Sync {
    fn manufacturer_id(&self) -> String;

    fn library_description(&self) -> String;

    fn library_version(&self) -> Version;

    fn tokens(&self) -> Vec<Arc<dyn Token>>;

    /// Upper bound of a session's crypto buffer, in bytes.
    fn crypto_buffer_limit(&self) -> usize {
        DEFAULT_CRYPTO_BUFFER_LIMIT
    }
}

/// Install the backend used by the next `C_Initialize`.
pub fn register_backend(backend: Box<dyn Backend>) {
    let backend: Arc<dyn Backend> = Arc::from(backend);
    match BACKEND.write() {
        Ok(mut slot) => *slot = Some(backend),
        Err(poisoned) => *poisoned.into_inner() = Some(backend),
    }
}

pub fn backend() -> MResult<Arc<dyn Backend>> {
    BACKEND
        .read()?
        .clone()
        .ok_or_else(|| MError::GeneralError("no backend registered".to_owned()))
}
