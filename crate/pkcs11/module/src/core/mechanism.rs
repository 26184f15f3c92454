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

use pkcs11_sys::{CK_MECHANISM, CK_MECHANISM_TYPE};

use crate::{MError, MResult};

/// A mechanism as passed to a `C_*Init` call, with its parameter copied out of
/// caller memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mechanism {
    mechanism_type: CK_MECHANISM_TYPE,
    parameter: Vec<u8>,
}

impl Mechanism {
    #[must_use]
    pub const fn new(mechanism_type: CK_MECHANISM_TYPE) -> Self {
        Self {
            mechanism_type,
            parameter: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_parameter(mechanism_type: CK_MECHANISM_TYPE, parameter: Vec<u8>) -> Self {
        Self {
            mechanism_type,
            parameter,
        }
    }

    #[must_use]
    pub const fn mechanism_type(&self) -> CK_MECHANISM_TYPE {
        self.mechanism_type
    }

    #[must_use]
    pub fn parameter(&self) -> &[u8] {
        &self.parameter
    }
}

/// # Safety
/// `mechanism.pParameter` must be null or point to `ulParameterLen` readable bytes.
pub unsafe fn parse_mechanism(mechanism: CK_MECHANISM) -> MResult<Mechanism> {
    //  Bind to locals to prevent unaligned reads https://github.com/rust-lang/rust/issues/82523
    let mechanism_type = mechanism.mechanism;
    let parameter_ptr = mechanism.pParameter;
    let parameter_len = mechanism.ulParameterLen as usize;
    if parameter_len == 0 {
        return Ok(Mechanism::new(mechanism_type));
    }
    if parameter_ptr.is_null() {
        tracing::error!(
            "mechanism {:#x}: pParameter null with length {}",
            mechanism_type,
            parameter_len
        );
        return Err(MError::MechanismParamInvalid);
    }
    let parameter =
        unsafe { std::slice::from_raw_parts(parameter_ptr.cast::<u8>(), parameter_len) }.to_vec();
    Ok(Mechanism::with_parameter(mechanism_type, parameter))
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use pkcs11_sys::{CKM_AES_CBC, CKM_ECDSA};

    use super::*;

    #[test]
    fn parameter_is_copied() {
        let mut iv = [7_u8; 16];
        let raw = CK_MECHANISM {
            mechanism: CKM_AES_CBC,
            pParameter: iv.as_mut_ptr().cast(),
            ulParameterLen: iv.len() as _,
        };
        let mechanism = unsafe { parse_mechanism(raw) }.unwrap();
        iv[0] = 0;
        assert_eq!(mechanism.mechanism_type(), CKM_AES_CBC);
        assert_eq!(mechanism.parameter(), &[7_u8; 16]);
    }

    #[test]
    fn null_parameter_with_length_is_rejected() {
        let raw = CK_MECHANISM {
            mechanism: CKM_ECDSA,
            pParameter: ptr::null_mut(),
            ulParameterLen: 4,
        };
        assert_eq!(
            unsafe { parse_mechanism(raw) },
            Err(MError::MechanismParamInvalid)
        );
    }

    #[test]
    fn mechanism_without_parameter() {
        let raw = CK_MECHANISM {
            mechanism: CKM_ECDSA,
            pParameter: ptr::null_mut(),
            ulParameterLen: 0,
        };
        assert_eq!(
            unsafe { parse_mechanism(raw) },
            Ok(Mechanism::new(CKM_ECDSA))
        );
    }
}
