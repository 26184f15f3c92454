use cardhsm_pkcs11_module::{
    MError, MResult,
    core::{mechanism::Mechanism, output::OutputBuffer},
    traits::{Capabilities, CapabilityObject, MechanismInfo},
};
use p256::ecdsa::{
    Signature, SigningKey,
    signature::{Signer, hazmat::PrehashSigner},
};
use pkcs11_sys::{CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CKF_SIGN, CKM_ECDSA, CKM_ECDSA_SHA256};
use tracing::{debug, trace};

use crate::error::result::{Pkcs11Result, Pkcs11ResultHelper};

/// Raw `r || s` encoding on P-256.
pub(crate) const SIGNATURE_LEN: usize = 64;

const P256_INFO: MechanismInfo = MechanismInfo {
    min_key_size: 256,
    max_key_size: 256,
    flags: CKF_SIGN,
};

pub(crate) const MECHANISMS: [(CK_MECHANISM_TYPE, MechanismInfo); 2] =
    [(CKM_ECDSA, P256_INFO), (CKM_ECDSA_SHA256, P256_INFO)];

/// A P-256 private key that signs in one shot only.
///
/// It advertises neither `sign_update` nor `sign_final`: multi-part
/// signatures are assembled by the module before reaching the key.
pub(crate) struct EcP256Key {
    handle: CK_OBJECT_HANDLE,
    label: String,
    signing_key: SigningKey,
}

impl EcP256Key {
    pub(crate) fn new(
        handle: CK_OBJECT_HANDLE,
        label: String,
        private_key: &[u8],
    ) -> Pkcs11Result<Self> {
        let signing_key = SigningKey::from_slice(private_key)
            .with_context(|| format!("P-256 private key {label:?}"))?;
        Ok(Self {
            handle,
            label,
            signing_key,
        })
    }
}

impl CapabilityObject for EcP256Key {
    fn handle(&self) -> CK_OBJECT_HANDLE {
        self.handle
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SIGN_INIT | Capabilities::SIGN
    }

    fn sign_init(&self, mechanism: &Mechanism) -> MResult<()> {
        trace!("EC key {}: sign_init {:#x}", self.handle, mechanism.mechanism_type());
        match mechanism.mechanism_type() {
            CKM_ECDSA | CKM_ECDSA_SHA256 if mechanism.parameter().is_empty() => Ok(()),
            CKM_ECDSA | CKM_ECDSA_SHA256 => Err(MError::MechanismParamInvalid),
            other => Err(MError::MechanismInvalid(other)),
        }
    }

    fn sign(
        &self,
        mechanism: CK_MECHANISM_TYPE,
        data: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        if out.is_query() || out.capacity().is_some_and(|capacity| capacity < SIGNATURE_LEN) {
            out.set_required_len(SIGNATURE_LEN);
            return if out.is_query() {
                Ok(())
            } else {
                Err(MError::BufferTooSmall)
            };
        }
        let signature: Signature = match mechanism {
            CKM_ECDSA => PrehashSigner::<Signature>::sign_prehash(&self.signing_key, data)
                .map_err(|e| {
                    debug!(
                        "EC key {}: cannot sign a {} byte digest: {e}",
                        self.handle,
                        data.len()
                    );
                    MError::DataLenRange
                })?,
            CKM_ECDSA_SHA256 => Signer::<Signature>::try_sign(&self.signing_key, data)
                .map_err(|e| MError::GeneralError(e.to_string()))?,
            other => return Err(MError::MechanismInvalid(other)),
        };
        out.write(&signature.to_bytes())
    }
}
