use aes::{
    Aes128, Aes192, Aes256,
    cipher::{
        BlockDecrypt, BlockEncrypt, KeyInit,
        generic_array::{GenericArray, typenum::U16},
    },
};
use cardhsm_pkcs11_module::{
    MError, MResult,
    core::{mechanism::Mechanism, output::OutputBuffer},
    traits::{Capabilities, CapabilityObject, MechanismInfo},
};
use pkcs11_sys::{CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CKF_DECRYPT, CKF_ENCRYPT, CKM_AES_ECB};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{
    error::result::{Pkcs11Result, Pkcs11ResultHelper},
    pkcs11_bail,
};

const BLOCK_LEN: usize = 16;

type Block = GenericArray<u8, U16>;

pub(crate) const MECHANISMS: [(CK_MECHANISM_TYPE, MechanismInfo); 1] = [(
    CKM_AES_ECB,
    MechanismInfo {
        min_key_size: 16,
        max_key_size: 32,
        flags: CKF_ENCRYPT | CKF_DECRYPT,
    },
)];

enum AesCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesCipher {
    fn new(key: &[u8]) -> Pkcs11Result<Self> {
        Ok(match key.len() {
            16 => Self::Aes128(Aes128::new_from_slice(key).context("AES-128 key")?),
            24 => Self::Aes192(Aes192::new_from_slice(key).context("AES-192 key")?),
            32 => Self::Aes256(Aes256::new_from_slice(key).context("AES-256 key")?),
            len => pkcs11_bail!("an AES key is 16, 24 or 32 bytes long, not {}", len),
        })
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(cipher) => cipher.encrypt_block(block),
            Self::Aes192(cipher) => cipher.encrypt_block(block),
            Self::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(cipher) => cipher.decrypt_block(block),
            Self::Aes192(cipher) => cipher.decrypt_block(block),
            Self::Aes256(cipher) => cipher.decrypt_block(block),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// An AES key used in ECB mode.
///
/// Every call processes whole blocks and keeps no state between calls, so a
/// multi-part operation is the concatenation of its parts and `*_final`
/// never produces output.
pub(crate) struct AesKey {
    handle: CK_OBJECT_HANDLE,
    label: String,
    cipher: AesCipher,
}

impl AesKey {
    pub(crate) fn new(handle: CK_OBJECT_HANDLE, label: String, key: &[u8]) -> Pkcs11Result<Self> {
        Ok(Self {
            handle,
            label,
            cipher: AesCipher::new(key)?,
        })
    }

    fn check_mechanism(mechanism: &Mechanism) -> MResult<()> {
        if mechanism.mechanism_type() != CKM_AES_ECB {
            return Err(MError::MechanismInvalid(mechanism.mechanism_type()));
        }
        if !mechanism.parameter().is_empty() {
            return Err(MError::MechanismParamInvalid);
        }
        Ok(())
    }

    fn process(
        &self,
        direction: Direction,
        input: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        if input.len() % BLOCK_LEN != 0 {
            debug!(
                "AES key {}: input of {} bytes is not a whole number of blocks",
                self.handle,
                input.len()
            );
            return Err(match direction {
                Direction::Encrypt => MError::DataLenRange,
                Direction::Decrypt => MError::EncryptedDataLenRange,
            });
        }
        if out.is_query() {
            out.set_required_len(input.len());
            return Ok(());
        }
        let mut blocks = Zeroizing::new(input.to_vec());
        for chunk in blocks.chunks_exact_mut(BLOCK_LEN) {
            let block = Block::from_mut_slice(chunk);
            match direction {
                Direction::Encrypt => self.cipher.encrypt_block(block),
                Direction::Decrypt => self.cipher.decrypt_block(block),
            }
        }
        out.write(&blocks)
    }
}

impl CapabilityObject for AesKey {
    fn handle(&self) -> CK_OBJECT_HANDLE {
        self.handle
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ENCRYPT_ALL | Capabilities::DECRYPT_ALL
    }

    fn encrypt_init(&self, mechanism: &Mechanism) -> MResult<()> {
        trace!("AES key {}: encrypt_init", self.handle);
        Self::check_mechanism(mechanism)
    }

    fn encrypt(
        &self,
        _mechanism: CK_MECHANISM_TYPE,
        data: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        self.process(Direction::Encrypt, data, out)
    }

    fn encrypt_update(
        &self,
        _mechanism: CK_MECHANISM_TYPE,
        part: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        self.process(Direction::Encrypt, part, out)
    }

    fn encrypt_final(&self, _mechanism: CK_MECHANISM_TYPE, out: &mut OutputBuffer<'_>) -> MResult<()> {
        out.write(&[])
    }

    fn decrypt_init(&self, mechanism: &Mechanism) -> MResult<()> {
        trace!("AES key {}: decrypt_init", self.handle);
        Self::check_mechanism(mechanism)
    }

    fn decrypt(
        &self,
        _mechanism: CK_MECHANISM_TYPE,
        encrypted_data: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        self.process(Direction::Decrypt, encrypted_data, out)
    }

    fn decrypt_update(
        &self,
        _mechanism: CK_MECHANISM_TYPE,
        encrypted_part: &[u8],
        out: &mut OutputBuffer<'_>,
    ) -> MResult<()> {
        self.process(Direction::Decrypt, encrypted_part, out)
    }

    fn decrypt_final(&self, _mechanism: CK_MECHANISM_TYPE, out: &mut OutputBuffer<'_>) -> MResult<()> {
        out.write(&[])
    }
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::CKM_AES_CBC;

    use super::*;

    // FIPS-197 appendix C.1
    const KEY: &str = "000102030405060708090a0b0c0d0e0f";
    const PLAINTEXT: &str = "00112233445566778899aabbccddeeff";
    const CIPHERTEXT: &str = "69c4e0d86a7b0430d8cdb78070b4c55a";

    fn key() -> AesKey {
        AesKey::new(1, "vol1".to_owned(), &hex::decode(KEY).unwrap()).unwrap()
    }

    #[test]
    fn encrypt_matches_known_answer() {
        let key = key();
        let plaintext = hex::decode(PLAINTEXT).unwrap();
        let mut storage = [0_u8; 16];
        let mut out = OutputBuffer::new(&mut storage);
        key.encrypt(CKM_AES_ECB, &plaintext, &mut out).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(hex::encode(storage), CIPHERTEXT);

        let ciphertext = storage;
        let mut out = OutputBuffer::new(&mut storage);
        key.decrypt(CKM_AES_ECB, &ciphertext, &mut out).unwrap();
        assert_eq!(hex::encode(storage), PLAINTEXT);
    }

    #[test]
    fn partial_blocks_are_rejected() {
        let key = key();
        let mut out = OutputBuffer::query();
        assert_eq!(
            key.encrypt(CKM_AES_ECB, &[0_u8; 17], &mut out),
            Err(MError::DataLenRange)
        );
        assert_eq!(
            key.decrypt_update(CKM_AES_ECB, &[0_u8; 15], &mut out),
            Err(MError::EncryptedDataLenRange)
        );
    }

    #[test]
    fn query_and_final() {
        let key = key();
        let mut out = OutputBuffer::query();
        key.encrypt_update(CKM_AES_ECB, &[0_u8; 48], &mut out).unwrap();
        assert_eq!(out.len(), 48);

        let mut storage = [0_u8; 4];
        let mut out = OutputBuffer::new(&mut storage);
        key.encrypt_final(CKM_AES_ECB, &mut out).unwrap();
        assert_eq!(out.len(), 0);

        let mut out = OutputBuffer::new(&mut storage);
        assert_eq!(
            key.encrypt(CKM_AES_ECB, &[0_u8; 16], &mut out),
            Err(MError::BufferTooSmall)
        );
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn only_ecb_is_accepted() {
        let key = key();
        assert_eq!(key.encrypt_init(&Mechanism::new(CKM_AES_ECB)), Ok(()));
        assert_eq!(
            key.decrypt_init(&Mechanism::new(CKM_AES_CBC)),
            Err(MError::MechanismInvalid(CKM_AES_CBC))
        );
        assert_eq!(
            key.encrypt_init(&Mechanism::with_parameter(CKM_AES_ECB, vec![0; 16])),
            Err(MError::MechanismParamInvalid)
        );
    }

    #[test]
    fn key_length_is_checked() {
        assert!(AesKey::new(1, "short".to_owned(), &[0_u8; 15]).is_err());
        assert!(AesKey::new(1, "aes192".to_owned(), &[0_u8; 24]).is_ok());
        assert!(AesKey::new(1, "aes256".to_owned(), &[0_u8; 32]).is_ok());
    }
}
