use std::{io::Write, ptr};

use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Verifier};
use pkcs11_sys::{
    CK_FUNCTION_LIST, CK_FUNCTION_LIST_PTR, CK_MECHANISM, CK_MECHANISM_INFO, CK_MECHANISM_TYPE,
    CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID, CK_TOKEN_INFO, CK_ULONG, CKF_SERIAL_SESSION,
    CKF_SIGN, CKM_AES_ECB, CKM_ECDSA, CKM_ECDSA_SHA256, CKR_ARGUMENTS_BAD, CKR_DATA_LEN_RANGE,
    CKR_FUNCTION_NOT_SUPPORTED, CKR_GENERAL_ERROR, CKR_HOST_MEMORY, CKR_MECHANISM_INVALID,
    CKR_OK, CKR_OPERATION_NOT_INITIALIZED,
};
use serde_json::{Value, json};
use serial_test::serial;
use tempfile::NamedTempFile;

use crate::{C_GetFunctionList, config::CARDHSM_PKCS11_CONF_ENV};

const SLOT_ID: CK_SLOT_ID = 0;
const AES_HANDLE: CK_OBJECT_HANDLE = 1;
const EC_HANDLE: CK_OBJECT_HANDLE = 2;

// FIPS-197 appendix C.1
const AES_KEY: &str = "000102030405060708090a0b0c0d0e0f";
const PLAINTEXT_BLOCK: &str = "00112233445566778899aabbccddeeff";
const CIPHERTEXT_BLOCK: &str = "69c4e0d86a7b0430d8cdb78070b4c55a";
// RFC 6979 appendix A.2.5
const EC_PRIVATE_KEY: &str = "c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721";

fn provider_conf() -> Value {
    json!({
        "log_level": "trace",
        "log_home": std::env::temp_dir().join("cardhsm-pkcs11-tests"),
        "tokens": [{
            "label": "test token",
            "serial_number": "0001",
            "keys": [
                { "type": "aes", "handle": AES_HANDLE, "label": "vol1", "key": AES_KEY },
                { "type": "ec_p256", "handle": EC_HANDLE, "label": "signer", "private_key": EC_PRIVATE_KEY }
            ]
        }]
    })
}

/// Point the provider at `conf` and call its `C_GetFunctionList`.
fn get_function_list(conf: &str) -> (CK_RV, CK_FUNCTION_LIST_PTR) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(conf.as_bytes()).unwrap();
    // SAFETY: provider tests are serialized
    unsafe { std::env::set_var(CARDHSM_PKCS11_CONF_ENV, file.path()) };
    let mut function_list: CK_FUNCTION_LIST_PTR = ptr::null_mut();
    let rv = unsafe { C_GetFunctionList(&raw mut function_list) };
    (rv, function_list)
}

/// Load `conf`, then re-initialize the module with the registered backend.
fn start(conf: &Value) -> &'static CK_FUNCTION_LIST {
    let (rv, function_list) = get_function_list(&conf.to_string());
    assert_eq!(rv, CKR_OK);
    let f = unsafe { &*function_list };
    unsafe {
        let _ = (f.C_Finalize.unwrap())(ptr::null_mut());
        assert_eq!((f.C_Initialize.unwrap())(ptr::null_mut()), CKR_OK);
    }
    f
}

fn open_session(f: &CK_FUNCTION_LIST) -> CK_SESSION_HANDLE {
    let mut session = 0;
    let rv = unsafe {
        (f.C_OpenSession.unwrap())(
            SLOT_ID,
            CKF_SERIAL_SESSION,
            ptr::null_mut(),
            None,
            &raw mut session,
        )
    };
    assert_eq!(rv, CKR_OK);
    session
}

fn mechanism(mechanism_type: CK_MECHANISM_TYPE) -> CK_MECHANISM {
    CK_MECHANISM {
        mechanism: mechanism_type,
        pParameter: ptr::null_mut(),
        ulParameterLen: 0,
    }
}

fn verifying_key() -> VerifyingKey {
    VerifyingKey::from(&SigningKey::from_slice(&hex::decode(EC_PRIVATE_KEY).unwrap()).unwrap())
}

#[test]
#[serial]
fn multi_part_sign_is_a_valid_ecdsa_signature() {
    let f = start(&provider_conf());
    let session = open_session(f);
    unsafe {
        let mut mech = mechanism(CKM_ECDSA_SHA256);
        assert_eq!((f.C_SignInit.unwrap())(session, &raw mut mech, EC_HANDLE), CKR_OK);
        for part in [&b"Hello "[..], &b"World"[..]] {
            let mut part = part.to_vec();
            assert_eq!(
                (f.C_SignUpdate.unwrap())(session, part.as_mut_ptr(), part.len() as CK_ULONG),
                CKR_OK
            );
        }
        let mut len: CK_ULONG = 0;
        assert_eq!(
            (f.C_SignFinal.unwrap())(session, ptr::null_mut(), &raw mut len),
            CKR_OK
        );
        assert_eq!(len, 64);
        let mut multi_part = vec![0_u8; len as usize];
        assert_eq!(
            (f.C_SignFinal.unwrap())(session, multi_part.as_mut_ptr(), &raw mut len),
            CKR_OK
        );
        assert_eq!(len, 64);
        assert_eq!(
            (f.C_SignFinal.unwrap())(session, multi_part.as_mut_ptr(), &raw mut len),
            CKR_OPERATION_NOT_INITIALIZED
        );
        let signature = Signature::from_slice(&multi_part).unwrap();
        verifying_key().verify(b"Hello World", &signature).unwrap();

        // Signing is deterministic: the one-shot signature of the concatenated
        // message is the same.
        assert_eq!((f.C_SignInit.unwrap())(session, &raw mut mech, EC_HANDLE), CKR_OK);
        let mut message = b"Hello World".to_vec();
        let mut single_shot = vec![0_u8; 64];
        let mut len: CK_ULONG = 64;
        assert_eq!(
            (f.C_Sign.unwrap())(
                session,
                message.as_mut_ptr(),
                message.len() as CK_ULONG,
                single_shot.as_mut_ptr(),
                &raw mut len
            ),
            CKR_OK
        );
        assert_eq!(single_shot, multi_part);
        assert_eq!((f.C_CloseSession.unwrap())(session), CKR_OK);
    }
}

#[test]
#[serial]
fn aes_ecb_round_trip() {
    let f = start(&provider_conf());
    let session = open_session(f);
    let plaintext = hex::decode(format!("{PLAINTEXT_BLOCK}{PLAINTEXT_BLOCK}")).unwrap();
    unsafe {
        let mut mech = mechanism(CKM_AES_ECB);
        assert_eq!(
            (f.C_EncryptInit.unwrap())(session, &raw mut mech, AES_HANDLE),
            CKR_OK
        );
        let mut data = plaintext.clone();
        let mut len: CK_ULONG = 0;
        assert_eq!(
            (f.C_Encrypt.unwrap())(
                session,
                data.as_mut_ptr(),
                data.len() as CK_ULONG,
                ptr::null_mut(),
                &raw mut len
            ),
            CKR_OK
        );
        assert_eq!(len, 32);
        let mut ciphertext = vec![0_u8; len as usize];
        assert_eq!(
            (f.C_Encrypt.unwrap())(
                session,
                data.as_mut_ptr(),
                data.len() as CK_ULONG,
                ciphertext.as_mut_ptr(),
                &raw mut len
            ),
            CKR_OK
        );
        assert_eq!(hex::encode(&ciphertext[..16]), CIPHERTEXT_BLOCK);
        assert_eq!(ciphertext[..16], ciphertext[16..]);
        // a single-shot encrypt leaves the operation to be finalized
        let mut last = [0_u8; 16];
        let mut last_len: CK_ULONG = 16;
        assert_eq!(
            (f.C_EncryptFinal.unwrap())(session, last.as_mut_ptr(), &raw mut last_len),
            CKR_OK
        );
        assert_eq!(last_len, 0);

        assert_eq!(
            (f.C_DecryptInit.unwrap())(session, &raw mut mech, AES_HANDLE),
            CKR_OK
        );
        let mut recovered = Vec::new();
        for chunk in ciphertext.chunks(16) {
            let mut chunk = chunk.to_vec();
            let mut out = [0_u8; 16];
            let mut out_len: CK_ULONG = 16;
            assert_eq!(
                (f.C_DecryptUpdate.unwrap())(
                    session,
                    chunk.as_mut_ptr(),
                    chunk.len() as CK_ULONG,
                    out.as_mut_ptr(),
                    &raw mut out_len
                ),
                CKR_OK
            );
            recovered.extend_from_slice(&out[..out_len as usize]);
        }
        let mut last_len: CK_ULONG = 16;
        assert_eq!(
            (f.C_DecryptFinal.unwrap())(session, last.as_mut_ptr(), &raw mut last_len),
            CKR_OK
        );
        assert_eq!(last_len, 0);
        assert_eq!(recovered, plaintext);
    }
}

#[test]
#[serial]
fn partial_block_is_out_of_range() {
    let f = start(&provider_conf());
    let session = open_session(f);
    unsafe {
        let mut mech = mechanism(CKM_AES_ECB);
        assert_eq!(
            (f.C_EncryptInit.unwrap())(session, &raw mut mech, AES_HANDLE),
            CKR_OK
        );
        let mut data = vec![0_u8; 17];
        let mut out = vec![0_u8; 32];
        let mut len: CK_ULONG = 32;
        assert_eq!(
            (f.C_EncryptUpdate.unwrap())(
                session,
                data.as_mut_ptr(),
                data.len() as CK_ULONG,
                out.as_mut_ptr(),
                &raw mut len
            ),
            CKR_DATA_LEN_RANGE
        );
    }
}

#[test]
#[serial]
fn keys_only_offer_their_own_operations() {
    let f = start(&provider_conf());
    let session = open_session(f);
    unsafe {
        let mut aes = mechanism(CKM_AES_ECB);
        let mut ecdsa = mechanism(CKM_ECDSA);
        assert_eq!(
            (f.C_EncryptInit.unwrap())(session, &raw mut aes, EC_HANDLE),
            CKR_FUNCTION_NOT_SUPPORTED
        );
        assert_eq!(
            (f.C_SignInit.unwrap())(session, &raw mut ecdsa, AES_HANDLE),
            CKR_FUNCTION_NOT_SUPPORTED
        );
        assert_eq!(
            (f.C_SignInit.unwrap())(session, &raw mut aes, EC_HANDLE),
            CKR_MECHANISM_INVALID
        );
        // the failed inits left the session idle
        assert_eq!(
            (f.C_SignInit.unwrap())(session, &raw mut ecdsa, EC_HANDLE),
            CKR_OK
        );
    }
}

#[test]
#[serial]
fn token_and_mechanisms_come_from_the_configuration() {
    let f = start(&provider_conf());
    unsafe {
        let mut count: CK_ULONG = 0;
        assert_eq!(
            (f.C_GetSlotList.unwrap())(0, ptr::null_mut(), &raw mut count),
            CKR_OK
        );
        assert_eq!(count, 1);

        let mut info = CK_TOKEN_INFO::default();
        assert_eq!((f.C_GetTokenInfo.unwrap())(SLOT_ID, &raw mut info), CKR_OK);
        assert_eq!(String::from_utf8_lossy(&info.label).trim_end(), "test token");
        assert_eq!(
            String::from_utf8_lossy(&info.serialNumber).trim_end(),
            "0001"
        );

        let mut count: CK_ULONG = 0;
        assert_eq!(
            (f.C_GetMechanismList.unwrap())(SLOT_ID, ptr::null_mut(), &raw mut count),
            CKR_OK
        );
        assert_eq!(count, 3);
        let mut mechanisms = vec![0; count as usize];
        assert_eq!(
            (f.C_GetMechanismList.unwrap())(SLOT_ID, mechanisms.as_mut_ptr(), &raw mut count),
            CKR_OK
        );
        assert!(mechanisms.contains(&CKM_AES_ECB));
        assert!(mechanisms.contains(&CKM_ECDSA_SHA256));

        let mut info = CK_MECHANISM_INFO::default();
        assert_eq!(
            (f.C_GetMechanismInfo.unwrap())(SLOT_ID, CKM_ECDSA, &raw mut info),
            CKR_OK
        );
        assert_eq!(info.flags & CKF_SIGN, CKF_SIGN);
        assert_eq!(info.ulMinKeySize, 256);
    }
}

#[test]
#[serial]
fn sign_buffer_limit_comes_from_the_configuration() {
    let mut conf = provider_conf();
    conf["max_sign_buffer_len"] = json!(300);
    let f = start(&conf);
    let session = open_session(f);
    unsafe {
        let mut mech = mechanism(CKM_ECDSA_SHA256);
        assert_eq!((f.C_SignInit.unwrap())(session, &raw mut mech, EC_HANDLE), CKR_OK);
        let mut part = vec![0x61_u8; 200];
        assert_eq!(
            (f.C_SignUpdate.unwrap())(session, part.as_mut_ptr(), part.len() as CK_ULONG),
            CKR_OK
        );
        assert_eq!(
            (f.C_SignUpdate.unwrap())(session, part.as_mut_ptr(), part.len() as CK_ULONG),
            CKR_HOST_MEMORY
        );
        // the first part is still there
        let mut signature = [0_u8; 64];
        let mut len: CK_ULONG = 64;
        assert_eq!(
            (f.C_SignFinal.unwrap())(session, signature.as_mut_ptr(), &raw mut len),
            CKR_OK
        );
        let signature = Signature::from_slice(&signature).unwrap();
        verifying_key().verify(&[0x61_u8; 200], &signature).unwrap();
    }
}

#[test]
#[serial]
fn unusable_configuration_is_a_general_error() {
    let (rv, _) = get_function_list(r#"{ "kms_server_url": "http://localhost:9998" }"#);
    assert_eq!(rv, CKR_GENERAL_ERROR);

    let mut conf = provider_conf();
    conf["tokens"][0]["keys"][0]["key"] = json!("0011");
    let (rv, _) = get_function_list(&conf.to_string());
    assert_eq!(rv, CKR_GENERAL_ERROR);

    let dir = tempfile::tempdir().unwrap();
    // SAFETY: provider tests are serialized
    unsafe { std::env::set_var(CARDHSM_PKCS11_CONF_ENV, dir.path().join("absent.json")) };
    let mut function_list: CK_FUNCTION_LIST_PTR = ptr::null_mut();
    assert_eq!(
        unsafe { C_GetFunctionList(&raw mut function_list) },
        CKR_GENERAL_ERROR
    );
    assert_eq!(
        unsafe { C_GetFunctionList(ptr::null_mut()) },
        CKR_ARGUMENTS_BAD
    );
}
