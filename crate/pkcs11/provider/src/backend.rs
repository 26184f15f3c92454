use std::{collections::BTreeMap, sync::Arc};

use cardhsm_pkcs11_module::traits::{
    Backend, CapabilityObject, MechanismInfo, Token, Version,
};
use pkcs11_sys::CK_MECHANISM_TYPE;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{
    config::{KeyConf, ProviderConf, TokenConf},
    error::result::{Pkcs11Result, Pkcs11ResultHelper},
    soft_aes::{self, AesKey},
    soft_ecdsa::{self, EcP256Key},
};

const MANUFACTURER_ID: &str = "CardHSM";

pub(crate) struct SoftBackend {
    tokens: Vec<Arc<SoftToken>>,
    crypto_buffer_limit: usize,
}

impl SoftBackend {
    /// Instantiate the tokens described by `conf`, decoding and checking
    /// every key.
    pub(crate) fn instantiate(conf: &ProviderConf) -> Pkcs11Result<Self> {
        let tokens = conf
            .tokens
            .iter()
            .map(|token| SoftToken::instantiate(token).map(Arc::new))
            .collect::<Pkcs11Result<Vec<_>>>()?;
        debug!("software backend with {} token(s)", tokens.len());
        Ok(Self {
            tokens,
            crypto_buffer_limit: conf.max_sign_buffer_len,
        })
    }
}

impl Backend for SoftBackend {
    fn manufacturer_id(&self) -> String {
        MANUFACTURER_ID.to_owned()
    }

    fn library_description(&self) -> String {
        "CardHSM PKCS#11 provider".to_owned()
    }

    fn library_version(&self) -> Version {
        let version = env!("CARGO_PKG_VERSION");
        let mut split = version.split('.');
        let major = split.next().unwrap_or("0").parse::<u8>().unwrap_or(0);
        let minor = split.next().unwrap_or("0").parse::<u8>().unwrap_or(0);
        Version { major, minor }
    }

    fn tokens(&self) -> Vec<Arc<dyn Token>> {
        trace!("tokens");
        self.tokens
            .iter()
            .map(|token| Arc::clone(token) as Arc<dyn Token>)
            .collect()
    }

    fn crypto_buffer_limit(&self) -> usize {
        self.crypto_buffer_limit
    }
}

/// A token whose keys live in process memory.
pub(crate) struct SoftToken {
    label: String,
    serial_number: String,
    objects: Vec<Arc<dyn CapabilityObject>>,
    mechanisms: BTreeMap<CK_MECHANISM_TYPE, MechanismInfo>,
}

impl SoftToken {
    fn instantiate(conf: &TokenConf) -> Pkcs11Result<Self> {
        let mut objects: Vec<Arc<dyn CapabilityObject>> = Vec::with_capacity(conf.keys.len());
        let mut mechanisms = BTreeMap::new();
        for key in &conf.keys {
            match key {
                KeyConf::Aes { handle, label, key } => {
                    let key = Zeroizing::new(
                        hex::decode(key).with_context(|| format!("AES key {label:?}"))?,
                    );
                    objects.push(Arc::new(AesKey::new(*handle, label.clone(), &key)?));
                    mechanisms.extend(soft_aes::MECHANISMS);
                }
                KeyConf::EcP256 {
                    handle,
                    label,
                    private_key,
                } => {
                    let private_key = Zeroizing::new(
                        hex::decode(private_key)
                            .with_context(|| format!("P-256 private key {label:?}"))?,
                    );
                    objects.push(Arc::new(EcP256Key::new(
                        *handle,
                        label.clone(),
                        &private_key,
                    )?));
                    mechanisms.extend(soft_ecdsa::MECHANISMS);
                }
            }
        }
        debug!(
            "token {:?}: {} key(s), {} mechanism(s)",
            conf.label,
            objects.len(),
            mechanisms.len()
        );
        Ok(Self {
            label: conf.label.clone(),
            serial_number: conf.serial_number.clone(),
            objects,
            mechanisms,
        })
    }
}

impl Token for SoftToken {
    fn slot_description(&self) -> String {
        format!("{MANUFACTURER_ID} software slot")
    }

    fn manufacturer_id(&self) -> String {
        MANUFACTURER_ID.to_owned()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn model(&self) -> String {
        "software".to_owned()
    }

    fn serial_number(&self) -> String {
        self.serial_number.clone()
    }

    fn objects(&self) -> Vec<Arc<dyn CapabilityObject>> {
        trace!("objects of token {:?}", self.label);
        self.objects.clone()
    }

    fn mechanisms(&self) -> Vec<(CK_MECHANISM_TYPE, MechanismInfo)> {
        self.mechanisms
            .iter()
            .map(|(mechanism, info)| (*mechanism, *info))
            .collect()
    }
}
