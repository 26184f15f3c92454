use std::{
    collections::HashSet,
    env,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use cardhsm_pkcs11_module::DEFAULT_CRYPTO_BUFFER_LIMIT;
use pkcs11_sys::{CK_INVALID_HANDLE, CK_OBJECT_HANDLE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::result::{Pkcs11Result, Pkcs11ResultHelper},
    pkcs11_ensure, pkcs11_error,
};

/// Environment variable holding the path of the provider configuration.
pub const CARDHSM_PKCS11_CONF_ENV: &str = "CARDHSM_PKCS11_CONF";

/// Directory under the user home holding the configuration and the logs.
pub(crate) const CARDHSM_HOME: &str = ".cardhsm";

const CARDHSM_PKCS11_CONF_FILE: &str = "pkcs11.json";

/// Configuration of the provider, read from a JSON file
///
/// {
///     "log_level": "info",
///     "log_home": "/var/log/cardhsm",
///     "max_sign_buffer_len": 1048576,
///     "tokens": [
///         {
///             "label": "CardHSM token",
///             "serial_number": "0001",
///             "keys": [
///                 { "type": "aes", "handle": 1, "label": "vol1", "key": "0001...0f" },
///                 { "type": "ec_p256", "handle": 2, "label": "signer", "private_key": "c9af...21" }
///             ]
///         }
///     ]
/// }
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProviderConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_home: Option<String>,
    /// Upper bound, in bytes, of the data buffered by an emulated multi-part sign
    #[serde(default = "default_max_sign_buffer_len")]
    pub max_sign_buffer_len: usize,
    #[serde(default)]
    pub tokens: Vec<TokenConf>,
}

const fn default_max_sign_buffer_len() -> usize {
    DEFAULT_CRYPTO_BUFFER_LIMIT
}

impl Default for ProviderConf {
    fn default() -> Self {
        Self {
            log_level: None,
            log_home: None,
            max_sign_buffer_len: default_max_sign_buffer_len(),
            tokens: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TokenConf {
    pub label: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub keys: Vec<KeyConf>,
}

/// A key held by a software token. Key material is hex encoded.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum KeyConf {
    #[serde(rename = "aes")]
    Aes {
        handle: CK_OBJECT_HANDLE,
        label: String,
        key: String,
    },
    #[serde(rename = "ec_p256")]
    EcP256 {
        handle: CK_OBJECT_HANDLE,
        label: String,
        private_key: String,
    },
}

impl KeyConf {
    #[must_use]
    pub const fn handle(&self) -> CK_OBJECT_HANDLE {
        match self {
            Self::Aes { handle, .. } | Self::EcP256 { handle, .. } => *handle,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Aes { label, .. } | Self::EcP256 { label, .. } => label,
        }
    }
}

impl ProviderConf {
    /// Path of the configuration: `CARDHSM_PKCS11_CONF` when set, else
    /// `~/.cardhsm/pkcs11.json`. The flag tells whether the path was given
    /// explicitly.
    pub fn location() -> Pkcs11Result<(PathBuf, bool)> {
        if let Some(path) = env::var_os(CARDHSM_PKCS11_CONF_ENV) {
            return Ok((PathBuf::from(path), true));
        }
        let home =
            etcetera::home_dir().map_err(|e| pkcs11_error!("no home directory: {:?}", e))?;
        Ok((
            home.join(CARDHSM_HOME).join(CARDHSM_PKCS11_CONF_FILE),
            false,
        ))
    }

    /// Load the configuration from its default location.
    ///
    /// A missing default file yields the default configuration; a missing
    /// file named by `CARDHSM_PKCS11_CONF` is an error.
    pub fn load_from_env() -> Pkcs11Result<Self> {
        let (path, explicit) = Self::location()?;
        if !explicit && !path.exists() {
            debug!(
                "no configuration at {}: using the default configuration",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Pkcs11Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot read the configuration file {}", path.display()))?;
        let conf: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("malformed configuration in {}", path.display()))?;
        conf.validate()?;
        debug!(
            "loaded {} token(s) from {}",
            conf.tokens.len(),
            path.display()
        );
        Ok(conf)
    }

    fn validate(&self) -> Pkcs11Result<()> {
        pkcs11_ensure!(
            self.max_sign_buffer_len > 0,
            "max_sign_buffer_len must be positive"
        );
        for token in &self.tokens {
            let mut handles = HashSet::with_capacity(token.keys.len());
            for key in &token.keys {
                pkcs11_ensure!(
                    key.handle() != CK_INVALID_HANDLE,
                    "token {:?}: key {:?} uses the invalid handle 0",
                    token.label,
                    key.label()
                );
                pkcs11_ensure!(
                    handles.insert(key.handle()),
                    "token {:?}: handle {} is used by more than one key",
                    token.label,
                    key.handle()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_conf(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_full_configuration() {
        let file = write_conf(
            r#"{
                "log_level": "debug",
                "max_sign_buffer_len": 4096,
                "tokens": [{
                    "label": "card",
                    "serial_number": "42",
                    "keys": [
                        { "type": "aes", "handle": 1, "label": "vol1", "key": "00112233445566778899aabbccddeeff" },
                        { "type": "ec_p256", "handle": 2, "label": "signer", "private_key": "01" }
                    ]
                }]
            }"#,
        );
        let conf = ProviderConf::load(file.path()).unwrap();
        assert_eq!(conf.log_level.as_deref(), Some("debug"));
        assert_eq!(conf.log_home, None);
        assert_eq!(conf.max_sign_buffer_len, 4096);
        assert_eq!(conf.tokens.len(), 1);
        let keys = &conf.tokens[0].keys;
        assert_eq!(keys[0].handle(), 1);
        assert_eq!(keys[1].label(), "signer");
        assert!(matches!(keys[1], KeyConf::EcP256 { .. }));
    }

    #[test]
    fn defaults_apply_to_missing_fields() {
        let file = write_conf(r#"{ "tokens": [{ "label": "empty" }] }"#);
        let conf = ProviderConf::load(file.path()).unwrap();
        assert_eq!(conf.max_sign_buffer_len, DEFAULT_CRYPTO_BUFFER_LIMIT);
        assert_eq!(conf.tokens[0].serial_number, "");
        assert!(conf.tokens[0].keys.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = write_conf(r#"{ "kms_server_url": "http://localhost" }"#);
        let err = ProviderConf::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("malformed configuration"));

        let file = write_conf(
            r#"{ "tokens": [{ "label": "t", "keys": [{ "type": "rsa", "handle": 1, "label": "k" }] }] }"#,
        );
        assert!(ProviderConf::load(file.path()).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProviderConf::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read the configuration file"));
    }

    #[test]
    fn handles_must_be_unique_and_valid() {
        let file = write_conf(
            r#"{ "tokens": [{ "label": "t", "keys": [
                { "type": "aes", "handle": 3, "label": "a", "key": "00" },
                { "type": "aes", "handle": 3, "label": "b", "key": "00" }
            ] }] }"#,
        );
        let err = ProviderConf::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("more than one key"));

        let file = write_conf(
            r#"{ "tokens": [{ "label": "t", "keys": [
                { "type": "aes", "handle": 0, "label": "a", "key": "00" }
            ] }] }"#,
        );
        assert!(ProviderConf::load(file.path()).is_err());
    }
}
