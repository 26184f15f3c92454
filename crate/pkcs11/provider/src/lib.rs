use std::{ptr::addr_of_mut, str::FromStr};

use cardhsm_pkcs11_module::{
    CK_FUNCTION_LIST_PTR_PTR, CK_RV, CKR_OK, FUNC_LIST, traits::register_backend,
};
use pkcs11_sys::{CKR_ARGUMENTS_BAD, CKR_GENERAL_ERROR};
use tracing::{error, info, level_filters::LevelFilter};

use crate::{backend::SoftBackend, config::ProviderConf, logging::initialize_logging};

mod backend;
mod config;
mod error;
mod logging;
mod soft_aes;
mod soft_ecdsa;

pub use config::CARDHSM_PKCS11_CONF_ENV;

/// Environment variable overriding the `log_level` of the configuration.
pub const CARDHSM_PKCS11_LOGGING_LEVEL_ENV: &str = "CARDHSM_PKCS11_LOGGING_LEVEL";

const LOG_FILE_NAME: &str = "cardhsm-pkcs11.log";

/// # Safety
/// This function is the first one called by the PKCS#11 library client
/// to get the PKCS#11 functions list.
/// It loads the provider configuration and registers the software tokens it
/// describes; a configuration that cannot be used yields `CKR_GENERAL_ERROR`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn C_GetFunctionList(pp_function_list: CK_FUNCTION_LIST_PTR_PTR) -> CK_RV {
    if pp_function_list.is_null() {
        return CKR_ARGUMENTS_BAD;
    }
    let conf = ProviderConf::load_from_env();
    let (log_home, log_level) = conf
        .as_ref()
        .map_or((None, None), |conf| (conf.log_home.clone(), conf.log_level.clone()));
    initialize_logging(LOG_FILE_NAME, log_home, level_filter(log_level.as_deref()));
    let backend = match conf.and_then(|conf| SoftBackend::instantiate(&conf)) {
        Ok(backend) => backend,
        Err(e) => {
            error!("C_GetFunctionList: cannot load the provider: {e}");
            return CKR_GENERAL_ERROR;
        }
    };
    info!("C_GetFunctionList: software backend registered");
    register_backend(Box::new(backend));
    unsafe {
        // Update the function list with this PKCS#11 entry function
        FUNC_LIST.C_GetFunctionList = Some(C_GetFunctionList);
        // Return the function list to the client application using the output parameters
        *pp_function_list = addr_of_mut!(FUNC_LIST);
    }
    CKR_OK
}

/// The environment wins over the configuration; an unparsable level is
/// ignored.
fn level_filter(conf_level: Option<&str>) -> Option<LevelFilter> {
    std::env::var(CARDHSM_PKCS11_LOGGING_LEVEL_ENV)
        .ok()
        .as_deref()
        .or(conf_level)
        .and_then(|level| LevelFilter::from_str(level).ok())
}

#[cfg(test)]
mod tests;
