use cardhsm_pkcs11_module::MError;
use thiserror::Error;

pub(crate) mod result;

#[derive(Error, Debug)]
pub enum Pkcs11Error {
    // Conversion errors
    #[error("Conversion error: {0}")]
    Conversion(String),
    // The provider configuration cannot be used
    #[error("Configuration error: {0}")]
    Configuration(String),
    // PKCS11 Module errors
    #[error("PKCS#11 error: {0}")]
    Pkcs11(String),
    #[error(transparent)]
    FromHexError(#[from] hex::FromHexError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Pkcs11Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Conversion(e.to_string())
    }
}

impl From<MError> for Pkcs11Error {
    fn from(e: MError) -> Self {
        Self::Pkcs11(e.to_string())
    }
}

impl From<Pkcs11Error> for MError {
    fn from(e: Pkcs11Error) -> Self {
        Self::GeneralError(e.to_string())
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! pkcs11_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::pkcs11_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::pkcs11_error!($fmt, $($arg)*));
        }
    };
}

/// Construct a configuration error from a string.
#[macro_export]
macro_rules! pkcs11_error {
    ($msg:literal) => {
        $crate::error::Pkcs11Error::Configuration(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::error::Pkcs11Error::Configuration($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Pkcs11Error::Configuration(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with a configuration error.
#[macro_export]
macro_rules! pkcs11_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::pkcs11_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::pkcs11_error!($fmt, $($arg)*))
    };
}
