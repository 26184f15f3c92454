use std::fmt::Display;

use super::Pkcs11Error;

pub(crate) type Pkcs11Result<R> = Result<R, Pkcs11Error>;

pub(crate) trait Pkcs11ResultHelper<T> {
    /// Prefix the error with `context`, turning it into a configuration error.
    fn context(self, context: &str) -> Pkcs11Result<T>;

    fn with_context<D, O>(self, op: O) -> Pkcs11Result<T>
    where
        D: Display,
        O: FnOnce() -> D;
}

impl<T, E> Pkcs11ResultHelper<T> for Result<T, E>
where
    E: Display,
{
    fn context(self, context: &str) -> Pkcs11Result<T> {
        self.map_err(|e| Pkcs11Error::Configuration(format!("{context}: {e}")))
    }

    fn with_context<D, O>(self, op: O) -> Pkcs11Result<T>
    where
        D: Display,
        O: FnOnce() -> D,
    {
        self.map_err(|e| Pkcs11Error::Configuration(format!("{}: {e}", op())))
    }
}
