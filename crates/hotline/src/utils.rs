use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Splits a `host:port` configuration string, same shape the binary crate's
/// CLI args arrive in.
pub fn parse_addr(arg: &str) -> Option<(&str, u16)> {
    let (host, port) = arg.rsplit_once(':')?;
    Some((host, port.parse().ok()?))
}
