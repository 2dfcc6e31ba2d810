pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Rejects a malformed request before it reaches any shared state.
#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_request(name, condition)
    }
}

#[cold]
pub fn invalid_request(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidRequest {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}
