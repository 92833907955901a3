use anyhow::{anyhow, Result};
use tracing::debug;

pub fn infer<K, R>(key: K) -> Result<R>
where
    K: AsRef<str>,
    R: ::core::str::FromStr,
    <R as ::core::str::FromStr>::Err: 'static + Send + Sync + ::core::fmt::Display,
{
    let key = key.as_ref();

    infer_string(key).and_then(|e| {
        e.parse()
            .map_err(|error| anyhow!("failed to parse the environment variable ({key}): {error}"))
    })
}

pub fn infer_string<K>(key: K) -> Result<String>
where
    K: AsRef<str>,
{
    let key = key.as_ref();

    ::std::env::var(key).map_err(|_| anyhow!("failed to find the environment variable: {key}"))
}

/// Reads an optional setting, falling back to `default` when the variable is
/// unset or does not parse.
pub fn infer_or<K, R>(key: K, default: R) -> R
where
    K: AsRef<str>,
    R: ::core::str::FromStr,
    <R as ::core::str::FromStr>::Err: 'static + Send + Sync + ::core::fmt::Display,
{
    let key = key.as_ref();
    match infer(key) {
        Ok(value) => value,
        Err(error) => {
            debug!("using the default value of {key}: {error}");
            default
        }
    }
}

pub fn infer_string_or<K>(key: K, default: &str) -> String
where
    K: AsRef<str>,
{
    infer_string(key)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.into())
}
