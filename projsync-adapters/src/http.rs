//! Shared blocking-HTTP plumbing for the remote adapters.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::AdapterError;

pub(crate) fn agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// `base` + `path` with exactly one `/` between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Read the whole body and decode it strictly. Any mismatch with `T` is an
/// error; the payload is never patched up first.
pub(crate) fn decode_json<T: DeserializeOwned>(response: ureq::Response) -> Result<T, AdapterError> {
    let body = response.into_string().map_err(AdapterError::Body)?;
    Ok(serde_json::from_str(&body)?)
}

/// Fail unless the response carries exactly `expected`.
pub(crate) fn expect_status(
    response: &ureq::Response,
    expected: u16,
) -> Result<(), AdapterError> {
    let actual = response.status();
    if actual == expected {
        Ok(())
    } else {
        Err(AdapterError::UnexpectedStatus { expected, actual })
    }
}
