//! Helpers for the projected service-account tokens the controller reads.

use crate::{Error, Result};
use base64::Engine;
use std::path::Path;

#[derive(Debug, serde::Deserialize)]
struct Claims {
    iss: Option<String>,
}

/// Reads a token file, trimming surrounding whitespace.
pub async fn read(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let token = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::external(format!("failed to read token {}", path.display()), e))?;
    Ok(token.trim().to_string())
}

/// Returns the `iss` claim of a JWT without verifying its signature.
pub fn issuer(jwt: &str) -> Result<String> {
    let mut parts = jwt.split('.');
    let payload = match (parts.next(), parts.next()) {
        (Some(_), Some(payload)) => payload,
        _ => return Err(Error::Validation("token is not a JWT".to_string())),
    };

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::Validation(format!("token payload is not base64: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Validation(format!("token payload is not JSON: {e}")))?;

    claims
        .iss
        .filter(|iss| !iss.is_empty())
        .ok_or_else(|| Error::Validation("token has no issuer claim".to_string()))
}

/// Reads a token file and returns its issuer.
pub async fn read_issuer(path: impl AsRef<Path>) -> Result<String> {
    issuer(&read(path).await?)
}
