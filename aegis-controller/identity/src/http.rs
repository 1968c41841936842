use aegis_controller_core::{Error, Result};
use serde::de::DeserializeOwned;

/// Fails unless the response has a success status, carrying the body into
/// the error.
pub(crate) async fn check(rsp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = rsp.status();
    if status.is_success() {
        return Ok(rsp);
    }
    let body = rsp.text().await.unwrap_or_default();
    Err(Error::external(
        context,
        format!("unexpected status {status}: {body}"),
    ))
}

pub(crate) async fn json<T: DeserializeOwned>(rsp: reqwest::Response, context: &str) -> Result<T> {
    check(rsp, context)
        .await?
        .json()
        .await
        .map_err(|e| Error::external(context, e))
}

pub(crate) fn send_error(context: &str) -> impl FnOnce(reqwest::Error) -> Error + '_ {
    move |e| Error::external(context, e)
}
