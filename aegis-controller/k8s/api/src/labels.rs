/// Associates an `Identity` with the provider it was issued by. Provider
/// deletion cascades over identities carrying this label.
pub const IDENTITY_PROVIDER: &str = "aegis.aegisproxy.io/identity.provider";

/// A label selector matching the identities issued by `provider`.
pub fn provider_selector(provider: &str) -> String {
    format!("{IDENTITY_PROVIDER}={provider}")
}
