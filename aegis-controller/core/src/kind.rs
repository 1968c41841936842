use std::{fmt, str::FromStr};

/// The kinds of identity backends a Provider resource may describe.
///
/// The string forms are durable: they are recorded on `Identity` status and
/// handed to the proxy on its command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    HashicorpVault,
    Azure,
    Aws,
    Kubernetes,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown provider kind: {0}")]
pub struct UnknownProviderKind(pub String);

// === impl ProviderKind ===

impl ProviderKind {
    /// Resolution precedence when a provider is referenced by bare name.
    pub const PROBE_ORDER: [Self; 4] = [
        Self::HashicorpVault,
        Self::Azure,
        Self::Aws,
        Self::Kubernetes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashicorpVault => "hashicorp.vault",
            Self::Azure => "azure",
            Self::Aws => "aws",
            Self::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProviderKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hashicorp.vault" => Ok(Self::HashicorpVault),
            "azure" => Ok(Self::Azure),
            "aws" => Ok(Self::Aws),
            "kubernetes" => Ok(Self::Kubernetes),
            s => Err(UnknownProviderKind(s.to_string())),
        }
    }
}
