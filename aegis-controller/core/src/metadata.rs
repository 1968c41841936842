//! Keys of the string map adapters record on `Identity` status.

use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, String>;

/// The backend's identifier for the identity: the Vault entity id, the Azure
/// application (client) id, or the Cognito identity id.
pub const IDENTITY_ID: &str = "aegis.identity.id";

pub const IDENTITY_PROVIDER: &str = "aegis.identity.provider";

pub const VAULT_ADDRESS: &str = "aegis.identity.vault.address";

/// Object id of the Azure application registration.
pub const AZURE_OBJECT_ID: &str = "aegis.identity.objectid";

pub const AZURE_TENANT_ID: &str = "aegis.identity.azure.tenantid";
