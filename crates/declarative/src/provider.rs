//! Provider adapter trait
//!
//! A provider owns the lifecycle of resources in some external system. The
//! engine never interprets resource types itself; it only passes resolved
//! attributes through this trait.

use crate::error::ProviderError;
use crate::types::{Attributes, ResourceId};
use serde::{Deserialize, Serialize};

/// What a provider returns after a create or update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    /// Provider-assigned identifier
    pub id: String,
    /// Computed attributes, referenceable by other resources
    #[serde(default)]
    pub outputs: Attributes,
}

/// Result type for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Lifecycle operations against an external system.
///
/// Calls may run concurrently for independent resources, so implementations
/// must be thread-safe.
pub trait Provider: Send + Sync {
    /// Create a resource
    fn create(&self, resource: &ResourceId, attributes: &Attributes)
    -> ProviderResult<ProviderOutput>;

    /// Update a resource in place
    fn update(
        &self,
        resource: &ResourceId,
        id: &str,
        previous: &Attributes,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderOutput>;

    /// Destroy a resource
    fn destroy(&self, resource: &ResourceId, id: &str) -> ProviderResult<()>;

    /// Attributes whose change cannot be applied in place for this type
    fn replace_triggers(&self, _resource_type: &str) -> Vec<String> {
        Vec::new()
    }
}
