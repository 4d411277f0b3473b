//! Server host
//!
//! Holds everything the HTTP layer shares between requests and hands out a
//! [`DynamicViewSet`] per resource.

use crate::config::DynamicRestSettings;
use crate::core::auth::{AuthProvider, PermissionChecker};
use crate::core::error::{DynRestResult, ResourceError};
use crate::core::request::FeatureSet;
use crate::core::schema::SchemaRegistry;
use crate::core::store::DataStore;
use crate::server::viewset::DynamicViewSet;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state of a running server
pub struct ServerHost {
    pub registry: Arc<SchemaRegistry>,
    pub settings: Arc<DynamicRestSettings>,
    pub store: Arc<dyn DataStore>,
    pub auth_provider: Arc<dyn AuthProvider>,
    /// Resource name to permission checker
    pub permissions: HashMap<String, Arc<dyn PermissionChecker>>,
    pub default_permissions: Arc<dyn PermissionChecker>,
    pub features: FeatureSet,
}

impl ServerHost {
    /// The view set serving `plural`
    pub fn viewset(&self, plural: &str) -> DynRestResult<DynamicViewSet> {
        let schema = self
            .registry
            .get_by_plural(plural)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownType {
                resource: plural.to_string(),
            })?;
        let permissions = self
            .permissions
            .get(&schema.name)
            .cloned()
            .unwrap_or_else(|| self.default_permissions.clone());

        Ok(DynamicViewSet::new(
            schema,
            self.registry.clone(),
            self.settings.clone(),
            self.store.clone(),
            permissions,
        )
        .with_features(self.features.clone()))
    }

    /// Plural names of every served resource
    pub fn resource_names(&self) -> Vec<&str> {
        self.registry.schemas().map(|s| s.plural.as_str()).collect()
    }
}
