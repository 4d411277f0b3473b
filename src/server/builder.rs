//! ServerBuilder for fluent API to build HTTP servers

use super::handlers::AppState;
use super::host::ServerHost;
use super::router::build_routes;
use crate::config::{DynamicRestConfig, DynamicRestSettings};
use crate::core::auth::{AllowAll, AuthProvider, NoAuthProvider, PermissionChecker};
use crate::core::request::FeatureSet;
use crate::core::schema::{ResourceSchema, SchemaRegistry};
use crate::core::store::DataStore;
use anyhow::Result;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builder for creating HTTP servers with a route set per registered resource
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_store(InMemoryStore::new())
///     .register(ResourceSchema::new("dog").field(FieldSpec::plain("name")))
///     .build()?;
/// ```
pub struct ServerBuilder {
    store: Option<Arc<dyn DataStore>>,
    settings: DynamicRestSettings,
    registry: SchemaRegistry,
    permissions: HashMap<String, Arc<dyn PermissionChecker>>,
    default_permissions: Arc<dyn PermissionChecker>,
    auth_provider: Arc<dyn AuthProvider>,
    features: FeatureSet,
    cors: Option<CorsLayer>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self {
            store: None,
            settings: DynamicRestSettings::default(),
            registry: SchemaRegistry::new(),
            permissions: HashMap::new(),
            default_permissions: Arc::new(AllowAll),
            auth_provider: Arc::new(NoAuthProvider),
            features: FeatureSet::all(),
            cors: None,
            custom_routes: Vec::new(),
        }
    }

    /// Set the data store (required)
    pub fn with_store(mut self, store: impl DataStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_shared_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: DynamicRestSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Apply settings and register every resource declared in `config`
    pub fn with_config(mut self, config: &DynamicRestConfig) -> Result<Self> {
        self.settings = config.settings.clone();
        for schema in config.schemas()? {
            self = self.register(schema);
        }
        Ok(self)
    }

    /// Permission checker for one resource, by singular name
    pub fn with_permissions(
        mut self,
        resource: &str,
        checker: impl PermissionChecker + 'static,
    ) -> Self {
        self.permissions
            .insert(resource.to_string(), Arc::new(checker));
        self
    }

    /// Permission checker for resources without their own
    pub fn with_default_permissions(mut self, checker: impl PermissionChecker + 'static) -> Self {
        self.default_permissions = Arc::new(checker);
        self
    }

    pub fn with_auth_provider(mut self, provider: impl AuthProvider + 'static) -> Self {
        self.auth_provider = Arc::new(provider);
        self
    }

    /// Restrict the request features every endpoint honors
    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    /// Answer cross-origin requests according to `layer`
    pub fn with_cors(mut self, layer: CorsLayer) -> Self {
        self.cors = Some(layer);
        self
    }

    /// Add routes that don't fit the resource pattern
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Register a resource
    pub fn register(mut self, schema: ResourceSchema) -> Self {
        tracing::debug!("Registering resource '{}' at /{}", schema.name, schema.plural);
        self.registry.register(schema);
        self
    }

    /// Build the shared host, checking that relations point at registered
    /// resources
    pub fn build_host(mut self) -> Result<ServerHost> {
        let store = self
            .store
            .take()
            .ok_or_else(|| anyhow::anyhow!("DataStore is required. Call .with_store()"))?;

        for schema in self.registry.schemas() {
            for relation in schema.relations() {
                if let Some(target) = &relation.related_type
                    && self.registry.get(target).is_none()
                {
                    anyhow::bail!(
                        "Relation '{}.{}' targets unregistered resource '{}'",
                        schema.name,
                        relation.name,
                        target
                    );
                }
            }
        }

        Ok(ServerHost {
            registry: Arc::new(self.registry),
            settings: Arc::new(self.settings),
            store,
            auth_provider: self.auth_provider,
            permissions: self.permissions,
            default_permissions: self.default_permissions,
            features: self.features,
        })
    }

    /// Build the final router
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let cors = self.cors.take();
        let host: AppState = Arc::new(self.build_host()?);
        tracing::info!("Serving resources: {:?}", host.resource_names());

        let mut app = build_routes(host);
        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }
        app = app.layer(TraceLayer::new_for_http());
        if let Some(cors) = cors {
            app = app.layer(cors);
        }
        Ok(app)
    }

    /// Serve the application with graceful shutdown
    ///
    /// Binds to `addr` and serves until SIGTERM or Ctrl+C.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
