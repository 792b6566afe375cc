//! Services: the consumers of accepted sessions.
//!
//! # Data Flow
//! ```text
//! [[services]] config
//!     → ServiceRegistry.create(type)   (echo, proxy, http.proxy)
//!     → ServiceContext (resolved accept / connect addresses)
//!     → Service::handler() bound on every accept address
//! ```
//!
//! # Design Decisions
//! - Service types are registered explicitly; no discovery
//! - A service only sees the gateway through its `ServiceContext`

pub mod echo;
pub mod http_proxy;
pub mod proxy;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::address::ResourceAddress;
use crate::bridge::{BridgeSettings, Connector};
use crate::config::ServiceConfig;
use crate::error::{GatewayError, Result};
use crate::net::connection::SessionTracker;
use crate::pool::PersistentConnectionPool;
use crate::session::IoHandler;
use crate::transport::TransportRegistry;

/// Shared handles every service can reach.
#[derive(Clone)]
pub struct GatewayContext {
    pub registry: Arc<TransportRegistry>,
    pub pool: PersistentConnectionPool,
    pub tracker: SessionTracker,
    pub connector: Connector,
    pub bridge: BridgeSettings,
}

impl fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayContext")
            .field("schemes", &self.registry.schemes())
            .field("pool", &self.pool)
            .field("active_sessions", &self.tracker.active_count())
            .finish()
    }
}

/// Resolved definition of one configured service.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    name: String,
    service_type: String,
    accepts: Vec<ResourceAddress>,
    connect: Option<ResourceAddress>,
    properties: BTreeMap<String, String>,
    gateway: GatewayContext,
}

impl ServiceContext {
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        accepts: Vec<ResourceAddress>,
        connect: Option<ResourceAddress>,
        gateway: GatewayContext,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            accepts,
            connect,
            properties: BTreeMap::new(),
            gateway,
        }
    }

    /// Resolve a `[[services]]` entry against the transport registry.
    pub fn from_config(config: &ServiceConfig, gateway: GatewayContext) -> Result<Self> {
        let registry = Arc::clone(&gateway.registry);
        let accepts = config
            .accept
            .iter()
            .map(|uri| ResourceAddress::parse(uri, &registry).map(|a| a.with_options(&config.accept_options)))
            .collect::<Result<Vec<_>>>()?;
        let connect = config
            .connect
            .as_deref()
            .map(|uri| ResourceAddress::parse(uri, &registry).map(|a| a.with_options(&config.connect_options)))
            .transpose()?;

        let mut ctx = Self::new(&config.name, &config.service_type, accepts, connect, gateway);
        ctx.properties = config.properties.clone();
        Ok(ctx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn accepts(&self) -> &[ResourceAddress] {
        &self.accepts
    }

    pub fn connect(&self) -> Option<&ResourceAddress> {
        self.connect.as_ref()
    }

    /// Connect address, required by proxying services.
    pub fn require_connect(&self) -> Result<&ResourceAddress> {
        self.connect
            .as_ref()
            .ok_or_else(|| GatewayError::Service(format!("service {} has no connect address", self.name)))
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn gateway(&self) -> &GatewayContext {
        &self.gateway
    }
}

/// A pluggable service type.
pub trait Service: Send + Sync {
    fn init(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn start(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn stop(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn destroy(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    /// Handler bound on every accept address of the service.
    fn handler(&self, ctx: &ServiceContext) -> Result<Arc<dyn IoHandler>>;
}

type ServiceConstructor = Arc<dyn Fn() -> Box<dyn Service> + Send + Sync>;

/// Service types by name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    constructors: HashMap<String, ServiceConstructor>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `echo`, `proxy` and `http.proxy`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(echo::TYPE, || Box::new(echo::EchoService));
        registry.register(proxy::TYPE, || Box::new(proxy::ProxyService));
        registry.register(http_proxy::TYPE, || Box::new(http_proxy::HttpProxyService));
        registry
    }

    /// Register a service type, replacing any previous constructor.
    pub fn register<F>(&mut self, service_type: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Service> + Send + Sync + 'static,
    {
        self.constructors.insert(service_type.to_string(), Arc::new(constructor));
    }

    pub fn create(&self, service_type: &str) -> Result<Box<dyn Service>> {
        self.constructors
            .get(service_type)
            .map(|constructor| constructor())
            .ok_or_else(|| GatewayError::Service(format!("unknown service type {service_type}")))
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.types()).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;
    use crate::resilience::RetryPolicy;
    use crate::transport::pipe::PipeTransport;
    use crate::transport::TransportContext;

    /// Gateway context with only the pipe transport registered.
    pub(crate) fn pipe_gateway() -> (GatewayContext, Arc<PipeTransport>) {
        let ctx = TransportContext::default();
        let pipe = Arc::new(PipeTransport::new(&ctx));
        let mut builder = TransportRegistry::builder();
        builder.register(Arc::clone(&pipe) as _).expect("register pipe");
        let registry = Arc::new(builder.build());
        let pool = PersistentConnectionPool::new(Duration::from_secs(30));
        let connector = Connector::new(
            Arc::clone(&registry),
            pool.clone(),
            Duration::from_secs(1),
            RetryPolicy::once(),
        );
        let gateway = GatewayContext {
            registry,
            pool,
            tracker: ctx.tracker,
            connector,
            bridge: BridgeSettings::default(),
        };
        (gateway, pipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ServiceRegistry::with_builtins();
        assert_eq!(registry.types(), vec!["echo", "http.proxy", "proxy"]);
        assert!(registry.create("proxy").is_ok());
        assert!(matches!(registry.create("balancer"), Err(GatewayError::Service(_))));
    }

    #[test]
    fn context_resolves_addresses_with_options() {
        let (gateway, _pipe) = testing::pipe_gateway();
        let mut config = ServiceConfig {
            name: "relay".to_string(),
            service_type: "proxy".to_string(),
            accept: vec!["pipe://front".to_string()],
            connect: Some("pipe://back".to_string()),
            accept_options: BTreeMap::new(),
            connect_options: BTreeMap::new(),
            properties: BTreeMap::new(),
        };
        config
            .connect_options
            .insert("http.keepalive".to_string(), "disabled".to_string());

        let ctx = ServiceContext::from_config(&config, gateway).unwrap();
        assert_eq!(ctx.accepts()[0].host(), "front");
        let connect = ctx.require_connect().unwrap();
        assert!(!connect.keep_alive_enabled());
    }

    #[test]
    fn unknown_scheme_fails_resolution() {
        let (gateway, _pipe) = testing::pipe_gateway();
        let config = ServiceConfig {
            name: "bad".to_string(),
            service_type: "echo".to_string(),
            accept: vec!["quic://localhost:4433/".to_string()],
            connect: None,
            accept_options: BTreeMap::new(),
            connect_options: BTreeMap::new(),
            properties: BTreeMap::new(),
        };
        assert!(matches!(
            ServiceContext::from_config(&config, gateway),
            Err(GatewayError::UnknownScheme(_))
        ));
    }
}
