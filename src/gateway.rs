//! Gateway assembly and service lifecycle.
//!
//! # Responsibilities
//! - Build the transport registry from factories and `[transports]` tables
//! - Resolve configured services into contexts
//! - Drive services through init, start, quiesce, stop and destroy
//! - Drain live sessions on shutdown and empty the connection pool
//!
//! # Design Decisions
//! - The registry is frozen before any service resolves an address
//! - A service that fails to start is stopped and skipped; others keep running
//! - Listener failures never abort a phase

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::bridge::{BridgeSettings, Connector};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::lifecycle::{GatewayListener, GatewayListeners, ServicePhase};
use crate::net::connection::SessionTracker;
use crate::pool::PersistentConnectionPool;
use crate::resilience::RetryPolicy;
use crate::service::{GatewayContext, Service, ServiceContext, ServiceRegistry};
use crate::transport::{
    http::HttpTransportFactory, pipe::PipeTransportFactory, tcp::TcpTransportFactory, ws::WsTransportFactory,
    wseb::WsebTransportFactory, Binding, TransportConfig, TransportContext, TransportFactory, TransportRegistry,
};

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Created,
    Running,
    Failed,
    Stopped,
    Destroyed,
}

struct ManagedService {
    ctx: ServiceContext,
    service: Box<dyn Service>,
    bindings: Vec<Binding>,
    state: ServiceState,
}

/// Read-only view of one service for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub accept: Vec<String>,
    pub connect: Option<String>,
    pub bound: Vec<String>,
    pub state: ServiceState,
}

/// Shared, cheaply cloneable list of service summaries.
pub type ServiceDirectory = Arc<RwLock<Vec<ServiceSummary>>>;

/// Configures a [`Gateway`] before it is built.
pub struct GatewayBuilder {
    config: GatewayConfig,
    factories: Vec<Arc<dyn TransportFactory>>,
    listeners: GatewayListeners,
    services: ServiceRegistry,
}

impl GatewayBuilder {
    /// Add a transport factory on top of the built-in ones.
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn GatewayListener>) -> Self {
        self.listeners.add(listener);
        self
    }

    pub fn service_type<F>(mut self, service_type: &str, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Service> + Send + Sync + 'static,
    {
        self.services.register(service_type, constructor);
        self
    }

    /// Build the registry, pool and service contexts.
    pub fn build(self) -> Result<Gateway> {
        let config = self.config;
        let transport_ctx = TransportContext {
            tracker: SessionTracker::new(),
            max_connections: config.listener.max_connections,
            max_header_bytes: config.limits.max_header_bytes,
            max_body_bytes: config.limits.max_body_bytes,
            max_frame_bytes: config.limits.max_frame_bytes,
        };

        let mut factories: Vec<Arc<dyn TransportFactory>> = vec![
            Arc::new(TcpTransportFactory::new(transport_ctx.clone())),
            Arc::new(HttpTransportFactory::new(transport_ctx.clone())),
            Arc::new(WsTransportFactory::new(transport_ctx.clone())),
            Arc::new(WsebTransportFactory::new(transport_ctx.clone())),
            Arc::new(PipeTransportFactory::new(transport_ctx.clone())),
        ];
        factories.extend(self.factories);

        let mut builder = TransportRegistry::builder();
        let empty = TransportConfig::new();
        for factory in &factories {
            let table = config.transports.get(factory.transport_name()).unwrap_or(&empty);
            builder.register_factory(factory.as_ref(), table)?;
        }
        for name in config.transports.keys() {
            if !factories.iter().any(|f| f.transport_name() == name) {
                tracing::warn!(transport = %name, "Configuration for unknown transport ignored");
            }
        }
        let registry = Arc::new(builder.build());

        let pool = PersistentConnectionPool::new(config.pool.keepalive_timeout());
        let connector = Connector::new(
            Arc::clone(&registry),
            pool.clone(),
            config.timeouts.connect(),
            RetryPolicy::from_config(&config.retries),
        );
        let context = GatewayContext {
            registry,
            pool,
            tracker: transport_ctx.tracker,
            connector,
            bridge: BridgeSettings {
                pool_enabled: config.pool.enabled,
                request_timeout: Duration::from_secs(config.timeouts.request_secs),
            },
        };

        let mut services = Vec::with_capacity(config.services.len());
        for service_config in &config.services {
            let ctx = ServiceContext::from_config(service_config, context.clone())?;
            let service = self.services.create(&service_config.service_type)?;
            services.push(ManagedService {
                ctx,
                service,
                bindings: Vec::new(),
                state: ServiceState::Created,
            });
        }

        let gateway = Gateway {
            context,
            listeners: self.listeners,
            services,
            directory: Arc::new(RwLock::new(Vec::new())),
            drain_timeout: config.timeouts.drain(),
        };
        gateway.publish();
        Ok(gateway)
    }
}

/// A configured set of services over one transport registry.
pub struct Gateway {
    context: GatewayContext,
    listeners: GatewayListeners,
    services: Vec<ManagedService>,
    directory: ServiceDirectory,
    drain_timeout: Duration,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            factories: Vec::new(),
            listeners: GatewayListeners::new(),
            services: ServiceRegistry::with_builtins(),
        }
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    /// Live view of the services, updated on every lifecycle change.
    pub fn directory(&self) -> ServiceDirectory {
        Arc::clone(&self.directory)
    }

    pub fn services(&self) -> Vec<ServiceSummary> {
        self.services.iter().map(summarize).collect()
    }

    /// Init every service, then start each and bind its accept addresses.
    pub async fn start(&mut self) -> Result<()> {
        self.listeners.starting_gateway(&self.context);

        for managed in &mut self.services {
            self.listeners.service_phase(ServicePhase::Initing, &managed.ctx);
            if let Err(e) = managed.service.init(&managed.ctx) {
                tracing::error!(service = managed.ctx.name(), error = %e, "Service init failed");
                managed.state = ServiceState::Failed;
                continue;
            }
            self.listeners.service_phase(ServicePhase::Inited, &managed.ctx);
        }

        for managed in &mut self.services {
            if managed.state == ServiceState::Failed {
                continue;
            }
            self.listeners.service_phase(ServicePhase::Starting, &managed.ctx);
            match start_service(managed).await {
                Ok(()) => {
                    managed.state = ServiceState::Running;
                    self.listeners.service_phase(ServicePhase::Started, &managed.ctx);
                    tracing::info!(
                        service = managed.ctx.name(),
                        service_type = managed.ctx.service_type(),
                        accepts = managed.bindings.len(),
                        "Service started"
                    );
                }
                Err(e) => {
                    tracing::error!(service = managed.ctx.name(), error = %e, "Service failed to start");
                    for binding in managed.bindings.drain(..) {
                        binding.unbind().await;
                    }
                    let _ = managed.service.stop(&managed.ctx);
                    managed.state = ServiceState::Failed;
                }
            }
        }
        self.publish();

        let running = self.services.iter().filter(|m| m.state == ServiceState::Running).count();
        if running == 0 && !self.services.is_empty() {
            return Err(GatewayError::Service("no service could be started".to_string()));
        }
        Ok(())
    }

    /// Quiesce, stop, drain and destroy every service, then clear the pool.
    pub async fn shutdown(&mut self) {
        for managed in &mut self.services {
            if managed.state != ServiceState::Running {
                continue;
            }
            self.listeners.service_phase(ServicePhase::Quiescing, &managed.ctx);
            for binding in managed.bindings.drain(..) {
                binding.unbind().await;
            }
            self.listeners.service_phase(ServicePhase::Quiesced, &managed.ctx);
        }

        for managed in &mut self.services {
            if managed.state != ServiceState::Running {
                continue;
            }
            self.listeners.service_phase(ServicePhase::Stopping, &managed.ctx);
            if let Err(e) = managed.service.stop(&managed.ctx) {
                tracing::warn!(service = managed.ctx.name(), error = %e, "Service stop failed");
            }
            managed.state = ServiceState::Stopped;
            self.listeners.service_phase(ServicePhase::Stopped, &managed.ctx);
        }
        self.publish();

        self.context.pool.clear();
        let active = self.context.tracker.active_count();
        if active > 0 {
            tracing::info!(active, deadline = ?self.drain_timeout, "Draining sessions");
            if !self.context.tracker.wait_for_drain(self.drain_timeout).await {
                tracing::warn!(
                    remaining = self.context.tracker.active_count(),
                    "Drain deadline passed with sessions still open"
                );
            }
        }

        for managed in &mut self.services {
            if managed.state != ServiceState::Stopped {
                continue;
            }
            self.listeners.service_phase(ServicePhase::Destroying, &managed.ctx);
            if let Err(e) = managed.service.destroy(&managed.ctx) {
                tracing::warn!(service = managed.ctx.name(), error = %e, "Service destroy failed");
            }
            managed.state = ServiceState::Destroyed;
            self.listeners.service_phase(ServicePhase::Destroyed, &managed.ctx);
        }
        self.publish();
        tracing::info!("Gateway stopped");
    }

    /// Socket addresses actually bound by `service`, for ephemeral ports.
    pub fn bound_addresses(&self, service: &str) -> Vec<std::net::SocketAddr> {
        self.services
            .iter()
            .filter(|m| m.ctx.name() == service)
            .flat_map(|m| m.bindings.iter().filter_map(Binding::local_addr))
            .collect()
    }

    fn publish(&self) {
        let summaries = self.services();
        *self.directory.write().expect("service directory lock poisoned") = summaries;
    }
}

async fn start_service(managed: &mut ManagedService) -> Result<()> {
    managed.service.start(&managed.ctx)?;
    let handler = managed.service.handler(&managed.ctx)?;
    let registry = Arc::clone(&managed.ctx.gateway().registry);
    for address in managed.ctx.accepts() {
        let transport = registry.resolve(address.scheme())?;
        let binding = transport.bind(address, Arc::clone(&handler)).await?;
        managed.bindings.push(binding);
    }
    Ok(())
}

fn summarize(managed: &ManagedService) -> ServiceSummary {
    ServiceSummary {
        name: managed.ctx.name().to_string(),
        service_type: managed.ctx.service_type().to_string(),
        accept: managed.ctx.accepts().iter().map(ToString::to_string).collect(),
        connect: managed.ctx.connect().map(ToString::to_string),
        bound: managed
            .bindings
            .iter()
            .map(|b| match b.local_addr() {
                Some(addr) => addr.to_string(),
                None => b.address().to_string(),
            })
            .collect(),
        state: managed.state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn service(name: &str, ty: &str, accept: &str, connect: Option<&str>) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            service_type: ty.to_string(),
            accept: vec![accept.to_string()],
            connect: connect.map(str::to_string),
            accept_options: BTreeMap::new(),
            connect_options: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    #[derive(Default)]
    struct Phases(Mutex<Vec<String>>);

    impl GatewayListener for Phases {
        fn started_service(&self, ctx: &ServiceContext) -> Result<()> {
            self.0.lock().unwrap().push(format!("started:{}", ctx.name()));
            Ok(())
        }

        fn quiesced_service(&self, ctx: &ServiceContext) -> Result<()> {
            self.0.lock().unwrap().push(format!("quiesced:{}", ctx.name()));
            Ok(())
        }

        fn destroyed_service(&self, ctx: &ServiceContext) -> Result<()> {
            self.0.lock().unwrap().push(format!("destroyed:{}", ctx.name()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn services_run_through_every_phase() {
        let mut config = GatewayConfig::default();
        config.services = vec![service("echo", "echo", "pipe://echo", None)];
        let phases = Arc::new(Phases::default());
        let mut gateway = Gateway::builder(config).listener(phases.clone()).build().unwrap();

        gateway.start().await.unwrap();
        assert_eq!(gateway.services()[0].state, ServiceState::Running);
        assert_eq!(gateway.directory().read().unwrap()[0].bound, vec!["pipe://echo/"]);

        gateway.shutdown().await;
        assert_eq!(gateway.services()[0].state, ServiceState::Destroyed);
        assert_eq!(
            *phases.0.lock().unwrap(),
            vec!["started:echo", "quiesced:echo", "destroyed:echo"]
        );
    }

    #[test]
    fn unknown_service_type_fails_build() {
        let mut config = GatewayConfig::default();
        config.services = vec![service("x", "balancer", "pipe://x", None)];
        assert!(matches!(Gateway::builder(config).build(), Err(GatewayError::Service(_))));
    }

    #[tokio::test]
    async fn failed_service_does_not_stop_the_rest() {
        let mut config = GatewayConfig::default();
        config.services = vec![
            service("a", "echo", "pipe://shared", None),
            service("b", "echo", "pipe://shared", None),
        ];
        let mut gateway = Gateway::builder(config).build().unwrap();
        gateway.start().await.unwrap();

        let states: Vec<ServiceState> = gateway.services().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![ServiceState::Running, ServiceState::Failed]);
        gateway.shutdown().await;
    }
}
