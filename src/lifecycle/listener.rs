//! Lifecycle listener SPI and its fan-out.
//!
//! Every registered listener sees every phase, in registration order. A
//! failing listener is logged and skipped; it never stops the phase or the
//! gateway.

use std::sync::Arc;

use crate::error::Result;
use crate::service::{GatewayContext, ServiceContext};

/// Observer of gateway and service lifecycle phases.
pub trait GatewayListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn starting_gateway(&self, _gateway: &GatewayContext) -> Result<()> {
        Ok(())
    }

    fn initing_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn inited_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn starting_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn started_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn quiescing_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn quiesced_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn stopping_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn stopped_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn destroying_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    fn destroyed_service(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }
}

/// Service phases, in the order a service passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    Initing,
    Inited,
    Starting,
    Started,
    Quiescing,
    Quiesced,
    Stopping,
    Stopped,
    Destroying,
    Destroyed,
}

impl ServicePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ServicePhase::Initing => "initing",
            ServicePhase::Inited => "inited",
            ServicePhase::Starting => "starting",
            ServicePhase::Started => "started",
            ServicePhase::Quiescing => "quiescing",
            ServicePhase::Quiesced => "quiesced",
            ServicePhase::Stopping => "stopping",
            ServicePhase::Stopped => "stopped",
            ServicePhase::Destroying => "destroying",
            ServicePhase::Destroyed => "destroyed",
        }
    }
}

/// Ordered set of listeners.
#[derive(Clone, Default)]
pub struct GatewayListeners {
    listeners: Vec<Arc<dyn GatewayListener>>,
}

impl GatewayListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn GatewayListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn starting_gateway(&self, gateway: &GatewayContext) {
        for listener in &self.listeners {
            if let Err(e) = listener.starting_gateway(gateway) {
                tracing::warn!(listener = listener.name(), phase = "starting_gateway", error = %e, "Lifecycle listener failed");
            }
        }
    }

    /// Notify every listener of `phase` for one service.
    pub fn service_phase(&self, phase: ServicePhase, ctx: &ServiceContext) {
        tracing::debug!(service = ctx.name(), phase = phase.as_str(), "Service lifecycle");
        for listener in &self.listeners {
            let result = match phase {
                ServicePhase::Initing => listener.initing_service(ctx),
                ServicePhase::Inited => listener.inited_service(ctx),
                ServicePhase::Starting => listener.starting_service(ctx),
                ServicePhase::Started => listener.started_service(ctx),
                ServicePhase::Quiescing => listener.quiescing_service(ctx),
                ServicePhase::Quiesced => listener.quiesced_service(ctx),
                ServicePhase::Stopping => listener.stopping_service(ctx),
                ServicePhase::Stopped => listener.stopped_service(ctx),
                ServicePhase::Destroying => listener.destroying_service(ctx),
                ServicePhase::Destroyed => listener.destroyed_service(ctx),
            };
            if let Err(e) = result {
                tracing::warn!(
                    listener = listener.name(),
                    service = ctx.name(),
                    phase = phase.as_str(),
                    error = %e,
                    "Lifecycle listener failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for GatewayListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|l| l.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::service::testing::pipe_gateway;
    use std::sync::Mutex;

    struct Journal {
        tag: &'static str,
        fail_on_start: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl GatewayListener for Journal {
        fn starting_service(&self, ctx: &ServiceContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:starting:{}", self.tag, ctx.name()));
            if self.fail_on_start {
                return Err(GatewayError::Service("listener refused".into()));
            }
            Ok(())
        }

        fn stopped_service(&self, ctx: &ServiceContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:stopped:{}", self.tag, ctx.name()));
            Ok(())
        }
    }

    #[test]
    fn every_listener_runs_in_order_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = GatewayListeners::new();
        listeners.add(Arc::new(Journal { tag: "a", fail_on_start: true, log: log.clone() }));
        listeners.add(Arc::new(Journal { tag: "b", fail_on_start: false, log: log.clone() }));

        let (gateway, _pipe) = pipe_gateway();
        let ctx = ServiceContext::new("svc", "echo", Vec::new(), None, gateway.clone());
        listeners.starting_gateway(&gateway);
        listeners.service_phase(ServicePhase::Starting, &ctx);
        listeners.service_phase(ServicePhase::Started, &ctx);
        listeners.service_phase(ServicePhase::Stopped, &ctx);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:starting:svc", "b:starting:svc", "a:stopped:svc", "b:stopped:svc"]
        );
    }
}
