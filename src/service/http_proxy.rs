//! HTTP proxy service: forwards requests with proxy header semantics and
//! persistent backend connections.

use std::sync::Arc;

use super::{Service, ServiceContext};
use crate::bridge::{proxy_handler, BridgePolicy};
use crate::error::{GatewayError, Result};
use crate::session::IoHandler;

pub const TYPE: &str = "http.proxy";

#[derive(Debug, Default)]
pub struct HttpProxyService;

impl Service for HttpProxyService {
    fn init(&self, ctx: &ServiceContext) -> Result<()> {
        let connect = ctx.require_connect()?;
        if connect.scheme() != crate::transport::http::NAME {
            return Err(GatewayError::Service(format!(
                "service {} must connect over http, not {}",
                ctx.name(),
                connect.scheme()
            )));
        }
        if !connect.keep_alive_enabled() {
            tracing::info!(service = ctx.name(), connect = %connect, "Persistent connections disabled");
        }
        Ok(())
    }

    fn handler(&self, ctx: &ServiceContext) -> Result<Arc<dyn IoHandler>> {
        let gateway = ctx.gateway();
        Ok(proxy_handler(
            BridgePolicy::Http,
            gateway.connector.clone(),
            ctx.require_connect()?.clone(),
            gateway.bridge.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ResourceAddress;
    use crate::service::testing::pipe_gateway;

    #[test]
    fn connect_must_be_http() {
        let (gateway, _pipe) = pipe_gateway();
        let accept = ResourceAddress::new("http", "localhost", Some(8080), "/");
        let ws = ResourceAddress::new("ws", "backend", Some(80), "/");
        let ctx = ServiceContext::new("api", TYPE, vec![accept.clone()], Some(ws), gateway.clone());
        assert!(matches!(HttpProxyService.init(&ctx), Err(GatewayError::Service(_))));

        let http = ResourceAddress::new("http", "backend", Some(9000), "/");
        let ctx = ServiceContext::new("api", TYPE, vec![accept], Some(http), gateway);
        assert!(HttpProxyService.init(&ctx).is_ok());
    }
}
