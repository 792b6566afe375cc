//! Stream proxy service: bridges every accepted session to the connect
//! address, adding the emulated-WebSocket codecs where legs differ.

use std::sync::Arc;

use super::{Service, ServiceContext};
use crate::bridge::{proxy_handler, BridgePolicy};
use crate::error::Result;
use crate::session::IoHandler;

pub const TYPE: &str = "proxy";

#[derive(Debug, Default)]
pub struct ProxyService;

impl Service for ProxyService {
    fn init(&self, ctx: &ServiceContext) -> Result<()> {
        let connect = ctx.require_connect()?;
        ctx.gateway().registry.resolve(connect.scheme())?;
        Ok(())
    }

    fn handler(&self, ctx: &ServiceContext) -> Result<Arc<dyn IoHandler>> {
        let gateway = ctx.gateway();
        Ok(proxy_handler(
            BridgePolicy::Stream,
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
    use crate::service::echo::EchoHandler;
    use crate::service::testing::pipe_gateway;
    use crate::session::{Frame, Message};
    use crate::transport::Transport;
    use crate::session::testing::RecordingHandler;
    use std::time::Duration;

    #[test]
    fn init_requires_connect_address() {
        let (gateway, _pipe) = pipe_gateway();
        let accept = ResourceAddress::new("pipe", "front", None, "/");
        let ctx = ServiceContext::new("relay", TYPE, vec![accept], None, gateway);
        assert!(ProxyService.init(&ctx).is_err());
    }

    #[tokio::test]
    async fn bridges_pipe_to_pipe() {
        let (gateway, pipe) = pipe_gateway();
        let front = ResourceAddress::new("pipe", "front", None, "/");
        let back = ResourceAddress::new("pipe", "back", None, "/");
        let _backend = pipe.bind(&back, Arc::new(EchoHandler)).await.unwrap();

        let ctx = ServiceContext::new("relay", TYPE, vec![front.clone()], Some(back), gateway);
        ProxyService.init(&ctx).unwrap();
        let _front = pipe.bind(&front, ProxyService.handler(&ctx).unwrap()).await.unwrap();

        let client = RecordingHandler::new();
        let session = pipe.connect(&front, client.clone()).await.unwrap();
        session.write(Frame::text("through")).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let received = client.received();
        assert_eq!(received.len(), 1);
        assert!(matches!(&received[0], Message::Frame(f) if f.as_str() == Some("through")));
    }
}
