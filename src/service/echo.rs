//! Echo service: writes every message back to its sender.
//!
//! HTTP requests are answered with a `200 OK` carrying the request body.

use std::sync::Arc;

use hyper::header::{CONTENT_TYPE, HeaderName};
use hyper::StatusCode;

use super::{Service, ServiceContext};
use crate::error::Result;
use crate::http::headers::X_REQUEST_ID;
use crate::http::HttpResponse;
use crate::session::{IoHandler, Message, Session};

pub const TYPE: &str = "echo";

#[derive(Debug, Default)]
pub struct EchoService;

impl Service for EchoService {
    fn handler(&self, _ctx: &ServiceContext) -> Result<Arc<dyn IoHandler>> {
        Ok(Arc::new(EchoHandler))
    }
}

/// Reflects frames and bytes unchanged and answers requests in kind.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl IoHandler for EchoHandler {
    fn message_received(&self, session: &Session, message: Message) {
        let reply = match message {
            Message::Request(request) => {
                let mut response = HttpResponse::new(StatusCode::OK).with_body(request.body.clone());
                response.version = request.version;
                if let Some(content_type) = request.header(CONTENT_TYPE.as_str()) {
                    response = response.with_header(CONTENT_TYPE, content_type);
                }
                if let Some(id) = request.request_id() {
                    response = response.with_header(HeaderName::from_static(X_REQUEST_ID), id);
                }
                if !request.is_persistent() {
                    response = response.with_header(hyper::header::CONNECTION, "close");
                }
                Message::Response(response)
            }
            Message::Response(_) => {
                tracing::debug!(session_id = %session.id(), "Echo ignores responses");
                return;
            }
            other => other,
        };

        let closing = matches!(&reply, Message::Response(r) if !r.is_persistent());
        if session.write(reply).is_err() {
            return;
        }
        if closing {
            session.close();
        }
    }
}
