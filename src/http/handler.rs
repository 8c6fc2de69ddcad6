//! Request handler chain
//!
//! The server keeps an ordered list of [`RequestHandler`] nodes and gives
//! each request to the first node whose predicate accepts it. Handlers are
//! generic over the transport so they can reach the connection through the
//! [`Exchange`].

use super::message::Method;
use super::server::Exchange;
use super::session::Transport;
use super::upload::Upload;
use super::Result;

/// One node of the handler chain
pub trait RequestHandler<T: Transport> {
    /// Whether this node serves `method` on `uri`
    fn can_handle(&self, method: Method, uri: &str) -> bool;

    /// Whether this node consumes upload events for `method` on `uri`
    fn can_upload(&self, _method: Method, _uri: &str) -> bool {
        false
    }

    /// Serve the request; returns false if the request was not handled
    /// after all, in which case the not-found path runs
    fn handle(&mut self, exchange: &mut Exchange<T>) -> Result<bool>;

    /// Receive one upload event while the body is being parsed
    fn upload(&mut self, _uri: &str, _upload: &Upload) {}
}

/// Boxed request callback
pub type HandlerFn<T> = Box<dyn FnMut(&mut Exchange<T>) -> Result<()>>;

/// Boxed upload callback
pub type UploadFn = Box<dyn FnMut(&Upload)>;

/// Handler registered with [`Server::on`](super::Server::on): an exact URI
/// and a method, with an optional upload callback
pub struct FunctionRequestHandler<T: Transport> {
    uri: String,
    method: Method,
    handler: HandlerFn<T>,
    upload: Option<UploadFn>,
}

impl<T: Transport> FunctionRequestHandler<T> {
    pub fn new(uri: impl Into<String>, method: Method, handler: HandlerFn<T>) -> Self {
        FunctionRequestHandler {
            uri: uri.into(),
            method,
            handler,
            upload: None,
        }
    }

    /// Attach an upload callback
    pub fn with_upload(mut self, upload: UploadFn) -> Self {
        self.upload = Some(upload);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

impl<T: Transport> RequestHandler<T> for FunctionRequestHandler<T> {
    fn can_handle(&self, method: Method, uri: &str) -> bool {
        self.method.accepts(method) && self.uri == uri
    }

    fn can_upload(&self, method: Method, uri: &str) -> bool {
        self.upload.is_some() && self.can_handle(method, uri)
    }

    fn handle(&mut self, exchange: &mut Exchange<T>) -> Result<bool> {
        if !self.can_handle(exchange.method(), exchange.uri()) {
            return Ok(false);
        }
        (self.handler)(exchange)?;
        Ok(true)
    }

    fn upload(&mut self, uri: &str, upload: &Upload) {
        if self.uri != uri {
            return;
        }
        if let Some(callback) = self.upload.as_mut() {
            callback(upload);
        }
    }
}
