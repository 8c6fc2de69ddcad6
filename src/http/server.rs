//! HTTP server
//!
//! [`Server`] serves one connection at a time and at most one request per
//! call to [`Server::handle_client`], so it can be driven from any polling
//! loop. Each connection moves through three states: waiting for the
//! request to arrive, serving it, then waiting for the peer to close.
//! Responses always carry `Connection: close`.

use super::auth;
use super::config::ServerConfig;
use super::handler::{FunctionRequestHandler, HandlerFn, RequestHandler, UploadFn};
use super::headers::HeaderAllowList;
use super::message::{ContentLength, HttpRequest, Method, Version};
use super::parser::RequestParser;
use super::response::ResponseContext;
use super::session::{HttpSession, Transport};
use super::upload::Upload;
use super::Result;
use crate::net::Listener;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

/// One request on the current connection, as seen by a handler
///
/// Gives access to the parsed request (arguments, collected headers,
/// upload record) and to the response being built.
pub struct Exchange<T: Transport> {
    session: HttpSession<T>,
    request: HttpRequest,
    response: ResponseContext,
    download_unit: usize,
}

impl<T: Transport> Exchange<T> {
    /// Wrap a freshly accepted transport
    pub fn new(transport: T, config: &ServerConfig) -> Self {
        Exchange {
            session: HttpSession::new(transport, config.timeouts),
            request: HttpRequest::new(config),
            response: ResponseContext::new(),
            download_unit: config.download_unit,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn method(&self) -> Method {
        self.request.method()
    }

    /// Request path without the query string
    pub fn uri(&self) -> &str {
        self.request.uri()
    }

    pub fn version(&self) -> Version {
        self.request.version()
    }

    /// Value of the first argument named `name`
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.request.args().get(name)
    }

    /// Value of the argument at `index`
    pub fn arg_at(&self, index: usize) -> Option<&str> {
        self.request.args().value_at(index)
    }

    /// Name of the argument at `index`
    pub fn arg_name(&self, index: usize) -> Option<&str> {
        self.request.args().name_at(index)
    }

    pub fn arg_count(&self) -> usize {
        self.request.args().len()
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.request.args().contains(name)
    }

    /// Value of a collected header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name)
    }

    pub fn header_at(&self, index: usize) -> Option<&str> {
        self.request.headers().value_at(index)
    }

    pub fn header_name(&self, index: usize) -> Option<&str> {
        self.request.headers().name_at(index)
    }

    pub fn header_count(&self) -> usize {
        self.request.headers().len()
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.request.headers().contains(name)
    }

    /// Value of the `Host` header, collected or not
    pub fn host_header(&self) -> &str {
        self.request.host()
    }

    /// Upload record of the last multipart file part
    pub fn upload(&self) -> &Upload {
        self.request.upload()
    }

    /// Response state
    pub fn response(&self) -> &ResponseContext {
        &self.response
    }

    /// Send a complete response
    pub fn send(&mut self, code: u16, content_type: &str, body: &[u8]) -> Result<()> {
        let version = self.request.version();
        self.response
            .send(&mut self.session, version, code, content_type, body)
    }

    /// Queue a response header; see [`ResponseContext::send_header`]
    pub fn send_header(&mut self, name: &str, value: &str, replace: bool) -> Result<()> {
        self.response.send_header(name, value, replace)
    }

    /// Declare the body length before [`send`](Self::send)
    pub fn set_content_length(&mut self, length: ContentLength) -> Result<()> {
        self.response.set_content_length(length)
    }

    /// Send more body bytes after the head
    pub fn send_content(&mut self, data: &[u8]) -> Result<()> {
        self.response.send_content(&mut self.session, data)
    }

    /// Stream `size` bytes from `source` as a 200 response
    pub fn stream_file<R: Read>(
        &mut self,
        source: &mut R,
        size: usize,
        name: &str,
        content_type: &str,
    ) -> Result<usize> {
        let version = self.request.version();
        self.response.stream_file(
            &mut self.session,
            version,
            source,
            size,
            name,
            content_type,
            self.download_unit,
        )
    }

    /// Stream a file from disk as a 200 response
    pub fn stream_path(&mut self, path: &Path, content_type: &str) -> Result<usize> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len() as usize;
        let name = path.to_string_lossy().into_owned();
        self.stream_file(&mut file, size, &name, content_type)
    }

    /// Whether the request carries basic credentials `user:password`
    pub fn authenticate(&self, user: &str, password: &str) -> bool {
        self.header(HeaderAllowList::AUTHORIZATION)
            .is_some_and(|value| auth::check_basic(value, user, password))
    }

    /// Answer with a 401 basic-auth challenge
    pub fn request_authentication(&mut self) -> Result<()> {
        let challenge = auth::basic_challenge(auth::DEFAULT_REALM);
        self.send_header("WWW-Authenticate", &challenge, true)?;
        self.send(401, "text/html", b"")
    }

    /// The timed session of the connection
    pub fn session(&self) -> &HttpSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut HttpSession<T> {
        &mut self.session
    }

    fn finalize(&mut self) -> Result<()> {
        self.response.finalize(&mut self.session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    None,
    WaitRead(Instant),
    WaitClose(Instant),
}

/// HTTP server over a [`Listener`]
pub struct Server<L: Listener> {
    listener: L,
    config: ServerConfig,
    allow: HeaderAllowList,
    handlers: Vec<Box<dyn RequestHandler<L::Transport>>>,
    not_found: Option<HandlerFn<L::Transport>>,
    file_upload: Option<UploadFn>,
    exchange: Option<Exchange<L::Transport>>,
    state: ClientState,
}

impl<L: Listener> Server<L>
where
    L::Transport: 'static,
{
    pub fn new(listener: L, config: ServerConfig) -> Self {
        Server {
            listener,
            config,
            allow: HeaderAllowList::default(),
            handlers: Vec::new(),
            not_found: None,
            file_upload: None,
            exchange: None,
            state: ClientState::None,
        }
    }

    /// Serve `method` requests for exactly `uri`
    pub fn on<F>(&mut self, uri: &str, method: Method, handler: F) -> &mut Self
    where
        F: FnMut(&mut Exchange<L::Transport>) -> Result<()> + 'static,
    {
        self.add_handler(FunctionRequestHandler::new(uri, method, Box::new(handler)))
    }

    /// Like [`on`](Self::on), with a callback for multipart file parts
    pub fn on_upload<F, U>(&mut self, uri: &str, method: Method, handler: F, upload: U) -> &mut Self
    where
        F: FnMut(&mut Exchange<L::Transport>) -> Result<()> + 'static,
        U: FnMut(&Upload) + 'static,
    {
        let node = FunctionRequestHandler::new(uri, method, Box::new(handler))
            .with_upload(Box::new(upload));
        self.add_handler(node)
    }

    /// Append a custom node to the handler chain
    pub fn add_handler<H>(&mut self, handler: H) -> &mut Self
    where
        H: RequestHandler<L::Transport> + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Handler for requests no node accepted
    pub fn on_not_found<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut Exchange<L::Transport>) -> Result<()> + 'static,
    {
        self.not_found = Some(Box::new(handler));
        self
    }

    /// Upload callback used when the matched node has none
    pub fn on_file_upload<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&Upload) + 'static,
    {
        self.file_upload = Some(Box::new(handler));
        self
    }

    /// Request headers to keep, besides `Authorization`
    pub fn collect_headers<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = HeaderAllowList::new(names);
        self
    }

    /// Replace the configuration; applies from the next connection on
    pub fn set_config(&mut self, config: ServerConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Whether a connection is currently held
    pub fn has_client(&self) -> bool {
        self.exchange.is_some()
    }

    /// Make one step of progress on the current or next connection
    ///
    /// Returns an error when accepting fails or when the request of the
    /// current connection cannot be parsed or served; that connection is
    /// closed and the server moves on to the next one.
    pub fn handle_client(&mut self) -> Result<()> {
        if self.exchange.is_none() {
            let Some(transport) = self.listener.accept()? else {
                return Ok(());
            };
            self.exchange = Some(Exchange::new(transport, &self.config));
            self.state = ClientState::WaitRead(Instant::now());
        }

        let Some(exchange) = self.exchange.as_mut() else {
            return Ok(());
        };

        let keep = match self.state {
            ClientState::WaitRead(since) => {
                let available = match exchange.session.available() {
                    Ok(n) => n,
                    Err(e) => {
                        self.drop_client();
                        return Err(e);
                    }
                };

                if available > 0 {
                    if let Err(e) = self.serve_request() {
                        log::warn!("dropping client: {}", e);
                        self.drop_client();
                        return Err(e);
                    }
                    self.state = ClientState::WaitClose(Instant::now());
                    true
                } else if !exchange.session.connected() {
                    false
                } else if since.elapsed() > self.config.timeouts.data_wait {
                    log::warn!("no request within {:?}, dropping client", self.config.timeouts.data_wait);
                    false
                } else {
                    true
                }
            }
            ClientState::WaitClose(since) => {
                exchange.session.connected() && since.elapsed() <= self.config.timeouts.close_wait
            }
            ClientState::None => false,
        };

        if !keep {
            self.drop_client();
        }
        Ok(())
    }

    /// Close the current connection, if any
    pub fn close(&mut self) {
        self.drop_client();
    }

    fn drop_client(&mut self) {
        if let Some(mut exchange) = self.exchange.take() {
            if let Err(e) = exchange.session.close() {
                log::debug!("close failed: {}", e);
            }
        }
        self.state = ClientState::None;
    }

    /// Parse one request from the current connection and dispatch it
    fn serve_request(&mut self) -> Result<()> {
        let Server {
            config,
            allow,
            handlers,
            not_found,
            file_upload,
            exchange,
            ..
        } = self;
        let Some(exchange) = exchange.as_mut() else {
            return Ok(());
        };

        exchange.response.reset();
        let mut parser = RequestParser::new(&mut exchange.session, config, allow);
        let kind = parser.parse_head(&mut exchange.request)?;

        let method = exchange.request.method();
        let uri = exchange.request.uri().to_string();
        let selected = handlers.iter().position(|h| h.can_handle(method, &uri));
        log::debug!("{} {} -> handler {:?}", method, uri, selected);

        let mut on_upload = |upload: &Upload| match selected {
            Some(i) if handlers[i].can_upload(method, &uri) => handlers[i].upload(&uri, upload),
            _ => {
                if let Some(callback) = file_upload.as_mut() {
                    callback(upload);
                }
            }
        };
        parser.parse_body(&mut exchange.request, &kind, &mut on_upload)?;

        let handled = match selected {
            Some(i) => handlers[i].handle(exchange)?,
            None => false,
        };
        if !handled {
            match not_found.as_mut() {
                Some(handler) => handler(exchange)?,
                None => {
                    let body = format!("Not found: {}", uri);
                    exchange.send(404, "text/html", body.as_bytes())?;
                }
            }
        }

        exchange.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::MemoryTransport;
    use crate::http::upload::UploadStatus;
    use crate::http::Error;
    use crate::net::MemoryListener;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn server_with(requests: &[&str]) -> (Server<MemoryListener>, Vec<MemoryTransport>) {
        let mut listener = MemoryListener::new();
        let clients: Vec<_> = requests
            .iter()
            .map(|raw| {
                let t = MemoryTransport::with_input(raw);
                t.close_input();
                t
            })
            .collect();
        for client in &clients {
            listener.push(client.clone());
        }
        (Server::new(listener, ServerConfig::default()), clients)
    }

    fn response_of(client: &MemoryTransport) -> String {
        String::from_utf8(client.written()).unwrap()
    }

    #[test]
    fn test_dispatch_first_match_wins() {
        let (mut server, clients) = server_with(&[
            "GET /a HTTP/1.1\r\n\r\n",
            "GET /b HTTP/1.1\r\n\r\n",
        ]);

        struct CatchAll;
        impl RequestHandler<MemoryTransport> for CatchAll {
            fn can_handle(&self, _method: Method, _uri: &str) -> bool {
                true
            }
            fn handle(&mut self, ex: &mut Exchange<MemoryTransport>) -> Result<bool> {
                ex.send(200, "text/plain", b"H2")?;
                Ok(true)
            }
        }

        server.on("/a", Method::Get, |ex| ex.send(200, "text/plain", b"H1"));
        server.add_handler(CatchAll);

        for _ in 0..4 {
            server.handle_client().unwrap();
        }

        assert!(response_of(&clients[0]).ends_with("\r\n\r\nH1"));
        assert!(response_of(&clients[1]).ends_with("\r\n\r\nH2"));
        assert!(clients[0].is_closed());
        assert!(clients[1].is_closed());
    }

    #[test]
    fn test_builtin_not_found() {
        let (mut server, clients) = server_with(&["POST /missing HTTP/1.0\r\n\r\n"]);
        server.on("/missing", Method::Get, |ex| ex.send(200, "", b""));

        server.handle_client().unwrap();

        let out = response_of(&clients[0]);
        assert!(out.starts_with("HTTP/1.0 404 Not Found\r\n"));
        assert!(out.contains("Content-Type: text/html\r\n"));
        assert!(out.ends_with("Not found: /missing"));
    }

    #[test]
    fn test_custom_not_found_and_declined_handler() {
        struct Declines;
        impl RequestHandler<MemoryTransport> for Declines {
            fn can_handle(&self, _method: Method, uri: &str) -> bool {
                uri == "/maybe"
            }
            fn handle(&mut self, _ex: &mut Exchange<MemoryTransport>) -> Result<bool> {
                Ok(false)
            }
        }

        let (mut server, clients) = server_with(&["GET /maybe HTTP/1.1\r\n\r\n"]);
        server.add_handler(Declines);
        server.on_not_found(|ex| {
            let body = format!("nothing at {}", ex.uri());
            ex.send(404, "text/plain", body.as_bytes())
        });

        server.handle_client().unwrap();
        assert!(response_of(&clients[0]).ends_with("nothing at /maybe"));
    }

    #[test]
    fn test_args_headers_and_auth() {
        let (mut server, clients) = server_with(&[
            "GET /who?name=ann&x HTTP/1.1\r\n\
             Host: dev.local\r\n\
             X-Req: 7\r\n\
             Authorization: Basic YWRtaW46c2VjcmV0\r\n\r\n",
        ]);
        server.collect_headers(["x-req"]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        server.on("/who", Method::Any, move |ex| {
            let mut log = log.borrow_mut();
            log.push(ex.arg("name").unwrap_or_default().to_string());
            log.push(ex.arg_name(1).unwrap_or_default().to_string());
            log.push(ex.arg_count().to_string());
            log.push(ex.header("X-REQ").unwrap_or_default().to_string());
            log.push(ex.host_header().to_string());
            log.push(ex.header_count().to_string());
            log.push(ex.authenticate("admin", "secret").to_string());
            log.push(ex.authenticate("admin", "nope").to_string());
            ex.send(204, "", b"")
        });

        server.handle_client().unwrap();

        assert_eq!(
            *seen.borrow(),
            vec!["ann", "x", "2", "7", "dev.local", "2", "true", "false"]
        );
        assert!(response_of(&clients[0]).starts_with("HTTP/1.1 204 No Content\r\n"));
    }

    #[test]
    fn test_request_authentication() {
        let (mut server, clients) = server_with(&["GET /admin HTTP/1.1\r\n\r\n"]);
        server.on("/admin", Method::Get, |ex| {
            if !ex.authenticate("admin", "secret") {
                return ex.request_authentication();
            }
            ex.send(200, "text/plain", b"welcome")
        });

        server.handle_client().unwrap();

        let out = response_of(&clients[0]);
        assert!(out.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(out.contains("WWW-Authenticate: Basic realm=\"Login Required\"\r\n"));
    }

    #[test]
    fn test_chunked_response_is_finalized() {
        let (mut server, clients) = server_with(&["GET /stream HTTP/1.1\r\n\r\n"]);
        server.on("/stream", Method::Get, |ex| {
            ex.set_content_length(ContentLength::Unknown)?;
            ex.send(200, "text/plain", b"")?;
            ex.send_content(b"part one,")?;
            ex.send_content(b"part two")
        });

        server.handle_client().unwrap();

        let out = response_of(&clients[0]);
        assert!(out.contains("Transfer-Encoding: chunked\r\n"));
        assert!(out.ends_with("9\r\npart one,\r\n8\r\npart two\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_upload_routing() {
        let body = "--b\r\n\
                    Content-Disposition: form-data; name=\"f\"; filename=\"a.bin\"\r\n\r\n\
                    abc\r\n--b--\r\n";
        let request = format!(
            "POST /up HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let (mut server, clients) = server_with(&[request.as_str()]);

        let node_events = Rc::new(RefCell::new(Vec::new()));
        let fallback_events = Rc::new(RefCell::new(Vec::new()));
        let node_log = node_events.clone();
        let fallback_log = fallback_events.clone();

        server.on_upload(
            "/up",
            Method::Post,
            |ex| {
                let total = ex.upload().total_size().to_string();
                ex.send(200, "text/plain", total.as_bytes())
            },
            move |u| node_log.borrow_mut().push(u.status()),
        );
        server.on_file_upload(move |u| fallback_log.borrow_mut().push(u.status()));

        server.handle_client().unwrap();
        server.handle_client().unwrap();

        assert_eq!(
            *node_events.borrow(),
            vec![UploadStatus::Start, UploadStatus::Write, UploadStatus::End]
        );
        assert!(fallback_events.borrow().is_empty());
        assert!(response_of(&clients[0]).ends_with("\r\n\r\n3"));
    }

    #[test]
    fn test_file_upload_fallback() {
        let body = "--b\r\n\
                    Content-Disposition: form-data; name=\"f\"; filename=\"a.bin\"\r\n\r\n\
                    abc\r\n--b--\r\n";
        let request = format!(
            "POST /plain HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let (mut server, _clients) = server_with(&[request.as_str()]);

        let events = Rc::new(RefCell::new(Vec::new()));
        let log = events.clone();
        server.on("/plain", Method::Post, |ex| ex.send(200, "", b""));
        server.on_file_upload(move |u| log.borrow_mut().push(u.status()));

        server.handle_client().unwrap();
        assert_eq!(events.borrow().len(), 3);
    }

    #[test]
    fn test_parse_error_drops_client() {
        let (mut server, clients) = server_with(&["BREW /pot HTTP/1.1\r\n\r\n"]);
        let called = Rc::new(RefCell::new(false));
        let flag = called.clone();
        server.on("/pot", Method::Any, move |ex| {
            *flag.borrow_mut() = true;
            ex.send(200, "", b"")
        });

        let result = server.handle_client();
        assert!(matches!(result, Err(Error::UnsupportedMethod(_))));
        assert!(!*called.borrow());
        assert!(clients[0].is_closed());
        assert!(clients[0].written().is_empty());
        assert!(!server.has_client());
    }

    #[test]
    fn test_idle_client_dropped_after_data_wait() {
        let mut listener = MemoryListener::new();
        let idle = MemoryTransport::new();
        listener.push(idle.clone());
        let config = ServerConfig::default().data_wait(Duration::from_millis(20));
        let mut server = Server::new(listener, config);

        server.handle_client().unwrap();
        assert!(server.has_client());

        std::thread::sleep(Duration::from_millis(40));
        server.handle_client().unwrap();
        assert!(!server.has_client());
        assert!(idle.is_closed());
    }

    #[test]
    fn test_waits_for_peer_close() {
        let mut listener = MemoryListener::new();
        let client = MemoryTransport::with_input("GET / HTTP/1.1\r\n\r\n");
        listener.push(client.clone());
        let mut server = Server::new(listener, ServerConfig::default());
        server.on("/", Method::Get, |ex| ex.send(200, "", b"ok"));

        server.handle_client().unwrap();
        // Response sent, peer still open
        assert!(server.has_client());
        assert!(!client.is_closed());

        client.close_input();
        server.handle_client().unwrap();
        assert!(!server.has_client());
        assert!(client.is_closed());
    }
}
