//! gateway.rs
//! HTTP face of the system: `/{system}/{asset}/{sub_path}`.
//!
//! - GET reads, PUT/POST write a JSON signal
//! - every call is one mailbox round trip bounded by the request timeout
//! - no state is kept between calls
//!
//! The server is `tiny_http` on a plain thread with one worker thread per
//! request; workers enter the tokio runtime through its [`Handle`].

use std::{
    io::Read,
    net::SocketAddr,
    sync::Arc,
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::asset::{Asset, Registry, Signal};
use crate::error::{OwnerError, SystemError};

/// How often the accept loop looks at the cancellation token.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

pub const JSON: &str = "application/json";

/// Largest request body accepted. A signal is a few dozen bytes.
pub const MAX_BODY: usize = 4096;

/// Status code and JSON body of one answered request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Reply {
    fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    fn signal(signal: &Signal) -> Self {
        match serde_json::to_value(signal) {
            Ok(body) => Self::ok(body),
            Err(e) => Self::error(500, e.to_string()),
        }
    }
}

fn status_of(err: &OwnerError) -> u16 {
    match err {
        OwnerError::Timeout => 504,
        OwnerError::Rejected(_) => 400,
        OwnerError::UnknownService(_) => 404,
        OwnerError::Closed | OwnerError::NoData | OwnerError::Device(_) => 500,
    }
}

pub struct Gateway {
    system: String,
    registry: Arc<Registry>,
    request_timeout: Duration,
}

impl Gateway {
    pub fn new(system: &str, registry: Arc<Registry>, request_timeout: Duration) -> Self {
        Self {
            system: system.to_string(),
            registry,
            request_timeout,
        }
    }

    /// Routes one request. `content_type` is the raw header value, if any.
    pub async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Reply {
        let path = url.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [system] if *system == self.system => match method {
                Method::Get => match serde_json::to_value(self.registry.listing(&self.system)) {
                    Ok(body) => Reply::ok(body),
                    Err(e) => Reply::error(500, e.to_string()),
                },
                _ => Reply::error(405, format!("{method} not allowed on {path}")),
            },
            [system, asset, sub_path] if *system == self.system => {
                self.capability(method, asset, sub_path, content_type, body)
                    .await
            }
            _ => Reply::error(404, format!("no resource at {path}")),
        }
    }

    async fn capability(
        &self,
        method: &Method,
        asset: &str,
        sub_path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Reply {
        let Some(entry) = self.registry.get(asset) else {
            return Reply::error(404, format!("no asset `{asset}`"));
        };
        if !entry.offers(sub_path) {
            return Reply::error(404, format!("{asset} offers no `{sub_path}`"));
        }

        let result = match method {
            Method::Get => entry.handle.read(sub_path, self.request_timeout).await,
            Method::Put | Method::Post => {
                let media = content_type
                    .and_then(|v| v.split(';').next())
                    .map(str::trim)
                    .unwrap_or_default();
                if !media.eq_ignore_ascii_case(JSON) {
                    return Reply::error(400, format!("expected {JSON}, got `{media}`"));
                }
                let signal: Signal = match serde_json::from_slice(body) {
                    Ok(signal) => signal,
                    Err(e) => return Reply::error(400, format!("bad signal: {e}")),
                };
                entry
                    .handle
                    .write(sub_path, signal, self.request_timeout)
                    .await
            }
            other => return Reply::error(405, format!("{other} not allowed")),
        };

        match result {
            Ok(signal) => Reply::signal(&signal),
            Err(e) => {
                let status = status_of(&e);
                if status >= 500 {
                    warn!("[{}] {} {} failed: {}", asset, method, sub_path, e);
                }
                Reply::error(status, e.to_string())
            }
        }
    }

    /// Binds `addr` and serves on a background thread until `token` fires.
    /// Returns the bound address (useful with port 0) and the accept thread.
    pub fn serve(
        self: Arc<Self>,
        addr: &str,
        runtime: Handle,
        token: CancellationToken,
    ) -> Result<(Option<SocketAddr>, thread::JoinHandle<()>), SystemError> {
        let server = Server::http(addr).map_err(|e| SystemError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let bound = server.server_addr().to_ip();
        info!("gateway listening on {} for /{}", addr, self.system);

        let accept = thread::spawn(move || {
            while !token.is_cancelled() {
                match server.recv_timeout(ACCEPT_POLL) {
                    Ok(Some(request)) => {
                        let gateway = Arc::clone(&self);
                        let runtime = runtime.clone();
                        thread::spawn(move || gateway.answer(request, &runtime));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("gateway accept error: {}", e);
                        break;
                    }
                }
            }
            info!("gateway exiting accept loop");
        });

        Ok((bound, accept))
    }

    fn answer(&self, mut request: Request, runtime: &Handle) {
        let body = match read_body(request.as_reader()) {
            Ok(body) => body,
            Err(reply) => {
                let _ = request.respond(response(reply));
                return;
            }
        };

        let content_type = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Content-Type"))
            .map(|h| h.value.as_str().to_string());
        let method = request.method().clone();
        let url = request.url().to_string();

        let reply = runtime.block_on(self.dispatch(&method, &url, content_type.as_deref(), &body));
        debug!("{} {} -> {}", method, url, reply.status);

        if let Err(e) = request.respond(response(reply)) {
            debug!("client went away: {}", e);
        }
    }
}

/// Reads at most [`MAX_BODY`] bytes; anything longer is refused with a 400.
fn read_body(reader: impl Read) -> Result<Vec<u8>, Reply> {
    let mut body = Vec::new();
    if let Err(e) = reader.take(MAX_BODY as u64 + 1).read_to_end(&mut body) {
        debug!("unreadable request body: {}", e);
        return Err(Reply::error(400, "unreadable body"));
    }
    if body.len() > MAX_BODY {
        debug!("request body over {} bytes refused", MAX_BODY);
        return Err(Reply::error(400, format!("body exceeds {MAX_BODY} bytes")));
    }
    Ok(body)
}

fn response(reply: Reply) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut response = Response::from_data(reply.body.to_string().into_bytes()).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes("Content-Type", JSON) {
        response = response.with_header(header);
    }
    response
}
