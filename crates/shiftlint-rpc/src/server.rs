use crate::auth;
use crate::frame::{self, ErrorCode, Request, Response, method};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use shiftlint_provider::{Error, Provider, ProviderConfig, Result, SessionState};
use shiftlint_types::{CancelToken, CodeLocation, Dependency, FileChange};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex, RwLock};

/// Server-side TLS material.
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
}

/// Knobs for serving a provider over the framed protocol.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// When set, every inbound request must carry a verifying bearer token.
    pub secret: Option<String>,
    pub tls: Option<TlsServerConfig>,
}

struct SessionEntry {
    state: SessionState,
    token: CancelToken,
}

/// Serves one provider implementation to remote engines. Each `Init`
/// issues a fresh 63-bit session ID; concurrent requests on a connection
/// are answered out of order, matched by correlation ID.
pub struct ProviderServer {
    provider: Arc<dyn Provider>,
    options: ServerOptions,
    sessions: RwLock<HashMap<i64, SessionEntry>>,
}

impl ProviderServer {
    pub fn new(provider: Arc<dyn Provider>, options: ServerOptions) -> Arc<Self> {
        Arc::new(ProviderServer {
            provider,
            options,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Accept loop over TCP. Returns when `shutdown` is cancelled.
    pub fn serve_tcp(self: &Arc<Self>, listener: TcpListener, shutdown: &CancelToken) -> Result<()> {
        let tls_config = match &self.options.tls {
            Some(tls) => Some(load_tls_server_config(tls)?),
            None => None,
        };
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::Transport(e.to_string()))?;
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "provider server accepted connection");
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| Error::Transport(e.to_string()))?;
                    let (reader, writer) = match &tls_config {
                        Some(config) => {
                            stream
                                .set_read_timeout(Some(std::time::Duration::from_millis(100)))
                                .map_err(|e| Error::Transport(e.to_string()))?;
                            let conn = rustls::ServerConnection::new(config.clone())
                                .map_err(|e| Error::Transport(e.to_string()))?;
                            crate::transport::split_shared(rustls::StreamOwned::new(conn, stream))
                        }
                        None => {
                            let reader = stream
                                .try_clone()
                                .map_err(|e| Error::Transport(e.to_string()))?;
                            (
                                Box::new(reader) as Box<dyn Read + Send>,
                                Box::new(stream) as Box<dyn Write + Send>,
                            )
                        }
                    };
                    let server = self.clone();
                    std::thread::Builder::new()
                        .name("provider-server-conn".to_string())
                        .spawn(move || {
                            server.serve_connection(reader, writer);
                        })
                        .map_err(|e| Error::Transport(e.to_string()))?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        }
    }

    /// Accept loop over a Unix-domain socket. Returns when `shutdown` is
    /// cancelled.
    #[cfg(unix)]
    pub fn serve_unix(
        self: &Arc<Self>,
        listener: std::os::unix::net::UnixListener,
        shutdown: &CancelToken,
    ) -> Result<()> {
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::Transport(e.to_string()))?;
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| Error::Transport(e.to_string()))?;
                    let reader = stream
                        .try_clone()
                        .map_err(|e| Error::Transport(e.to_string()))?;
                    let server = self.clone();
                    std::thread::Builder::new()
                        .name("provider-server-conn".to_string())
                        .spawn(move || {
                            server.serve_connection(Box::new(reader), Box::new(stream));
                        })
                        .map_err(|e| Error::Transport(e.to_string()))?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        }
    }

    /// Serve a single already-established duplex stream (stdio co-process
    /// mode, or a test harness). Blocks until the peer disconnects.
    pub fn serve_connection(
        self: &Arc<Self>,
        mut reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) {
        let writer: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(writer));
        loop {
            let request: Request = match frame::read_frame(&mut *reader) {
                Ok(request) => request,
                Err(err) => {
                    tracing::debug!(%err, "provider server connection closed");
                    return;
                }
            };
            let server = self.clone();
            let writer = writer.clone();
            // Each request is answered from its own thread so slow
            // evaluates never block the demultiplexer.
            let spawned = std::thread::Builder::new()
                .name("provider-server-req".to_string())
                .spawn(move || {
                    let response = server.handle_request(request);
                    let mut guard = writer.lock().expect("server writer poisoned");
                    if let Err(err) = frame::write_frame(&mut **guard, &response) {
                        tracing::debug!(%err, "failed to write rpc response");
                    }
                });
            if spawned.is_err() {
                return;
            }
        }
    }

    fn handle_request(&self, request: Request) -> Response {
        if let Some(secret) = &self.options.secret
            && let Err(err) = auth::verify(secret, request.token.as_deref())
        {
            return Response::fail(request.id, ErrorCode::Unauthenticated, err.to_string());
        }
        let id = request.id;
        match self.dispatch(request) {
            Ok(result) => Response::ok(id, result),
            Err(err) => frame::error_response(id, &err),
        }
    }

    fn dispatch(&self, request: Request) -> Result<Value> {
        match request.method.as_str() {
            method::CAPABILITIES => Ok(serde_json::to_value(self.provider.capabilities())?),
            method::INIT => self.handle_init(&request.payload),
            method::EVALUATE => {
                let token = self.session_token(request.session_id)?;
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct EvaluatePayload {
                    capability: String,
                    #[serde(default)]
                    condition_info: Value,
                }
                let payload: EvaluatePayload = serde_json::from_value(request.payload)?;
                let response =
                    self.provider
                        .evaluate(&token.child(), &payload.capability, &payload.condition_info)?;
                Ok(serde_json::to_value(response)?)
            }
            method::GET_DEPENDENCIES => {
                let token = self.session_token(request.session_id)?;
                let deps = self.provider.get_dependencies(&token.child())?;
                Ok(serde_json::to_value(deps)?)
            }
            method::GET_DEPENDENCIES_DAG => {
                let token = self.session_token(request.session_id)?;
                let dags = self.provider.get_dependencies_dag(&token.child())?;
                Ok(serde_json::to_value(dags)?)
            }
            method::NOTIFY_FILE_CHANGES => {
                let token = self.session_token(request.session_id)?;
                let changes: Vec<FileChange> = serde_json::from_value(request.payload)?;
                self.provider.notify_file_changes(&token.child(), &changes)?;
                Ok(Value::Null)
            }
            method::GET_CODE_SNIP => {
                let token = self.session_token(request.session_id)?;
                let resolver = self
                    .provider
                    .code_snippet_resolver()
                    .ok_or(Error::Unsupported)?;
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct SnipPayload {
                    file_uri: String,
                    location: CodeLocation,
                    #[serde(default)]
                    context_lines: usize,
                }
                let payload: SnipPayload = serde_json::from_value(request.payload)?;
                let snip = resolver.code_snip(
                    &token.child(),
                    &payload.file_uri,
                    &payload.location,
                    payload.context_lines,
                )?;
                Ok(serde_json::to_value(snip)?)
            }
            method::GET_DEPENDENCY_LOCATION => {
                let token = self.session_token(request.session_id)?;
                let resolver = self
                    .provider
                    .dependency_location_resolver()
                    .ok_or(Error::Unsupported)?;
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct DepLocPayload {
                    dep: Dependency,
                    file_uri: String,
                }
                let payload: DepLocPayload = serde_json::from_value(request.payload)?;
                let location =
                    resolver.resolve_location(&token.child(), &payload.dep, &payload.file_uri)?;
                Ok(serde_json::to_value(location)?)
            }
            method::STOP => self.handle_stop(request.session_id),
            other => Err(Error::Transport(format!("unknown method {:?}", other))),
        }
    }

    fn handle_init(&self, payload: &Value) -> Result<Value> {
        let config: ProviderConfig = serde_json::from_value(payload.clone())?;
        let token = CancelToken::new();
        let outcome = self.provider.init(&token.child(), &config)?;
        let session_id = self.issue_session(token);
        tracing::info!(session_id, provider = %config.name, "session initialized");
        Ok(json!({
            "sessionId": session_id,
            "discovered": outcome.discovered,
        }))
    }

    fn issue_session(&self, token: CancelToken) -> i64 {
        let mut sessions = self.sessions.write().expect("session registry poisoned");
        let mut rng = rand::thread_rng();
        loop {
            // 63-bit positive identifier, never zero
            let id: i64 = rng.gen_range(1..i64::MAX);
            if let std::collections::hash_map::Entry::Vacant(slot) = sessions.entry(id) {
                slot.insert(SessionEntry {
                    state: SessionState::Initialized,
                    token,
                });
                return id;
            }
        }
    }

    fn handle_stop(&self, session_id: Option<i64>) -> Result<Value> {
        let id = session_id.ok_or(Error::StaleSession(0))?;
        let mut sessions = self.sessions.write().expect("session registry poisoned");
        let entry = sessions.get_mut(&id).ok_or(Error::StaleSession(id))?;
        if !entry.state.is_stopped() {
            entry.token.cancel();
            entry.state = SessionState::Stopped;
        }
        // Stopping one session leaves its siblings serving; the provider
        // itself goes down with the last of them.
        if sessions.values().all(|entry| entry.state.is_stopped()) {
            self.provider.stop();
        }
        Ok(Value::Null)
    }

    /// Look up a live session and return its cancellation root.
    fn session_token(&self, session_id: Option<i64>) -> Result<CancelToken> {
        let id = session_id.ok_or(Error::StaleSession(0))?;
        let sessions = self.sessions.read().expect("session registry poisoned");
        let entry = sessions.get(&id).ok_or(Error::StaleSession(id))?;
        if entry.state.is_stopped() {
            return Err(Error::StaleSession(id));
        }
        Ok(entry.token.clone())
    }
}

fn load_tls_server_config(tls: &TlsServerConfig) -> Result<Arc<rustls::ServerConfig>> {
    let cert_file = std::fs::File::open(&tls.cert_path)
        .map_err(|e| Error::Transport(format!("read cert {}: {}", tls.cert_path.display(), e)))?;
    let certs: std::result::Result<Vec<_>, _> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file)).collect();
    let certs = certs.map_err(|e| Error::Transport(format!("bad cert chain: {}", e)))?;

    let key_file = std::fs::File::open(&tls.key_path)
        .map_err(|e| Error::Transport(format!("read key {}: {}", tls.key_path.display(), e)))?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|e| Error::Transport(format!("bad private key: {}", e)))?
        .ok_or_else(|| Error::Transport("no private key in key file".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Transport(format!("tls config: {}", e)))?;
    Ok(Arc::new(config))
}
