use crate::auth;
use crate::frame::{self, Request, Response, method};
use crate::transport::{Connection, Endpoint, dial};
use serde::Deserialize;
use serde_json::{Value, json};
use shiftlint_provider::{
    CodeSnippetResolver, ConditionsByCapability, DepDagsByFile, DependencyLocationResolver,
    DepsByFile, Error, EvaluateResponse, InitConfig, InitOutcome, Provider, ProviderConfig, Result,
};
use shiftlint_types::{CancelToken, Capability, CodeLocation, Dependency, FileChange};
use std::collections::HashMap;
use std::io::Write;
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Client identity and credentials.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Shared secret for bearer tokens; `JWT_SECRET` is the fallback.
    pub secret: Option<String>,
    /// CA bundle enabling TLS on TCP endpoints.
    pub ca_cert: Option<std::path::PathBuf>,
    /// `name` claim stamped on issued tokens.
    pub client_name: String,
}

struct ClientInner {
    writer: Mutex<Box<dyn Write + Send>>,
    pending: Mutex<HashMap<i64, Sender<Response>>>,
    next_id: AtomicI64,
    /// First transport failure; every later call fails fast with it.
    dead: RwLock<Option<String>>,
    secret: Option<String>,
    client_name: String,
    session: RwLock<Option<i64>>,
    stopped: AtomicBool,
    child: Mutex<Option<Child>>,
}

/// A provider reached over the framed transport. Calls multiplex over one
/// connection; replies are matched by correlation ID on a reader thread.
pub struct RemoteProvider {
    name: String,
    inner: Arc<ClientInner>,
}

impl RemoteProvider {
    /// Dial the endpoint and start the demultiplexing reader.
    pub fn connect(name: &str, endpoint: &Endpoint, options: ClientOptions) -> Result<Self> {
        let secret = auth::resolve_secret(options.secret.as_deref());
        let Connection {
            mut reader,
            writer,
            child,
        } = dial(endpoint, options.ca_cert.as_deref())?;

        let inner = Arc::new(ClientInner {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(0),
            dead: RwLock::new(None),
            secret,
            client_name: if options.client_name.is_empty() {
                "shiftlint".to_string()
            } else {
                options.client_name
            },
            session: RwLock::new(None),
            stopped: AtomicBool::new(false),
            child: Mutex::new(child),
        });

        let reader_inner = inner.clone();
        std::thread::Builder::new()
            .name(format!("rpc-reader-{}", name))
            .spawn(move || {
                loop {
                    match frame::read_frame::<Response>(&mut *reader) {
                        Ok(response) => {
                            let sender = reader_inner
                                .pending
                                .lock()
                                .expect("pending map poisoned")
                                .remove(&response.id);
                            if let Some(sender) = sender {
                                let _ = sender.send(response);
                            }
                        }
                        Err(err) => {
                            reader_inner.mark_dead(err.to_string());
                            return;
                        }
                    }
                }
            })
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(RemoteProvider {
            name: name.to_string(),
            inner,
        })
    }

    /// From a provider settings entry; `None` when the provider has no
    /// remote endpoint.
    pub fn from_config(config: &ProviderConfig, client_name: &str) -> Result<Option<Self>> {
        let Some(endpoint) = Endpoint::from_config(config)? else {
            return Ok(None);
        };
        let options = ClientOptions {
            secret: config.jwt_secret.clone(),
            ca_cert: config.ca_cert.as_ref().map(std::path::PathBuf::from),
            client_name: client_name.to_string(),
        };
        Ok(Some(RemoteProvider::connect(&config.name, &endpoint, options)?))
    }

    fn call(&self, ctx: &CancelToken, method: &str, payload: Value) -> Result<Value> {
        self.inner.call(ctx, method, payload)
    }

    fn session_id(&self) -> Option<i64> {
        *self.inner.session.read().expect("session slot poisoned")
    }
}

impl ClientInner {
    fn mark_dead(&self, cause: String) {
        tracing::warn!(%cause, "provider transport failed");
        {
            let mut dead = self.dead.write().expect("dead flag poisoned");
            if dead.is_none() {
                *dead = Some(cause);
            }
        }
        // Fail every pending call by dropping its reply slot
        self.pending.lock().expect("pending map poisoned").clear();
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn dead_cause(&self) -> Option<String> {
        self.dead.read().expect("dead flag poisoned").clone()
    }

    fn call(&self, ctx: &CancelToken, method: &str, payload: Value) -> Result<Value> {
        if let Some(cause) = self.dead_cause() {
            return Err(Error::Transport(cause));
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = match &self.secret {
            Some(secret) => Some(auth::issue(secret, &self.client_name)?),
            None => None,
        };
        let request = Request {
            id,
            method: method.to_string(),
            session_id: *self.session.read().expect("session slot poisoned"),
            token,
            payload,
        };

        let (tx, rx): (Sender<Response>, Receiver<Response>) = channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        {
            let mut writer = self.writer.lock().expect("writer poisoned");
            if let Err(err) = frame::write_frame(&mut **writer, &request) {
                self.pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&id);
                self.mark_dead(err.to_string());
                return Err(Error::Transport(err.to_string()));
            }
        }

        loop {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(response) => {
                    if let Some(err) = &response.error {
                        return Err(frame::error_from_wire(err));
                    }
                    return Ok(response.result.unwrap_or(Value::Null));
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if ctx.is_cancelled() {
                        // Abandon the call; a late reply is dropped by the
                        // reader when the slot is gone
                        self.pending
                            .lock()
                            .expect("pending map poisoned")
                            .remove(&id);
                        return Err(Error::Cancelled);
                    }
                    if let Some(cause) = self.dead_cause() {
                        return Err(Error::Transport(cause));
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    let cause = self
                        .dead_cause()
                        .unwrap_or_else(|| "connection closed".to_string());
                    return Err(Error::Transport(cause));
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitReply {
    session_id: i64,
    #[serde(default)]
    discovered: Vec<InitConfig>,
}

impl Provider for RemoteProvider {
    fn capabilities(&self) -> Vec<Capability> {
        // Pure and callable before init; transport failures read as an
        // empty capability set and surface properly at init time.
        let ctx = CancelToken::new();
        match self.call(&ctx, method::CAPABILITIES, Value::Null) {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(err) => {
                tracing::warn!(provider = %self.name, %err, "capabilities call failed");
                Vec::new()
            }
        }
    }

    fn init(&self, ctx: &CancelToken, config: &ProviderConfig) -> Result<InitOutcome> {
        let reply = self.call(ctx, method::INIT, serde_json::to_value(config)?)?;
        let reply: InitReply = serde_json::from_value(reply)?;
        *self.inner.session.write().expect("session slot poisoned") = Some(reply.session_id);
        Ok(InitOutcome {
            session_id: reply.session_id,
            discovered: reply.discovered,
        })
    }

    fn provider_init(&self, ctx: &CancelToken, additional: Vec<InitConfig>) -> Result<()> {
        // The wire surface has no separate ProviderInit; each additional
        // location is announced as another Init on the same runtime.
        for init_config in additional {
            let config = ProviderConfig {
                name: self.name.clone(),
                init_config: vec![init_config],
                ..Default::default()
            };
            self.call(ctx, method::INIT, serde_json::to_value(&config)?)?;
        }
        Ok(())
    }

    fn prepare(&self, _ctx: &CancelToken, _conditions: &ConditionsByCapability) -> Result<()> {
        // Remote providers warm up from the conditions replayed through
        // Evaluate; nothing to ship ahead of time.
        Ok(())
    }

    fn evaluate(
        &self,
        ctx: &CancelToken,
        capability: &str,
        condition_info: &Value,
    ) -> Result<EvaluateResponse> {
        let reply = self.call(
            ctx,
            method::EVALUATE,
            json!({"capability": capability, "conditionInfo": condition_info}),
        )?;
        Ok(serde_json::from_value(reply)?)
    }

    fn get_dependencies(&self, ctx: &CancelToken) -> Result<DepsByFile> {
        let reply = self.call(ctx, method::GET_DEPENDENCIES, Value::Null)?;
        Ok(serde_json::from_value(reply)?)
    }

    fn get_dependencies_dag(&self, ctx: &CancelToken) -> Result<DepDagsByFile> {
        let reply = self.call(ctx, method::GET_DEPENDENCIES_DAG, Value::Null)?;
        Ok(serde_json::from_value(reply)?)
    }

    fn notify_file_changes(&self, ctx: &CancelToken, changes: &[FileChange]) -> Result<()> {
        self.call(ctx, method::NOTIFY_FILE_CHANGES, serde_json::to_value(changes)?)?;
        Ok(())
    }

    fn stop(&self) {
        let first = !self.inner.stopped.swap(true, Ordering::SeqCst);
        if first {
            let ctx = CancelToken::new();
            if self.session_id().is_some()
                && let Err(err) = self.inner.call(&ctx, method::STOP, Value::Null)
            {
                tracing::debug!(provider = %self.name, %err, "stop call failed");
            }
            *self.inner.session.write().expect("session slot poisoned") = None;
        }
        // Child providers must be reaped, not orphaned; take() keeps this
        // idempotent even when the transport died first
        if let Some(mut child) = self.inner.child.lock().expect("child slot poisoned").take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn dependency_location_resolver(&self) -> Option<&dyn DependencyLocationResolver> {
        Some(self)
    }

    fn code_snippet_resolver(&self) -> Option<&dyn CodeSnippetResolver> {
        Some(self)
    }
}

impl DependencyLocationResolver for RemoteProvider {
    fn resolve_location(
        &self,
        ctx: &CancelToken,
        dep: &Dependency,
        file_uri: &str,
    ) -> Result<Option<CodeLocation>> {
        match self.call(
            ctx,
            method::GET_DEPENDENCY_LOCATION,
            json!({"dep": dep, "fileUri": file_uri}),
        ) {
            Ok(reply) => Ok(serde_json::from_value(reply)?),
            Err(Error::Unsupported) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl CodeSnippetResolver for RemoteProvider {
    fn code_snip(
        &self,
        ctx: &CancelToken,
        file_uri: &str,
        location: &CodeLocation,
        context_lines: usize,
    ) -> Result<Option<String>> {
        match self.call(
            ctx,
            method::GET_CODE_SNIP,
            json!({"fileUri": file_uri, "location": location, "contextLines": context_lines}),
        ) {
            Ok(reply) => Ok(serde_json::from_value(reply)?),
            Err(Error::Unsupported) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
