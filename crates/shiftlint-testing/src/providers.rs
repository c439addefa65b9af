//! Fake providers with scripted behavior for engine and runtime tests.

use serde_json::Value;
use shiftlint_provider::{
    ConditionsByCapability, DepDagsByFile, DepsByFile, Error, EvaluateResponse, InitConfig,
    InitOutcome, Provider, ProviderConfig, Result,
};
use shiftlint_types::{CancelToken, Capability, Dependency, FileChange};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An in-process provider that answers from a scripted response table and
/// records every call it receives.
pub struct FakeProvider {
    capabilities: Vec<String>,
    responses: BTreeMap<String, EvaluateResponse>,
    flat_deps: Option<DepsByFile>,
    dag_deps: Option<DepDagsByFile>,
    calls: Mutex<Vec<(String, Value)>>,
    prepared: Mutex<Option<ConditionsByCapability>>,
    session_counter: AtomicI64,
    stopped: AtomicBool,
    stop_count: Mutex<usize>,
}

impl FakeProvider {
    pub fn new(capabilities: &[&str]) -> Self {
        FakeProvider {
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            responses: BTreeMap::new(),
            flat_deps: None,
            dag_deps: None,
            calls: Mutex::new(Vec::new()),
            prepared: Mutex::new(None),
            session_counter: AtomicI64::new(0),
            stopped: AtomicBool::new(false),
            stop_count: Mutex::new(0),
        }
    }

    /// Script the response for one capability. Unscripted capabilities
    /// answer "no match".
    pub fn with_response(mut self, capability: &str, response: EvaluateResponse) -> Self {
        self.responses.insert(capability.to_string(), response);
        self
    }

    /// Script the flat dependency table; also enables `dependency` calls.
    pub fn with_flat_deps(mut self, deps: DepsByFile) -> Self {
        self.flat_deps = Some(deps);
        self
    }

    pub fn with_dag_deps(mut self, dags: DepDagsByFile) -> Self {
        self.dag_deps = Some(dags);
        self
    }

    /// Convenience: one dependency under one manifest file.
    pub fn with_dependency(self, file_uri: &str, name: &str, version: &str) -> Self {
        let mut deps = BTreeMap::new();
        deps.insert(
            file_uri.to_string(),
            vec![Dependency {
                name: name.to_string(),
                version: version.to_string(),
                ..Default::default()
            }],
        );
        self.with_flat_deps(deps)
    }

    /// Every `(capability, payload)` pair this provider has evaluated.
    pub fn recorded_calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// The condition set handed to `prepare`, when it ran.
    pub fn prepared_conditions(&self) -> Option<ConditionsByCapability> {
        self.prepared.lock().expect("prepare log poisoned").clone()
    }

    pub fn stop_count(&self) -> usize {
        *self.stop_count.lock().expect("stop log poisoned")
    }
}

impl Provider for FakeProvider {
    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities
            .iter()
            .map(|name| Capability::named(name.clone()))
            .collect()
    }

    fn init(&self, _ctx: &CancelToken, _config: &ProviderConfig) -> Result<InitOutcome> {
        Ok(InitOutcome {
            session_id: self.session_counter.fetch_add(1, Ordering::SeqCst) + 1,
            discovered: Vec::new(),
        })
    }

    fn provider_init(&self, _ctx: &CancelToken, _additional: Vec<InitConfig>) -> Result<()> {
        Ok(())
    }

    fn prepare(&self, _ctx: &CancelToken, conditions: &ConditionsByCapability) -> Result<()> {
        *self.prepared.lock().expect("prepare log poisoned") = Some(conditions.clone());
        Ok(())
    }

    fn evaluate(
        &self,
        ctx: &CancelToken,
        capability: &str,
        condition_info: &Value,
    ) -> Result<EvaluateResponse> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Evaluate("provider is stopped".to_string()));
        }
        self.calls
            .lock()
            .expect("call log poisoned")
            .push((capability.to_string(), condition_info.clone()));
        if !self.capabilities.iter().any(|c| c == capability) {
            return Err(Error::UnknownCapability(capability.to_string()));
        }
        Ok(self
            .responses
            .get(capability)
            .cloned()
            .unwrap_or_default())
    }

    fn get_dependencies(&self, _ctx: &CancelToken) -> Result<DepsByFile> {
        self.flat_deps.clone().ok_or(Error::Unsupported)
    }

    fn get_dependencies_dag(&self, _ctx: &CancelToken) -> Result<DepDagsByFile> {
        self.dag_deps.clone().ok_or(Error::Unsupported)
    }

    fn notify_file_changes(&self, _ctx: &CancelToken, _changes: &[FileChange]) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        *self.stop_count.lock().expect("stop log poisoned") += 1;
    }
}

/// Lets a test unblock a `BlockingProvider` from outside.
#[derive(Clone, Default)]
pub struct ReleaseHandle {
    released: Arc<AtomicBool>,
}

impl ReleaseHandle {
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// A provider whose `evaluate` blocks until released or cancelled, for
/// exercising cancellation mid-call.
pub struct BlockingProvider {
    capability: String,
    released: Arc<AtomicBool>,
    entered: Arc<AtomicBool>,
}

impl BlockingProvider {
    pub fn new(capability: &str) -> (Self, ReleaseHandle) {
        let handle = ReleaseHandle::default();
        let provider = BlockingProvider {
            capability: capability.to_string(),
            released: handle.released.clone(),
            entered: Arc::new(AtomicBool::new(false)),
        };
        (provider, handle)
    }

    /// True once an evaluate call has started blocking.
    pub fn entered(&self) -> Arc<AtomicBool> {
        self.entered.clone()
    }
}

impl Provider for BlockingProvider {
    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::named(self.capability.clone())]
    }

    fn init(&self, _ctx: &CancelToken, _config: &ProviderConfig) -> Result<InitOutcome> {
        Ok(InitOutcome {
            session_id: 1,
            discovered: Vec::new(),
        })
    }

    fn provider_init(&self, _ctx: &CancelToken, _additional: Vec<InitConfig>) -> Result<()> {
        Ok(())
    }

    fn prepare(&self, _ctx: &CancelToken, _conditions: &ConditionsByCapability) -> Result<()> {
        Ok(())
    }

    fn evaluate(
        &self,
        ctx: &CancelToken,
        _capability: &str,
        _condition_info: &Value,
    ) -> Result<EvaluateResponse> {
        self.entered.store(true, Ordering::SeqCst);
        loop {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.released.load(Ordering::SeqCst) {
                return Ok(EvaluateResponse {
                    matched: true,
                    ..Default::default()
                });
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn get_dependencies(&self, _ctx: &CancelToken) -> Result<DepsByFile> {
        Err(Error::Unsupported)
    }

    fn get_dependencies_dag(&self, _ctx: &CancelToken) -> Result<DepDagsByFile> {
        Err(Error::Unsupported)
    }

    fn notify_file_changes(&self, _ctx: &CancelToken, _changes: &[FileChange]) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {
        // Unblock any in-flight evaluate so stop never hangs
        self.released.store(true, Ordering::SeqCst);
    }
}
