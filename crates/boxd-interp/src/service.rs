//! The interpreter service: context creation, default contexts, streaming
//! execution, pool warming and deletion.

use crate::breaker::CircuitBreaker;
use crate::manager::KernelManager;
use crate::pool::{ContextEntry, ContextPool, PoolSettings, WarmingGuard};
use crate::setup;
use boxd_core::context::{CodeEvent, ContextInfo};
use boxd_core::kernel::{KernelConnection, KernelMessage, KernelStream};
use boxd_core::{ResourceKind, Result, SandboxError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_LANGUAGE: &str = "python";

/// Static interpreter configuration.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Pool settings per language; also the set of languages warmed at
    /// startup.
    pub languages: HashMap<String, PoolSettings>,
    /// Working directory new contexts start in.
    pub workspace_dir: PathBuf,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        let mut languages = HashMap::new();
        languages.insert(DEFAULT_LANGUAGE.to_string(), PoolSettings { min: 1, max: 10 });
        Self {
            languages,
            workspace_dir: PathBuf::from("/workspace"),
        }
    }
}

/// Options for `create_context`.
#[derive(Debug, Clone, Default)]
pub struct CreateContextOptions {
    pub language: Option<String>,
    pub cwd: Option<String>,
    pub env_vars: Vec<(String, String)>,
}

pub struct InterpreterService {
    config: InterpreterConfig,
    manager: Arc<KernelManager>,
    /// One owner serializing pool mutations for every language.
    pools: Mutex<HashMap<String, ContextPool>>,
    /// Contexts currently handed out, by id.
    active: RwLock<HashMap<String, Arc<ContextEntry>>>,
    /// Default context id per language; guarded by a mutex held across
    /// lazy creation so the default is created at most once.
    defaults: Mutex<HashMap<String, String>>,
    breaker: CircuitBreaker,
}

impl InterpreterService {
    pub fn new(config: InterpreterConfig, manager: Arc<KernelManager>) -> Arc<Self> {
        Arc::new(Self {
            config,
            manager,
            pools: Mutex::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            breaker: CircuitBreaker::with_defaults(),
        })
    }

    /// Warm the configured pools and flip the readiness gate.
    ///
    /// A language whose kernels cannot launch logs and is skipped; the
    /// daemon still comes up and surfaces the failure on first use.
    pub async fn initialize(self: &Arc<Self>) {
        let plan: Vec<(String, usize)> = self
            .config
            .languages
            .iter()
            .map(|(lang, settings)| (lang.clone(), settings.min))
            .collect();
        let total: usize = plan.iter().map(|(_, n)| n).sum();
        let mut warmed = 0usize;

        for (language, n) in plan {
            if n > 0 {
                self.warm_pool(&language, n).await;
                warmed += n;
                if total > 0 {
                    let progress = (warmed * 100 / total).min(99) as u8;
                    self.manager.set_progress(progress);
                }
            }
        }
        self.manager.mark_ready();
    }

    /// Create (or acquire from the pool) a context.
    pub async fn create_context(self: &Arc<Self>, opts: CreateContextOptions) -> Result<ContextInfo> {
        self.manager.ensure_ready()?;
        self.breaker.check()?;

        let language = opts
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let cwd = opts
            .cwd
            .clone()
            .unwrap_or_else(|| self.config.workspace_dir.to_string_lossy().into_owned());

        // Custom env vars pollute a kernel's environment irreversibly, so
        // such contexts never return to the pool.
        let poolable = opts.env_vars.is_empty();

        if poolable && let Some(entry) = self.acquire_pooled(&language).await {
            if let Err(e) = self.reconfigure(&entry, &cwd, &[]).await {
                warn!(context = %entry.id, error = %e, "discarding pooled context that failed setup");
                self.discard(&entry).await;
            } else {
                entry.touch();
                self.active
                    .write()
                    .await
                    .insert(entry.id.clone(), Arc::clone(&entry));
                self.maybe_refill(&language).await;
                debug!(context = %entry.id, %language, "context acquired from pool");
                return Ok(entry.info());
            }
        }

        let entry = self
            .cold_start(&language, &cwd, &opts.env_vars, poolable)
            .await?;
        Ok(entry.info())
    }

    /// Stream code execution in a context; `context_id: None` uses (and
    /// lazily creates) the language's default context.
    pub async fn execute_code(
        self: &Arc<Self>,
        context_id: Option<&str>,
        code: &str,
        language: Option<&str>,
    ) -> Result<mpsc::Receiver<CodeEvent>> {
        self.manager.ensure_ready()?;
        self.breaker.check()?;

        let entry = match context_id {
            Some(id) => self
                .active
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| SandboxError::not_found(ResourceKind::Context, id))?,
            None => {
                self.default_context(language.unwrap_or(DEFAULT_LANGUAGE))
                    .await?
            }
        };
        entry.touch();

        let messages = match entry.kernel.execute(code).await {
            Ok(rx) => {
                self.breaker.record_success();
                rx
            }
            Err(e) => {
                self.breaker.record_failure();
                return Err(e);
            }
        };

        Ok(spawn_event_mapper(messages))
    }

    /// Delete a context: pooled ones go back to their pool, the rest shut
    /// their kernel down. Clears the language default when it pointed here.
    pub async fn delete_context(&self, id: &str) -> Result<()> {
        let entry = self
            .active
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SandboxError::not_found(ResourceKind::Context, id))?;

        {
            let mut defaults = self.defaults.lock().await;
            if defaults.get(&entry.language).is_some_and(|d| d == id) {
                defaults.remove(&entry.language);
            }
        }

        if entry.pooled && entry.kernel.is_alive() {
            let mut pools = self.pools.lock().await;
            let pool = pools
                .entry(entry.language.clone())
                .or_insert_with(|| ContextPool::new(self.settings_for(&entry.language)));
            pool.release(Arc::clone(&entry));
            debug!(context = %id, "context returned to pool");
        } else {
            self.discard(&entry).await;
            debug!(context = %id, "context shut down");
        }
        Ok(())
    }

    pub async fn list_contexts(&self) -> Vec<ContextInfo> {
        let mut infos: Vec<ContextInfo> = self
            .active
            .read()
            .await
            .values()
            .map(|entry| entry.info())
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Create `n` warm contexts in parallel and append them to the pool's
    /// available list. A no-op while another warm cycle is in flight.
    pub async fn warm_pool(&self, language: &str, n: usize) {
        let (guard, allowed) = {
            let mut pools = self.pools.lock().await;
            let pool = pools
                .entry(language.to_string())
                .or_insert_with(|| ContextPool::new(self.settings_for(language)));
            let Some(guard) = WarmingGuard::try_acquire(&pool.warming) else {
                return;
            };
            let allowed = n.min(pool.settings.max.saturating_sub(pool.total()));
            (guard, allowed)
        };
        let _guard = guard;
        if allowed == 0 {
            return;
        }

        let cwd = self.config.workspace_dir.clone();
        let launches = (0..allowed).map(|_| {
            let cwd = cwd.clone();
            async move { self.manager.launch(language, &cwd, &[]).await }
        });
        let results = futures_util::future::join_all(launches).await;

        let mut entries = Vec::new();
        for result in results {
            match result {
                Ok(kernel) => entries.push(Arc::new(ContextEntry::new(
                    generate_context_id(),
                    language.to_string(),
                    cwd.to_string_lossy().into_owned(),
                    kernel,
                    true,
                ))),
                Err(e) => warn!(%language, error = %e, "kernel warm-up launch failed"),
            }
        }

        if entries.is_empty() {
            return;
        }
        let mut warmed = 0usize;
        let mut excess = Vec::new();
        {
            let mut pools = self.pools.lock().await;
            let pool = pools
                .entry(language.to_string())
                .or_insert_with(|| ContextPool::new(self.settings_for(language)));
            // Re-check capacity under the lock: cold starts may have taken
            // slots while the kernels were launching.
            for entry in entries {
                if pool.has_capacity() {
                    pool.available.push(entry);
                    warmed += 1;
                } else {
                    excess.push(entry);
                }
            }
            info!(%language, warmed, available = pool.available.len(), "pool warmed");
        }
        for entry in excess {
            let _ = entry.kernel.shutdown().await;
        }
    }

    /// Shut everything down: active contexts and warm pools alike.
    pub async fn shutdown_all(&self) {
        let active: Vec<_> = self.active.write().await.drain().collect();
        for (_, entry) in active {
            let _ = entry.kernel.shutdown().await;
        }
        let mut pools = self.pools.lock().await;
        for pool in pools.values_mut() {
            for entry in pool.available.drain(..) {
                let _ = entry.kernel.shutdown().await;
            }
            pool.in_use.clear();
        }
        self.defaults.lock().await.clear();
    }

    /// (available, in_use) cardinalities for one language's pool.
    pub async fn pool_counts(&self, language: &str) -> (usize, usize) {
        let pools = self.pools.lock().await;
        pools
            .get(language)
            .map(|pool| (pool.available.len(), pool.in_use.len()))
            .unwrap_or((0, 0))
    }

    async fn default_context(self: &Arc<Self>, language: &str) -> Result<Arc<ContextEntry>> {
        // Held across creation: concurrent executes without a context id
        // must not each create a default.
        let mut defaults = self.defaults.lock().await;
        if let Some(id) = defaults.get(language)
            && let Some(entry) = self.active.read().await.get(id).cloned()
        {
            return Ok(entry);
        }

        let info = self
            .create_context(CreateContextOptions {
                language: Some(language.to_string()),
                ..CreateContextOptions::default()
            })
            .await?;
        defaults.insert(language.to_string(), info.id.clone());

        let entry = self
            .active
            .read()
            .await
            .get(&info.id)
            .cloned()
            .ok_or_else(|| SandboxError::Internal("default context vanished".into()))?;
        debug!(%language, context = %entry.id, "default context created");
        Ok(entry)
    }

    async fn acquire_pooled(&self, language: &str) -> Option<Arc<ContextEntry>> {
        let mut pools = self.pools.lock().await;
        pools.get_mut(language)?.acquire()
    }

    /// Launch a fresh kernel when the pool has capacity.
    async fn cold_start(
        &self,
        language: &str,
        cwd: &str,
        env_vars: &[(String, String)],
        poolable: bool,
    ) -> Result<Arc<ContextEntry>> {
        let id = generate_context_id();
        {
            let mut pools = self.pools.lock().await;
            let pool = pools
                .entry(language.to_string())
                .or_insert_with(|| ContextPool::new(self.settings_for(language)));
            if !pool.has_capacity() {
                return Err(SandboxError::PoolExhausted {
                    language: language.to_string(),
                });
            }
            // Reserve the slot before the (slow) launch so concurrent
            // creations cannot overshoot max.
            pool.in_use.insert(id.clone());
        }

        let launched = self
            .manager
            .launch(language, std::path::Path::new(cwd), env_vars)
            .await;
        let kernel = match launched {
            Ok(kernel) => {
                self.breaker.record_success();
                kernel
            }
            Err(e) => {
                self.pools
                    .lock()
                    .await
                    .get_mut(language)
                    .map(|pool| pool.in_use.remove(&id));
                self.breaker.record_failure();
                return Err(e);
            }
        };

        let entry = Arc::new(ContextEntry::new(
            id,
            language.to_string(),
            cwd.to_string(),
            kernel,
            poolable,
        ));
        // The launcher already started in `cwd`; only env vars need kernel
        // side setup here.
        if let Err(e) = self.reconfigure(&entry, cwd, env_vars).await {
            warn!(context = %entry.id, error = %e, "context setup failed");
        }

        self.active
            .write()
            .await
            .insert(entry.id.clone(), Arc::clone(&entry));
        debug!(context = %entry.id, %language, "context cold-started");
        Ok(entry)
    }

    /// Apply cwd/env to a context via language snippets.
    async fn reconfigure(
        &self,
        entry: &Arc<ContextEntry>,
        cwd: &str,
        env_vars: &[(String, String)],
    ) -> Result<()> {
        if entry.cwd() != cwd
            && let Some(snippet) = setup::chdir_snippet(&entry.language, cwd)
        {
            run_setup(&entry.kernel, &snippet).await?;
        }
        entry.set_cwd(cwd.to_string());

        for (key, value) in env_vars {
            if let Some(snippet) = setup::setenv_snippet(&entry.language, key, value) {
                run_setup(&entry.kernel, &snippet).await?;
            }
        }
        Ok(())
    }

    /// Top the pool back up to `min` in the background; acquisition
    /// latency never pays for warming.
    async fn maybe_refill(self: &Arc<Self>, language: &str) {
        let need = {
            let pools = self.pools.lock().await;
            pools.get(language).map(ContextPool::refill_need).unwrap_or(0)
        };
        if need > 0 {
            debug!(%language, need, "scheduling pool refill");
            let service = Arc::clone(self);
            let language = language.to_string();
            tokio::spawn(async move {
                service.warm_pool(&language, need).await;
            });
        }
    }

    async fn discard(&self, entry: &Arc<ContextEntry>) {
        self.pools
            .lock()
            .await
            .get_mut(&entry.language)
            .map(|pool| pool.forget(&entry.id));
        let _ = entry.kernel.shutdown().await;
    }

    fn settings_for(&self, language: &str) -> PoolSettings {
        self.config
            .languages
            .get(language)
            .copied()
            .unwrap_or_default()
    }
}

fn generate_context_id() -> String {
    format!("ctx_{}", &Uuid::new_v4().simple().to_string()[..12])
}

/// Run a setup snippet and drain its messages.
async fn run_setup(kernel: &Arc<dyn KernelConnection>, snippet: &str) -> Result<()> {
    let mut rx = kernel.execute(snippet).await?;
    while let Some(message) = rx.recv().await {
        if let KernelMessage::Error { ename, evalue, .. } = message {
            return Err(SandboxError::Internal(format!(
                "context setup failed: {ename}: {evalue}"
            )));
        }
    }
    Ok(())
}

/// Map kernel messages onto the public code event stream.
fn spawn_event_mapper(
    mut messages: mpsc::Receiver<KernelMessage>,
) -> mpsc::Receiver<CodeEvent> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut terminal_sent = false;
        while let Some(message) = messages.recv().await {
            let event = match message {
                KernelMessage::Stream {
                    stream: KernelStream::Stdout,
                    text,
                } => CodeEvent::Stdout { data: text },
                KernelMessage::Stream {
                    stream: KernelStream::Stderr,
                    text,
                } => CodeEvent::Stderr { data: text },
                KernelMessage::DisplayData { data } => CodeEvent::DisplayData { data },
                KernelMessage::ExecuteResult {
                    data,
                    execution_count,
                } => CodeEvent::ExecutionResult {
                    data,
                    execution_count,
                },
                KernelMessage::Error {
                    ename,
                    evalue,
                    traceback,
                } => {
                    terminal_sent = true;
                    CodeEvent::Error {
                        ename,
                        evalue,
                        traceback,
                    }
                }
                KernelMessage::ExecuteReply {
                    ok,
                    execution_count,
                } => {
                    if ok {
                        terminal_sent = true;
                        CodeEvent::ExecutionComplete { execution_count }
                    } else if terminal_sent {
                        // The kernel already published the error; the
                        // stream is complete.
                        break;
                    } else {
                        terminal_sent = true;
                        CodeEvent::Error {
                            ename: "ExecutionError".into(),
                            evalue: "execution failed".into(),
                            traceback: Vec::new(),
                        }
                    }
                }
            };
            let done = event.is_terminal();
            if tx.send(event).await.is_err() || done {
                return;
            }
        }

        if !terminal_sent {
            // Kernel died mid-execution: close the stream with an error.
            let _ = tx
                .send(CodeEvent::Error {
                    ename: "KernelError".into(),
                    evalue: "kernel connection closed".into(),
                    traceback: Vec::new(),
                })
                .await;
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use boxd_core::kernel::KernelLauncher;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Kernel that acknowledges every execute with an ok reply.
    struct ScriptedKernel {
        alive: AtomicBool,
    }

    #[async_trait]
    impl KernelConnection for ScriptedKernel {
        async fn execute(&self, code: &str) -> Result<mpsc::Receiver<KernelMessage>> {
            let (tx, rx) = mpsc::channel(8);
            let code = code.to_string();
            tokio::spawn(async move {
                if code.contains("print") {
                    let _ = tx
                        .send(KernelMessage::Stream {
                            stream: KernelStream::Stdout,
                            text: "hello\n".into(),
                        })
                        .await;
                }
                let _ = tx
                    .send(KernelMessage::ExecuteReply {
                        ok: true,
                        execution_count: 1,
                    })
                    .await;
            });
            Ok(rx)
        }

        async fn shutdown(&self) -> Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    struct CountingLauncher {
        launches: AtomicUsize,
    }

    impl CountingLauncher {
        fn new() -> Self {
            Self {
                launches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KernelLauncher for CountingLauncher {
        async fn launch(
            &self,
            _language: &str,
            _cwd: &Path,
            _env: &[(String, String)],
        ) -> Result<Arc<dyn KernelConnection>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedKernel {
                alive: AtomicBool::new(true),
            }))
        }
    }

    fn config(min: usize, max: usize) -> InterpreterConfig {
        let mut languages = HashMap::new();
        languages.insert("python".to_string(), PoolSettings { min, max });
        InterpreterConfig {
            languages,
            workspace_dir: PathBuf::from("/workspace"),
        }
    }

    fn service(min: usize, max: usize) -> Arc<InterpreterService> {
        let manager = Arc::new(KernelManager::new(Arc::new(CountingLauncher::new())));
        InterpreterService::new(config(min, max), manager)
    }

    #[tokio::test]
    async fn operations_fail_before_ready() {
        let service = service(1, 4);
        let err = service
            .create_context(CreateContextOptions::default())
            .await
            .unwrap_err();
        match err {
            SandboxError::InterpreterNotReady { progress, .. } => assert!(progress <= 99),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_and_delete_restore_pool_cardinalities() {
        let service = service(1, 4);
        service.initialize().await;
        let before = service.pool_counts("python").await;
        assert_eq!(before.0, 1);

        let info = service
            .create_context(CreateContextOptions::default())
            .await
            .unwrap();
        assert_eq!(info.language, "python");
        assert_eq!(info.cwd, "/workspace");

        service.delete_context(&info.id).await.unwrap();
        // Refill tasks may add warmth; at minimum the acquired context is
        // back and nothing is left in use.
        let after = service.pool_counts("python").await;
        assert!(after.0 >= before.0);
        assert_eq!(after.1, 0);
        assert!(service.list_contexts().await.is_empty());
    }

    #[tokio::test]
    async fn pool_exhaustion_is_reported() {
        let service = service(0, 2);
        service.initialize().await;

        let a = service
            .create_context(CreateContextOptions::default())
            .await
            .unwrap();
        let _b = service
            .create_context(CreateContextOptions::default())
            .await
            .unwrap();
        let err = service
            .create_context(CreateContextOptions::default())
            .await
            .unwrap_err();
        match err {
            SandboxError::PoolExhausted { language } => assert_eq!(language, "python"),
            other => panic!("unexpected: {other:?}"),
        }

        // Deleting one frees a slot again.
        service.delete_context(&a.id).await.unwrap();
        assert!(
            service
                .create_context(CreateContextOptions::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn default_context_is_created_once() {
        let service = service(0, 4);
        service.initialize().await;

        let mut rx1 = service.execute_code(None, "1 + 1", None).await.unwrap();
        while rx1.recv().await.is_some() {}
        let mut rx2 = service.execute_code(None, "2 + 2", None).await.unwrap();
        while rx2.recv().await.is_some() {}

        assert_eq!(service.list_contexts().await.len(), 1);
    }

    #[tokio::test]
    async fn execute_unknown_context_fails() {
        let service = service(0, 4);
        service.initialize().await;
        let err = service
            .execute_code(Some("ctx_missing"), "1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound { .. }));
    }

    #[tokio::test]
    async fn execute_streams_output_then_completion() {
        let service = service(0, 4);
        service.initialize().await;

        let mut rx = service
            .execute_code(None, "print('hello')", None)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                CodeEvent::Stdout {
                    data: "hello\n".into()
                },
                CodeEvent::ExecutionComplete { execution_count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn env_var_contexts_are_not_pooled() {
        let service = service(0, 4);
        service.initialize().await;

        let info = service
            .create_context(CreateContextOptions {
                env_vars: vec![("API_KEY".into(), "k".into())],
                ..CreateContextOptions::default()
            })
            .await
            .unwrap();
        service.delete_context(&info.id).await.unwrap();

        let (available, in_use) = service.pool_counts("python").await;
        assert_eq!((available, in_use), (0, 0));
    }
}
