//! Runtime assembly
//!
//! [`ClearanceRuntimeBuilder`] wires every collaborator explicitly: nothing is
//! looked up globally. Identity and vector search must be supplied; the
//! notifier, clock, cache backend and journal default from configuration.

use crate::config::{CacheBackendKind, ClearanceConfig};
use crate::errors::{AgentError, Result};
use crate::service::{ClearanceService, ServiceParts};
use crate::task_registry::TaskRegistry;
use clearance_cache::{CacheBackend, MemoryCacheBackend, RespCacheBackend, ScopedCache};
use clearance_core::{
    IdentityEffects, NotificationEffects, OverrideSource, PermissionResolver, PhysicalClock,
    SystemClock, TracingNotifier,
};
use clearance_retrieval::{AdaptiveRetriever, RerankEffects, VectorSearchEffects};
use clearance_store::{
    AccessStore, FactJournal, FileJournal, MaintenanceSweep, MemoryJournal, OverrideStore,
    RequestWorkflow,
};
use std::sync::Arc;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Fluent builder for [`ClearanceRuntime`].
pub struct ClearanceRuntimeBuilder {
    config: ClearanceConfig,
    identity: Option<Arc<dyn IdentityEffects>>,
    search: Option<Arc<dyn VectorSearchEffects>>,
    reranker: Option<Arc<dyn RerankEffects>>,
    notifier: Option<Arc<dyn NotificationEffects>>,
    clock: Option<Arc<dyn PhysicalClock>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    journal: Option<Arc<dyn FactJournal>>,
    env: EnvLookup,
}

impl ClearanceRuntimeBuilder {
    /// Builder over `config`.
    pub fn new(config: ClearanceConfig) -> Self {
        Self {
            config,
            identity: None,
            search: None,
            reranker: None,
            notifier: None,
            clock: None,
            cache_backend: None,
            journal: None,
            env: Arc::new(|name: &str| std::env::var(name).ok()),
        }
    }

    /// Identity subsystem (required).
    pub fn with_identity(mut self, identity: Arc<dyn IdentityEffects>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Vector search collaborator (required).
    pub fn with_search(mut self, search: Arc<dyn VectorSearchEffects>) -> Self {
        self.search = Some(search);
        self
    }

    /// Reranking collaborator.
    pub fn with_reranker(mut self, reranker: Arc<dyn RerankEffects>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Notification delivery; defaults to [`TracingNotifier`].
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationEffects>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Time source; defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn PhysicalClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Cache backend, replacing the configured one.
    pub fn with_cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Fact journal, replacing the configured one.
    pub fn with_journal(mut self, journal: Arc<dyn FactJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Secret lookup; defaults to the process environment.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Validate the configuration and assemble the runtime.
    ///
    /// Replays the journal, so a corrupt journal fails here rather than on
    /// the first request.
    pub async fn build(self) -> Result<ClearanceRuntime> {
        let env = self.env.clone();
        self.config.validate_with(&*env)?;

        let identity = self
            .identity
            .ok_or(AgentError::MissingCollaborator("identity"))?;
        let search = self
            .search
            .ok_or(AgentError::MissingCollaborator("vector search"))?;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let journal: Arc<dyn FactJournal> = match (self.journal, &self.config.store.journal_path) {
            (Some(journal), _) => journal,
            (None, Some(path)) => Arc::new(FileJournal::open(path.clone()).await?),
            (None, None) => Arc::new(MemoryJournal::new()),
        };
        let store = Arc::new(AccessStore::open(journal, clock.clone()).await?);
        let overrides = OverrideStore::new(store.clone(), notifier.clone());
        let workflow = RequestWorkflow::new(
            store,
            identity.clone(),
            notifier,
            self.config.workflow_policy(),
        );
        let resolver = PermissionResolver::new(
            identity,
            Arc::new(overrides.clone()) as Arc<dyn OverrideSource>,
            clock.clone(),
        );

        let backend: Arc<dyn CacheBackend> = match self.cache_backend {
            Some(backend) => backend,
            None => match self.config.cache.backend {
                CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new(
                    clock.clone(),
                    self.config.cache.max_entries,
                )),
                CacheBackendKind::Resp => {
                    Arc::new(RespCacheBackend::new(self.config.resp_config_with(&*env)))
                }
            },
        };
        let cache = Arc::new(ScopedCache::new(
            backend,
            self.config.scoped_cache_config(),
            self.config.cipher_with(&*env)?,
        )?);

        let retriever =
            AdaptiveRetriever::new(search, self.reranker, self.config.retrieval_config());
        let sweep = MaintenanceSweep::new(
            overrides.clone(),
            workflow.clone(),
            self.config.expiring_soon(),
        );

        tracing::info!(
            cache_backend = cache.backend_name(),
            scope_policy = ?self.config.cache.scope_policy,
            single_flight = self.config.cache.single_flight,
            durable = self.config.store.journal_path.is_some(),
            "Clearance runtime assembled"
        );

        let service = ClearanceService::new(ServiceParts {
            resolver,
            overrides,
            workflow,
            cache,
            retriever,
            scope_policy: self.config.cache.scope_policy,
            single_flight: self.config.cache.single_flight,
            conversation_max_turns: self.config.cache.conversation_max_turns,
            clock,
        });

        Ok(ClearanceRuntime {
            service,
            sweep,
            tasks: TaskRegistry::new(),
            config: self.config,
        })
    }
}

/// An assembled service plus its background maintenance.
pub struct ClearanceRuntime {
    service: ClearanceService,
    sweep: MaintenanceSweep,
    tasks: TaskRegistry,
    config: ClearanceConfig,
}

impl std::fmt::Debug for ClearanceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClearanceRuntime")
            .field("config", &self.config)
            .field("running_tasks", &self.tasks.running())
            .finish_non_exhaustive()
    }
}

impl ClearanceRuntime {
    /// Request-facing service.
    pub fn service(&self) -> &ClearanceService {
        &self.service
    }

    /// Maintenance sweep, for running it on demand.
    pub fn sweep(&self) -> &MaintenanceSweep {
        &self.sweep
    }

    /// Configuration the runtime was built from.
    pub fn config(&self) -> &ClearanceConfig {
        &self.config
    }

    /// Run the maintenance sweep now and then every `sweep_interval`.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub fn start_maintenance(&self) {
        let sweep = self.sweep.clone();
        self.tasks
            .spawn_interval_until(self.config.sweep_interval(), move || {
                let sweep = sweep.clone();
                async move {
                    if let Err(error) = sweep.run_once().await {
                        tracing::error!(error = %error, code = error.error_code(), "Maintenance sweep failed");
                    }
                    true
                }
            });
        tracing::info!(
            interval_secs = self.config.maintenance.sweep_interval_secs,
            "Maintenance scheduled"
        );
    }

    /// Background tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tasks.running()
    }

    /// Stop background maintenance, letting an in-progress sweep finish.
    pub async fn shutdown(&self) {
        self.tasks.shutdown_gracefully().await;
        tracing::info!("Clearance runtime stopped");
    }
}
