// src/install.rs
//! Process-wide wiring of the policy layer
//!
//! [`PolicyRuntime::install`] builds the registry and audit stores once,
//! registers the configured policies on whatever interception points the
//! engine adapter could resolve, and keeps everything alive for the rest of
//! the process.

use crate::arbitration::{
    ArbitrationController, LifecycleHub, ProcessTerminator, ResourceArbiter, ResourceKey,
    TerminationGuard,
};
use crate::interception::engine::{InterceptionEngine, InterceptionPoint, PolicyHandler};
use crate::interception::hook_chain::{ChainMode, HookChainRegistry};
use crate::policies::{
    DialogSuppressor, HeaderAuditTap, HostAuditTap, HostBlocklist, StorageAuditTap, UrlRewriter,
};
use crate::recording::audit_log::{AuditConfig, AuditLogStore, ExportSummary};
use crate::recording::domain::AuditDomain;
use crate::recording::exporter::{ExportFormat, Exporter};
use crate::utils::config::{AuditStoreSettings, PolicyConfig};
use crate::utils::errors::{PolicyError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

static RUNTIME: OnceCell<PolicyRuntime> = OnceCell::new();

/// Key the termination guard holds on the arbiter
pub const TERMINATION_KEY: &str = "termination";

/// Interception points resolved by the engine adapter
///
/// Points the host doesn't offer stay `None` and their policies are skipped.
#[derive(Debug, Clone, Default)]
pub struct PointCatalog {
    pub resolve_host: Option<InterceptionPoint>,
    pub connect_socket: Option<InterceptionPoint>,
    pub set_header: Option<InterceptionPoint>,
    pub read_storage: Option<InterceptionPoint>,
    pub construct_url: Option<InterceptionPoint>,
    pub show_dialog: Option<InterceptionPoint>,
    pub terminate_process: Option<InterceptionPoint>,
}

pub struct PolicyRuntime {
    config: PolicyConfig,
    points: PointCatalog,
    registry: Arc<HookChainRegistry>,
    hosts: Arc<AuditLogStore>,
    headers: Arc<AuditLogStore>,
    storage: Arc<AuditLogStore>,
    lifecycle: Arc<LifecycleHub>,
}

impl PolicyRuntime {
    /// Build and publish the process-wide runtime; only the first call succeeds
    pub fn install(
        config: PolicyConfig,
        engine: Arc<dyn InterceptionEngine>,
        points: PointCatalog,
    ) -> Result<&'static PolicyRuntime> {
        let mut created = false;
        let runtime = RUNTIME.get_or_try_init(|| {
            created = true;
            Self::build(config, engine, points)
        })?;

        if !created {
            return Err(PolicyError::AlreadyInstalled);
        }
        info!("Policy runtime installed");
        Ok(runtime)
    }

    /// The installed runtime, if any
    pub fn get() -> Option<&'static PolicyRuntime> {
        RUNTIME.get()
    }

    /// Build a standalone runtime that is not published globally
    pub fn build(
        config: PolicyConfig,
        engine: Arc<dyn InterceptionEngine>,
        points: PointCatalog,
    ) -> Result<Self> {
        let runtime = Self {
            hosts: create_store(AuditDomain::Hosts, &config.audit.hosts),
            headers: create_store(AuditDomain::Headers, &config.audit.headers),
            storage: create_store(AuditDomain::Storage, &config.audit.storage),
            registry: Arc::new(HookChainRegistry::new(engine)),
            lifecycle: Arc::new(LifecycleHub::new()),
            config,
            points,
        };
        runtime.register_policies()?;
        Ok(runtime)
    }

    fn register_policies(&self) -> Result<()> {
        let audit = &self.config.audit;
        let policies = &self.config.policies;

        // taps go first so a blocked lookup is still audited
        if audit.hosts.enabled {
            let tap: Arc<dyn PolicyHandler> = Arc::new(HostAuditTap::new(self.hosts.clone()));
            self.register(&self.points.resolve_host, ChainMode::Decisive, tap.clone())?;
            self.register(&self.points.connect_socket, ChainMode::Observer, tap)?;
        }
        if audit.headers.enabled {
            let tap = Arc::new(HeaderAuditTap::new(self.headers.clone()));
            self.register(&self.points.set_header, ChainMode::Observer, tap)?;
        }
        if audit.storage.enabled {
            let tap = Arc::new(StorageAuditTap::new(self.storage.clone()));
            self.register(&self.points.read_storage, ChainMode::Observer, tap)?;
        }

        if !policies.blocked_hosts.is_empty() {
            let blocklist = Arc::new(HostBlocklist::new(&policies.blocked_hosts));
            self.register(&self.points.resolve_host, ChainMode::Decisive, blocklist)?;
        }
        if !policies.url_rewrites.is_empty() {
            let rewriter = Arc::new(UrlRewriter::from_rules(&policies.url_rewrites));
            self.register(&self.points.construct_url, ChainMode::Decisive, rewriter)?;
        }
        if !policies.suppressed_dialogs.is_empty() {
            let suppressor = Arc::new(DialogSuppressor::new(&policies.suppressed_dialogs));
            self.register(&self.points.show_dialog, ChainMode::Decisive, suppressor)?;
        }

        Ok(())
    }

    fn register(
        &self,
        point: &Option<InterceptionPoint>,
        mode: ChainMode,
        handler: Arc<dyn PolicyHandler>,
    ) -> Result<()> {
        match point {
            Some(point) => self.registry.register(point, mode, handler),
            None => {
                debug!("No interception point for {}, skipping", handler.name());
                Ok(())
            }
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HookChainRegistry> {
        &self.registry
    }

    /// Host lifecycle events go here
    pub fn lifecycle(&self) -> &Arc<LifecycleHub> {
        &self.lifecycle
    }

    pub fn audit_store(&self, domain: AuditDomain) -> &Arc<AuditLogStore> {
        match domain {
            AuditDomain::Hosts => &self.hosts,
            AuditDomain::Headers => &self.headers,
            AuditDomain::Storage => &self.storage,
        }
    }

    /// Route lifecycle events to a controller
    pub fn attach_controller(&self, controller: Arc<ArbitrationController>) {
        self.lifecycle.subscribe(controller);
    }

    /// Hold the termination point until `arbiter` has suppressed its resource
    pub fn guard_termination(
        &self,
        arbiter: ResourceArbiter,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Result<Arc<TerminationGuard>> {
        let point = self.points.terminate_process.as_ref().ok_or_else(|| {
            PolicyError::ConfigError("No termination point available".to_string())
        })?;

        let guard = Arc::new(TerminationGuard::new(
            arbiter,
            ResourceKey::from(TERMINATION_KEY),
            terminator,
            self.config.arbitration.termination_grace(),
        ));
        self.registry
            .register(point, ChainMode::Decisive, guard.clone())?;
        Ok(guard)
    }

    /// Export every audit store into `dir` as `<domain>.<ext>`
    pub async fn export_audit(
        &self,
        dir: impl AsRef<Path>,
        format: ExportFormat,
    ) -> Result<Vec<(AuditDomain, ExportSummary)>> {
        let exporter = Exporter::new(format);
        let mut summaries = Vec::new();

        for domain in [AuditDomain::Hosts, AuditDomain::Headers, AuditDomain::Storage] {
            let store = Arc::clone(self.audit_store(domain));
            let path = dir.as_ref().join(exporter.file_name(&store));
            let summary = exporter.export_to_file(store, path, 0).await?;
            summaries.push((domain, summary));
        }
        Ok(summaries)
    }
}

fn create_store(domain: AuditDomain, settings: &AuditStoreSettings) -> Arc<AuditLogStore> {
    let config = AuditConfig::from(settings);
    debug!(
        "Creating {} audit store (max {} entries, enabled {})",
        domain, config.max_entries, settings.enabled
    );
    Arc::new(AuditLogStore::new(domain, config))
}
