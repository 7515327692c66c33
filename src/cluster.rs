// Connection state machine for one managed cluster. Owns the record's
// runtime state, drives activation and periodic refresh, and broadcasts
// progress on the event bus. External readers only ever see immutable
// snapshots published on a watch channel.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::authz;
use crate::deps::{AccessReview, ClusterConnection, ClusterDependencies};
use crate::error::{Error, NamespaceListError};
use crate::events::ClusterEvent;
use crate::models::cluster::{
    metadata_key, validate_cluster_id, ClusterConfigData, ClusterId, ClusterMetadata,
    ClusterModel, ClusterPreferences, ClusterState, MetricsPreferences, UpdateClusterModel,
    INITIAL_NODE_SHELL_IMAGE,
};
use crate::models::rbac::{format_api_resource, ApiResource};
use crate::status::{classify, ClusterStatus};

/// Externally supplied configuration, mutated only through `update_model`.
struct ClusterConfig {
    context_name: String,
    kube_config_path: String,
    preferences: ClusterPreferences,
    metadata: ClusterMetadata,
    labels: HashMap<String, String>,
    accessible_namespaces: Vec<String>,
}

/// Derived runtime state, mutated only by the state machine. Guarded by
/// one async mutex held for the full duration of each refresh cycle, so
/// cycles for the same cluster never interleave.
struct RuntimeState {
    api_url: String,
    online: bool,
    accessible: bool,
    ready: bool,
    disconnected: bool,
    reconnecting: bool,
    is_admin: bool,
    is_global_watch_enabled: bool,
    allowed_namespaces: Vec<String>,
    known_resources: Vec<ApiResource>,
    allowed_resources: HashSet<String>,
    activated: bool,
    tasks: Vec<JoinHandle<()>>,
}

/// Preference fields observed by the background watcher task.
#[derive(Clone, Default, PartialEq)]
struct PreferenceSignal {
    default_namespace: Option<String>,
    metrics: Option<MetricsPreferences>,
}

impl PreferenceSignal {
    fn of(preferences: &ClusterPreferences) -> Self {
        Self {
            default_namespace: preferences.default_namespace.clone(),
            metrics: preferences.metrics.clone(),
        }
    }
}

pub struct Cluster {
    pub id: ClusterId,
    deps: ClusterDependencies,
    config: RwLock<ClusterConfig>,
    runtime: Mutex<RuntimeState>,
    state_tx: watch::Sender<ClusterState>,
    prefs_tx: watch::Sender<PreferenceSignal>,
}

impl Cluster {
    /// Builds the record. Fails on an invalid id or model shape; `apiUrl`
    /// is taken from `config_data`, resolved once by the caller from the
    /// kubeconfig file, and never re-read automatically.
    pub fn new(
        deps: ClusterDependencies,
        model: ClusterModel,
        config_data: ClusterConfigData,
    ) -> Result<Arc<Self>, Error> {
        validate_cluster_id(&model.id)?;

        let update = UpdateClusterModel {
            context_name: model.context_name,
            kube_config_path: model.kube_config_path,
            preferences: Some(model.preferences),
            metadata: Some(model.metadata),
            labels: Some(model.labels),
            accessible_namespaces: Some(model.accessible_namespaces),
        };
        update.validate()?;

        let config = ClusterConfig {
            context_name: update.context_name,
            kube_config_path: update.kube_config_path,
            preferences: update.preferences.unwrap_or_default(),
            metadata: update.metadata.unwrap_or_default(),
            labels: update.labels.unwrap_or_default(),
            accessible_namespaces: update.accessible_namespaces.unwrap_or_default(),
        };

        let runtime = RuntimeState {
            api_url: config_data.cluster_server_url,
            online: false,
            accessible: false,
            ready: false,
            disconnected: true,
            reconnecting: false,
            is_admin: false,
            is_global_watch_enabled: false,
            allowed_namespaces: Vec::new(),
            known_resources: Vec::new(),
            allowed_resources: HashSet::new(),
            activated: false,
            tasks: Vec::new(),
        };

        let (state_tx, _) = watch::channel(snapshot_of(&runtime));
        let (prefs_tx, _) = watch::channel(PreferenceSignal::of(&config.preferences));

        log::debug!(
            "cluster: init success id={} context={} apiUrl={}",
            model.id,
            config.context_name,
            state_tx.borrow().api_url,
        );

        Ok(Arc::new(Self {
            id: model.id,
            deps,
            config: RwLock::new(config),
            runtime: Mutex::new(runtime),
            state_tx,
            prefs_tx,
        }))
    }

    // ── config accessors ──────────────────────────────────────────────────

    fn config_read(&self) -> RwLockReadGuard<'_, ClusterConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_write(&self) -> RwLockWriteGuard<'_, ClusterConfig> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Display name; falls back to the context name.
    pub fn name(&self) -> String {
        let config = self.config_read();
        config
            .preferences
            .cluster_name
            .clone()
            .unwrap_or_else(|| config.context_name.clone())
    }

    pub fn context_name(&self) -> String {
        self.config_read().context_name.clone()
    }

    pub fn kube_config_path(&self) -> String {
        self.config_read().kube_config_path.clone()
    }

    pub fn preferences(&self) -> ClusterPreferences {
        self.config_read().preferences.clone()
    }

    pub fn metadata(&self) -> ClusterMetadata {
        self.config_read().metadata.clone()
    }

    /// The detected kubernetes distribution.
    pub fn distribution(&self) -> String {
        self.metadata_string(metadata_key::DISTRIBUTION)
    }

    /// The detected kubernetes version.
    pub fn version(&self) -> String {
        self.metadata_string(metadata_key::VERSION)
    }

    fn metadata_string(&self, key: &str) -> String {
        self.config_read()
            .metadata
            .get(key)
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn node_shell_image(&self) -> String {
        self.config_read()
            .preferences
            .node_shell_image
            .clone()
            .unwrap_or_else(|| INITIAL_NODE_SHELL_IMAGE.to_string())
    }

    pub fn image_pull_secret(&self) -> Option<String> {
        self.config_read().preferences.image_pull_secret.clone()
    }

    pub fn is_metric_hidden(&self, metric: &str) -> bool {
        self.config_read()
            .preferences
            .hidden_metrics
            .as_ref()
            .is_some_and(|hidden| hidden.iter().any(|name| name == metric))
    }

    /// Full persisted model, for the registry's store.
    pub fn model(&self) -> ClusterModel {
        let config = self.config_read();
        ClusterModel {
            id: self.id.clone(),
            context_name: config.context_name.clone(),
            kube_config_path: config.kube_config_path.clone(),
            preferences: config.preferences.clone(),
            metadata: config.metadata.clone(),
            labels: config.labels.clone(),
            accessible_namespaces: config.accessible_namespaces.clone(),
        }
    }

    /// Applies a model update atomically: validation errors leave every
    /// field untouched. The id is never updated.
    pub fn update_model(&self, update: UpdateClusterModel) -> Result<(), Error> {
        update.validate()?;

        {
            let mut config = self.config_write();
            config.context_name = update.context_name;
            config.kube_config_path = update.kube_config_path;
            if let Some(preferences) = update.preferences {
                config.preferences = preferences;
            }
            if let Some(metadata) = update.metadata {
                config.metadata = metadata;
            }
            if let Some(labels) = update.labels {
                config.labels = labels;
            }
            if let Some(namespaces) = update.accessible_namespaces {
                config.accessible_namespaces = namespaces;
            }

            let signal = PreferenceSignal::of(&config.preferences);
            self.prefs_tx.send_if_modified(|current| {
                if *current != signal {
                    *current = signal;
                    true
                } else {
                    false
                }
            });
        }

        Ok(())
    }

    // ── snapshot readers ──────────────────────────────────────────────────

    /// Serializable runtime state for cross-process sync.
    pub fn get_state(&self) -> ClusterState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state snapshots; the current value is readable
    /// immediately.
    pub fn watch_state(&self) -> watch::Receiver<ClusterState> {
        self.state_tx.subscribe()
    }

    pub fn available(&self) -> bool {
        let state = self.state_tx.borrow();
        state.accessible && !state.disconnected
    }

    /// Whether a resource kind was confirmed listable in at least one
    /// allowed namespace.
    pub fn should_show_resource(&self, resource: &ApiResource) -> bool {
        let formatted = format_api_resource(resource);
        self.state_tx
            .borrow()
            .allowed_resources
            .iter()
            .any(|allowed| *allowed == formatted)
    }

    /// Resolves once `ready` becomes true (or the cluster is dropped).
    pub async fn wait_until_ready(&self) {
        let mut rx = self.state_tx.subscribe();
        while !rx.borrow_and_update().ready {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Overwrites the derived runtime state from a snapshot received from
    /// another process.
    pub async fn set_state(&self, state: ClusterState) {
        let mut runtime = self.runtime.lock().await;
        runtime.api_url = state.api_url;
        runtime.online = state.online;
        runtime.accessible = state.accessible;
        runtime.ready = state.ready;
        runtime.disconnected = state.disconnected;
        runtime.is_admin = state.is_admin;
        runtime.is_global_watch_enabled = state.is_global_watch_enabled;
        runtime.allowed_namespaces = state.allowed_namespaces;
        runtime.allowed_resources = state.allowed_resources.into_iter().collect();
        self.publish(&runtime);
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Drives the full activation sequence. Idempotent: repeated calls
    /// without `force` after one completed activation return immediately.
    pub async fn activate(self: &Arc<Self>, force: bool) {
        let mut runtime = self.runtime.lock().await;

        if runtime.activated && !force {
            log::debug!("cluster: already activated id={}", self.id);
            return;
        }

        log::info!(
            "cluster: activate id={} context={} disconnected={}",
            self.id,
            self.context_name(),
            runtime.disconnected,
        );

        if runtime.tasks.is_empty() {
            self.bind_events(&mut runtime);
        }

        let mut aborted = false;

        if runtime.disconnected || !runtime.accessible {
            self.broadcast("Starting connection ...", false);
            if let Err(error) = self.reconnect(&mut runtime).await {
                self.broadcast(&format!("Failed to start connection: {error}"), true);
                aborted = true;
            }
        }

        if !aborted {
            self.broadcast("Refreshing connection status ...", false);
            if let Err(error) = self.refresh_connection_status(&mut runtime).await {
                self.broadcast(
                    &format!("Failed to refresh connection status: {error}"),
                    true,
                );
                aborted = true;
            }
        }

        if !aborted && runtime.accessible {
            self.broadcast("Refreshing cluster accessibility ...", false);
            match self.refresh_accessibility(&mut runtime).await {
                Ok(()) => {
                    // Provision kubectl in the background so it never
                    // blocks readiness; failures are logged only.
                    self.spawn_tool_provisioning();
                    self.broadcast("Connected, waiting for view to load ...", false);
                }
                Err(error) => {
                    self.broadcast(&format!("Failed to refresh accessibility: {error}"), true);
                }
            }
        }

        // The marker only gates idempotence of future non-forced calls;
        // it is set even when a step above aborted.
        runtime.activated = true;
        self.publish(&runtime);
    }

    /// Re-runs only the reachability probe + classification. Driven by
    /// the short-interval timer; errors are logged, never raised.
    pub async fn refresh(&self) {
        log::info!("cluster: refresh id={}", self.id);
        let mut runtime = self.runtime.lock().await;
        if let Err(error) = self.refresh_connection_status(&mut runtime).await {
            log::warn!("cluster: connection refresh failed id={}: {error}", self.id);
        }
    }

    /// Full accessibility refresh plus best-effort metadata detection.
    /// Driven by the long-interval timer while accessible.
    pub async fn refresh_accessibility_and_metadata(&self) {
        let mut runtime = self.runtime.lock().await;
        match self.refresh_accessibility(&mut runtime).await {
            Ok(()) => self.refresh_metadata(&runtime).await,
            Err(error) => {
                log::warn!(
                    "cluster: accessibility refresh failed id={}: {error}",
                    self.id
                );
            }
        }
    }

    /// Cancels all scheduled work, stops the session and resets derived
    /// state. Configuration fields are untouched.
    pub async fn disconnect(&self) {
        let mut runtime = self.runtime.lock().await;

        if runtime.disconnected {
            log::debug!("cluster: already disconnected id={}", self.id);
            return;
        }

        log::info!("cluster: disconnecting id={}", self.id);
        for task in runtime.tasks.drain(..) {
            task.abort();
        }
        self.deps.session.stop().await;

        runtime.disconnected = true;
        runtime.online = false;
        runtime.accessible = false;
        runtime.ready = false;
        runtime.activated = false;
        runtime.allowed_namespaces.clear();
        self.publish(&runtime);
        log::info!("cluster: disconnected id={}", self.id);
    }

    // ── internals ─────────────────────────────────────────────────────────

    /// Registers the background timers and the preference watcher.
    /// Called at most once per activation lifetime.
    fn bind_events(self: &Arc<Self>, runtime: &mut RuntimeState) {
        log::info!("cluster: bind events id={}", self.id);

        let connection_every = self.deps.intervals.connection;
        let weak = Arc::downgrade(self);
        runtime.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(connection_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cluster) = weak.upgrade() else { break };
                if !cluster.get_state().disconnected {
                    cluster.refresh().await;
                }
            }
        }));

        let accessibility_every = self.deps.intervals.accessibility;
        let weak = Arc::downgrade(self);
        runtime.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(accessibility_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cluster) = weak.upgrade() else { break };
                if cluster.available() {
                    cluster.refresh_accessibility_and_metadata().await;
                }
            }
        }));

        // Recreate the proxy kubeconfig when the default namespace
        // changes, and hand new metrics settings to the session.
        let mut prefs_rx = self.prefs_tx.subscribe();
        let proxy = self.deps.proxy_kubeconfig.clone();
        let session = self.deps.session.clone();
        let id = self.id.clone();
        // Baseline captured before the task is spawned: an update landing
        // ahead of the task's first poll must still register as a change.
        let mut last = prefs_rx.borrow_and_update().clone();
        runtime.tasks.push(tokio::spawn(async move {
            while prefs_rx.changed().await.is_ok() {
                let current = prefs_rx.borrow_and_update().clone();

                if current.default_namespace != last.default_namespace {
                    log::info!("cluster: recreating proxy kubeconfig id={id}");
                    proxy.set_default_namespace(current.default_namespace.as_deref());
                    let recreated = match proxy.clear().await {
                        Ok(()) => proxy.get_path().await.map(|_| ()),
                        Err(error) => Err(error),
                    };
                    if let Err(error) = recreated {
                        log::error!(
                            "cluster: failed to recreate proxy kubeconfig id={id}: {error}"
                        );
                    }
                }

                if current.metrics != last.metrics {
                    session.configure_metrics_source(current.metrics.as_ref()).await;
                }

                last = current;
            }
        }));
    }

    /// Re-establishes the local session and clears `disconnected`.
    async fn reconnect(&self, runtime: &mut RuntimeState) -> Result<(), Error> {
        log::info!("cluster: reconnect id={}", self.id);
        runtime.reconnecting = true;
        let result = self.deps.session.restart().await;
        runtime.reconnecting = false;
        result?;
        runtime.disconnected = false;
        self.publish(runtime);
        Ok(())
    }

    /// Builds a connection from the proxy kubeconfig; each cycle obtains
    /// a fresh one so credential changes are picked up. The live default
    /// namespace is pushed down first so a (re)generated file carries it.
    async fn connection(&self) -> Result<Arc<dyn ClusterConnection>, Error> {
        let namespace = self.config_read().preferences.default_namespace.clone();
        self.deps.proxy_kubeconfig.set_default_namespace(namespace.as_deref());
        let path = self.deps.proxy_kubeconfig.get_path().await?;
        let context = self.context_name();
        self.deps.connections.connect(&path, &context).await
    }

    /// Reachability probe + classification; sets `online`/`accessible`.
    async fn refresh_connection_status(&self, runtime: &mut RuntimeState) -> Result<(), Error> {
        let connection = self.connection().await?;
        let outcome = connection.detect_reachability().await;

        if let Ok(version) = &outcome {
            let mut config = self.config_write();
            config.metadata.insert(
                metadata_key::VERSION.to_string(),
                serde_json::Value::String(version.git_version.clone()),
            );
            config.metadata.insert(
                metadata_key::LAST_SEEN.to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }

        let (status, message) = classify(&outcome);
        if let Err(failure) = &outcome {
            log::error!(
                "cluster: failed to connect to {:?}: {}",
                self.context_name(),
                failure.message,
            );
        }
        if let Some(message) = message {
            self.broadcast(&message, true);
        }

        runtime.online = status > ClusterStatus::Offline;
        runtime.accessible = status == ClusterStatus::AccessGranted;
        self.publish(runtime);
        Ok(())
    }

    /// Namespace discovery, resource-kind discovery, authorization
    /// probing and the two scalar checks; sets `ready` on full success.
    async fn refresh_accessibility(&self, runtime: &mut RuntimeState) -> Result<(), Error> {
        log::info!("cluster: refresh accessibility id={}", self.id);
        let connection = self.connection().await?;

        runtime.is_admin = self
            .can_i_logged(
                &*connection,
                AccessReview {
                    verb: "create",
                    resource: "*",
                    namespace: Some("kube-system"),
                },
            )
            .await;
        runtime.is_global_watch_enabled = self
            .can_i_logged(
                &*connection,
                AccessReview {
                    verb: "watch",
                    resource: "*",
                    namespace: None,
                },
            )
            .await;

        runtime.allowed_namespaces = self.request_allowed_namespaces(&*connection).await;
        runtime.known_resources = connection.list_api_resources().await?;
        runtime.allowed_resources = authz::request_allowed_resources(
            &*connection,
            &runtime.allowed_namespaces,
            &runtime.known_resources,
            authz::PROBE_CONCURRENCY,
        )
        .await
        .into_iter()
        .collect();
        runtime.ready = true;
        self.publish(runtime);
        Ok(())
    }

    /// Scalar authorization check; failures surface as false, logged.
    async fn can_i_logged(&self, connection: &dyn ClusterConnection, review: AccessReview) -> bool {
        match connection.can_i(&review).await {
            Ok(allowed) => allowed,
            Err(error) => {
                log::warn!(
                    "cluster: can-i {} {} probe failed id={}: {error}",
                    review.verb,
                    review.resource,
                    self.id,
                );
                false
            }
        }
    }

    /// Declared accessible namespaces always win; discovery runs only
    /// when the declared list is empty. On a listing error, falls back to
    /// the active context's namespace; a forbidden error with an empty
    /// fallback additionally notifies external observers.
    async fn request_allowed_namespaces(&self, connection: &dyn ClusterConnection) -> Vec<String> {
        let declared = self.config_read().accessible_namespaces.clone();
        if !declared.is_empty() {
            return declared;
        }

        match connection.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(error) => {
                let fallback: Vec<String> = connection.context_namespace().into_iter().collect();

                if fallback.is_empty() && matches!(error, NamespaceListError::Forbidden) {
                    log::info!(
                        "cluster: listing namespaces is forbidden, notifying id={}",
                        self.id
                    );
                    self.deps.events.emit(ClusterEvent::ListNamespacesForbidden {
                        cluster_id: self.id.clone(),
                    });
                }

                fallback
            }
        }
    }

    /// Best-effort metadata detection merge; never touches derived state.
    async fn refresh_metadata(&self, runtime: &RuntimeState) {
        log::info!("cluster: refresh metadata id={}", self.id);
        let connection = match self.connection().await {
            Ok(connection) => connection,
            Err(error) => {
                log::warn!("cluster: metadata refresh skipped id={}: {error}", self.id);
                return;
            }
        };

        let detected = self
            .deps
            .detectors
            .detect(&*connection, &runtime.api_url)
            .await;
        let mut config = self.config_write();
        crate::detectors::merge_metadata(&mut config.metadata, detected);
    }

    fn spawn_tool_provisioning(&self) {
        let tools = self.deps.tools.clone();
        let id = self.id.clone();
        let version = self.version();
        tokio::spawn(async move {
            if let Err(error) = tools.ensure(&version).await {
                log::warn!("cluster: failed to provision kubectl for cluster {id}: {error}");
            }
        });
    }

    /// Fire-and-forget connect update for observers.
    fn broadcast(&self, message: &str, is_error: bool) {
        log::debug!(
            "cluster: broadcasting connect update id={} error={} message={message}",
            self.id,
            is_error,
        );
        self.deps.events.emit(ClusterEvent::ConnectUpdate {
            cluster_id: self.id.clone(),
            message: message.to_string(),
            is_error,
        });
    }

    fn publish(&self, runtime: &RuntimeState) {
        self.state_tx.send_replace(snapshot_of(runtime));
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        // Timer tasks hold only weak references; aborting here just
        // stops them promptly instead of at their next tick.
        if let Ok(runtime) = self.runtime.try_lock() {
            for task in &runtime.tasks {
                task.abort();
            }
        }
    }
}

fn snapshot_of(runtime: &RuntimeState) -> ClusterState {
    let mut allowed_resources: Vec<String> = runtime.allowed_resources.iter().cloned().collect();
    allowed_resources.sort();

    ClusterState {
        api_url: runtime.api_url.clone(),
        online: runtime.online,
        accessible: runtime.accessible,
        ready: runtime.ready,
        disconnected: runtime.disconnected,
        is_admin: runtime.is_admin,
        is_global_watch_enabled: runtime.is_global_watch_enabled,
        allowed_namespaces: runtime.allowed_namespaces.clone(),
        allowed_resources,
    }
}
