//! The hub facade.
//!
//! A [`Hub`] owns everything: the upstream records and their state
//! machines, the registries, the session store, the broker, and the
//! event bus. Downstream adapters talk to it through
//! `handle_json_rpc_request` (see `dispatcher`); operators talk to it
//! through `add_server`/`remove_server`/`start`/`stop`.
//!
//! Subcomponents never hold a back-pointer: upstream clients reach the
//! hub only through the notification sink handed to them at
//! construction, and both the sink and the re-discovery pump hold weak
//! references, so a dropped hub shuts everything down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hatago_core::client::{ClientConfig, NotificationSink, UpstreamClient};
use hatago_core::connector::{connect_with_retry, ConnectOptions, TransportFactory};
use hatago_core::error::{HubResult, LifecycleError, ProtocolError, RoutingError};
use hatago_core::messages::{
    CallToolParams, Implementation, JsonRpcNotification, ListChangedParams, ProgressParams,
    PromptHeader, ResourceHeader, ToolHeader,
};
use hatago_core::transport::create_transport;
use hatago_common::config::{HubConfig, NamingConfig, UpstreamSpec};

use crate::broker::Broker;
use crate::events::{EventBus, HandlerId};
use crate::internal::{self, INTERNAL_UPSTREAM_ID};
use crate::naming::NameRouter;
use crate::registry::{CapabilityRegistry, CapabilitySupport, EntryMetadata, Registry, RegistryEntry};
use crate::session::{spawn_sweeper, SessionManager};
use crate::state::{StateMachine, StateTransition, UpstreamState};

/// Hub construction options.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Public naming configuration
    pub naming: NamingConfig,

    /// Downstream session TTL
    pub session_ttl: Duration,

    /// Tag filter: when non-empty, only upstreams with an intersecting
    /// tag set are added by `start`
    pub tags: Vec<String>,

    /// How the hub identifies itself to upstreams
    pub client_info: Implementation,

    /// Connect retry budget per upstream
    pub max_connect_retries: u32,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            naming: NamingConfig::default(),
            session_ttl: hatago_common::config::default_session_ttl(),
            tags: Vec::new(),
            client_info: Implementation::new("hatago", env!("CARGO_PKG_VERSION")),
            max_connect_retries: 3,
        }
    }
}

impl HubOptions {
    /// Derive options from a configuration snapshot.
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            naming: config.naming.clone(),
            session_ttl: config.session_ttl,
            ..Default::default()
        }
    }

    /// Set the tag filter.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Runtime record for one upstream. Owned exclusively by the hub.
pub(crate) struct Upstream {
    pub(crate) id: String,
    pub(crate) spec: UpstreamSpec,
    pub(crate) machine: StateMachine,
    pub(crate) client: RwLock<Option<Arc<UpstreamClient>>>,
    pub(crate) last_error: Mutex<Option<String>>,
}

impl Upstream {
    fn new(id: &str, spec: UpstreamSpec, events: Arc<EventBus>) -> Self {
        Self {
            id: id.to_string(),
            spec,
            machine: StateMachine::new(id, events),
            client: RwLock::new(None),
            last_error: Mutex::new(None),
        }
    }
}

/// Hub-wide counters surfaced by `/metrics` and `hatago_status`.
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) requests: AtomicU64,
    pub(crate) tool_calls: AtomicU64,
    pub(crate) notifications: AtomicU64,
    pub(crate) errors: AtomicU64,
}

pub(crate) struct HubInner {
    pub(crate) options: HubOptions,
    pub(crate) router: NameRouter,
    pub(crate) upstreams: RwLock<HashMap<String, Arc<Upstream>>>,
    op_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pub(crate) tools: Registry,
    pub(crate) resources: Registry,
    pub(crate) resource_templates: Registry,
    pub(crate) prompts: Registry,
    pub(crate) capabilities: CapabilityRegistry,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) broker: Broker,
    pub(crate) events: Arc<EventBus>,
    rediscover: mpsc::UnboundedSender<String>,
    pub(crate) in_flight: Mutex<HashMap<String, CancellationToken>>,
    pub(crate) counters: Counters,
    pub(crate) started_at: Instant,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// The MCP hub. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Hub {
    pub(crate) inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub and start its re-discovery pump.
    pub fn new(options: HubOptions) -> Self {
        let events = Arc::new(EventBus::new());
        let (rediscover_tx, rediscover_rx) = mpsc::unbounded_channel();
        let sessions = Arc::new(SessionManager::new(options.session_ttl, Arc::clone(&events)));
        let router = NameRouter::new(options.naming.clone());

        let inner = Arc::new(HubInner {
            options,
            router,
            upstreams: RwLock::new(HashMap::new()),
            op_locks: Mutex::new(HashMap::new()),
            tools: Registry::new("tool"),
            resources: Registry::new("resource"),
            resource_templates: Registry::new("resource-template"),
            prompts: Registry::new("prompt"),
            capabilities: CapabilityRegistry::new(),
            sessions,
            broker: Broker::new(),
            events,
            rediscover: rediscover_tx,
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            started_at: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        });

        let hub = Self { inner };
        hub.spawn_rediscovery_pump(rediscover_rx);

        // A session that ends, however it ends, takes its notification
        // channel and progress routes with it.
        for event in ["session:expired", "session:destroyed"] {
            let weak = Arc::downgrade(&hub.inner);
            hub.inner.events.on(event, move |payload| {
                let Some(inner) = weak.upgrade() else { return };
                if let Some(id) = payload.get("id").and_then(Value::as_str) {
                    inner.broker.detach_session(id);
                }
            });
        }
        hub
    }

    /// The sink handed to every upstream client.
    ///
    /// Progress and broadcast notifications are routed synchronously on
    /// the client's reader task, which preserves wire order relative to
    /// responses; list_changed re-discovery needs upstream round-trips
    /// and is queued for the pump instead. The sink holds only a weak
    /// reference, so clients never keep a dropped hub alive.
    fn notification_sink(&self) -> Arc<dyn NotificationSink> {
        Arc::new(HubSink {
            inner: Arc::downgrade(&self.inner),
            rediscover: self.inner.rediscover.clone(),
        })
    }

    fn spawn_rediscovery_pump(&self, mut rx: mpsc::UnboundedReceiver<String>) {
        let weak: Weak<HubInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(upstream_id) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let hub = Hub { inner };
                hub.refresh_upstream(&upstream_id).await;
            }
        });
        self.inner.tasks.lock().unwrap().push(handle);
    }

    /// Re-run discovery for one upstream, replace its registry entries,
    /// and announce the new toolset downstream.
    async fn refresh_upstream(&self, upstream_id: &str) {
        let Some(client) = self.client_for(upstream_id) else {
            return;
        };
        let discovery = match client.discover().await {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!(upstream = %upstream_id, "re-discovery failed: {e}");
                return;
            }
        };

        self.remove_registrations(upstream_id);
        if let Err(e) = self.register_discovered(upstream_id, discovery) {
            warn!(upstream = %upstream_id, "re-registration failed: {e}");
        }
        self.notify_tools_changed();
    }

    // --- lifecycle ----------------------------------------------------

    /// Add and activate one upstream. See `add_server_with` for the
    /// notification-suppressing variant `start` uses.
    pub async fn add_server(&self, id: &str, spec: UpstreamSpec) -> HubResult<()> {
        self.add_server_with(id, spec, false).await
    }

    /// Add and activate one upstream, optionally suppressing the
    /// downstream tools/list_changed notification.
    pub async fn add_server_with(
        &self,
        id: &str,
        spec: UpstreamSpec,
        suppress_tool_list_notification: bool,
    ) -> HubResult<()> {
        spec.validate(id)?;
        if id == INTERNAL_UPSTREAM_ID {
            return Err(LifecycleError::DuplicateServer { id: id.to_string() }.into());
        }

        let op_lock = self.op_lock(id);
        let _guard = op_lock.lock().await;

        let upstream = {
            let mut upstreams = self.inner.upstreams.write().unwrap();
            if upstreams.contains_key(id) {
                return Err(LifecycleError::DuplicateServer { id: id.to_string() }.into());
            }
            let upstream = Arc::new(Upstream::new(id, spec, Arc::clone(&self.inner.events)));
            upstreams.insert(id.to_string(), Arc::clone(&upstream));
            upstream
        };

        upstream.machine.transition(UpstreamState::Activating, None)?;

        match self.activate(&upstream).await {
            Ok(()) => {
                info!(upstream = %id, "server connected");
                self.inner
                    .events
                    .emit("server:connected", &json!({ "serverId": id }));
                if !suppress_tool_list_notification {
                    self.notify_tools_changed();
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let _ = upstream
                    .machine
                    .transition(UpstreamState::Error, Some(message.clone()));
                *upstream.last_error.lock().unwrap() = Some(message.clone());
                self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.inner.events.emit(
                    "server:error",
                    &json!({ "serverId": id, "message": message }),
                );
                Err(e)
            }
        }
    }

    async fn activate(&self, upstream: &Arc<Upstream>) -> HubResult<()> {
        let transport_config = upstream.spec.transport_config()?;
        let factory: TransportFactory = Box::new(move || create_transport(&transport_config));

        let client_config = ClientConfig {
            request_timeout: upstream
                .spec
                .timeouts
                .and_then(|t| t.request())
                .unwrap_or(hatago_core::client::DEFAULT_REQUEST_TIMEOUT),
            client_info: self.inner.options.client_info.clone(),
            ..Default::default()
        };
        let connect_options = ConnectOptions {
            max_retries: self.inner.options.max_connect_retries,
            connect_timeout: upstream.spec.timeouts.and_then(|t| t.connect()),
        };

        let sink = self.notification_sink();
        let client = connect_with_retry(
            &upstream.id,
            &factory,
            &client_config,
            &sink,
            &connect_options,
        )
        .await?;

        upstream.machine.transition(UpstreamState::Active, None)?;
        let client = Arc::new(client);
        *upstream.client.write().unwrap() = Some(Arc::clone(&client));

        self.record_capabilities(&upstream.id, &client);

        let discovery = match client.discover().await {
            Ok(discovery) => discovery,
            Err(e) => {
                self.teardown_client(upstream).await;
                return Err(e);
            }
        };
        if let Err(e) = self.register_discovered(&upstream.id, discovery) {
            self.remove_registrations(&upstream.id);
            self.teardown_client(upstream).await;
            return Err(e);
        }

        self.inner.events.emit(
            "tools:registered",
            &json!({
                "serverId": upstream.id,
                "count": self.inner.tools.list(Some(&upstream.id)).len(),
            }),
        );
        Ok(())
    }

    async fn teardown_client(&self, upstream: &Arc<Upstream>) {
        let client = upstream.client.write().unwrap().take();
        if let Some(client) = client {
            let _ = client.close().await;
        }
    }

    fn record_capabilities(&self, id: &str, client: &UpstreamClient) {
        const METHODS: &[&str] = &[
            "tools/list",
            "tools/call",
            "resources/list",
            "resources/templates/list",
            "resources/read",
            "prompts/list",
            "prompts/get",
        ];
        for method in METHODS {
            let support = if client.supports(method) {
                CapabilitySupport::Supported
            } else {
                CapabilitySupport::Unsupported
            };
            self.inner.capabilities.set_method(id, method, support);
        }
    }

    fn register_discovered(
        &self,
        id: &str,
        discovery: hatago_core::client::Discovery,
    ) -> HubResult<()> {
        let router = &self.inner.router;

        let mut tool_entries = Vec::with_capacity(discovery.tools.len());
        for descriptor in discovery.tools {
            let header = match ToolHeader::from_descriptor(&descriptor) {
                Ok(header) => header,
                Err(e) => {
                    warn!(upstream = %id, "skipping malformed tool descriptor: {e}");
                    continue;
                }
            };
            let public_name = router.public_name(id, &header.name);
            let mut descriptor = descriptor;
            if let Some(obj) = descriptor.as_object_mut() {
                obj.insert("name".to_string(), Value::String(public_name.clone()));
            }
            tool_entries.push(RegistryEntry {
                original_name: header.name,
                public_name,
                descriptor,
            });
        }
        self.inner.tools.register_all(id, tool_entries)?;

        let mut resource_entries = Vec::with_capacity(discovery.resources.len());
        for descriptor in discovery.resources {
            let header = match ResourceHeader::from_descriptor(&descriptor) {
                Ok(header) => header,
                Err(e) => {
                    warn!(upstream = %id, "skipping malformed resource descriptor: {e}");
                    continue;
                }
            };
            let public_uri = router.public_uri(id, &header.uri);
            let mut descriptor = descriptor;
            if let Some(obj) = descriptor.as_object_mut() {
                obj.insert("uri".to_string(), Value::String(public_uri.clone()));
            }
            resource_entries.push(RegistryEntry {
                original_name: header.uri,
                public_name: public_uri,
                descriptor,
            });
        }
        self.inner.resources.register_all(id, resource_entries)?;

        let mut template_entries = Vec::with_capacity(discovery.resource_templates.len());
        for descriptor in discovery.resource_templates {
            let Some(original) = descriptor
                .get("uriTemplate")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                warn!(upstream = %id, "skipping resource template without uriTemplate");
                continue;
            };
            let public = router.public_uri(id, &original);
            let mut descriptor = descriptor;
            if let Some(obj) = descriptor.as_object_mut() {
                obj.insert("uriTemplate".to_string(), Value::String(public.clone()));
            }
            template_entries.push(RegistryEntry {
                original_name: original,
                public_name: public,
                descriptor,
            });
        }
        self.inner.resource_templates.register_all(id, template_entries)?;

        let mut prompt_entries = Vec::with_capacity(discovery.prompts.len());
        for descriptor in discovery.prompts {
            let header = match PromptHeader::from_descriptor(&descriptor) {
                Ok(header) => header,
                Err(e) => {
                    warn!(upstream = %id, "skipping malformed prompt descriptor: {e}");
                    continue;
                }
            };
            let public_name = router.public_name(id, &header.name);
            let mut descriptor = descriptor;
            if let Some(obj) = descriptor.as_object_mut() {
                obj.insert("name".to_string(), Value::String(public_name.clone()));
            }
            prompt_entries.push(RegistryEntry {
                original_name: header.name,
                public_name,
                descriptor,
            });
        }
        self.inner.prompts.register_all(id, prompt_entries)?;

        Ok(())
    }

    pub(crate) fn remove_registrations(&self, id: &str) -> usize {
        let tools = self.inner.tools.remove_all(id);
        self.inner.resources.remove_all(id);
        self.inner.resource_templates.remove_all(id);
        self.inner.prompts.remove_all(id);
        tools
    }

    /// Disconnect and forget one upstream: close its transport, remove
    /// its registrations and progress routes atomically, and emit
    /// `server:disconnected`.
    pub async fn remove_server(&self, id: &str) -> HubResult<()> {
        let op_lock = self.op_lock(id);
        let _guard = op_lock.lock().await;

        let upstream = self
            .inner
            .upstreams
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownServer { id: id.to_string() })?;

        match upstream.machine.state() {
            UpstreamState::Active => {
                upstream.machine.transition(UpstreamState::Stopping, None)?;
                self.teardown_client(&upstream).await;
                upstream.machine.transition(UpstreamState::Inactive, None)?;
            }
            UpstreamState::Error => {
                upstream.machine.transition(UpstreamState::Inactive, None)?;
            }
            UpstreamState::Inactive => {}
            other => {
                // An add or remove is still in flight; the op lock makes
                // this unreachable short of a caller bug.
                return Err(LifecycleError::InvalidTransition {
                    from: other.as_str().to_string(),
                    to: UpstreamState::Stopping.as_str().to_string(),
                }
                .into());
            }
        }

        let removed_tools = self.remove_registrations(id);
        self.inner.capabilities.remove_upstream(id);
        self.inner.broker.remove_routes_for_upstream(id);
        self.inner.upstreams.write().unwrap().remove(id);

        info!(upstream = %id, "server disconnected");
        self.inner
            .events
            .emit("server:disconnected", &json!({ "serverId": id }));
        if removed_tools > 0 {
            self.inner.events.emit(
                "tools:removed",
                &json!({ "serverId": id, "count": removed_tools }),
            );
            self.notify_tools_changed();
        }
        Ok(())
    }

    /// Bring the hub up from a validated configuration snapshot:
    /// register the internal toolset, start the session sweeper, and add
    /// every upstream admitted by the tag filter. Individual upstream
    /// failures are logged and leave the upstream in ERROR; they do not
    /// abort startup.
    pub async fn start(&self, config: &HubConfig) -> HubResult<()> {
        internal::register_internal(self)?;
        self.inner
            .tasks
            .lock()
            .unwrap()
            .push(spawn_sweeper(Arc::clone(&self.inner.sessions)));

        let mut ids: Vec<&String> = config.mcp_servers.keys().collect();
        ids.sort();
        for id in ids {
            let spec = &config.mcp_servers[id];
            if !spec.matches_tags(&self.inner.options.tags) {
                debug!(upstream = %id, "excluded by tag filter");
                continue;
            }
            if let Err(e) = self.add_server_with(id, spec.clone(), true).await {
                warn!(upstream = %id, "failed to add server: {e}");
            }
        }

        self.notify_tools_changed();
        Ok(())
    }

    /// Close all upstreams in parallel, then destroy sessions and stop
    /// background tasks.
    pub async fn stop(&self) {
        let ids: Vec<String> = self.inner.upstreams.read().unwrap().keys().cloned().collect();
        let removals = ids.iter().map(|id| self.remove_server(id));
        for result in futures::future::join_all(removals).await {
            if let Err(e) = result {
                warn!("error during shutdown: {e}");
            }
        }

        self.inner.sessions.destroy_all();
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    fn op_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .op_locks
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // --- routing and calls -------------------------------------------

    pub(crate) fn client_for(&self, id: &str) -> Option<Arc<UpstreamClient>> {
        let upstreams = self.inner.upstreams.read().unwrap();
        let upstream = upstreams.get(id)?;
        let client = upstream.client.read().unwrap().clone();
        client
    }

    pub(crate) fn has_upstream(&self, id: &str) -> bool {
        id == INTERNAL_UPSTREAM_ID || self.inner.upstreams.read().unwrap().contains_key(id)
    }

    /// Resolve a public tool name: registry lookup first, qualified-name
    /// parse as fallback.
    pub(crate) fn resolve_tool(&self, public_name: &str) -> HubResult<Arc<EntryMetadata>> {
        if let Some(meta) = self.inner.tools.resolve(public_name) {
            return Ok(meta);
        }
        let parsed = self.inner.router.parse(public_name);
        if let Some(upstream_id) = parsed.upstream_id {
            if !self.has_upstream(upstream_id) {
                return Err(RoutingError::UnknownUpstream {
                    id: upstream_id.to_string(),
                }
                .into());
            }
            if let Some(meta) = self.inner.tools.resolve_original(upstream_id, parsed.name) {
                return Ok(meta);
            }
        }
        Err(RoutingError::UnknownTool {
            name: public_name.to_string(),
        }
        .into())
    }

    pub(crate) fn resolve_prompt(&self, public_name: &str) -> HubResult<Arc<EntryMetadata>> {
        if let Some(meta) = self.inner.prompts.resolve(public_name) {
            return Ok(meta);
        }
        let parsed = self.inner.router.parse(public_name);
        if let Some(upstream_id) = parsed.upstream_id {
            if !self.has_upstream(upstream_id) {
                return Err(RoutingError::UnknownUpstream {
                    id: upstream_id.to_string(),
                }
                .into());
            }
            if let Some(meta) = self.inner.prompts.resolve_original(upstream_id, parsed.name) {
                return Ok(meta);
            }
        }
        Err(RoutingError::UnknownPrompt {
            name: public_name.to_string(),
        }
        .into())
    }

    pub(crate) fn resolve_resource(&self, public_uri: &str) -> HubResult<Arc<EntryMetadata>> {
        if let Some(meta) = self.inner.resources.resolve(public_uri) {
            return Ok(meta);
        }
        let parsed = self.inner.router.parse_uri(public_uri);
        if let Some(upstream_id) = parsed.upstream_id {
            if !self.has_upstream(upstream_id) {
                return Err(RoutingError::UnknownUpstream {
                    id: upstream_id.to_string(),
                }
                .into());
            }
            if let Some(meta) = self.inner.resources.resolve_original(upstream_id, parsed.name) {
                return Ok(meta);
            }
        }
        Err(RoutingError::UnknownResource {
            uri: public_uri.to_string(),
        }
        .into())
    }

    /// Route one `tools/call` to its upstream, with progress plumbing
    /// and a cancellation handle keyed by `cancel_key`.
    ///
    /// Returns the MCP call result payload; tool-level failures
    /// (`isError: true`) pass through unchanged inside it.
    pub async fn call_tool(
        &self,
        session_id: Option<&str>,
        params: &CallToolParams,
        cancel_key: Option<String>,
    ) -> HubResult<Value> {
        self.inner.counters.tool_calls.fetch_add(1, Ordering::Relaxed);
        let meta = self.resolve_tool(&params.name)?;

        if meta.upstream_id == INTERNAL_UPSTREAM_ID {
            let result = internal::call_internal_tool(
                self,
                &meta.original_name,
                params.arguments.clone(),
            )
            .await?;
            self.inner.events.emit(
                "tool:called",
                &json!({ "serverId": INTERNAL_UPSTREAM_ID, "publicName": meta.public_name }),
            );
            return Ok(result);
        }

        let client = self.client_for(&meta.upstream_id).ok_or_else(|| {
            RoutingError::UnknownUpstream {
                id: meta.upstream_id.clone(),
            }
        })?;

        let token = params.progress_token().cloned();
        if let (Some(token), Some(session_id)) = (&token, session_id) {
            self.inner
                .broker
                .register_route(token, session_id, &meta.upstream_id);
        }

        let cancel = CancellationToken::new();
        if let Some(key) = &cancel_key {
            self.inner
                .in_flight
                .lock()
                .unwrap()
                .insert(key.clone(), cancel.clone());
        }

        let timeout = self
            .inner
            .upstreams
            .read()
            .unwrap()
            .get(&meta.upstream_id)
            .and_then(|u| u.spec.timeouts)
            .and_then(|t| t.request());

        let result = client
            .call_tool(
                &meta.original_name,
                params.arguments.clone(),
                token.clone(),
                timeout,
                Some(&cancel),
            )
            .await;

        // The route lives exactly as long as the call.
        if let Some(key) = &cancel_key {
            self.inner.in_flight.lock().unwrap().remove(key);
        }
        if let Some(token) = &token {
            self.inner.broker.remove_route(token);
        }

        match result {
            Ok(response) => {
                if let Some(error) = response.error {
                    self.emit_tool_error(&meta, &error.message);
                    return Err(ProtocolError::UpstreamError {
                        code: error.code,
                        message: error.message,
                    }
                    .into());
                }
                self.inner.events.emit(
                    "tool:called",
                    &json!({ "serverId": meta.upstream_id, "publicName": meta.public_name }),
                );
                Ok(response.result.unwrap_or_else(|| json!({})))
            }
            Err(e) => {
                self.emit_tool_error(&meta, &e.to_string());
                if matches!(e, hatago_core::error::HubError::Transport(_)) {
                    self.note_transport_failure(&meta.upstream_id, &e.to_string());
                }
                Err(e)
            }
        }
    }

    /// A transport died under an in-flight request: the upstream goes to
    /// ERROR and stays there until it is removed or re-added. The core
    /// never reconnects on its own.
    fn note_transport_failure(&self, upstream_id: &str, message: &str) {
        let Some(upstream) = self
            .inner
            .upstreams
            .read()
            .unwrap()
            .get(upstream_id)
            .cloned()
        else {
            return;
        };
        if upstream.machine.state() != UpstreamState::Active {
            return;
        }
        if upstream
            .machine
            .transition(UpstreamState::Error, Some(message.to_string()))
            .is_ok()
        {
            *upstream.last_error.lock().unwrap() = Some(message.to_string());
            self.inner.events.emit(
                "server:error",
                &json!({ "serverId": upstream_id, "message": message }),
            );
        }
    }

    fn emit_tool_error(&self, meta: &EntryMetadata, message: &str) {
        self.inner.events.emit(
            "tool:error",
            &json!({
                "serverId": meta.upstream_id,
                "publicName": meta.public_name,
                "message": message,
            }),
        );
    }

    /// Read a resource by public URI. `hatago://` URIs are answered
    /// locally; everything else is forwarded to the owning upstream.
    pub async fn read_resource(&self, public_uri: &str) -> HubResult<Value> {
        if public_uri.starts_with("hatago://") {
            return internal::read_internal_resource(self, public_uri);
        }

        let meta = self.resolve_resource(public_uri)?;
        let client = self.client_for(&meta.upstream_id).ok_or_else(|| {
            RoutingError::UnknownUpstream {
                id: meta.upstream_id.clone(),
            }
        })?;
        client.ensure_supported("resources/read")?;
        let response = client
            .request(
                "resources/read",
                Some(json!({ "uri": meta.original_name })),
                None,
            )
            .await
            .map_err(|e| {
                if matches!(e, hatago_core::error::HubError::Transport(_)) {
                    self.note_transport_failure(&meta.upstream_id, &e.to_string());
                }
                e
            })?;
        response.result_as()
    }

    /// Fetch a prompt by public name from its owning upstream.
    pub async fn get_prompt(&self, public_name: &str, arguments: Option<Value>) -> HubResult<Value> {
        let meta = self.resolve_prompt(public_name)?;
        let client = self.client_for(&meta.upstream_id).ok_or_else(|| {
            RoutingError::UnknownUpstream {
                id: meta.upstream_id.clone(),
            }
        })?;
        client.ensure_supported("prompts/get")?;
        let mut params = json!({ "name": meta.original_name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        let response = client
            .request("prompts/get", Some(params), None)
            .await
            .map_err(|e| {
                if matches!(e, hatago_core::error::HubError::Transport(_)) {
                    self.note_transport_failure(&meta.upstream_id, &e.to_string());
                }
                e
            })?;
        response.result_as()
    }

    /// Cancel the in-flight call registered under `key`, if any.
    pub(crate) fn cancel_in_flight(&self, key: &str) -> bool {
        match self.inner.in_flight.lock().unwrap().remove(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    // --- notifications ------------------------------------------------

    /// Announce the current toolset version downstream and on the event
    /// bus.
    pub(crate) fn notify_tools_changed(&self) {
        let (revision, hash) = self.inner.tools.version();
        let params = ListChangedParams { revision, hash };
        let payload = serde_json::to_value(&params).unwrap_or(Value::Null);
        let notification =
            JsonRpcNotification::new("notifications/tools/list_changed", payload.clone());
        self.inner.broker.broadcast(&notification);
        self.inner.events.emit("tools:list_changed", &payload);
    }

    // --- introspection ------------------------------------------------

    /// Subscribe to a hub event.
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(event, handler)
    }

    /// Unsubscribe a handler.
    pub fn off(&self, handle: &HandlerId) {
        self.inner.events.off(handle);
    }

    /// The session store.
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// The notification broker.
    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    /// Current `(revision, hash)` of the tool registry.
    pub fn toolset_version(&self) -> (u64, String) {
        self.inner.tools.version()
    }

    /// Registered upstream ids, sorted.
    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.upstreams.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Lifecycle state of one upstream.
    pub fn server_state(&self, id: &str) -> Option<UpstreamState> {
        self.inner
            .upstreams
            .read()
            .unwrap()
            .get(id)
            .map(|u| u.machine.state())
    }

    /// Transition history of one upstream, oldest first.
    pub fn server_history(&self, id: &str) -> Option<Vec<StateTransition>> {
        self.inner
            .upstreams
            .read()
            .unwrap()
            .get(id)
            .map(|u| u.machine.history())
    }

    /// Last recorded error for one upstream.
    pub fn server_last_error(&self, id: &str) -> Option<String> {
        self.inner
            .upstreams
            .read()
            .unwrap()
            .get(id)
            .and_then(|u| u.last_error.lock().unwrap().clone())
    }

    /// Per-upstream summaries for status tools and the servers resource.
    pub fn server_summaries(&self) -> Vec<Value> {
        let upstreams = self.inner.upstreams.read().unwrap();
        let mut ids: Vec<&String> = upstreams.keys().collect();
        ids.sort();
        ids.iter()
            .map(|id| {
                let upstream = &upstreams[*id];
                json!({
                    "id": id,
                    "status": upstream.machine.state().as_str(),
                    "tools": self.inner.tools.list(Some(id)).len(),
                    "resources": self.inner.resources.list(Some(id)).len(),
                    "prompts": self.inner.prompts.list(Some(id)).len(),
                })
            })
            .collect()
    }

    /// Seconds since the hub was constructed.
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Counter snapshot for `/metrics`.
    pub fn metrics_snapshot(&self) -> Value {
        let (revision, hash) = self.inner.tools.version();
        json!({
            "uptimeSec": self.uptime().as_secs(),
            "sessions": self.inner.sessions.len(),
            "servers": self.inner.upstreams.read().unwrap().len(),
            "requests": self.inner.counters.requests.load(Ordering::Relaxed),
            "toolCalls": self.inner.counters.tool_calls.load(Ordering::Relaxed),
            "notifications": self.inner.counters.notifications.load(Ordering::Relaxed),
            "errors": self.inner.counters.errors.load(Ordering::Relaxed),
            "toolset": {
                "revision": revision,
                "hash": hash,
                "count": self.inner.tools.len(),
            },
        })
    }

    /// The spec an upstream was added with.
    pub fn server_spec(&self, id: &str) -> Option<UpstreamSpec> {
        self.inner
            .upstreams
            .read()
            .unwrap()
            .get(id)
            .map(|u| u.spec.clone())
    }

    /// The hub's tag filter.
    pub fn tags(&self) -> &[String] {
        &self.inner.options.tags
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("servers", &self.server_ids())
            .field("tools", &self.inner.tools.len())
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

/// Routes upstream notifications into the hub without a back-pointer.
struct HubSink {
    inner: Weak<HubInner>,
    rediscover: mpsc::UnboundedSender<String>,
}

impl NotificationSink for HubSink {
    fn on_notification(&self, upstream_id: &str, notification: JsonRpcNotification) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.counters.notifications.fetch_add(1, Ordering::Relaxed);

        match notification.method.as_str() {
            "notifications/progress" => match notification.params_as::<ProgressParams>() {
                Ok(params) => {
                    inner.broker.deliver_progress(&params);
                }
                Err(e) => warn!(upstream = %upstream_id, "malformed progress notification: {e}"),
            },
            "notifications/tools/list_changed"
            | "notifications/resources/list_changed"
            | "notifications/prompts/list_changed" => {
                debug!(upstream = %upstream_id, method = %notification.method, "queueing re-discovery");
                let _ = self.rediscover.send(upstream_id.to_string());
            }
            "notifications/resources/updated" | "notifications/message" => {
                inner.broker.broadcast(&notification);
            }
            other => {
                debug!(upstream = %upstream_id, method = %other, "dropping unrecognized upstream notification");
            }
        }
    }
}
