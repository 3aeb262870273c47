//! The request pipeline: the gateway's front controller.
//!
//! Every call moves through the same deterministic phases: parse →
//! authenticate → trace-stamp → classify → validate arguments → build
//! envelope → resolve and route → execute → shape response. Transports
//! differ only in how they deliver `(name, arguments)` in and the shaped
//! envelope out.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};

use fabric_kernel::auth::{AuthContext, AuthVerifier};
use fabric_kernel::bus::FabricMessageBus;
use fabric_kernel::envelope::{
    enforce_terminal_final, single_final, BoxEventStream, CallInput, CallTarget, CanonicalEnvelope,
    ResponseFormat, ResponseSpec, StreamEvent, TargetKind,
};
use fabric_kernel::error::{ErrorCode, FabricError, FabricResult};
use fabric_kernel::manifest::{AgentManifest, TrustTier};
use fabric_kernel::message::{BusMessage, MessagePriority};
use fabric_kernel::trace::TraceContext;
use fabric_kernel::wire::WireResponse;
use fabric_plugins::{ToolHost, ToolProvider};
use fabric_runtime::adapter::AdapterProvider;
use fabric_runtime::registry::{AgentFilter, RegistryStore};

use crate::metrics::GatewayMetrics;

/// Credential material handed in by a transport front.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// HTTP bearer token (possibly absent).
    Bearer(Option<&'a str>),
    /// The local stdio front; the caller shares the process.
    Local,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub version: String,
    /// Retry `AGENT_OFFLINE`/`TIMEOUT` against capability fallbacks.
    pub fallback_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: format!("fabric-gw-{}", env!("CARGO_PKG_VERSION")),
            fallback_enabled: true,
        }
    }
}

pub struct FabricPipeline {
    registry: Arc<dyn RegistryStore>,
    adapters: Arc<dyn AdapterProvider>,
    tools: Arc<ToolHost>,
    bus: FabricMessageBus,
    auth: AuthVerifier,
    metrics: Arc<GatewayMetrics>,
    config: PipelineConfig,
    started_at: Instant,
}

// ─────────────────────────────────────────────────────────────────────────────
// Call classification
// ─────────────────────────────────────────────────────────────────────────────

enum CallKind {
    Health,
    AgentList,
    AgentDescribe,
    AgentRegister,
    AgentDeregister,
    RoutePreview,
    AgentCall,
    ToolList,
    ToolDescribe,
    ToolCall,
    ToolDirect { tool_id: String },
    MessageSend,
    MessageReceive,
    MessageAcknowledge,
    MessagePublish,
    MessageQueueStatus,
    MessageTopics,
}

impl CallKind {
    fn parse(name: &str) -> Option<CallKind> {
        match name {
            "fabric.health" => Some(CallKind::Health),
            "fabric.agent.list" => Some(CallKind::AgentList),
            "fabric.agent.describe" => Some(CallKind::AgentDescribe),
            "fabric.agent.register" => Some(CallKind::AgentRegister),
            "fabric.agent.deregister" => Some(CallKind::AgentDeregister),
            "fabric.route.preview" => Some(CallKind::RoutePreview),
            "fabric.call" => Some(CallKind::AgentCall),
            "fabric.tool.list" => Some(CallKind::ToolList),
            "fabric.tool.describe" => Some(CallKind::ToolDescribe),
            "fabric.tool.call" => Some(CallKind::ToolCall),
            "fabric.message.send" => Some(CallKind::MessageSend),
            "fabric.message.receive" => Some(CallKind::MessageReceive),
            "fabric.message.acknowledge" => Some(CallKind::MessageAcknowledge),
            "fabric.message.publish" => Some(CallKind::MessagePublish),
            "fabric.message.queue_status" => Some(CallKind::MessageQueueStatus),
            "fabric.message.topics" => Some(CallKind::MessageTopics),
            other => {
                // Direct tool dispatch: fabric.tool.{category}.{name}.
                let rest = other.strip_prefix("fabric.tool.")?;
                let (category, action) = rest.split_once('.')?;
                if category.is_empty() || action.is_empty() {
                    return None;
                }
                Some(CallKind::ToolDirect {
                    tool_id: format!("{category}.{action}"),
                })
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-operation argument shapes
// ─────────────────────────────────────────────────────────────────────────────

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &serde_json::Value) -> FabricResult<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| FabricError::bad_input(format!("invalid arguments: {e}")))
}

#[derive(Deserialize)]
struct AgentListArgs {
    #[serde(default)]
    filter: AgentFilter,
}

#[derive(Deserialize)]
struct AgentIdArgs {
    agent_id: String,
}

#[derive(Deserialize)]
struct RoutePreviewArgs {
    agent_id: String,
    capability: String,
}

#[derive(Deserialize)]
struct AgentCallArgs {
    agent_id: String,
    capability: String,
    task: String,
    #[serde(default)]
    context: serde_json::Value,
    #[serde(default)]
    attachments: Vec<serde_json::Value>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
struct ToolListArgs {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    provider: Option<String>,
}

#[derive(Deserialize)]
struct ToolDescribeArgs {
    tool_id: String,
}

#[derive(Deserialize)]
struct ToolCallArgs {
    tool_id: String,
    #[serde(default)]
    capability: String,
    #[serde(default)]
    parameters: serde_json::Value,
    #[serde(default)]
    stream: bool,
}

#[derive(Deserialize)]
struct MessageSendArgs {
    to_agent: String,
    from_agent: String,
    message_type: String,
    payload: serde_json::Value,
    #[serde(default)]
    priority: Option<MessagePriority>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
}

fn default_receive_count() -> usize {
    10
}

fn default_block_ms() -> u64 {
    5_000
}

#[derive(Deserialize)]
struct MessageReceiveArgs {
    agent_id: String,
    #[serde(default = "default_receive_count")]
    count: usize,
    #[serde(default = "default_block_ms")]
    block_ms: u64,
    #[serde(default)]
    consumer_group: Option<String>,
    #[serde(default)]
    auto_ack: bool,
}

#[derive(Deserialize)]
struct MessageAcknowledgeArgs {
    agent_id: String,
    message_ids: Vec<String>,
    #[serde(default)]
    consumer_group: Option<String>,
}

#[derive(Deserialize)]
struct MessagePublishArgs {
    topic: String,
    message: serde_json::Value,
    #[serde(default)]
    from_agent: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

impl FabricPipeline {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        adapters: Arc<dyn AdapterProvider>,
        tools: Arc<ToolHost>,
        bus: FabricMessageBus,
        auth: AuthVerifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            adapters,
            tools,
            bus,
            auth,
            metrics: Arc::new(GatewayMetrics::new()),
            config,
            started_at: Instant::now(),
        }
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn auth(&self) -> &AuthVerifier {
        &self.auth
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        self.metrics.clone()
    }

    fn authenticate(&self, credential: Credential<'_>) -> FabricResult<AuthContext> {
        match credential {
            Credential::Bearer(token) => self.auth.verify_bearer(token),
            Credential::Local => Ok(AuthContext::local()),
        }
    }

    fn caller_trust_tier(auth: &AuthContext) -> TrustTier {
        match auth.principal_id.as_deref() {
            Some("local") => TrustTier::Local,
            _ => TrustTier::Org,
        }
    }

    /// Handle one synchronous call. Never fails: every outcome is a shaped
    /// wire envelope carrying the trace.
    pub async fn handle(
        &self,
        name: &str,
        arguments: serde_json::Value,
        credential: Credential<'_>,
    ) -> WireResponse {
        let trace = TraceContext::from_arguments(&arguments);
        self.metrics.record_request(name);

        let auth = match self.authenticate(credential) {
            Ok(auth) => auth,
            Err(err) => {
                self.metrics.record_error(err.code.as_str());
                warn!(trace_id = %trace.trace_id, name = %name, code = %err.code, "authentication failed");
                return WireResponse::failure(trace, &err);
            }
        };

        let span = tracing::info_span!("fabric_call", trace_id = %trace.trace_id, name = %name);
        let started_at = chrono::Utc::now();
        let outcome = self
            .dispatch(name, &arguments, &trace, &auth)
            .instrument(span)
            .await;

        match outcome {
            Ok(result) => {
                let response = WireResponse::success(trace, result);
                self.audit(name, &arguments, &response, started_at).await;
                response
            }
            Err(err) => {
                self.metrics.record_error(err.code.as_str());
                if err.code == ErrorCode::InternalError {
                    error!(trace_id = %trace.trace_id, name = %name, error = %err, "internal error");
                } else {
                    info!(trace_id = %trace.trace_id, name = %name, code = %err.code, "call failed");
                }
                let response = WireResponse::failure(trace, &err);
                self.audit(name, &arguments, &response, started_at).await;
                response
            }
        }
    }

    /// Handle a call with streaming requested.
    ///
    /// Streaming applies only to `fabric.call` against a capability that
    /// declares `streaming: true`; anything else degrades to a synchronous
    /// execution wrapped in a single synthetic `final` event. Failures
    /// before any event is produced surface as a shaped envelope.
    pub async fn handle_stream(
        &self,
        name: &str,
        arguments: serde_json::Value,
        credential: Credential<'_>,
    ) -> Result<BoxEventStream, Box<WireResponse>> {
        let trace = TraceContext::from_arguments(&arguments);
        self.metrics.record_request(name);

        let auth = match self.authenticate(credential) {
            Ok(auth) => auth,
            Err(err) => {
                self.metrics.record_error(err.code.as_str());
                return Err(Box::new(WireResponse::failure(trace, &err)));
            }
        };

        if matches!(CallKind::parse(name), Some(CallKind::AgentCall)) {
            let args: AgentCallArgs = match parse_args(&arguments) {
                Ok(args) => args,
                Err(err) => return Err(Box::new(WireResponse::failure(trace, &err))),
            };
            return self.agent_call_stream(args, trace, auth).await;
        }

        // Non-agent calls degrade: run sync, emit one synthetic final.
        info!(trace_id = %trace.trace_id, name = %name, "stream requested on non-streaming call, degrading to sync");
        let response = self
            .dispatch(name, &arguments, &trace, &auth)
            .await;
        let event = match response {
            Ok(result) => StreamEvent::final_ok(result, &trace),
            Err(err) => {
                self.metrics.record_error(err.code.as_str());
                StreamEvent::final_err(&err, &trace)
            }
        };
        Ok(single_final(event))
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        trace: &TraceContext,
        auth: &AuthContext,
    ) -> FabricResult<serde_json::Value> {
        let Some(kind) = CallKind::parse(name) else {
            return Err(FabricError::bad_input(format!("Unknown tool: {name}"))
                .with_details(serde_json::json!({ "reason": "unknown tool" })));
        };

        match kind {
            CallKind::Health => self.health().await,
            CallKind::AgentList => {
                let args: AgentListArgs = parse_args(arguments)?;
                let agents = self.registry.list(&args.filter).await?;
                Ok(serde_json::json!({ "agents": agents }))
            }
            CallKind::AgentDescribe => {
                let args: AgentIdArgs = parse_args(arguments)?;
                let manifest = self
                    .registry
                    .get(&args.agent_id)
                    .await?
                    .ok_or_else(|| FabricError::agent_not_found(&args.agent_id))?;
                Ok(serde_json::json!({ "agent": manifest }))
            }
            CallKind::AgentRegister => {
                let mut doc = arguments.clone();
                if let Some(obj) = doc.as_object_mut() {
                    obj.remove("trace");
                }
                let manifest: AgentManifest = parse_args(&doc)?;
                let agent_id = manifest.agent_id.clone();
                self.registry.register(manifest).await?;
                Ok(serde_json::json!({ "agent_id": agent_id, "status": "registered" }))
            }
            CallKind::AgentDeregister => {
                let args: AgentIdArgs = parse_args(arguments)?;
                let removed = self.registry.deregister(&args.agent_id).await?;
                Ok(serde_json::json!({ "agent_id": args.agent_id, "deregistered": removed }))
            }
            CallKind::RoutePreview => {
                let args: RoutePreviewArgs = parse_args(arguments)?;
                self.route_preview(args).await
            }
            CallKind::AgentCall => {
                let args: AgentCallArgs = parse_args(arguments)?;
                self.agent_call(args, trace, auth).await
            }
            CallKind::ToolList => {
                let args: ToolListArgs = parse_args(arguments)?;
                self.tool_list(args).await
            }
            CallKind::ToolDescribe => {
                let args: ToolDescribeArgs = parse_args(arguments)?;
                self.tool_describe(args).await
            }
            CallKind::ToolCall => {
                let args: ToolCallArgs = parse_args(arguments)?;
                self.tool_call(args, trace, auth).await
            }
            CallKind::ToolDirect { tool_id } => {
                self.tool_direct(&tool_id, arguments.clone(), auth).await
            }
            CallKind::MessageSend => {
                let args: MessageSendArgs = parse_args(arguments)?;
                let mut message = BusMessage::new(
                    args.from_agent,
                    args.to_agent,
                    args.message_type,
                    args.payload,
                );
                if let Some(priority) = args.priority {
                    message.priority = priority;
                }
                message.reply_to = args.reply_to;
                if let Some(correlation_id) = args.correlation_id {
                    message.correlation_id = Some(correlation_id);
                }
                let receipt = self.bus.send(message).await?;
                Ok(serde_json::to_value(receipt).unwrap_or_default())
            }
            CallKind::MessageReceive => {
                let args: MessageReceiveArgs = parse_args(arguments)?;
                let messages = self
                    .bus
                    .receive(
                        &args.agent_id,
                        args.count,
                        args.block_ms,
                        args.consumer_group.as_deref(),
                    )
                    .await?;
                if args.auto_ack {
                    let ids: Vec<String> = messages
                        .iter()
                        .filter_map(|m| m.stream_entry_id.clone())
                        .collect();
                    if !ids.is_empty() {
                        self.bus
                            .acknowledge(&args.agent_id, &ids, args.consumer_group.as_deref())
                            .await?;
                    }
                }
                let count = messages.len();
                Ok(serde_json::json!({
                    "messages": messages,
                    "count": count,
                    "agent_id": args.agent_id,
                }))
            }
            CallKind::MessageAcknowledge => {
                let args: MessageAcknowledgeArgs = parse_args(arguments)?;
                let acknowledged = self
                    .bus
                    .acknowledge(
                        &args.agent_id,
                        &args.message_ids,
                        args.consumer_group.as_deref(),
                    )
                    .await?;
                Ok(serde_json::json!({ "acknowledged": acknowledged }))
            }
            CallKind::MessagePublish => {
                let args: MessagePublishArgs = parse_args(arguments)?;
                let recipients = self
                    .bus
                    .publish(&args.topic, args.message, args.from_agent.as_deref())
                    .await?;
                Ok(serde_json::json!({
                    "topic": args.topic,
                    "recipients": recipients,
                    "published": true,
                }))
            }
            CallKind::MessageQueueStatus => {
                let args: AgentIdArgs = parse_args(arguments)?;
                let status = self.bus.queue_status(&args.agent_id).await?;
                Ok(serde_json::to_value(status).unwrap_or_default())
            }
            CallKind::MessageTopics => {
                let topics = self.bus.topics().await?;
                let count = topics.len();
                Ok(serde_json::json!({ "topics": topics, "count": count }))
            }
        }
    }

    // ── fabric.health ────────────────────────────────────────────────────────

    async fn health(&self) -> FabricResult<serde_json::Value> {
        let counts = self.registry.status_counts().await?;
        let bus_ok = self.bus.topics().await.is_ok();

        let tool_ids = self.tools.tool_ids();
        let available: Vec<serde_json::Value> = if tool_ids.len() > 10 {
            let mut shown: Vec<serde_json::Value> =
                tool_ids.iter().take(10).map(|id| serde_json::json!(id)).collect();
            shown.push(serde_json::json!("..."));
            shown
        } else {
            tool_ids.iter().map(|id| serde_json::json!(id)).collect()
        };

        Ok(serde_json::json!({
            "ok": true,
            "registry": "ok",
            "runtimes": {
                "online": counts.online,
                "degraded": counts.degraded,
                "offline": counts.offline,
            },
            "tools": {
                "builtin_count": tool_ids.len(),
                "available": available,
            },
            "bus": if bus_ok { "ok" } else { "unavailable" },
            "version": &self.config.version,
            "uptime_seconds": self.started_at.elapsed().as_secs(),
        }))
    }

    // ── fabric.route.preview ─────────────────────────────────────────────────

    async fn route_preview(&self, args: RoutePreviewArgs) -> FabricResult<serde_json::Value> {
        let manifest = self
            .registry
            .get(&args.agent_id)
            .await?
            .ok_or_else(|| FabricError::agent_not_found(&args.agent_id))?;

        let fallbacks: Vec<serde_json::Value> = self
            .registry
            .find_by_capability(&args.capability)
            .await?
            .into_iter()
            .filter(|hit| hit.agent_id != args.agent_id)
            .map(|hit| {
                serde_json::json!({
                    "agent_id": hit.agent_id,
                    "reason": format!("Same capability: {}", args.capability),
                    "priority": hit.priority,
                })
            })
            .collect();

        Ok(serde_json::json!({
            "selected_runtime": {
                "transport": manifest.endpoint.transport,
                "uri": manifest.endpoint.uri,
                "adapter": manifest.runtime_kind.adapter_name(),
            },
            "policy": { "allowed": true, "reason": "ok" },
            "fallbacks": fallbacks,
        }))
    }

    // ── fabric.call ──────────────────────────────────────────────────────────

    /// Resolve the target agent and capability, honoring the routing order:
    /// existence, then capability, then status.
    async fn resolve_agent(
        &self,
        agent_id: &str,
        capability: &str,
    ) -> FabricResult<(AgentManifest, u64, bool)> {
        let manifest = self
            .registry
            .get(agent_id)
            .await?
            .ok_or_else(|| FabricError::agent_not_found(agent_id))?;
        let descriptor = manifest
            .capability(capability)
            .ok_or_else(|| {
                FabricError::capability_not_found(capability, &format!("agent {agent_id}"))
            })?;
        if !manifest.status.is_routable() {
            return Err(FabricError::agent_offline(agent_id));
        }
        let default_timeout = descriptor.max_timeout_ms;
        let streaming = descriptor.streaming;
        Ok((manifest, default_timeout, streaming))
    }

    fn build_envelope(
        &self,
        args: &AgentCallArgs,
        default_timeout: u64,
        trace: &TraceContext,
        auth: &AuthContext,
        stream: bool,
    ) -> CanonicalEnvelope {
        CanonicalEnvelope {
            trace: trace.clone(),
            auth: auth.clone(),
            target: CallTarget {
                kind: TargetKind::Agent,
                id: args.agent_id.clone(),
                capability: args.capability.clone(),
                timeout_ms: Some(args.timeout_ms.unwrap_or(default_timeout)),
            },
            input: CallInput {
                task: Some(args.task.clone()),
                context: args.context.clone(),
                attachments: args.attachments.clone(),
                parameters: serde_json::Value::Null,
            },
            response: ResponseSpec {
                stream,
                format: ResponseFormat::Text,
            },
        }
    }

    async fn agent_call(
        &self,
        args: AgentCallArgs,
        trace: &TraceContext,
        auth: &AuthContext,
    ) -> FabricResult<serde_json::Value> {
        let (manifest, default_timeout, _) =
            self.resolve_agent(&args.agent_id, &args.capability).await?;
        let envelope = self.build_envelope(&args, default_timeout, trace, auth, false);

        info!(agent_id = %args.agent_id, capability = %args.capability, "executing agent call");
        let adapter = self.adapters.adapter_for(&manifest);
        match adapter.call(&envelope).await {
            Ok(result) => Ok(result),
            Err(err)
                if self.config.fallback_enabled
                    && matches!(err.code, ErrorCode::AgentOffline | ErrorCode::Timeout) =>
            {
                self.try_fallbacks(&args, &envelope, err).await
            }
            Err(err) => Err(err),
        }
    }

    /// Retry the registry's ordered fallback candidates with the same trace
    /// context. The fallback chain is derived per dispatch, never stored.
    async fn try_fallbacks(
        &self,
        args: &AgentCallArgs,
        envelope: &CanonicalEnvelope,
        primary_err: FabricError,
    ) -> FabricResult<serde_json::Value> {
        let hits = self.registry.find_by_capability(&args.capability).await?;
        let mut attempted = vec![serde_json::json!({
            "agent_id": args.agent_id,
            "error": primary_err.code,
        })];

        for hit in hits.into_iter().filter(|h| h.agent_id != args.agent_id) {
            let Some(manifest) = self.registry.get(&hit.agent_id).await? else {
                continue;
            };
            if !manifest.status.is_routable() {
                continue;
            }

            let mut fallback_envelope = envelope.clone();
            fallback_envelope.target.id = hit.agent_id.clone();

            info!(
                trace_id = %envelope.trace.trace_id,
                fallback = %hit.agent_id,
                "retrying against fallback agent"
            );
            match self
                .adapters
                .adapter_for(&manifest)
                .call(&fallback_envelope)
                .await
            {
                Ok(result) => return Ok(result),
                Err(err) => {
                    attempted.push(serde_json::json!({
                        "agent_id": hit.agent_id,
                        "error": err.code,
                    }));
                    if !matches!(err.code, ErrorCode::AgentOffline | ErrorCode::Timeout) {
                        return Err(err
                            .with_details(serde_json::json!({ "fallbacks": attempted })));
                    }
                }
            }
        }

        Err(primary_err.with_details(serde_json::json!({ "fallbacks": attempted })))
    }

    async fn agent_call_stream(
        &self,
        args: AgentCallArgs,
        trace: TraceContext,
        auth: AuthContext,
    ) -> Result<BoxEventStream, Box<WireResponse>> {
        let (manifest, default_timeout, streaming) = match self
            .resolve_agent(&args.agent_id, &args.capability)
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                self.metrics.record_error(err.code.as_str());
                return Err(Box::new(WireResponse::failure(trace, &err)));
            }
        };

        if !streaming || !args.stream {
            // Degradation is recorded on the trace; the caller still gets a
            // well-formed one-event stream.
            info!(
                trace_id = %trace.trace_id,
                agent_id = %args.agent_id,
                capability = %args.capability,
                "capability does not stream, degrading to sync"
            );
            let result = self.agent_call(args, &trace, &auth).await;
            let event = match result {
                Ok(result) => StreamEvent::final_ok(result, &trace),
                Err(err) => {
                    self.metrics.record_error(err.code.as_str());
                    StreamEvent::final_err(&err, &trace)
                }
            };
            return Ok(single_final(event));
        }

        let envelope = self.build_envelope(&args, default_timeout, &trace, &auth, true);
        info!(
            trace_id = %trace.trace_id,
            agent_id = %args.agent_id,
            capability = %args.capability,
            "executing streaming agent call"
        );
        match self.adapters.adapter_for(&manifest).call_stream(&envelope).await {
            Ok(upstream) => Ok(enforce_terminal_final(upstream, trace)),
            Err(err) => {
                self.metrics.record_error(err.code.as_str());
                Err(Box::new(WireResponse::failure(trace, &err)))
            }
        }
    }

    // ── fabric.tool.* ────────────────────────────────────────────────────────

    async fn tool_list(&self, args: ToolListArgs) -> FabricResult<serde_json::Value> {
        let provider_filter = match args.provider.as_deref() {
            None => None,
            Some("builtin") => Some(Some(ToolProvider::Builtin)),
            Some("external") => Some(Some(ToolProvider::External)),
            Some("mcp") => Some(Some(ToolProvider::Mcp)),
            Some("agent") => Some(None),
            Some(other) => {
                return Err(FabricError::bad_input(format!("unknown provider: {other}")))
            }
        };

        let mut tools: Vec<serde_json::Value> = Vec::new();

        // Built-in (and future external/mcp) tools from the host.
        let include_host = !matches!(provider_filter, Some(None));
        if include_host {
            let host_provider = provider_filter.flatten();
            for descriptor in self.tools.list_tools(args.category.as_deref(), host_provider) {
                tools.push(serde_json::json!({
                    "tool_id": descriptor.tool_id,
                    "provider": descriptor.provider,
                    "category": descriptor.category,
                    "description": descriptor.description,
                    "capabilities": descriptor.capabilities.keys().collect::<Vec<_>>(),
                    "available": true,
                }));
            }
        }

        // Agent capabilities exposed as addressable pseudo-tools.
        let include_agents =
            args.provider.is_none() || args.provider.as_deref() == Some("agent");
        if include_agents {
            for manifest in self.registry.list(&AgentFilter::default()).await? {
                let category = format!("agent:{}", manifest.agent_id);
                if let Some(filter) = args.category.as_deref() {
                    if filter != category {
                        continue;
                    }
                }
                for capability in &manifest.capabilities {
                    tools.push(serde_json::json!({
                        "tool_id": format!("agent.{}.{}", manifest.agent_id, capability.name),
                        "provider": "agent",
                        "category": category.clone(),
                        "agent_id": manifest.agent_id.clone(),
                        "capability": capability.name.clone(),
                        "streaming": capability.streaming,
                    }));
                }
            }
        }

        let count = tools.len();
        Ok(serde_json::json!({ "tools": tools, "count": count }))
    }

    async fn tool_describe(&self, args: ToolDescribeArgs) -> FabricResult<serde_json::Value> {
        if let Some(descriptor) = self.tools.describe_tool(&args.tool_id) {
            return Ok(serde_json::json!({ "tool": descriptor }));
        }

        // agent.{agent_id} or agent.{agent_id}.{capability}
        if let Some(rest) = args.tool_id.strip_prefix("agent.") {
            let agent_id = rest.split('.').next().unwrap_or(rest);
            if let Some(manifest) = self.registry.get(agent_id).await? {
                return Ok(serde_json::json!({
                    "tool": {
                        "tool_id": args.tool_id,
                        "provider": "agent",
                        "agent_id": agent_id,
                        "agent_info": {
                            "display_name": manifest.display_name,
                            "capabilities": manifest.capabilities.iter().map(|c| {
                                serde_json::json!({
                                    "name": c.name.clone(),
                                    "description": c.description.clone(),
                                })
                            }).collect::<Vec<_>>(),
                        },
                    }
                }));
            }
        }

        Err(FabricError::tool_not_found(&args.tool_id))
    }

    async fn tool_call(
        &self,
        args: ToolCallArgs,
        trace: &TraceContext,
        auth: &AuthContext,
    ) -> FabricResult<serde_json::Value> {
        // Agent capabilities addressed as tools delegate to the call path.
        if let Some(rest) = args.tool_id.strip_prefix("agent.") {
            let (agent_id, capability) = rest.split_once('.').ok_or_else(|| {
                FabricError::bad_input(format!("invalid agent tool id: {}", args.tool_id))
            })?;
            let call_args = AgentCallArgs {
                agent_id: agent_id.to_string(),
                capability: capability.to_string(),
                task: args
                    .parameters
                    .get("task")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                context: args
                    .parameters
                    .get("context")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
                attachments: Vec::new(),
                stream: args.stream,
                timeout_ms: None,
            };
            return self.agent_call(call_args, trace, auth).await;
        }

        let capability = self.resolve_tool_capability(&args.tool_id, &args.capability)?;
        self.tools
            .execute_tool(
                &args.tool_id,
                &capability,
                args.parameters,
                Self::caller_trust_tier(auth),
            )
            .await
    }

    /// Direct dispatch for `fabric.tool.{category}.{name}`: the whole
    /// argument object is the parameter set and the capability is the
    /// tool's sole declared one.
    async fn tool_direct(
        &self,
        tool_id: &str,
        mut arguments: serde_json::Value,
        auth: &AuthContext,
    ) -> FabricResult<serde_json::Value> {
        if let Some(obj) = arguments.as_object_mut() {
            obj.remove("trace");
        }
        let capability = self.resolve_tool_capability(tool_id, "")?;
        self.tools
            .execute_tool(tool_id, &capability, arguments, Self::caller_trust_tier(auth))
            .await
    }

    /// An empty capability resolves to the tool's single declared
    /// capability; ambiguity is an error rather than a guess.
    fn resolve_tool_capability(&self, tool_id: &str, capability: &str) -> FabricResult<String> {
        if !capability.is_empty() {
            return Ok(capability.to_string());
        }
        let descriptor = self
            .tools
            .describe_tool(tool_id)
            .ok_or_else(|| FabricError::tool_not_found(tool_id))?;
        if descriptor.capabilities.len() == 1 {
            Ok(descriptor
                .capabilities
                .keys()
                .next()
                .expect("len checked")
                .clone())
        } else {
            Err(FabricError::capability_not_found(
                "(unspecified)",
                &format!("tool {tool_id}"),
            ))
        }
    }

    // ── audit ────────────────────────────────────────────────────────────────

    /// Write the call audit row through the registry hook. Best-effort: the
    /// durable variant persists, the memory variant ignores.
    async fn audit(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        response: &WireResponse,
        started_at: chrono::DateTime<chrono::Utc>,
    ) {
        let target_type = if name == "fabric.call" {
            "agent"
        } else if name.starts_with("fabric.tool") {
            "tool"
        } else if name.starts_with("fabric.message") {
            "message"
        } else {
            "gateway"
        };
        let target_id = arguments
            .get("agent_id")
            .or_else(|| arguments.get("tool_id"))
            .and_then(|v| v.as_str())
            .unwrap_or(name);
        let request = serde_json::json!({ "name": name, "arguments": arguments });
        let response_value = serde_json::to_value(response).unwrap_or_default();

        if let Err(err) = self
            .registry
            .record_call(
                &response.trace.trace_id,
                target_type,
                target_id,
                &request,
                &response_value,
                started_at,
                chrono::Utc::now(),
            )
            .await
        {
            warn!(error = %err, "call audit write failed");
        }
    }
}
