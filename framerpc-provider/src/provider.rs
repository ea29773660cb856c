//! The provider peer. Owns the live API tree and the handle table,
//! broadcasts the handshake on construction, and serves calls until
//! dropped.

use crate::handles::HandleTable;
use framerpc_core::{
    api, path, serialize_error, ApiNode, Envelope, HandleId, HandleKind, Message, OriginPolicy,
    Payload, ReadyPayload, RpcError, Snapshot, SnapshotGraph, WireValue,
};
use framerpc_transport::{Endpoint, PeerPort};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Channel name; only envelopes carrying it are handled.
    pub name: String,
    /// Idle lifetime of a handle in milliseconds. Zero disables expiry.
    pub handle_ttl_ms: u64,
    /// Sweep cadence in milliseconds. Zero disables the sweeper.
    pub sweep_interval_ms: u64,
    pub allowed_origins: OriginPolicy,
    /// Target origin for the initial handshake broadcast.
    pub target_origin: String,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        ProviderConfig {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            name: String::new(),
            handle_ttl_ms: 600_000,
            sweep_interval_ms: 60_000,
            allowed_origins: OriginPolicy::Any,
            target_origin: "*".to_string(),
        }
    }
}

struct ProviderShared {
    config: ProviderConfig,
    api: ApiNode,
    snapshot: Snapshot,
    handles: HandleTable,
}

/// Running provider. Dropping it stops the message loop and the sweeper,
/// which also ends every handle's life.
pub struct Provider {
    shared: Arc<ProviderShared>,
    loop_task: JoinHandle<()>,
    sweeper_task: Option<JoinHandle<()>>,
}

/// Construct a provider over `endpoint` and broadcast the handshake to the
/// linked peer. A failing broadcast degrades to a best-effort `initError`
/// carrying the stringified cause; the provider itself stays up either
/// way.
pub fn create_provider(api: ApiNode, endpoint: Endpoint, config: ProviderConfig) -> Provider {
    let snapshot = Snapshot::capture(&api);
    let shared = Arc::new(ProviderShared {
        config,
        api,
        snapshot,
        handles: HandleTable::new(),
    });

    if let Err(err) = send_ready(&shared, &endpoint.link, &shared.config.target_origin) {
        warn!("handshake broadcast failed: {}", err);
        let env = Envelope::new(
            &shared.config.name,
            Message::InitError {
                error: err.to_string(),
            },
        );
        if let Ok(data) = env.encode() {
            if let Err(err) = endpoint.link.post(&data, &shared.config.target_origin) {
                warn!("init error broadcast failed: {}", err);
            }
        }
    }

    let loop_task = tokio::spawn(run_loop(shared.clone(), endpoint));
    let sweeper_task = spawn_sweeper(&shared);

    Provider {
        shared,
        loop_task,
        sweeper_task,
    }
}

impl Provider {
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Number of currently live handles.
    pub fn active_handles(&self) -> usize {
        self.shared.handles.len()
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.loop_task.abort();
        if let Some(task) = self.sweeper_task.take() {
            task.abort();
        }
    }
}

fn spawn_sweeper(shared: &Arc<ProviderShared>) -> Option<JoinHandle<()>> {
    let ttl_ms = shared.config.handle_ttl_ms;
    let interval_ms = shared.config.sweep_interval_ms;
    if ttl_ms == 0 || interval_ms == 0 {
        return None;
    }
    let shared = Arc::downgrade(shared);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else { break };
            let removed = shared.handles.sweep(Duration::from_millis(ttl_ms));
            if removed > 0 {
                debug!("swept {} idle handle(s)", removed);
            }
        }
    }))
}

fn send_ready(
    shared: &ProviderShared,
    port: &PeerPort,
    target_origin: &str,
) -> Result<(), RpcError> {
    let env = Envelope::new(
        &shared.config.name,
        Message::Ready {
            payload: ReadyPayload {
                values: shared.snapshot.graph.clone(),
                functions: shared.snapshot.functions.clone(),
            },
        },
    );
    let data = env
        .encode()
        .map_err(|e| RpcError::InitFailed(e.to_string()))?;
    port.post(&data, target_origin)
        .map_err(|e| RpcError::InitFailed(e.to_string()))
}

async fn run_loop(shared: Arc<ProviderShared>, mut endpoint: Endpoint) {
    while let Some(delivery) = endpoint.recv().await {
        let Some(env) = Envelope::decode(&delivery.data, &shared.config.name) else {
            continue;
        };
        if !shared.config.allowed_origins.allows(&delivery.origin) {
            warn!("dropping message from disallowed origin {}", delivery.origin);
            continue;
        }
        match env.msg {
            Message::Get => {
                trace!("re-handshake requested from {}", delivery.origin);
                if let Err(err) = send_ready(&shared, &delivery.source, &delivery.origin) {
                    warn!("re-handshake send failed: {}", err);
                }
            }
            Message::Call {
                id,
                method,
                args,
                handle,
            } => {
                // Handlers may suspend; each call runs on its own task so
                // completion order is unconstrained.
                let shared = shared.clone();
                let source = delivery.source.clone();
                let origin = delivery.origin.clone();
                tokio::spawn(async move {
                    let reply = match dispatch(&shared, &method, args, handle).await {
                        Ok(result) => Message::Result { id, result },
                        Err(err) => Message::Error {
                            id,
                            error: serialize_error(&err),
                        },
                    };
                    respond(&shared, &source, &origin, reply);
                });
            }
            Message::ReleaseHandle { handle } => {
                trace!("releasing handle {}", handle);
                shared.handles.release(&handle);
            }
            // Provider-bound traffic only; the rest is consumer-side.
            Message::Ready { .. } | Message::Result { .. } | Message::Error { .. }
            | Message::InitError { .. } => {}
        }
    }
    debug!("provider channel closed for {}", shared.config.name);
}

fn respond(shared: &ProviderShared, source: &PeerPort, origin: &str, msg: Message) {
    let env = Envelope::new(&shared.config.name, msg);
    match env.encode() {
        Ok(data) => {
            if let Err(err) = source.post(&data, origin) {
                debug!("reply send failed: {}", err);
            }
        }
        Err(err) => debug!("reply encode failed: {}", err),
    }
}

async fn dispatch(
    shared: &ProviderShared,
    method: &str,
    args: Vec<WireValue>,
    handle: Option<HandleId>,
) -> Result<Payload, RpcError> {
    let context = match handle {
        Some(id) => shared
            .handles
            .touch(&id)
            .ok_or(RpcError::HandleNotFound(id))?,
        None => shared.api.clone(),
    };

    let target = resolve_method(&context, method)?;
    let func = match target {
        ApiNode::Function(f) => f,
        _ => return Err(RpcError::method_not_found(method)),
    };

    let result = func.call(args).await?;
    Ok(serialize_result(shared, result))
}

/// Split the dotted method into parent path and function key and fetch the
/// member. An empty method addresses the context value itself (calling a
/// function-kind handle).
fn resolve_method(context: &ApiNode, method: &str) -> Result<ApiNode, RpcError> {
    if method.is_empty() {
        return Ok(context.clone());
    }
    let (parent_path, key) = path::split_parent(method);
    let parent = api::get_deep(context, parent_path)
        .ok_or_else(|| RpcError::method_not_found(method))?;
    let member = match &parent {
        ApiNode::Object(obj) => obj.get(key),
        ApiNode::List(items) => path::as_index(key)
            .and_then(|i| items.read().expect("api list poisoned").get(i).cloned()),
        _ => None,
    };
    member.ok_or_else(|| RpcError::method_not_found(method))
}

/// Wrap a call result for the wire. Functions and function-bearing
/// composites get a handle; everything else travels as a plain value
/// graph. Only the outermost composite is wrapped, so drill-down calls
/// mint fresh handles per level.
fn serialize_result(shared: &ProviderShared, result: ApiNode) -> Payload {
    match &result {
        ApiNode::Function(_) => {
            let id = shared.handles.register(result.clone(), HandleKind::Function);
            debug!("issued function handle {}", id);
            Payload::Handle {
                id,
                kind: HandleKind::Function,
                values: None,
                functions: None,
            }
        }
        ApiNode::Object(_) | ApiNode::List(_) => {
            let snapshot = Snapshot::capture(&result);
            if snapshot.has_functions() {
                let id = shared.handles.register(result, HandleKind::Object);
                debug!("issued object handle {}", id);
                Payload::Handle {
                    id,
                    kind: HandleKind::Object,
                    values: Some(snapshot.graph),
                    functions: Some(snapshot.functions),
                }
            } else {
                Payload::Value {
                    values: snapshot.graph,
                }
            }
        }
        ApiNode::Value(v) => Payload::Value {
            values: SnapshotGraph::leaf(v.clone()),
        },
    }
}
