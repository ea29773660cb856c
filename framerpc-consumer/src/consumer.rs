//! The consumer peer. Waits for the provider's handshake, exposes the
//! snapshot through the chosen proxy fabric, correlates call replies by
//! id, and tracks handle lifetimes.

use crate::handles::HandleRegistry;
use crate::proxy::{root_ref, RemoteRef, Scope};
use dashmap::DashMap;
use framerpc_core::{
    CallId, Envelope, HandleId, Message, OriginPolicy, Payload, RpcError, SnapshotGraph, WireValue,
};
use framerpc_transport::{Endpoint, PeerPort};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Policy for releasing handles when the page is hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseOnPageHide {
    /// Release only when the page will not be restored from a cache.
    #[default]
    NonPersisted,
    All,
    Off,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Handshake timeout in milliseconds. Zero rejects before any receipt.
    pub timeout_ms: u64,
    /// Cadence of the dead-handle sweeper in milliseconds. Zero disables it.
    pub gc_sweep_interval_ms: u64,
    pub release_on_page_hide: ReleaseOnPageHide,
    /// `false` materialises the snapshot into a real tree; `true` serves
    /// structure-hiding lazy proxies instead.
    pub hide_structure: bool,
    pub allowed_origins: OriginPolicy,
    /// Target origin for the handshake request broadcast.
    pub target_origin: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            timeout_ms: 5_000,
            gc_sweep_interval_ms: 60_000,
            release_on_page_hide: ReleaseOnPageHide::default(),
            hide_structure: false,
            allowed_origins: OriginPolicy::Any,
            target_origin: "*".to_string(),
        }
    }
}

pub(crate) struct BoundPeer {
    pub(crate) port: PeerPort,
    pub(crate) origin: String,
}

pub(crate) struct ConsumerShared {
    pub(crate) name: String,
    pub(crate) config: ConsumerConfig,
    pub(crate) pending: DashMap<CallId, oneshot::Sender<Result<Payload, String>>>,
    pub(crate) peer: RwLock<Option<BoundPeer>>,
    pub(crate) handles: HandleRegistry,
}

impl ConsumerShared {
    /// Post a message to the bound provider. Fails without wire traffic
    /// when no peer is bound or the channel is gone.
    pub(crate) fn post(&self, msg: Message) -> Result<(), RpcError> {
        let peer = self.peer.read().expect("peer lock poisoned");
        let peer = peer.as_ref().ok_or(RpcError::PeerUnavailable)?;
        let env = Envelope::new(&self.name, msg);
        let data = env.encode().map_err(|_| RpcError::PeerUnavailable)?;
        peer.port
            .post(&data, &peer.origin)
            .map_err(|_| RpcError::PeerUnavailable)
    }

    /// Send a call and await its correlated reply. The send itself is
    /// fire-and-forget; correlation happens purely on the id.
    pub(crate) async fn call(
        &self,
        method: String,
        args: Vec<WireValue>,
        handle: Option<HandleId>,
    ) -> Result<Payload, RpcError> {
        let id = CallId::mint();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        if let Err(err) = self.post(Message::Call {
            id: id.clone(),
            method,
            args,
            handle,
        }) {
            self.pending.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(message)) => Err(RpcError::Remote(message)),
            Err(_) => Err(RpcError::PeerUnavailable),
        }
    }

    fn bind(&self, port: PeerPort, origin: String) -> bool {
        let mut peer = self.peer.write().expect("peer lock poisoned");
        if peer.is_some() {
            return false;
        }
        *peer = Some(BoundPeer { port, origin });
        true
    }
}

struct InitState {
    values: SnapshotGraph,
    functions: Vec<String>,
}

/// A bound consumer: the root reference plus lifecycle controls. Dropping
/// it stops the message loop and the sweeper.
pub struct Consumer {
    shared: Arc<ConsumerShared>,
    root: RemoteRef,
    loop_task: JoinHandle<()>,
    sweeper_task: Option<JoinHandle<()>>,
}

/// Connect over `endpoint` and resolve once the provider's handshake
/// arrives. Rejects with the provider's init error, or with a timeout
/// error when nothing matching arrives in time.
pub async fn create_consumer(
    endpoint: Endpoint,
    name: impl Into<String>,
    config: ConsumerConfig,
) -> Result<Consumer, RpcError> {
    let name = name.into();
    if config.timeout_ms == 0 {
        return Err(RpcError::InitTimeout(name));
    }
    let timeout = Duration::from_millis(config.timeout_ms);

    let shared = Arc::new(ConsumerShared {
        name: name.clone(),
        config,
        pending: DashMap::new(),
        peer: RwLock::new(None),
        handles: HandleRegistry::default(),
    });

    let (init_tx, init_rx) = oneshot::channel();
    let link = endpoint.link.clone();
    let loop_task = tokio::spawn(run_loop(shared.clone(), endpoint, init_tx));

    // Ask for the handshake in case the provider announced before we were
    // listening; a duplicate announcement is ignored by first-wins.
    let get = Envelope::new(&shared.name, Message::Get);
    if let Ok(data) = get.encode() {
        let _ = link.post(&data, &shared.config.target_origin);
    }

    let init = match tokio::time::timeout(timeout, init_rx).await {
        Err(_) => {
            loop_task.abort();
            return Err(RpcError::InitTimeout(name));
        }
        Ok(Err(_)) => {
            loop_task.abort();
            return Err(RpcError::PeerUnavailable);
        }
        Ok(Ok(Err(cause))) => {
            loop_task.abort();
            return Err(RpcError::InitFailed(cause));
        }
        Ok(Ok(Ok(state))) => state,
    };

    let scope = Scope::new(shared.clone(), None, init.values, init.functions);
    let root = root_ref(scope);
    debug!("consumer bound on channel {}", name);

    let sweeper_task = spawn_gc_sweeper(&shared);
    Ok(Consumer {
        shared,
        root,
        loop_task,
        sweeper_task,
    })
}

impl Consumer {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn root(&self) -> &RemoteRef {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<RemoteRef> {
        self.root.get(key)
    }

    /// Resolve a dotted path and call the function found there.
    pub async fn invoke(
        &self,
        dotted: &str,
        args: Vec<WireValue>,
    ) -> Result<RemoteRef, RpcError> {
        self.root.invoke(dotted, args).await
    }

    /// Handles still reachable by live references.
    pub fn active_handles(&self) -> usize {
        self.shared.handles.active()
    }

    /// Teardown hook: always releases every active handle.
    pub fn before_unload(&self) {
        self.shared.handles.release_all();
    }

    /// Page-hide hook: applies the configured release policy, where
    /// `persisted` reports whether the page enters a restorable cache.
    pub fn page_hide(&self, persisted: bool) {
        match self.shared.config.release_on_page_hide {
            ReleaseOnPageHide::Off => {}
            ReleaseOnPageHide::All => self.shared.handles.release_all(),
            ReleaseOnPageHide::NonPersisted => {
                if !persisted {
                    self.shared.handles.release_all();
                }
            }
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.loop_task.abort();
        if let Some(task) = self.sweeper_task.take() {
            task.abort();
        }
        // Unbind so references that outlive the consumer reject instead of
        // hanging: outstanding calls lose their reply sender, future calls
        // find no peer.
        self.shared.peer.write().expect("peer lock poisoned").take();
        self.shared.pending.clear();
    }
}

fn spawn_gc_sweeper(shared: &Arc<ConsumerShared>) -> Option<JoinHandle<()>> {
    let interval_ms = shared.config.gc_sweep_interval_ms;
    if interval_ms == 0 {
        return None;
    }
    let shared = Arc::downgrade(shared);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else { break };
            let pruned = shared.handles.sweep();
            if pruned > 0 {
                debug!("pruned {} dead handle entr(ies)", pruned);
            }
        }
    }))
}

async fn run_loop(
    shared: Arc<ConsumerShared>,
    mut endpoint: Endpoint,
    init_tx: oneshot::Sender<Result<InitState, String>>,
) {
    let mut init_tx = Some(init_tx);
    while let Some(delivery) = endpoint.recv().await {
        let Some(env) = Envelope::decode(&delivery.data, &shared.name) else {
            continue;
        };
        if !shared.config.allowed_origins.allows(&delivery.origin) {
            warn!("dropping message from disallowed origin {}", delivery.origin);
            continue;
        }
        match env.msg {
            Message::Ready { payload } => {
                // First handshake wins; later announcements (e.g. replies
                // to our own handshake request) are ignored.
                if !shared.bind(delivery.source, delivery.origin) {
                    trace!("ignoring duplicate handshake on {}", shared.name);
                    continue;
                }
                if let Some(tx) = init_tx.take() {
                    let _ = tx.send(Ok(InitState {
                        values: payload.values,
                        functions: payload.functions,
                    }));
                }
            }
            Message::InitError { error } => {
                if let Some(tx) = init_tx.take() {
                    let _ = tx.send(Err(error));
                } else {
                    debug!("init error after binding on {}: {}", shared.name, error);
                }
            }
            Message::Result { id, result } => match shared.pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(Ok(result));
                }
                None => trace!("result for unknown call {}", id),
            },
            Message::Error { id, error } => match shared.pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(Err(error));
                }
                None => trace!("error for unknown call {}", id),
            },
            // Provider-bound traffic.
            Message::Get | Message::Call { .. } | Message::ReleaseHandle { .. } => {}
        }
    }
    debug!("consumer channel closed for {}", shared.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use framerpc_core::{ApiNode, ApiObject, ReadyPayload, Snapshot};
    use framerpc_transport::{pair, Delivery};
    use serde_json::json;

    fn fixture_payload() -> ReadyPayload {
        let root = ApiObject::new();
        root.insert("a", 1i64);
        root.insert("fast", ApiNode::func_sync(|_| Ok(ApiNode::from(0i64))));
        root.insert("slow", ApiNode::func_sync(|_| Ok(ApiNode::from(0i64))));
        let snapshot = Snapshot::capture(&ApiNode::Object(root));
        ReadyPayload {
            values: snapshot.graph,
            functions: snapshot.functions,
        }
    }

    fn ready_data(name: &str) -> serde_json::Value {
        Envelope::new(
            name,
            Message::Ready {
                payload: fixture_payload(),
            },
        )
        .encode()
        .unwrap()
    }

    async fn next_call(endpoint: &mut Endpoint, name: &str) -> (CallId, Delivery) {
        loop {
            let delivery = endpoint.recv().await.expect("channel closed");
            if let Some(env) = Envelope::decode(&delivery.data, name) {
                if let Message::Call { id, .. } = env.msg {
                    return (id, delivery);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_init_timeout_when_no_provider_answers() {
        let (_provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        let config = ConsumerConfig {
            timeout_ms: 50,
            ..Default::default()
        };
        match create_consumer(consumer_end, "api", config).await {
            Err(err) => assert_eq!(
                err.to_string(),
                "iframe-rpc initialization timeout for name: api"
            ),
            Ok(_) => panic!("handshake should not complete"),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_rejects_before_any_receipt() {
        let (provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        provider_end.link.post(&ready_data("api"), "*").unwrap();

        let config = ConsumerConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            create_consumer(consumer_end, "api", config).await,
            Err(RpcError::InitTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_init_error_rejects_with_carried_cause() {
        let (provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        let data = Envelope::new(
            "api",
            Message::InitError {
                error: "DataCloneError: Uncloneable payload".to_string(),
            },
        )
        .encode()
        .unwrap();
        provider_end.link.post(&data, "*").unwrap();

        let config = ConsumerConfig {
            timeout_ms: 500,
            ..Default::default()
        };
        match create_consumer(consumer_end, "api", config).await {
            Err(err) => assert_eq!(err.to_string(), "DataCloneError: Uncloneable payload"),
            Ok(_) => panic!("init error should reject the handshake"),
        }
    }

    #[tokio::test]
    async fn test_unrelated_traffic_does_not_disturb_handshake() {
        let (provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        provider_end.link.post(&json!({"noise": true}), "*").unwrap();
        provider_end
            .link
            .post(
                &Envelope::new("other-channel", Message::Get).encode().unwrap(),
                "*",
            )
            .unwrap();
        provider_end.link.post(&ready_data("api"), "*").unwrap();

        let consumer = create_consumer(consumer_end, "api", ConsumerConfig::default())
            .await
            .unwrap();
        assert_eq!(consumer.get("a").unwrap().as_f64(), Some(1.0));
    }

    #[tokio::test]
    async fn test_first_ready_wins() {
        let (provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        provider_end.link.post(&ready_data("api"), "*").unwrap();
        // A second announcement, e.g. answering our handshake request.
        provider_end.link.post(&ready_data("api"), "*").unwrap();

        let consumer = create_consumer(consumer_end, "api", ConsumerConfig::default())
            .await
            .unwrap();
        assert_eq!(consumer.get("a").unwrap().as_f64(), Some(1.0));
    }

    #[tokio::test]
    async fn test_results_correlate_regardless_of_completion_order() {
        let (mut provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        provider_end.link.post(&ready_data("api"), "*").unwrap();

        let consumer = create_consumer(consumer_end, "api", ConsumerConfig::default())
            .await
            .unwrap();

        let slow = consumer.get("slow").unwrap();
        let fast = consumer.get("fast").unwrap();
        let calls = tokio::spawn(async move {
            let (a, b) = tokio::join!(slow.call(vec![]), fast.call(vec![]));
            (a.unwrap().as_f64(), b.unwrap().as_f64())
        });

        let (slow_id, _) = next_call(&mut provider_end, "api").await;
        let (fast_id, delivery) = next_call(&mut provider_end, "api").await;

        // Answer in reverse arrival order with distinct values.
        for (id, value) in [(fast_id, 2.0), (slow_id, 1.0)] {
            let reply = Envelope::new(
                "api",
                Message::Result {
                    id,
                    result: Payload::Value {
                        values: SnapshotGraph::leaf(WireValue::Number(value)),
                    },
                },
            )
            .encode()
            .unwrap();
            delivery.source.post(&reply, &delivery.origin).unwrap();
        }

        let (slow_result, fast_result) = calls.await.unwrap();
        assert_eq!(slow_result, Some(1.0));
        assert_eq!(fast_result, Some(2.0));
    }

    #[tokio::test]
    async fn test_remote_error_rejects_pending_call() {
        let (mut provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        provider_end.link.post(&ready_data("api"), "*").unwrap();

        let consumer = create_consumer(consumer_end, "api", ConsumerConfig::default())
            .await
            .unwrap();
        let fast = consumer.get("fast").unwrap();
        let call = tokio::spawn(async move { fast.call(vec![]).await });

        let (id, delivery) = next_call(&mut provider_end, "api").await;
        let reply = Envelope::new(
            "api",
            Message::Error {
                id,
                error: "boom".to_string(),
            },
        )
        .encode()
        .unwrap();
        delivery.source.post(&reply, &delivery.origin).unwrap();

        match call.await.unwrap() {
            Err(err) => assert_eq!(err.to_string(), "boom"),
            Ok(_) => panic!("remote error should reject"),
        }
    }

    #[tokio::test]
    async fn test_call_rejects_synchronously_when_peer_is_gone() {
        let (mut provider_end, consumer_end) = pair("https://p.example", "https://c.example");
        provider_end.link.post(&ready_data("api"), "*").unwrap();

        let consumer = create_consumer(consumer_end, "api", ConsumerConfig::default())
            .await
            .unwrap();
        let fast = consumer.get("fast").unwrap();

        // Drain the handshake request, then take the provider down.
        while let Ok(delivery) =
            tokio::time::timeout(Duration::from_millis(20), provider_end.recv()).await
        {
            let _ = delivery;
        }
        drop(provider_end);

        match fast.call(vec![]).await {
            Err(RpcError::PeerUnavailable) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disallowed_origin_cannot_complete_handshake() {
        let (provider_end, consumer_end) = pair("https://evil.example", "https://c.example");
        provider_end.link.post(&ready_data("api"), "*").unwrap();

        let config = ConsumerConfig {
            timeout_ms: 50,
            allowed_origins: OriginPolicy::list(["https://p.example"]),
            ..Default::default()
        };
        assert!(matches!(
            create_consumer(consumer_end, "api", config).await,
            Err(RpcError::InitTimeout(_))
        ));
    }
}
