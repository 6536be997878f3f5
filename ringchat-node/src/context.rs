use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use ringchat_core::{LogicalClock, NodeId, RingConfig};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::chat::FollowerRegistry;
use crate::peer::Peer;
use crate::registry::PeerRegistry;
use crate::shutdown::Shutdown;
use crate::sink::EventSink;

/// Network-membership state. Drives leader-election behavior and
/// ring-repair logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    None,
    SingleNode,
    Ring,
}

/// All process-wide state for one running peer, gathered into a single
/// value instead of reaching for statics: `start_network`/`join_network`
/// construct one `PeerContext`, wrap it in an `Arc`, and every task (reader,
/// keep-alive, election timer, ring-repair loop) shares that handle.
pub struct PeerContext {
    pub node_id: NodeId,
    pub config: RingConfig,
    pub clock: LogicalClock,
    pub registry: PeerRegistry,
    pub followers: FollowerRegistry,
    pub sink: Arc<dyn EventSink>,

    pub(crate) network_state: StdMutex<NetworkState>,
    pub(crate) leader_id: AtomicU64,
    pub(crate) old_leader_id: AtomicU64,
    pub(crate) twice_next_id: AtomicU64,
    pub(crate) election_participated: AtomicBool,
    pub(crate) election_start_trigger: AtomicBool,
    pub(crate) ring_broken: AtomicBool,
    pub(crate) election_timer: StdMutex<Option<JoinHandle<()>>>,

    pub(crate) nickname: StdMutex<String>,
    pub(crate) chat_participation: AtomicBool,
    /// The follower-side connection to the current leader, if this peer is
    /// itself a chat participant.
    pub(crate) leader_connection: AsyncMutex<Option<Arc<Peer>>>,

    pub(crate) listen_addr: StdMutex<Option<SocketAddr>>,
    pub(crate) listener_task: StdMutex<Option<JoinHandle<()>>>,

    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

impl PeerContext {
    pub fn new(node_id: NodeId, config: RingConfig, sink: Arc<dyn EventSink>) -> Arc<PeerContext> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(PeerContext {
            node_id,
            config,
            clock: LogicalClock::new(),
            registry: PeerRegistry::new(),
            followers: FollowerRegistry::new(),
            sink,

            network_state: StdMutex::new(NetworkState::None),
            leader_id: AtomicU64::new(0),
            old_leader_id: AtomicU64::new(0),
            twice_next_id: AtomicU64::new(0),
            election_participated: AtomicBool::new(false),
            election_start_trigger: AtomicBool::new(false),
            ring_broken: AtomicBool::new(false),
            election_timer: StdMutex::new(None),

            nickname: StdMutex::new(String::new()),
            chat_participation: AtomicBool::new(false),
            leader_connection: AsyncMutex::new(None),

            listen_addr: StdMutex::new(None),
            listener_task: StdMutex::new(None),

            shutdown_tx,
        })
    }

    pub fn network_state(&self) -> NetworkState {
        *self.network_state.lock().unwrap()
    }

    pub fn leader_id(&self) -> NodeId {
        NodeId::from_raw(self.leader_id.load(Ordering::SeqCst))
    }

    pub fn old_leader_id(&self) -> NodeId {
        NodeId::from_raw(self.old_leader_id.load(Ordering::SeqCst))
    }

    pub fn twice_next_id(&self) -> NodeId {
        NodeId::from_raw(self.twice_next_id.load(Ordering::SeqCst))
    }

    pub fn is_chat_participant(&self) -> bool {
        self.chat_participation.load(Ordering::SeqCst)
    }

    pub fn nickname(&self) -> String {
        self.nickname.lock().unwrap().clone()
    }

    pub fn set_nickname(&self, name: String) {
        *self.nickname.lock().unwrap() = name;
    }

    pub fn is_listening(&self) -> bool {
        self.listen_addr.lock().unwrap().is_some()
    }

    pub fn subscribe_shutdown(&self) -> Shutdown {
        Shutdown::new(self.shutdown_tx.subscribe())
    }

    pub fn notify_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
