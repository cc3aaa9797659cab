//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Actor-owned listener set delivering samples to every connected listener."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
//! The listener set lives inside a single actor task. Connect, disconnect and
//! publish arrive as messages on one channel, so every publish observes the
//! set exactly as left by the commands queued before it.
//!
//! Each listener owns a bounded queue. Delivery is a non-blocking `try_send`;
//! a full or closed queue counts as a failed delivery and removes the listener
//! on the spot.
//!
//! The command channel is bounded too. A publish that finds it full is
//! rejected with [`HubError::Backlogged`] rather than queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vgraph_metrics::GenerationMetrics;
use vgraph_sim::Sample;

use crate::error::HubError;

pub type ListenerId = u64;

/// Commands the actor may have pending before publishes are rejected.
pub const COMMAND_CAPACITY: usize = 8192;

enum HubCommand {
    Connect {
        reply: oneshot::Sender<(ListenerId, mpsc::Receiver<Arc<Sample>>)>,
    },
    Disconnect {
        id: ListenerId,
    },
    Publish {
        sample: Arc<Sample>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Cloneable handle to the hub actor.
#[derive(Clone)]
pub struct BroadcastHub {
    commands: mpsc::Sender<HubCommand>,
    listeners: Arc<AtomicUsize>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BroadcastHub {
    /// Spawn the hub actor. `listener_capacity` bounds each listener's queue.
    pub fn spawn(listener_capacity: usize, metrics: Option<GenerationMetrics>) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let listeners = Arc::new(AtomicUsize::new(0));
        let actor = HubActor {
            listeners: HashMap::new(),
            next_id: 1,
            capacity: listener_capacity.max(1),
            count: listeners.clone(),
            metrics,
        };
        let task = tokio::spawn(actor.run(rx));
        Self {
            commands,
            listeners,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Register a new listener. It receives every sample published after
    /// this call returns.
    pub async fn connect(&self) -> Result<ListenerConnection, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Connect { reply })
            .await
            .map_err(|_| HubError::Closed)?;
        let (id, receiver) = response.await.map_err(|_| HubError::Closed)?;
        Ok(ListenerConnection {
            id,
            receiver,
            commands: self.commands.clone(),
            connected: true,
        })
    }

    /// Deregister a listener. Unknown or already removed ids are ignored.
    pub fn disconnect(&self, id: ListenerId) {
        send_disconnect(&self.commands, id);
    }

    /// Queue `sample` for delivery to every registered listener.
    ///
    /// Never waits: a full command channel drops the sample.
    pub fn publish(&self, sample: Sample) -> Result<(), HubError> {
        self.commands
            .try_send(HubCommand::Publish {
                sample: Arc::new(sample),
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => HubError::Backlogged,
                mpsc::error::TrySendError::Closed(_) => HubError::Closed,
            })
    }

    /// Listener count as last updated by the actor.
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    /// Listener count after every previously queued command has been applied.
    pub async fn settled_listener_count(&self) -> Result<usize, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Count { reply })
            .await
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Drop every listener and stop the actor.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(HubCommand::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "broadcast hub task failed");
            }
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

/// One registered listener's end of the hub.
///
/// Dropping the connection deregisters it.
pub struct ListenerConnection {
    id: ListenerId,
    receiver: mpsc::Receiver<Arc<Sample>>,
    commands: mpsc::Sender<HubCommand>,
    connected: bool,
}

impl ListenerConnection {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Next sample, or `None` once disconnected or evicted.
    pub async fn recv(&mut self) -> Option<Arc<Sample>> {
        if !self.connected {
            return None;
        }
        let sample = self.receiver.recv().await;
        if sample.is_none() {
            self.connected = false;
        }
        sample
    }

    /// Next already-queued sample, without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Sample>> {
        if !self.connected {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(sample) => Some(sample),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.connected = false;
                None
            }
        }
    }

    /// Deregister from the hub. Idempotent.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.receiver.close();
        send_disconnect(&self.commands, self.id);
    }
}

/// Queue a disconnect without waiting. When the channel is full the command
/// is sent from a spawned task; outside a runtime the closed receiver still
/// gets the listener evicted on the next publish.
fn send_disconnect(commands: &mpsc::Sender<HubCommand>, id: ListenerId) {
    match commands.try_send(HubCommand::Disconnect { id }) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(command)) => {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let commands = commands.clone();
                runtime.spawn(async move {
                    let _ = commands.send(command).await;
                });
            }
        }
    }
}

impl Drop for ListenerConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ListenerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConnection")
            .field("id", &self.id)
            .field("connected", &self.connected)
            .finish()
    }
}

struct HubActor {
    listeners: HashMap<ListenerId, mpsc::Sender<Arc<Sample>>>,
    next_id: ListenerId,
    capacity: usize,
    count: Arc<AtomicUsize>,
    metrics: Option<GenerationMetrics>,
}

impl HubActor {
    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Connect { reply } => self.connect(reply),
                HubCommand::Disconnect { id } => {
                    if self.listeners.remove(&id).is_some() {
                        info!(listener_id = id, "listener disconnected");
                        self.update_count();
                    }
                }
                HubCommand::Publish { sample } => self.publish(sample),
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.listeners.len());
                }
                HubCommand::Shutdown => break,
            }
        }
        self.listeners.clear();
        self.update_count();
        debug!("broadcast hub stopped");
    }

    fn connect(&mut self, reply: oneshot::Sender<(ListenerId, mpsc::Receiver<Arc<Sample>>)>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::channel(self.capacity);
        self.listeners.insert(id, tx);
        self.update_count();
        if reply.send((id, rx)).is_err() {
            debug!(listener_id = id, "listener abandoned before registration");
            self.listeners.remove(&id);
            self.update_count();
            return;
        }
        info!(listener_id = id, listeners = self.listeners.len(), "listener connected");
    }

    fn publish(&mut self, sample: Arc<Sample>) {
        let metrics = &self.metrics;
        let before = self.listeners.len();
        self.listeners.retain(|id, tx| match tx.try_send(sample.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(listener_id = *id, "listener queue full; evicting");
                if let Some(metrics) = metrics {
                    metrics.record_eviction("full");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(listener_id = *id, "listener gone; evicting");
                if let Some(metrics) = metrics {
                    metrics.record_eviction("closed");
                }
                false
            }
        });
        if self.listeners.len() != before {
            self.update_count();
        }
    }

    fn update_count(&self) {
        let count = self.listeners.len();
        self.count.store(count, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.set_listeners(count);
        }
    }
}
