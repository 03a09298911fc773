//! Per-node event loop: the `NodeWorker` async task that owns one node's
//! ledger and bid book and reacts to controller/neighbor messages.
//! Author: Oveshen Govender | SupercomputeR

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::bidbook::{BidBook, BidEntry};
use crate::bidding;
use crate::deconfliction;
use crate::error::{JobId, NodeId, Result};
use crate::gpu::GpuType;
use crate::job::{Job, Utility};
use crate::ledger::NodeLedger;

/// Default poll timeout for a node's inbox when idle. Network-topology
/// bandwidth accounting would shorten this; left wired but unused since that
/// accounting is out of scope.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Messages a node worker can receive, from either the controller or a
/// neighbor worker.
pub enum NodeMessage {
    /// A new job to consider bidding on. `from` is the neighbor it was
    /// relayed from, `None` for a controller-originated submission; carried
    /// so first-contact forwarding can exclude the originating edge.
    NewJob { job: Job, from: Option<NodeId> },
    /// A neighbor's bid-book view for a job, to reconcile against ours.
    Bid { from: NodeId, job: Job, snapshot: crate::bidbook::BidEntry },
    /// The controller is retracting a job (e.g. it finished or was dropped);
    /// release any footprint we hold and forget it.
    Unallocate(JobId),
    /// Cooperative shutdown.
    Shutdown,
    /// On-demand state dump for the controller's snapshotting step, answered
    /// over the attached `oneshot` rather than pushed proactively, matching
    /// the return-dictionary fields (`id, bids, counter, updated_cpu,
    /// updated_gpu, updated_bw, gpu_type`) without requiring a second
    /// persistent channel per node.
    Snapshot(oneshot::Sender<NodeSnapshot>),
}

impl std::fmt::Debug for NodeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeMessage::NewJob { job, from } => {
                f.debug_struct("NewJob").field("job", job).field("from", from).finish()
            }
            NodeMessage::Bid { from, job, snapshot } => f
                .debug_struct("Bid")
                .field("from", from)
                .field("job", job)
                .field("snapshot", snapshot)
                .finish(),
            NodeMessage::Unallocate(id) => f.debug_tuple("Unallocate").field(id).finish(),
            NodeMessage::Shutdown => write!(f, "Shutdown"),
            NodeMessage::Snapshot(_) => write!(f, "Snapshot(..)"),
        }
    }
}

/// What a worker reports back to the controller after processing a batch.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub job_id: JobId,
    pub consensus_reached: bool,
}

/// The node's state dictionary, handed back in response to
/// `NodeMessage::Snapshot`.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub gpu_type: GpuType,
    pub updated_cpu: f64,
    pub updated_gpu: f64,
    pub updated_bw: f64,
    pub job_hosted: std::collections::HashSet<JobId>,
    pub bids: HashMap<JobId, BidEntry>,
}

pub struct NodeWorker {
    pub node_id: NodeId,
    pub ledger: NodeLedger,
    pub bidbook: BidBook,
    pub use_net_topology: bool,
    jobs: HashMap<JobId, Job>,
    inbox: mpsc::Receiver<NodeMessage>,
    neighbors: HashMap<NodeId, mpsc::Sender<NodeMessage>>,
    reports: mpsc::Sender<NodeReport>,
    /// Shared idle-quiescence signal: every worker bumps this exactly once
    /// per continuously-empty poll cycle and drops it back on the next
    /// non-empty one, so the controller's `all_idle` fires only when every
    /// node agrees it has nothing left to process.
    idle_count: Arc<AtomicUsize>,
    all_idle: Arc<Notify>,
    total_nodes: usize,
}

impl NodeWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        ledger: NodeLedger,
        use_net_topology: bool,
        inbox: mpsc::Receiver<NodeMessage>,
        neighbors: HashMap<NodeId, mpsc::Sender<NodeMessage>>,
        reports: mpsc::Sender<NodeReport>,
        idle_count: Arc<AtomicUsize>,
        all_idle: Arc<Notify>,
        total_nodes: usize,
    ) -> Self {
        Self {
            node_id,
            ledger,
            bidbook: BidBook::new(),
            use_net_topology,
            jobs: HashMap::new(),
            inbox,
            neighbors,
            reports,
            idle_count,
            all_idle,
            total_nodes,
        }
    }

    /// Run until a `Shutdown` message arrives or the channel closes.
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn run(&mut self) -> Result<()> {
        info!("node worker starting");
        let mut reported_idle = false;
        loop {
            let batch = self.drain_batch().await;
            if batch.is_empty() {
                if !reported_idle {
                    reported_idle = true;
                    if self.idle_count.fetch_add(1, Ordering::SeqCst) + 1 == self.total_nodes {
                        self.all_idle.notify_waiters();
                    }
                }
                continue;
            }
            if reported_idle {
                reported_idle = false;
                self.idle_count.fetch_sub(1, Ordering::SeqCst);
            }
            for msg in batch {
                match msg {
                    NodeMessage::Shutdown => {
                        info!("node worker shutting down");
                        return Ok(());
                    }
                    NodeMessage::NewJob { job, from } => self.handle_new_job(job, from).await?,
                    NodeMessage::Bid { from, job, snapshot } => {
                        self.handle_bid(from, job, snapshot).await?
                    }
                    NodeMessage::Unallocate(job_id) => self.handle_unallocate(job_id),
                    NodeMessage::Snapshot(reply) => {
                        let _ = reply.send(self.snapshot());
                    }
                }
            }
        }
    }

    /// Collect every message already queued, grouped by arrival order. A
    /// short `timeout` keeps the loop responsive to shutdown even when the
    /// inbox is empty (the `TransientEmpty` control-flow path).
    async fn drain_batch(&mut self) -> Vec<NodeMessage> {
        let mut batch = Vec::new();
        match timeout(POLL_TIMEOUT, self.inbox.recv()).await {
            Ok(Some(first)) => batch.push(first),
            Ok(None) | Err(_) => return batch,
        }
        while let Ok(next) = self.inbox.try_recv() {
            batch.push(next);
        }
        batch
    }

    async fn handle_new_job(&mut self, job: Job, from: Option<NodeId>) -> Result<()> {
        let first_msg = !self.jobs.contains_key(&job.job_id);
        self.jobs.insert(job.job_id, job.clone());
        let mut entry = self.bidbook.entry(job.job_id, job.num_layers()).clone();
        let outcome = if job.utility == Utility::Fgd {
            bidding::bid_fgd(self.node_id, &self.ledger, &mut entry, &job)
        } else {
            bidding::bid(self.node_id, &self.ledger, &mut entry, &job)
        };
        *self.bidbook.entry(job.job_id, job.num_layers()) = entry.clone();

        let mut need_rebroadcast = false;
        if let Some(outcome) = outcome {
            debug!(job = job.job_id, layers = ?outcome.layers, "placed bid");
            for (l, demand) in job.layers.iter().enumerate() {
                if outcome.layers.contains(&l) {
                    self.ledger.reserve(job.job_id, demand);
                }
            }
            need_rebroadcast = true;
        }

        // First contact with this job, independent of whether this node won
        // any layers: relay the original announcement so the fleet converges
        // even across nodes that can never host the job's GPU class.
        if first_msg {
            self.forward_job(&job, from).await;
        }
        if need_rebroadcast {
            self.broadcast(job.job_id, &job, &entry).await;
        }
        Ok(())
    }

    async fn handle_bid(
        &mut self,
        from: NodeId,
        job: Job,
        snapshot: crate::bidbook::BidEntry,
    ) -> Result<()> {
        let first_msg = !self.jobs.contains_key(&job.job_id);
        self.jobs.entry(job.job_id).or_insert_with(|| job.clone());
        let mut entry = self.bidbook.entry(job.job_id, job.num_layers()).clone();

        if entry.same_as(&snapshot) && entry.is_fully_claimed() {
            entry.consensus_count += 1;
            *self.bidbook.entry(job.job_id, job.num_layers()) = entry.clone();
            if first_msg {
                self.forward_job(&job, Some(from)).await;
            }
            let _ = self
                .reports
                .send(NodeReport { node_id: self.node_id, job_id: job.job_id, consensus_reached: true })
                .await;
            return Ok(());
        }

        let before_owned = entry.layers_owned_by(self.node_id);
        let outcome = deconfliction::deconflict(
            from,
            self.node_id,
            &snapshot,
            &mut entry,
            job.job_id,
            self.use_net_topology,
        )?;
        let after_owned = entry.layers_owned_by(self.node_id);

        for l in before_owned.iter().filter(|l| !after_owned.contains(l)) {
            self.ledger.release(job.job_id, &job.layers[*l]);
        }

        let mut need_rebroadcast = outcome.rebroadcast.is_some();

        if outcome.allow_bidding {
            let bid_outcome = if job.utility == Utility::Fgd {
                bidding::bid_fgd(self.node_id, &self.ledger, &mut entry, &job)
            } else {
                bidding::bid(self.node_id, &self.ledger, &mut entry, &job)
            };
            if let Some(bo) = bid_outcome {
                for (l, demand) in job.layers.iter().enumerate() {
                    if bo.layers.contains(&l) {
                        self.ledger.reserve(job.job_id, demand);
                    }
                }
                need_rebroadcast = true;
            }
        }

        entry.forward_count += 1;
        *self.bidbook.entry(job.job_id, job.num_layers()) = entry.clone();

        if first_msg {
            self.forward_job(&job, Some(from)).await;
        }
        if let Some(reset_snapshot) = outcome.rebroadcast {
            self.broadcast(job.job_id, &job, &reset_snapshot).await;
        } else if need_rebroadcast {
            self.broadcast(job.job_id, &job, &entry).await;
        }

        let _ = self
            .reports
            .send(NodeReport { node_id: self.node_id, job_id: job.job_id, consensus_reached: entry.is_fully_claimed() })
            .await;
        Ok(())
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.node_id,
            gpu_type: self.ledger.gpu_type,
            updated_cpu: self.ledger.updated_cpu,
            updated_gpu: self.ledger.updated_gpu,
            updated_bw: self.ledger.updated_bw,
            job_hosted: self.ledger.job_hosted.clone(),
            bids: self.bidbook.snapshot(),
        }
    }

    fn handle_unallocate(&mut self, job_id: JobId) {
        if let Some(job) = self.jobs.remove(&job_id) {
            if let Some(entry) = self.bidbook.remove(job_id) {
                for l in entry.layers_owned_by(self.node_id) {
                    self.ledger.release(job_id, &job.layers[l]);
                }
            }
            // Remember this node hosted the job, for rebid affinity on a
            // future resubmission, per the event loop's release contract.
            self.ledger.job_hosted.insert(job_id);
        } else {
            warn!(job = job_id, "unallocate for unknown job");
        }
    }

    /// Forward the original job announcement to every neighbor except the
    /// one it arrived from, exactly once per job per node.
    async fn forward_job(&mut self, job: &Job, from: Option<NodeId>) {
        for (&neighbor, tx) in self.neighbors.clone().iter() {
            if Some(neighbor) == from {
                continue;
            }
            let _ = tx.send(NodeMessage::NewJob { job: job.clone(), from: Some(self.node_id) }).await;
        }
    }

    /// Suppress an identical rebroadcast to a neighbor using the
    /// idempotence cache, mirroring `last_sent_msg`.
    async fn broadcast(&mut self, job_id: JobId, job: &Job, entry: &crate::bidbook::BidEntry) {
        let body = format!("{:?}{:?}", entry.auction_id, entry.bid);
        for (&neighbor, tx) in self.neighbors.clone().iter() {
            let key = (neighbor, job_id);
            if self.ledger.last_sent_msg.get(&key) == Some(&body) {
                continue;
            }
            self.ledger.last_sent_msg.insert(key, body.clone());
            let _ = tx
                .send(NodeMessage::Bid { from: self.node_id, job: job.clone(), snapshot: entry.clone() })
                .await;
        }
    }
}
