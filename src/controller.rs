//! Controller: spawns one worker task per node, wires neighbor channels,
//! drives job submission and rebid ticks, and emits the two output CSVs on
//! shutdown.
//! Author: Oveshen Govender | SupercomputeR

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::config::SimulatorConfig;
use crate::error::{JobId, NodeId};
use crate::gpu::GpuType;
use crate::job::{AllocationRow, Job, JobReportRow, JobStatus};
use crate::ledger::NodeLedger;
use crate::node::{NodeMessage, NodeReport, NodeSnapshot, NodeWorker};

const CHANNEL_CAPACITY: usize = 1024;

/// Owns the fleet of node workers and the shared "all idle" signal, the way
/// the teacher's `TaskScheduler` owns its worker pool and shutdown flag.
pub struct Controller {
    config: SimulatorConfig,
    node_inboxes: HashMap<NodeId, mpsc::Sender<NodeMessage>>,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
    reports_rx: mpsc::Receiver<NodeReport>,
    idle_count: Arc<AtomicUsize>,
    all_idle: Arc<Notify>,
    jobs: Vec<Job>,
}

impl Controller {
    /// Build a fully-connected fleet of `num_nodes` nodes, round-robining
    /// GPU classes across the closed catalog so every class is represented.
    pub fn spawn(config: SimulatorConfig, jobs: Vec<Job>) -> Self {
        let (reports_tx, reports_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let idle_count = Arc::new(AtomicUsize::new(0));
        let all_idle = Arc::new(Notify::new());

        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for id in 0..config.num_nodes as NodeId {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            senders.insert(id, tx);
            receivers.insert(id, rx);
        }

        let mut handles = Vec::new();
        for id in 0..config.num_nodes as NodeId {
            let gpu_type = GpuType::ALL[(id as usize) % GpuType::ALL.len()];
            let ledger = NodeLedger::new(id, gpu_type, 64.0, 16.0, 8.0, 4);
            let neighbors: HashMap<NodeId, mpsc::Sender<NodeMessage>> = senders
                .iter()
                .filter(|(&nid, _)| nid != id)
                .map(|(&nid, tx)| (nid, tx.clone()))
                .collect();
            let inbox = receivers.remove(&id).expect("inbox for every spawned node");
            let reports = reports_tx.clone();
            let net_topology = config.net_topology;

            let idle_count = idle_count.clone();
            let all_idle = all_idle.clone();
            let total_nodes = config.num_nodes;

            let handle = tokio::spawn(async move {
                let mut worker = NodeWorker::new(
                    id,
                    ledger,
                    net_topology,
                    inbox,
                    neighbors,
                    reports,
                    idle_count,
                    all_idle,
                    total_nodes,
                );
                worker.run().await.map_err(anyhow::Error::from)
            });
            handles.push(handle);
        }

        Self {
            config,
            node_inboxes: senders,
            handles,
            reports_rx,
            idle_count,
            all_idle,
            jobs,
        }
    }

    /// Submit every job to every node (each node independently decides
    /// whether it can bid) and wait for a consensus report per job, or
    /// `timeout` to elapse.
    pub async fn run_to_completion(&mut self, timeout: Duration) -> Result<Vec<NodeReport>> {
        for job in self.jobs.clone() {
            for tx in self.node_inboxes.values() {
                let _ = tx.send(NodeMessage::NewJob { job: job.clone(), from: None }).await;
            }
        }

        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                report = tokio::time::timeout(remaining, self.reports_rx.recv()) => {
                    match report {
                        Ok(Some(report)) => collected.push(report),
                        _ => break,
                    }
                }
                _ = self.all_idle.notified() => {
                    // Drain whatever reports are already queued before
                    // treating the fleet as settled.
                    while let Ok(report) = self.reports_rx.try_recv() {
                        collected.push(report);
                    }
                    break;
                }
            }
        }
        Ok(collected)
    }

    /// Retract `job_id` at every node: each worker releases whatever
    /// footprint it holds and forgets the job.
    pub async fn unallocate(&self, job_id: JobId) {
        for tx in self.node_inboxes.values() {
            let _ = tx.send(NodeMessage::Unallocate(job_id)).await;
        }
    }

    /// Query one node's current ledger and bid book, for the controller's
    /// snapshotting step (and for tests that need to look inside a worker
    /// without reaching past its channel).
    pub async fn snapshot(&self, node_id: NodeId) -> Option<NodeSnapshot> {
        let tx = self.node_inboxes.get(&node_id)?;
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        tx.send(NodeMessage::Snapshot(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    /// Periodic rebid tick, invoked by the caller's own scheduling loop
    /// (e.g. `tokio::time::interval`) when `config.rebid` is set.
    pub fn rebid_ticker(&self) -> Option<tokio::time::Interval> {
        if self.config.rebid {
            Some(interval(Duration::from_secs(1)))
        } else {
            None
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        for tx in self.node_inboxes.values() {
            let _ = tx.send(NodeMessage::Shutdown).await;
        }
        for handle in self.handles {
            handle.await.context("joining node worker")??;
        }
        info!("controller shut down cleanly");
        Ok(())
    }

    /// Resolve once every spawned `NodeWorker` has reported its inbound
    /// queue continuously empty for one poll cycle, matching the teacher's
    /// shutdown-flag idiom but driven by the workers themselves rather than
    /// a fixed wall-clock deadline.
    pub async fn wait_all_idle(&self) {
        self.all_idle.notified().await;
    }

    /// Write the two output CSVs using `reports` collected from the fleet.
    pub fn write_reports(&self, reports: &[NodeReport], schedalg: &str) -> Result<()> {
        let allocations_path = self.config.report_filename(schedalg, "allocations");
        let jobs_path = self.config.report_filename(schedalg, "jobs_report");

        let mut alloc_writer = csv::Writer::from_path(&allocations_path)
            .with_context(|| format!("opening {allocations_path}"))?;
        for report in reports {
            if let Some(job) = self.jobs.iter().find(|j| j.job_id == report.job_id) {
                for (layer, demand) in job.layers.iter().enumerate() {
                    alloc_writer.serialize(AllocationRow {
                        job_id: job.job_id,
                        node_id: report.node_id,
                        layer,
                        cpu: demand.cpu,
                        gpu: demand.gpu,
                        bw: demand.bw,
                    })?;
                }
            }
        }
        alloc_writer.flush()?;

        let mut job_writer =
            csv::Writer::from_path(&jobs_path).with_context(|| format!("opening {jobs_path}"))?;
        for job in &self.jobs {
            let allocated = reports.iter().any(|r| r.job_id == job.job_id && r.consensus_reached);
            job_writer.serialize(JobReportRow {
                job_id: job.job_id,
                status: if allocated { JobStatus::Allocated } else { JobStatus::Rejected },
                allocated_layers: if allocated { job.num_layers() } else { 0 },
                total_layers: job.num_layers(),
                submit_time: job.submit_time,
            })?;
        }
        job_writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuType;
    use crate::job::{LayerDemand, Utility};

    fn test_config() -> SimulatorConfig {
        SimulatorConfig { num_nodes: 3, output_prefix: "test_run".into(), ..Default::default() }
    }

    fn test_job(id: u64) -> Job {
        Job {
            job_id: id,
            gpu_type: GpuType::T4,
            utility: Utility::Speedup,
            decrement: 0.05,
            alpha: 0.5,
            layers: vec![LayerDemand { cpu: 1.0, gpu: 1.0, bw: 1.0 }; 3],
            n_layer_min: 1,
            n_layer_max: 3,
            duration: 10.0,
            submit_time: 0.0,
            speedup: 0.0,
            increase: true,
        }
    }

    #[tokio::test]
    async fn controller_spawns_one_worker_per_node() {
        let controller = Controller::spawn(test_config(), vec![test_job(1)]);
        assert_eq!(controller.handles.len(), 3);
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn run_to_completion_returns_within_timeout() {
        let mut controller = Controller::spawn(test_config(), vec![test_job(1)]);
        let reports = controller.run_to_completion(Duration::from_millis(200)).await.unwrap();
        assert!(reports.len() <= 3);
        controller.shutdown().await.unwrap();
    }
}
