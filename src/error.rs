//! Error taxonomy for Plebiscito
//! Author: Oveshen Govender | SupercomputeR

use thiserror::Error;

/// Node identifier used throughout the protocol.
pub type NodeId = u64;
/// Job identifier used throughout the protocol.
pub type JobId = u64;

/// Domain errors raised by the core scheduler.
///
/// An empty-queue poll and an unsuccessful bid are not modeled as variants
/// here: they are normal control flow (a timed-out channel receive, or
/// `false`/`None` returned by the bidding engine) rather than failures.
#[derive(Debug, Error)]
pub enum PlebiscitoError {
    /// Programmer error: the GPU catalog was asked about a class it has no
    /// entry for.
    #[error("unknown GPU class: {0}")]
    InvalidGpuClass(String),

    /// Protocol invariant violation: ownership of a contiguous run changed
    /// mid-run during deconfliction. Only fatal when network-topology mode
    /// is active; otherwise the caller should log and swallow it.
    #[error("protocol invariant violated for job {job_id} at node {node_id}: {detail}")]
    InternalError {
        job_id: JobId,
        node_id: NodeId,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, PlebiscitoError>;
