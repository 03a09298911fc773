//! GPU capability catalog
//! Pure, process-wide lookup over the fixed GPU class partial order.
//! Author: Oveshen Govender | SupercomputeR

use serde::{Deserialize, Serialize};

use crate::error::{PlebiscitoError, Result};

/// Closed enumeration of device classes, ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuType {
    Misc,
    T4,
    P100,
    V100,
    A100,
}

impl GpuType {
    /// All known classes, in ascending capability order. The index in this
    /// slice *is* the rank used by `can_host`/`speedup`/`corrective_factor`.
    pub const ALL: [GpuType; 5] = [
        GpuType::Misc,
        GpuType::T4,
        GpuType::P100,
        GpuType::V100,
        GpuType::A100,
    ];

    fn rank(self) -> u8 {
        match self {
            GpuType::Misc => 0,
            GpuType::T4 => 1,
            GpuType::P100 => 2,
            GpuType::V100 => 3,
            GpuType::A100 => 4,
        }
    }

    /// Parse a GPU class by name, failing with `InvalidGpuClass` for
    /// anything outside the closed enumeration.
    pub fn parse(name: &str) -> Result<GpuType> {
        match name.to_ascii_uppercase().as_str() {
            "MISC" => Ok(GpuType::Misc),
            "T4" => Ok(GpuType::T4),
            "P100" => Ok(GpuType::P100),
            "V100" => Ok(GpuType::V100),
            "A100" => Ok(GpuType::A100),
            other => Err(PlebiscitoError::InvalidGpuClass(other.to_string())),
        }
    }
}

/// `true` iff `host` is at least as capable as `job` on the fixed partial
/// order of §4.1.
pub fn can_host(host: GpuType, job: GpuType) -> bool {
    host.rank() >= job.rank()
}

/// Multiplicative performance ratio of hosting a `job`-class workload on a
/// `host`-class device. Zero iff `!can_host(host, job)`; otherwise `>= 1.0`,
/// increasing with the rank gap between host and job class.
pub fn speedup(host: GpuType, job: GpuType) -> f64 {
    if !can_host(host, job) {
        return 0.0;
    }
    let gap = (host.rank() as i32 - job.rank() as i32) as f64;
    1.0 + 0.35 * gap
}

/// Mismatch level used by `corrective_factor`: the rank gap between host and
/// job class. Zero when the classes match exactly.
fn mismatch_level(host: GpuType, job: GpuType) -> f64 {
    (host.rank() as i32 - job.rank() as i32).unsigned_abs() as f64
}

/// `1 - k * decrement`, where `k` is the table-defined mismatch level
/// between `host` and `job`. Used by the `LGF`/`SGF` utilities to slightly
/// favor better-matched hardware.
pub fn corrective_factor(host: GpuType, job: GpuType, decrement: f64) -> f64 {
    1.0 - mismatch_level(host, job) * decrement
}
