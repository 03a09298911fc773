//! Simulator configuration: CLI surface layered over a serializable config
//! struct, the way the teacher's `EngineConfig` pairs a `Default` impl with
//! `serde` derives.
//! Author: Oveshen Govender | SupercomputeR

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::job::Utility;
use crate::rebid::RebidBand;

/// Command-line entry point. Every flag has a matching field on
/// `SimulatorConfig`; `clap` fills in defaults from `SimulatorConfig::default`
/// when a flag is omitted.
#[derive(Debug, Parser)]
#[command(name = "plebiscito", about = "Decentralized auction scheduler for multi-layer jobs")]
pub struct Cli {
    /// CSV file of candidate job templates (count, num_cpu, num_gpu,
    /// duration_median, bandwidth_median).
    #[arg(long)]
    pub dataset: String,

    /// Number of synthetic jobs to draw from the dataset.
    #[arg(long, default_value_t = 100)]
    pub entries_num: usize,

    /// Number of simulated nodes.
    #[arg(long, default_value_t = 16)]
    pub num_nodes: usize,

    /// Utility function every job uses, unless overridden per-job.
    #[arg(long, value_enum, default_value = "speedup")]
    pub utility: UtilityArg,

    /// GPU-class mismatch penalty coefficient fed to `corrective_factor`.
    #[arg(long, default_value_t = 0.05)]
    pub decrement: f64,

    /// Split a job across more than one node when no single node has a
    /// contiguous run large enough.
    #[arg(long, default_value_t = false)]
    pub split: bool,

    /// Enable periodic rebid sweeps.
    #[arg(long, default_value_t = false)]
    pub rebid: bool,

    /// Enforce the network-topology ownership-consistency invariant as a
    /// hard error instead of a logged warning.
    #[arg(long, default_value_t = false)]
    pub net_topology: bool,

    /// Prefix for the two output CSVs.
    #[arg(long, default_value = "run")]
    pub output_prefix: String,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum, Serialize, Deserialize)]
pub enum UtilityArg {
    Lgf,
    Sgf,
    Speedup,
    SpeedupV2,
    Util,
    Stefano,
    AlphaGpuCpu,
    AlphaGpuBw,
    Fgd,
}

impl From<UtilityArg> for Utility {
    fn from(value: UtilityArg) -> Self {
        match value {
            UtilityArg::Lgf => Utility::Lgf,
            UtilityArg::Sgf => Utility::Sgf,
            UtilityArg::Speedup => Utility::Speedup,
            UtilityArg::SpeedupV2 => Utility::SpeedupV2,
            UtilityArg::Util => Utility::Util,
            UtilityArg::Stefano => Utility::Stefano,
            UtilityArg::AlphaGpuCpu => Utility::AlphaGpuCpu,
            UtilityArg::AlphaGpuBw => Utility::AlphaGpuBw,
            UtilityArg::Fgd => Utility::Fgd,
        }
    }
}

/// The resolved, serializable configuration a `Controller` runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub dataset: String,
    pub entries_num: usize,
    pub num_nodes: usize,
    pub utility: Utility,
    pub decrement: f64,
    pub split: bool,
    pub rebid: bool,
    pub net_topology: bool,
    pub output_prefix: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            dataset: "dataset.csv".to_string(),
            entries_num: 100,
            num_nodes: 16,
            utility: Utility::Speedup,
            decrement: 0.05,
            split: false,
            rebid: false,
            net_topology: false,
            output_prefix: "run".to_string(),
        }
    }
}

impl From<Cli> for SimulatorConfig {
    fn from(cli: Cli) -> Self {
        Self {
            dataset: cli.dataset,
            entries_num: cli.entries_num,
            num_nodes: cli.num_nodes,
            utility: cli.utility.into(),
            decrement: cli.decrement,
            split: cli.split,
            rebid: cli.rebid,
            net_topology: cli.net_topology,
            output_prefix: cli.output_prefix,
        }
    }
}

impl SimulatorConfig {
    pub fn rebid_band(&self) -> RebidBand {
        RebidBand::default()
    }

    /// Build the filename for one of the two output reports, matching
    /// `<prefix>_<utility>_<schedalg>_<decrement>_<split|nosplit>_
    /// <rebid|norebid>_<report>.csv`.
    pub fn report_filename(&self, schedalg: &str, report: &str) -> String {
        format!(
            "{}_{:?}_{}_{}_{}_{}_{}.csv",
            self.output_prefix,
            self.utility,
            schedalg,
            self.decrement,
            if self.split { "split" } else { "nosplit" },
            if self.rebid { "rebid" } else { "norebid" },
            report,
        )
    }
}
