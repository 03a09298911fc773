//! Plebiscito: a decentralized auction-and-consensus scheduler that places
//! multi-layer GPU/CPU jobs across a fleet of heterogeneous compute nodes.
//! Author: Oveshen Govender | SupercomputeR

pub mod bidbook;
pub mod bidding;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod deconfliction;
pub mod error;
pub mod gpu;
pub mod job;
pub mod ledger;
pub mod node;
pub mod rebid;
