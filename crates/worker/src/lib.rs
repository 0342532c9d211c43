//! # worker
//!
//! why: serve training and prediction clients on top of the consensus core
//! relations: consumes raft-core's admission facade and model store
//! what: client tcp server, training subprocess, model lookup, status monitor

pub mod error;
pub mod models;
pub mod monitor;
pub mod server;
pub mod trainer;

pub use error::WorkerError;
pub use monitor::Monitor;
pub use server::WorkerServer;
pub use trainer::Trainer;
