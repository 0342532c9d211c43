//! # raft-core
//!
//! why: implement leader election, log replication, and command apply for the cluster
//! relations: builds on raft-storage for durability, exposed to the worker crate
//! what: consensus node, timers, json-line rpc transport, model store apply handler

pub mod apply;
pub mod config;
pub mod message;
pub mod node;
pub mod rpc;

pub use apply::{Command, ModelStore};
pub use config::RaftConfig;
pub use message::{LeaderInfo, RpcMessage};
pub use node::{NodeState, NodeStatus, Peer, RaftNode};
pub use raft_storage::LogEntry;
