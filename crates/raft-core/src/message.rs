//! # message
//!
//! why: define all consensus rpc message types for node communication
//! relations: used by node.rs for state transitions, serialized as json lines by rpc.rs
//! what: RpcMessage enum, LeaderInfo redirect hint

use raft_storage::LogEntry;
use serde::{Deserialize, Serialize};

/// a leader's client-facing address, `[host, client_port]` on the wire
///
/// followers record this from heartbeats and hand it to clients so
/// writes can be redirected to the leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo(pub String, pub u16);

impl LeaderInfo {
    pub fn host(&self) -> &str {
        &self.0
    }

    pub fn client_port(&self) -> u16 {
        self.1
    }
}

/// All possible consensus messages between peers
///
/// one message per `\n`-terminated utf-8 json line; the `type` field
/// discriminates. a connection carries one request and one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RpcMessage {
    /// Request a vote during leader election
    #[serde(rename = "REQUEST_VOTE")]
    RequestVote { term: u64, candidate_id: String },
    /// Response to a vote request
    #[serde(rename = "VOTE_RESPONSE")]
    VoteResponse { term: u64, vote_granted: bool },
    /// Replicate log entries (also serves as heartbeat when entries is empty)
    #[serde(rename = "APPEND_ENTRIES")]
    AppendEntries {
        term: u64,
        leader_id: LeaderInfo,
        entries: Vec<LogEntry>,
        /// carried for wire compatibility; not consulted by this design
        prev_log_index: i64,
        /// carried for wire compatibility; not consulted by this design
        prev_log_term: u64,
        leader_commit: i64,
    },
    /// Response to AppendEntries
    #[serde(rename = "APPEND_RESPONSE")]
    AppendResponse { term: u64, success: bool },
}
