//! # config
//!
//! why: centralize consensus timing so tests can run accelerated clusters
//! relations: consumed by node.rs timers and rpc.rs deadlines
//! what: RaftConfig with production defaults

/// configuration for raft timing (in milliseconds)
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// minimum election timeout in ms (default: 3000)
    pub election_timeout_min: u64,
    /// maximum election timeout in ms, exclusive (default: 5000)
    pub election_timeout_max: u64,
    /// heartbeat interval in ms (default: 1000)
    pub heartbeat_interval: u64,
    /// how long a candidate waits for votes in ms (default: 2000)
    pub vote_wait: u64,
    /// how long the leader waits for replication acks in ms (default: 5000)
    pub replicate_wait: u64,
    /// dial/read/write deadline for a single rpc in ms (default: 2000)
    pub rpc_deadline: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 3000,
            election_timeout_max: 5000,
            heartbeat_interval: 1000,
            vote_wait: 2000,
            replicate_wait: 5000,
            rpc_deadline: 2000,
        }
    }
}
