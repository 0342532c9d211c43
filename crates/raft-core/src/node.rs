//! # node
//!
//! why: define the raft node state machine, timers, and replication flow
//! relations: uses message.rs for rpc types, rpc.rs for transport, raft-storage for durability
//! what: NodeState enum, RaftNode handle, election/heartbeat loops, admission facade

use std::collections::HashMap;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RaftConfig;
use crate::message::{LeaderInfo, RpcMessage};
use crate::rpc;
use raft_storage::{FileStorage, LogEntry, Storage};

/// the three possible states a raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// passive state - listens for heartbeats, votes when asked
    Follower,
    /// transitional state - requesting votes to become leader
    Candidate,
    /// active state - appends to the log, replicates, sends heartbeats
    Leader,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Follower
    }
}

/// address record for a cluster peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub rpc_port: u16,
    pub client_port: u16,
}

impl Peer {
    pub fn new(host: impl Into<String>, rpc_port: u16, client_port: u16) -> Self {
        Self {
            host: host.into(),
            rpc_port,
            client_port,
        }
    }

    /// address of the peer's consensus rpc endpoint
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}

/// snapshot of a node's consensus state, served by the status monitor
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub id: String,
    pub state: NodeState,
    pub term: u64,
    pub leader: Option<LeaderInfo>,
    pub log_length: usize,
    pub commit_index: i64,
}

/// callback invoked once per committed entry, in commit order
pub type ApplyFn = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// mutable consensus state
///
/// a single mutex guards every field so multi-field invariants hold
/// across each transition; persistence happens inside the critical
/// section, before the rpc response that depends on it is sent
struct RaftState {
    /// latest term this node has seen; never decreases
    current_term: u64,
    /// candidate that received this node's vote in current_term, if any
    voted_for: Option<String>,
    /// the replicated log, 0-indexed
    log: Vec<LogEntry>,
    /// current role
    state: NodeState,
    /// highest log index known to be committed (-1 when nothing is)
    commit_index: i64,
    /// highest log index handed to the apply callback
    last_applied: i64,
    /// redirect hint for clients; learned from heartbeats
    leader: Option<LeaderInfo>,
    /// next log index to send to each peer (leader only)
    next_index: HashMap<String, usize>,
    /// highest log index known replicated on each peer (leader only)
    match_index: HashMap<String, i64>,
    /// stable storage; None runs the node without durability
    storage: Option<Box<dyn Storage>>,
}

impl RaftState {
    fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            state: NodeState::Follower,
            commit_index: -1,
            last_applied: -1,
            leader: None,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            storage: None,
        }
    }

    /// index of the last log entry, -1 when the log is empty
    fn last_index(&self) -> i64 {
        self.log.len() as i64 - 1
    }

    /// adopt a higher term and fall back to follower; the vote resets
    /// with the term
    fn step_down(&mut self, term: u64) {
        self.current_term = term;
        self.voted_for = None;
        self.state = NodeState::Follower;
    }

    /// write (term, vote, log) to stable storage
    ///
    /// failures are logged and the in-memory mutation is retained;
    /// durability is best-effort on a broken disk
    fn persist(&mut self) {
        let Some(storage) = self.storage.as_mut() else {
            return;
        };
        if let Err(err) = storage.save_state(self.current_term, self.voted_for.as_deref(), &self.log)
        {
            warn!("failed to persist raft state: {err}");
        }
    }
}

struct Shared {
    id: String,
    host: String,
    rpc_port: u16,
    client_port: u16,
    peers: Vec<Peer>,
    config: RaftConfig,
    state: Mutex<RaftState>,
    /// armed election deadline; None while leader
    timer: Mutex<Option<Instant>>,
    timer_signal: Condvar,
    apply_fn: Mutex<Option<ApplyFn>>,
    apply_tx: Mutex<Option<Sender<()>>>,
    stopped: AtomicBool,
}

/// handle to a consensus node; cheap to clone and share between the rpc
/// server, the client request layer, and the monitor
#[derive(Clone)]
pub struct RaftNode {
    shared: Arc<Shared>,
}

impl RaftNode {
    /// create a node identified by `host:client_port`, listening for
    /// peer rpcs on `rpc_port`
    pub fn new(host: impl Into<String>, rpc_port: u16, client_port: u16, peers: Vec<Peer>) -> Self {
        Self::with_config(host, rpc_port, client_port, peers, RaftConfig::default())
    }

    /// create a node with custom timing configuration
    pub fn with_config(
        host: impl Into<String>,
        rpc_port: u16,
        client_port: u16,
        peers: Vec<Peer>,
        config: RaftConfig,
    ) -> Self {
        let host = host.into();
        Self {
            shared: Arc::new(Shared {
                id: format!("{host}:{client_port}"),
                host,
                rpc_port,
                client_port,
                peers,
                config,
                state: Mutex::new(RaftState::new()),
                timer: Mutex::new(None),
                timer_signal: Condvar::new(),
                apply_fn: Mutex::new(None),
                apply_tx: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    // -- admission facade --

    /// stable identifier of this node (`host:client_port`)
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn is_leader(&self) -> bool {
        self.shared.state.lock().unwrap().state == NodeState::Leader
    }

    /// the current leader's client-facing address, if known
    pub fn current_leader(&self) -> Option<LeaderInfo> {
        self.shared.state.lock().unwrap().leader.clone()
    }

    /// snapshot of the node's consensus state
    pub fn status(&self) -> NodeStatus {
        let st = self.shared.state.lock().unwrap();
        NodeStatus {
            id: self.shared.id.clone(),
            state: st.state,
            term: st.current_term,
            leader: st.leader.clone(),
            log_length: st.log.len(),
            commit_index: st.commit_index,
        }
    }

    /// install the state-machine callback; must be called before start()
    pub fn set_apply_callback(&self, f: impl Fn(&serde_json::Value) + Send + Sync + 'static) {
        *self.shared.apply_fn.lock().unwrap() = Some(Arc::new(f));
    }

    /// persist consensus state under `dir`; must be called before start()
    pub fn set_persistence_path(&self, dir: impl AsRef<Path>) -> io::Result<()> {
        let storage = FileStorage::new(dir.as_ref())?;
        self.shared.state.lock().unwrap().storage = Some(Box::new(storage));
        Ok(())
    }

    /// swap in a storage implementation directly (testing hook)
    pub fn set_storage(&self, storage: Box<dyn Storage>) {
        self.shared.state.lock().unwrap().storage = Some(storage);
    }

    /// the number of nodes needed for a majority of the cluster
    pub fn quorum_size(&self) -> usize {
        (self.shared.peers.len() + 1) / 2 + 1
    }

    /// load persisted state, open the rpc listener, and arm the
    /// election timer; nodes always start as followers
    pub fn start(&self) -> io::Result<()> {
        {
            let mut st = self.shared.state.lock().unwrap();
            if let Some(storage) = st.storage.as_ref() {
                let (term, voted_for, log) = storage.load_state()?;
                if term > 0 || !log.is_empty() {
                    info!(
                        "{}: loaded state from disk (term={term}, log_len={})",
                        self.shared.id,
                        log.len()
                    );
                }
                st.current_term = term;
                st.voted_for = voted_for;
                st.log = log;
                st.state = NodeState::Follower;
            }
        }

        let listener = TcpListener::bind((self.shared.host.as_str(), self.shared.rpc_port))?;
        info!(
            "{}: consensus rpc listening on {}:{}",
            self.shared.id, self.shared.host, self.shared.rpc_port
        );

        let (tx, rx) = unbounded::<()>();
        *self.shared.apply_tx.lock().unwrap() = Some(tx);
        let node = self.clone();
        thread::Builder::new()
            .name(format!("raft-apply-{}", self.shared.id))
            .spawn(move || node.apply_loop(rx))
            .expect("failed to spawn apply dispatcher");

        let node = self.clone();
        thread::Builder::new()
            .name(format!("raft-rpc-{}", self.shared.id))
            .spawn(move || rpc::serve(listener, node))
            .expect("failed to spawn rpc server");

        let node = self.clone();
        thread::Builder::new()
            .name(format!("raft-timer-{}", self.shared.id))
            .spawn(move || node.election_timer_loop())
            .expect("failed to spawn election timer");

        self.reset_election_timer();
        Ok(())
    }

    /// stop background loops and close the rpc listener; in-flight
    /// handlers run to completion
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // wake the timer thread so it observes the flag
        self.shared.timer_signal.notify_all();
        // closing the apply channel drains the dispatcher out
        self.shared.apply_tx.lock().unwrap().take();
        // nudge the accept loop; it drops the listener once it sees the flag
        let _ = TcpStream::connect(("127.0.0.1", self.shared.rpc_port));
    }

    /// append a command on the leader and replicate it to a majority
    ///
    /// returns false on a non-leader, or when fewer than a majority of
    /// the cluster acknowledged within the replication window
    pub fn replicate(&self, command: serde_json::Value) -> bool {
        let (msg, index, term) = {
            let mut st = self.shared.state.lock().unwrap();
            if st.state != NodeState::Leader {
                return false;
            }
            let entry = LogEntry::new(st.current_term, command);
            st.log.push(entry.clone());
            st.persist();
            (
                self.append_entries_message(&st, vec![entry]),
                st.last_index(),
                st.current_term,
            )
        };

        let (tx, rx) = unbounded();
        for peer in &self.shared.peers {
            let tx = tx.clone();
            let peer = peer.clone();
            let msg = msg.clone();
            let deadline = self.rpc_deadline();
            thread::spawn(move || {
                let _ = tx.send(rpc::call(&peer.rpc_addr(), &msg, deadline));
            });
        }
        drop(tx);

        let mut acks = 1; // the leader's own copy counts
        let mut highest_term = term;
        let deadline = Instant::now() + Duration::from_millis(self.shared.config.replicate_wait);
        for _ in 0..self.shared.peers.len() {
            let Ok(resp) = rx.recv_deadline(deadline) else {
                break;
            };
            if let Some(RpcMessage::AppendResponse {
                term: resp_term,
                success,
            }) = resp
            {
                if success {
                    acks += 1;
                }
                if resp_term > highest_term {
                    highest_term = resp_term;
                }
            }
        }

        if highest_term > term {
            self.observe_term(highest_term);
            return false;
        }

        if acks >= self.quorum_size() {
            {
                let mut st = self.shared.state.lock().unwrap();
                if st.state != NodeState::Leader || st.current_term != term {
                    return false;
                }
                if index > st.commit_index {
                    st.commit_index = index;
                }
            }
            debug!("{}: committed index {index} with {acks} acks", self.shared.id);
            self.signal_apply();
            true
        } else {
            warn!(
                "{}: replication of index {index} reached only {acks}/{} nodes",
                self.shared.id,
                self.shared.peers.len() + 1
            );
            false
        }
    }

    // -- rpc handlers --

    /// handle a REQUEST_VOTE rpc from a candidate
    ///
    /// grants at most one vote per term; a higher term always forces a
    /// step-down first, which also clears the vote
    pub(crate) fn handle_request_vote(&self, term: u64, candidate_id: &str) -> RpcMessage {
        let (resp_term, granted) = {
            let mut st = self.shared.state.lock().unwrap();
            let mut changed = false;
            if term > st.current_term {
                st.step_down(term);
                changed = true;
            }

            let can_vote = match st.voted_for.as_deref() {
                None => true,
                Some(voted) => voted == candidate_id,
            };
            let granted = term >= st.current_term && can_vote;
            if granted && st.voted_for.as_deref() != Some(candidate_id) {
                st.voted_for = Some(candidate_id.to_owned());
                changed = true;
            }

            if changed {
                st.persist();
            }
            (st.current_term, granted)
        };

        if granted {
            info!("{}: voted for {candidate_id} in term {term}", self.shared.id);
            self.reset_election_timer();
        }
        RpcMessage::VoteResponse {
            term: resp_term,
            vote_granted: granted,
        }
    }

    /// handle an APPEND_ENTRIES rpc from a leader
    ///
    /// this design appends unconditionally and never rewrites existing
    /// entries; consistency across divergent histories is out of scope
    pub(crate) fn handle_append_entries(
        &self,
        term: u64,
        leader_id: LeaderInfo,
        entries: Vec<LogEntry>,
        leader_commit: i64,
    ) -> RpcMessage {
        let (resp, advanced) = {
            let mut st = self.shared.state.lock().unwrap();
            if term < st.current_term {
                return RpcMessage::AppendResponse {
                    term: st.current_term,
                    success: false,
                };
            }

            let mut changed = term > st.current_term;
            if changed {
                st.voted_for = None;
            }
            st.current_term = term;
            st.state = NodeState::Follower;
            st.leader = Some(leader_id);

            if !entries.is_empty() {
                st.log.extend(entries);
                changed = true;
            }

            let mut advanced = false;
            if leader_commit > st.commit_index {
                let new_commit = leader_commit.min(st.last_index());
                if new_commit > st.commit_index {
                    st.commit_index = new_commit;
                    advanced = true;
                }
            }

            if changed {
                st.persist();
            }
            (
                RpcMessage::AppendResponse {
                    term: st.current_term,
                    success: true,
                },
                advanced,
            )
        };

        if advanced {
            self.signal_apply();
        }
        self.reset_election_timer();
        resp
    }

    // -- election --

    /// start an election: become candidate, increment term, vote for
    /// self, then solicit votes from every peer in parallel
    fn run_election(&self) {
        let term = {
            let mut st = self.shared.state.lock().unwrap();
            st.state = NodeState::Candidate;
            st.current_term += 1;
            st.voted_for = Some(self.shared.id.clone());
            st.persist();
            st.current_term
        };
        info!("{}: starting election for term {term}", self.shared.id);

        let (tx, rx) = unbounded();
        for peer in &self.shared.peers {
            let tx = tx.clone();
            let peer = peer.clone();
            let msg = RpcMessage::RequestVote {
                term,
                candidate_id: self.shared.id.clone(),
            };
            let deadline = self.rpc_deadline();
            thread::spawn(move || {
                let _ = tx.send(rpc::call(&peer.rpc_addr(), &msg, deadline));
            });
        }
        drop(tx);

        let mut votes = 1; // self-vote
        let mut highest_term = term;
        let deadline = Instant::now() + Duration::from_millis(self.shared.config.vote_wait);
        for _ in 0..self.shared.peers.len() {
            let Ok(resp) = rx.recv_deadline(deadline) else {
                break;
            };
            if let Some(RpcMessage::VoteResponse {
                term: resp_term,
                vote_granted,
            }) = resp
            {
                if vote_granted {
                    votes += 1;
                }
                if resp_term > highest_term {
                    highest_term = resp_term;
                }
            }
        }

        let total = self.shared.peers.len() + 1;
        let won = {
            let mut st = self.shared.state.lock().unwrap();
            if highest_term > st.current_term {
                st.step_down(highest_term);
                st.persist();
                false
            } else if st.state != NodeState::Candidate || st.current_term != term {
                // superseded while waiting; whoever changed the role owns the timer
                return;
            } else if votes >= self.quorum_size() {
                st.state = NodeState::Leader;
                st.leader = Some(LeaderInfo(self.shared.host.clone(), self.shared.client_port));
                let next = st.log.len();
                for peer in &self.shared.peers {
                    st.next_index.insert(peer.rpc_addr(), next);
                    st.match_index.insert(peer.rpc_addr(), -1);
                }
                true
            } else {
                false
            }
        };

        if won {
            info!(
                "{}: won election with {votes}/{total} votes, becoming leader for term {term}",
                self.shared.id
            );
            self.disarm_election_timer();
            let node = self.clone();
            thread::Builder::new()
                .name(format!("raft-heartbeat-{}", self.shared.id))
                .spawn(move || node.heartbeat_loop(term))
                .expect("failed to spawn heartbeat loop");
        } else {
            info!("{}: lost election with {votes}/{total} votes", self.shared.id);
            self.reset_election_timer();
        }
    }

    /// send (possibly empty) append-entries to every peer each interval
    /// while this node stays leader for `term`
    fn heartbeat_loop(&self, term: u64) {
        loop {
            if self.shared.stopped.load(Ordering::SeqCst) {
                return;
            }
            let msg = {
                let st = self.shared.state.lock().unwrap();
                if st.state != NodeState::Leader || st.current_term != term {
                    return;
                }
                self.append_entries_message(&st, Vec::new())
            };
            for peer in &self.shared.peers {
                let node = self.clone();
                let peer = peer.clone();
                let msg = msg.clone();
                thread::spawn(move || {
                    if let Some(RpcMessage::AppendResponse { term: resp_term, .. }) =
                        rpc::call(&peer.rpc_addr(), &msg, node.rpc_deadline())
                    {
                        node.observe_term(resp_term);
                    }
                });
            }
            thread::sleep(Duration::from_millis(self.shared.config.heartbeat_interval));
        }
    }

    // -- timers --

    /// arm the election timer with a randomized timeout
    fn reset_election_timer(&self) {
        let timeout = rand::thread_rng().gen_range(
            self.shared.config.election_timeout_min..self.shared.config.election_timeout_max,
        );
        let mut deadline = self.shared.timer.lock().unwrap();
        *deadline = Some(Instant::now() + Duration::from_millis(timeout));
        self.shared.timer_signal.notify_all();
    }

    /// leaders do not time out; the timer rearms on step-down
    fn disarm_election_timer(&self) {
        *self.shared.timer.lock().unwrap() = None;
    }

    /// dedicated timer thread; fires run_election when an armed
    /// deadline passes without being reset
    fn election_timer_loop(&self) {
        let mut deadline = self.shared.timer.lock().unwrap();
        loop {
            if self.shared.stopped.load(Ordering::SeqCst) {
                return;
            }
            match *deadline {
                Some(when) => {
                    let now = Instant::now();
                    if now >= when {
                        *deadline = None;
                        drop(deadline);
                        self.run_election();
                        deadline = self.shared.timer.lock().unwrap();
                    } else {
                        deadline = self
                            .shared
                            .timer_signal
                            .wait_timeout(deadline, when - now)
                            .unwrap()
                            .0;
                    }
                }
                None => {
                    deadline = self
                        .shared
                        .timer_signal
                        .wait_timeout(deadline, Duration::from_millis(200))
                        .unwrap()
                        .0;
                }
            }
        }
    }

    // -- apply engine --

    /// wake the apply dispatcher; committed entries are handed to the
    /// callback outside the consensus lock, on the dispatcher thread
    fn signal_apply(&self) {
        if let Some(tx) = self.shared.apply_tx.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }

    fn apply_loop(&self, rx: Receiver<()>) {
        while rx.recv().is_ok() {
            while let Some(command) = self.next_unapplied() {
                let callback = self.shared.apply_fn.lock().unwrap().clone();
                if let Some(callback) = callback {
                    callback(&command);
                }
            }
        }
    }

    /// advance last_applied by one and hand back that entry's command
    fn next_unapplied(&self) -> Option<serde_json::Value> {
        let mut st = self.shared.state.lock().unwrap();
        if st.last_applied < st.commit_index {
            st.last_applied += 1;
            let idx = st.last_applied as usize;
            Some(st.log[idx].command.clone())
        } else {
            None
        }
    }

    // -- helpers --

    /// step down if an rpc response carried a higher term than ours
    fn observe_term(&self, term: u64) {
        let stepped = {
            let mut st = self.shared.state.lock().unwrap();
            if term > st.current_term {
                st.step_down(term);
                st.persist();
                true
            } else {
                false
            }
        };
        if stepped {
            self.reset_election_timer();
        }
    }

    fn append_entries_message(&self, st: &RaftState, entries: Vec<LogEntry>) -> RpcMessage {
        RpcMessage::AppendEntries {
            term: st.current_term,
            leader_id: LeaderInfo(self.shared.host.clone(), self.shared.client_port),
            entries,
            prev_log_index: -1,
            prev_log_term: 0,
            leader_commit: st.commit_index,
        }
    }

    fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.shared.config.rpc_deadline)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn config(&self) -> &RaftConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_storage::InMemoryStorage;
    use serde_json::json;

    fn node(peers: Vec<Peer>) -> RaftNode {
        RaftNode::new("127.0.0.1", 10_000, 9_000, peers)
    }

    fn three_node() -> RaftNode {
        node(vec![
            Peer::new("127.0.0.1", 10_001, 9_001),
            Peer::new("127.0.0.1", 10_002, 9_002),
        ])
    }

    #[test]
    fn new_node_starts_as_follower() {
        let node = three_node();
        let status = node.status();
        assert_eq!(status.state, NodeState::Follower);
        assert_eq!(status.term, 0);
        assert_eq!(status.log_length, 0);
        assert_eq!(status.commit_index, -1);
        assert!(!node.is_leader());
        assert!(node.current_leader().is_none());
    }

    #[test]
    fn quorum_calculation() {
        // no peers: quorum = 1
        assert_eq!(node(vec![]).quorum_size(), 1);
        // 3 nodes: quorum = 2
        assert_eq!(three_node().quorum_size(), 2);
        // 5 nodes: quorum = 3
        let five = node(vec![
            Peer::new("a", 1, 2),
            Peer::new("b", 1, 2),
            Peer::new("c", 1, 2),
            Peer::new("d", 1, 2),
        ]);
        assert_eq!(five.quorum_size(), 3);
    }

    #[test]
    fn follower_grants_vote_to_valid_candidate() {
        let node = three_node();

        let resp = node.handle_request_vote(1, "127.0.0.1:9001");

        match resp {
            RpcMessage::VoteResponse { term, vote_granted } => {
                assert!(vote_granted);
                assert_eq!(term, 1);
            }
            other => panic!("expected VoteResponse, got {other:?}"),
        }
        let st = node.shared.state.lock().unwrap();
        assert_eq!(st.voted_for.as_deref(), Some("127.0.0.1:9001"));
        assert_eq!(st.current_term, 1);
    }

    #[test]
    fn follower_rejects_vote_for_lower_term() {
        let node = three_node();
        node.shared.state.lock().unwrap().current_term = 5;

        let resp = node.handle_request_vote(3, "127.0.0.1:9001");

        match resp {
            RpcMessage::VoteResponse { term, vote_granted } => {
                assert!(!vote_granted);
                assert_eq!(term, 5); // responds with our higher term
            }
            other => panic!("expected VoteResponse, got {other:?}"),
        }
    }

    #[test]
    fn at_most_one_vote_per_term() {
        let node = three_node();

        let first = node.handle_request_vote(2, "127.0.0.1:9001");
        let second = node.handle_request_vote(2, "127.0.0.1:9002");
        let repeat = node.handle_request_vote(2, "127.0.0.1:9001");

        let granted = |resp: &RpcMessage| match resp {
            RpcMessage::VoteResponse { vote_granted, .. } => *vote_granted,
            _ => panic!("expected VoteResponse"),
        };
        assert!(granted(&first));
        assert!(!granted(&second));
        // re-granting to the same candidate is allowed
        assert!(granted(&repeat));
    }

    #[test]
    fn higher_term_vote_request_forces_step_down() {
        let node = three_node();
        {
            let mut st = node.shared.state.lock().unwrap();
            st.current_term = 1;
            st.state = NodeState::Leader;
        }

        let resp = node.handle_request_vote(5, "127.0.0.1:9001");

        match resp {
            RpcMessage::VoteResponse { term, vote_granted } => {
                assert!(vote_granted); // vote reset with the term
                assert_eq!(term, 5);
            }
            other => panic!("expected VoteResponse, got {other:?}"),
        }
        let st = node.shared.state.lock().unwrap();
        assert_eq!(st.state, NodeState::Follower);
        assert_eq!(st.current_term, 5);
    }

    #[test]
    fn append_entries_rejects_stale_term() {
        let node = three_node();
        node.shared.state.lock().unwrap().current_term = 5;

        let resp = node.handle_append_entries(3, LeaderInfo("10.0.0.9".into(), 9009), vec![], -1);

        match resp {
            RpcMessage::AppendResponse { term, success } => {
                assert!(!success);
                assert_eq!(term, 5);
            }
            other => panic!("expected AppendResponse, got {other:?}"),
        }
        // the stale leader's hint is not recorded
        assert!(node.current_leader().is_none());
    }

    #[test]
    fn append_entries_records_leader_and_appends() {
        let node = three_node();
        let entries = vec![
            LogEntry::new(1, json!({"action": "NOOP", "n": 1})),
            LogEntry::new(1, json!({"action": "NOOP", "n": 2})),
        ];

        let resp =
            node.handle_append_entries(1, LeaderInfo("10.0.0.2".into(), 9002), entries, -1);

        match resp {
            RpcMessage::AppendResponse { term, success } => {
                assert!(success);
                assert_eq!(term, 1);
            }
            other => panic!("expected AppendResponse, got {other:?}"),
        }
        let st = node.shared.state.lock().unwrap();
        assert_eq!(st.log.len(), 2);
        assert_eq!(st.state, NodeState::Follower);
        assert_eq!(
            st.leader,
            Some(LeaderInfo("10.0.0.2".into(), 9002))
        );
        // nothing committed yet
        assert_eq!(st.commit_index, -1);
    }

    #[test]
    fn candidate_steps_down_on_equal_term_heartbeat() {
        let node = three_node();
        {
            let mut st = node.shared.state.lock().unwrap();
            st.current_term = 3;
            st.state = NodeState::Candidate;
            st.voted_for = Some(node.shared.id.clone());
        }

        node.handle_append_entries(3, LeaderInfo("10.0.0.2".into(), 9002), vec![], -1);

        let st = node.shared.state.lock().unwrap();
        assert_eq!(st.state, NodeState::Follower);
        assert_eq!(st.current_term, 3);
    }

    #[test]
    fn commit_index_is_bounded_by_log_length() {
        let node = three_node();
        let entries = vec![LogEntry::new(1, json!({"action": "NOOP"}))];

        // leader claims commit 5 but only one entry is known here
        node.handle_append_entries(1, LeaderInfo("10.0.0.2".into(), 9002), entries, 5);

        let st = node.shared.state.lock().unwrap();
        assert_eq!(st.commit_index, 0);
        assert!(st.last_applied <= st.commit_index);
    }

    #[test]
    fn empty_heartbeat_cannot_commit_ahead_of_empty_log() {
        let node = three_node();

        node.handle_append_entries(1, LeaderInfo("10.0.0.2".into(), 9002), vec![], 2);

        let st = node.shared.state.lock().unwrap();
        assert_eq!(st.commit_index, -1);
    }

    #[test]
    fn replicate_rejects_on_non_leader() {
        let node = three_node();

        assert!(!node.replicate(json!({"action": "NOOP"})));

        // nothing was appended
        assert_eq!(node.status().log_length, 0);
    }

    #[test]
    fn higher_term_response_steps_leader_down() {
        let node = three_node();
        {
            let mut st = node.shared.state.lock().unwrap();
            st.current_term = 2;
            st.state = NodeState::Leader;
        }

        node.observe_term(7);

        let st = node.shared.state.lock().unwrap();
        assert_eq!(st.state, NodeState::Follower);
        assert_eq!(st.current_term, 7);
        assert_eq!(st.voted_for, None);
    }

    #[test]
    fn term_never_decreases_on_observe() {
        let node = three_node();
        node.shared.state.lock().unwrap().current_term = 9;

        node.observe_term(4);

        assert_eq!(node.status().term, 9);
    }

    #[test]
    fn injected_storage_receives_every_mutation() {
        let node = three_node();
        node.set_storage(Box::new(InMemoryStorage::new()));

        node.handle_request_vote(3, "127.0.0.1:9001");
        node.handle_append_entries(
            3,
            LeaderInfo("10.0.0.2".into(), 9002),
            vec![LogEntry::new(3, json!({"action": "NOOP"}))],
            -1,
        );

        // the store mirrors in-memory state after each mutating handler,
        // with no filesystem involved
        let st = node.shared.state.lock().unwrap();
        let (term, voted_for, log) = st.storage.as_ref().unwrap().load_state().unwrap();
        assert_eq!(term, 3);
        assert_eq!(voted_for.as_deref(), Some("127.0.0.1:9001"));
        assert_eq!(log, st.log);
        assert_eq!(log.len(), 1);
    }
}
