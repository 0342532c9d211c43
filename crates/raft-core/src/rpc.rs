//! # rpc
//!
//! why: exchange consensus messages between peers over line-delimited tcp
//! relations: dispatches inbound rpcs to node.rs handlers, uses message.rs schemas
//! what: call() for outbound rpcs, serve() accept loop, per-connection handling

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::message::RpcMessage;
use crate::node::RaftNode;

/// send one request and read one response over a fresh connection
///
/// any dial, i/o, or decode failure yields None; the consensus layer
/// treats that as a missed vote or ack and never retries at this layer
pub fn call(addr: &str, msg: &RpcMessage, deadline: Duration) -> Option<RpcMessage> {
    let target = addr.to_socket_addrs().ok()?.next()?;
    let mut stream = TcpStream::connect_timeout(&target, deadline).ok()?;
    stream.set_read_timeout(Some(deadline)).ok()?;
    stream.set_write_timeout(Some(deadline)).ok()?;

    let mut line = serde_json::to_string(msg).ok()?;
    line.push('\n');
    stream.write_all(line.as_bytes()).ok()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response).ok()?;
    serde_json::from_str(response.trim_end()).ok()
}

/// accept loop for inbound peer rpcs; one short-lived thread per connection
///
/// the loop exits once the node is stopped (stop() nudges it with a
/// local connection so the listener gets dropped promptly)
pub(crate) fn serve(listener: TcpListener, node: RaftNode) {
    for stream in listener.incoming() {
        if node.is_stopped() {
            break;
        }
        match stream {
            Ok(stream) => {
                let node = node.clone();
                thread::spawn(move || handle_connection(stream, node));
            }
            Err(err) => debug!("rpc accept error: {err}"),
        }
    }
}

/// read one request line, dispatch it, write one response line
///
/// malformed requests are dropped silently by closing the connection
fn handle_connection(stream: TcpStream, node: RaftNode) {
    let deadline = Duration::from_millis(node.config().rpc_deadline);
    if stream.set_read_timeout(Some(deadline)).is_err() {
        return;
    }
    if stream.set_write_timeout(Some(deadline)).is_err() {
        return;
    }

    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }

    let Ok(request) = serde_json::from_str::<RpcMessage>(line.trim_end()) else {
        trace!("dropping malformed rpc: {}", line.trim_end());
        return;
    };

    let response = match request {
        RpcMessage::RequestVote { term, candidate_id } => {
            node.handle_request_vote(term, &candidate_id)
        }
        RpcMessage::AppendEntries {
            term,
            leader_id,
            entries,
            leader_commit,
            ..
        } => node.handle_append_entries(term, leader_id, entries, leader_commit),
        // responses are never requests
        _ => return,
    };

    let Ok(mut payload) = serde_json::to_string(&response) else {
        return;
    };
    payload.push('\n');
    let _ = (&stream).write_all(payload.as_bytes());
}
