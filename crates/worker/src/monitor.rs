//! # monitor
//!
//! why: expose read-only cluster status for humans and scripts
//! relations: reads the node facade and the model directory; never writes
//! what: minimal http responder with /status, /models, and a dashboard page

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{info, warn};
use serde_json::json;

use raft_core::RaftNode;

use crate::models;

/// http status monitor; serves one request per connection
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

struct Inner {
    node: RaftNode,
    models_dir: PathBuf,
    listener: TcpListener,
    stopped: AtomicBool,
}

impl Monitor {
    pub fn bind(
        host: &str,
        port: u16,
        node: RaftNode,
        models_dir: PathBuf,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        info!("status monitor listening on {}", listener.local_addr()?);
        Ok(Self {
            inner: Arc::new(Inner {
                node,
                models_dir,
                listener,
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.listener.local_addr()
    }

    pub fn serve(&self) {
        for stream in self.inner.listener.incoming() {
            if self.inner.stopped.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let monitor = self.clone();
                    thread::spawn(move || monitor.handle(stream));
                }
                Err(err) => warn!("monitor accept error: {err}"),
            }
        }
    }

    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(addr) = self.inner.listener.local_addr() {
            let _ = TcpStream::connect(("127.0.0.1", addr.port()));
        }
    }

    fn handle(&self, stream: TcpStream) {
        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).is_err() {
            return;
        }
        let path = request_line.split_whitespace().nth(1).unwrap_or("/");

        match path {
            "/status" => {
                let status = self.inner.node.status();
                let body = serde_json::to_string(&status).unwrap_or_else(|_| "{}".into());
                respond(&stream, "200 OK", "application/json", &body);
            }
            "/models" => {
                let body = json!({
                    "models": models::list_artifacts(&self.inner.models_dir)
                })
                .to_string();
                respond(&stream, "200 OK", "application/json", &body);
            }
            "/" => respond(&stream, "200 OK", "text/html; charset=utf-8", DASHBOARD),
            _ => respond(&stream, "404 Not Found", "text/plain", "not found"),
        }
    }
}

fn respond(mut stream: &TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.0 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}

const DASHBOARD: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Worker Monitor</title>
    <style>
        body { font-family: monospace; background: #1a1a2e; color: #eee; padding: 20px; }
        h1 { color: #00d4ff; }
        .card { background: #16213e; padding: 15px; margin: 10px 0; border-radius: 8px; }
        .label { color: #888; }
        .leader { color: #00ff88; }
        .follower { color: #ffaa00; }
        .candidate { color: #ff6b6b; }
    </style>
</head>
<body>
    <h1>Worker Monitor</h1>
    <div class="card">
        <div class="label">Consensus Status</div>
        <div id="status">Loading...</div>
    </div>
    <div class="card">
        <div class="label">Trained Models</div>
        <div id="models">Loading...</div>
    </div>
    <script>
        async function refresh() {
            try {
                const status = await fetch('/status').then(r => r.json());
                document.getElementById('status').innerHTML =
                    '<span class="' + status.state + '">' + status.state.toUpperCase() + '</span> | ' +
                    'Term: ' + status.term + ' | Leader: ' + JSON.stringify(status.leader) +
                    ' | Log: ' + status.log_length + ' entries | Commit: ' + status.commit_index;
            } catch (e) { document.getElementById('status').textContent = 'Error'; }

            try {
                const models = await fetch('/models').then(r => r.json());
                document.getElementById('models').innerHTML = models.models.length
                    ? models.models.map(m => '<div>' + m + '</div>').join('')
                    : '<em>No models yet</em>';
            } catch (e) { document.getElementById('models').textContent = 'Error'; }
        }
        refresh();
        setInterval(refresh, 3000);
    </script>
</body>
</html>"#;
