//! # server
//!
//! why: serve client training and prediction requests over json lines
//! relations: admission via the raft-core facade, artifacts via ModelStore,
//!            training via trainer.rs
//! what: WorkerServer accept loop, TRAIN/SUB_TRAIN/PREDICT/LIST_MODELS handlers

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use raft_core::{Command, ModelStore, RaftNode};

use crate::error::WorkerError;
use crate::models;
use crate::trainer::{self, Trainer};

/// the client-facing tcp endpoint: one json request line per
/// connection, one json response line back
#[derive(Clone)]
pub struct WorkerServer {
    inner: Arc<Inner>,
}

struct Inner {
    node: RaftNode,
    store: ModelStore,
    trainer: Trainer,
    listener: TcpListener,
    stopped: AtomicBool,
}

/// outcome of a completed training job
struct TrainOutcome {
    model_id: String,
    model_path: PathBuf,
    artifact_name: String,
}

impl WorkerServer {
    /// bind the client endpoint; `serve` starts accepting
    pub fn bind(
        host: &str,
        port: u16,
        node: RaftNode,
        store: ModelStore,
        trainer: Trainer,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        info!("worker tcp server listening on {}", listener.local_addr()?);
        Ok(Self {
            inner: Arc::new(Inner {
                node,
                store,
                trainer,
                listener,
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.listener.local_addr()
    }

    /// accept clients until stop(); one short-lived thread per connection
    pub fn serve(&self) {
        for stream in self.inner.listener.incoming() {
            if self.inner.stopped.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || server.handle_connection(stream));
                }
                Err(err) => warn!("client accept error: {err}"),
            }
        }
    }

    /// stop accepting; in-flight handlers run to completion
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(addr) = self.inner.listener.local_addr() {
            let _ = TcpStream::connect(("127.0.0.1", addr.port()));
        }
    }

    fn handle_connection(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_owned());

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
            return;
        }

        let response = match serde_json::from_str::<Value>(line.trim()) {
            Ok(request) => self.dispatch(&request, &peer),
            Err(_) => error_response("Invalid JSON"),
        };

        let mut payload = response.to_string();
        payload.push('\n');
        let _ = (&stream).write_all(payload.as_bytes());
    }

    fn dispatch(&self, request: &Value, peer: &str) -> Value {
        match request.get("type").and_then(Value::as_str) {
            Some("TRAIN") => self.handle_train(request, peer),
            Some("SUB_TRAIN") => self.handle_sub_train(request, peer),
            Some("PREDICT") => self.handle_predict(request, peer),
            Some("LIST_MODELS") => self.handle_list_models(peer),
            other => error_response(format!("Unknown type: {}", other.unwrap_or(""))),
        }
    }

    // -- handlers --

    /// train a new model and replicate the result across the cluster
    ///
    /// writes are admitted on the leader only; everyone else redirects
    fn handle_train(&self, request: &Value, peer: &str) -> Value {
        let (inputs, outputs) = match samples_of(request) {
            Ok(pair) => pair,
            Err(err) => return error_response(err.to_string()),
        };
        info!("TRAIN request from {peer}: {} samples", inputs.len());

        if !self.inner.node.is_leader() {
            return match self.inner.node.current_leader() {
                Some(leader) => json!({"status": "REDIRECT", "leader": leader}),
                None => error_response("No leader available"),
            };
        }

        match self.train_job(inputs, outputs, &job_id()) {
            Ok(outcome) => {
                self.replicate_outcome(&outcome);
                json!({"status": "OK", "model_id": outcome.model_id})
            }
            Err(err) => {
                warn!("training failed: {err}");
                error_response(err.to_string())
            }
        }
    }

    /// train one chunk of a distributed job; local only, no replication
    fn handle_sub_train(&self, request: &Value, peer: &str) -> Value {
        let (inputs, outputs) = match samples_of(request) {
            Ok(pair) => pair,
            Err(err) => return error_response(err.to_string()),
        };
        let chunk = request.get("chunk_id").and_then(Value::as_u64).unwrap_or(0);
        info!("SUB_TRAIN request from {peer}: chunk {chunk}, {} samples", inputs.len());

        match self.train_job(inputs, outputs, &format!("{}_chunk{chunk}", job_id())) {
            Ok(outcome) => json!({
                "status": "OK",
                "model_id": outcome.model_id,
                "model_path": outcome.model_path.to_string_lossy(),
            }),
            Err(err) => {
                warn!("chunk training failed: {err}");
                error_response(err.to_string())
            }
        }
    }

    /// predict from a locally materialized model; reads never go
    /// through the log
    fn handle_predict(&self, request: &Value, peer: &str) -> Value {
        let Some(model_id) = request.get("model_id").and_then(Value::as_str) else {
            return error_response("Missing model_id");
        };
        let input: Vec<String> = request
            .get("input")
            .and_then(Value::as_array)
            .map(|cells| cells.iter().map(trainer::render_cell).collect())
            .unwrap_or_default();
        info!("PREDICT request from {peer}: model={model_id}");

        let Some(model_path) = models::find_model(self.inner.store.dir(), model_id) else {
            return error_response(WorkerError::ModelNotFound(model_id.to_owned()).to_string());
        };

        match self.inner.trainer.predict(&model_path, &input.join(",")) {
            Ok(output) => json!({"status": "OK", "output": output}),
            Err(err) => {
                warn!("prediction failed: {err}");
                error_response(err.to_string())
            }
        }
    }

    fn handle_list_models(&self, peer: &str) -> Value {
        debug!("LIST_MODELS request from {peer}");
        json!({"status": "OK", "models": models::list_models(self.inner.store.dir())})
    }

    // -- training plumbing --

    /// stage csv files, run the engine, and clean the staging up
    fn train_job(
        &self,
        inputs: &[Value],
        outputs: &[Value],
        train_id: &str,
    ) -> Result<TrainOutcome, WorkerError> {
        let dir = self.inner.store.dir();
        let inputs_file = dir.join(format!("inputs_{train_id}.csv"));
        let outputs_file = dir.join(format!("outputs_{train_id}.csv"));
        let artifact_name = format!("model_{train_id}.bin");
        let model_path = dir.join(&artifact_name);

        trainer::write_csv(&inputs_file, inputs)?;
        trainer::write_csv(&outputs_file, outputs)?;
        debug!(
            "training data staged: {}, {}",
            inputs_file.display(),
            outputs_file.display()
        );

        let result = self.inner.trainer.train(&inputs_file, &outputs_file, &model_path);

        // the staging files are scratch either way
        let _ = fs::remove_file(&inputs_file);
        let _ = fs::remove_file(&outputs_file);

        Ok(TrainOutcome {
            model_id: result?,
            model_path,
            artifact_name,
        })
    }

    /// record the training in the log and ship the artifact bytes so
    /// followers materialize the same model file
    fn replicate_outcome(&self, outcome: &TrainOutcome) {
        let record = Command::model_trained(
            &outcome.model_id,
            &outcome.model_path.to_string_lossy(),
        );
        if !self.inner.node.replicate(record) {
            warn!(
                "MODEL_TRAINED for {} did not reach a majority",
                outcome.model_id
            );
        }

        match fs::read(&outcome.model_path) {
            Ok(bytes) => {
                let command = Command::store_file(&outcome.artifact_name, &bytes);
                if !self.inner.node.replicate(command) {
                    warn!(
                        "artifact replication for {} did not reach a majority",
                        outcome.model_id
                    );
                }
            }
            Err(err) => warn!(
                "could not read artifact {}: {err}",
                outcome.model_path.display()
            ),
        }
    }
}

/// pull the training samples out of a TRAIN/SUB_TRAIN request
fn samples_of(request: &Value) -> Result<(&Vec<Value>, &Vec<Value>), WorkerError> {
    let inputs = request.get("inputs").and_then(Value::as_array);
    let outputs = request.get("outputs").and_then(Value::as_array);
    match (inputs, outputs) {
        (Some(inputs), Some(outputs)) if !inputs.is_empty() && !outputs.is_empty() => {
            if inputs.len() != outputs.len() {
                Err(WorkerError::BadRequest(
                    "Inputs/outputs length mismatch".to_owned(),
                ))
            } else {
                Ok((inputs, outputs))
            }
        }
        _ => Err(WorkerError::BadRequest(
            "Missing inputs or outputs".to_owned(),
        )),
    }
}

fn error_response(message: impl Into<String>) -> Value {
    json!({"status": "ERROR", "message": message.into()})
}

/// short unique id for staging files and artifact names
fn job_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
