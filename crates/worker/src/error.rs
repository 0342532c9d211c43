//! # error
//!
//! why: give the worker a typed error taxonomy for handlers and subprocesses
//! relations: produced by trainer.rs and server.rs, rendered into ERROR envelopes
//! what: WorkerError enum

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),
}
