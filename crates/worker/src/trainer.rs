//! # trainer
//!
//! why: drive the external training engine as an opaque subprocess
//! relations: invoked by server.rs handlers; artifacts land in the model store
//! what: Trainer command wrapper, csv staging helpers

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use log::{debug, info};

use crate::error::WorkerError;

/// number of epochs handed to the training engine
const TRAIN_EPOCHS: &str = "1000";

/// wrapper around the external training engine
///
/// the engine is a java classpath program by default; tests substitute
/// a stub. stdout is scanned for `MODEL_ID:` / `PREDICTION:` lines and
/// everything else about the artifact stays opaque to the worker
#[derive(Debug, Clone)]
pub struct Trainer {
    /// program to execute (default: "java")
    pub program: String,
    /// classpath directory holding the TrainingModule classes
    pub class_dir: String,
}

impl Trainer {
    pub fn new(program: impl Into<String>, class_dir: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            class_dir: class_dir.into(),
        }
    }

    /// train a model from staged csv files; returns the engine's model id
    pub fn train(
        &self,
        inputs: &Path,
        outputs: &Path,
        model_path: &Path,
    ) -> Result<String, WorkerError> {
        debug!(
            "running {} -cp {} TrainingModule train {} {} {TRAIN_EPOCHS} {}",
            self.program,
            self.class_dir,
            inputs.display(),
            outputs.display(),
            model_path.display()
        );
        let output = Command::new(&self.program)
            .args(["-cp", &self.class_dir, "TrainingModule", "train"])
            .arg(inputs)
            .arg(outputs)
            .arg(TRAIN_EPOCHS)
            .arg(model_path)
            .output()
            .map_err(|e| WorkerError::Training(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut model_id = None;
        for line in stdout.lines() {
            info!("engine: {line}");
            if let Some(id) = line.strip_prefix("MODEL_ID:") {
                model_id = Some(id.trim().to_owned());
            }
        }

        if !output.status.success() {
            return Err(WorkerError::Training(format!(
                "engine exited with {}",
                output.status
            )));
        }
        model_id.ok_or_else(|| WorkerError::Training("engine reported no model id".to_owned()))
    }

    /// run the engine in predict mode against a stored model
    pub fn predict(&self, model_path: &Path, input_csv: &str) -> Result<Vec<f64>, WorkerError> {
        debug!(
            "running {} -cp {} TrainingModule predict {} {input_csv}",
            self.program,
            self.class_dir,
            model_path.display()
        );
        let output = Command::new(&self.program)
            .args(["-cp", &self.class_dir, "TrainingModule", "predict"])
            .arg(model_path)
            .arg(input_csv)
            .output()
            .map_err(|e| WorkerError::Prediction(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("PREDICTION:") {
                return rest
                    .split(',')
                    .map(|v| v.trim().parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| WorkerError::Prediction(e.to_string()));
            }
        }
        Err(WorkerError::Prediction(
            "engine reported no prediction".to_owned(),
        ))
    }
}

/// stage one csv file for the engine; rows are arrays or bare scalars
pub fn write_csv(path: &Path, rows: &[serde_json::Value]) -> Result<(), WorkerError> {
    let mut file = File::create(path)?;
    for row in rows {
        let line = match row {
            serde_json::Value::Array(cells) => cells
                .iter()
                .map(render_cell)
                .collect::<Vec<_>>()
                .join(","),
            other => render_cell(other),
        };
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// numbers and strings render bare; anything else falls back to json
pub fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
