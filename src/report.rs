use crate::slice::{ChunkFailure, OutputChunk};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        chunks: Vec<OutputChunk>,
    },
    /// Some chunk files were written, others failed.
    Partial {
        chunks: Vec<OutputChunk>,
        failed_chunks: Vec<ChunkFailure>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub student_id: String,
    pub page_count: usize,
    pub skipped_pages: usize,
    pub elapsed_ms: u64,
    pub outcome: Outcome,
}

impl BatchResult {
    pub fn failed(student_id: &str, error: String) -> Self {
        Self {
            student_id: student_id.to_string(),
            page_count: 0,
            skipped_pages: 0,
            elapsed_ms: 0,
            outcome: Outcome::Failed { error },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn chunks(&self) -> &[OutputChunk] {
        match &self.outcome {
            Outcome::Success { chunks } | Outcome::Partial { chunks, .. } => chunks,
            Outcome::Failed { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started: String,
    pub finished: String,
    pub config_sha256: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub worker_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchResult>,
}

/// Consolidated drawing-detection log: one line per drawing-heavy chunk,
/// ordered by student then chunk.
pub fn render_drawing_log(results: &[BatchResult]) -> String {
    let mut ordered: Vec<&BatchResult> = results.iter().collect();
    ordered.sort_by(|a, b| a.student_id.cmp(&b.student_id));

    let mut out = String::new();
    for r in ordered {
        for ch in r.chunks().iter().filter(|c| c.drawing_heavy) {
            let file_name = ch
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pages = ch
                .drawing_pages
                .iter()
                .map(|p| (p + 1).to_string())
                .collect::<Vec<_>>()
                .join(",");
            let _ = writeln!(
                out,
                "{}: {} [DRAWING DETECTED] question={} pages={}",
                r.student_id, file_name, ch.label, pages
            );
        }
    }
    out
}

pub fn write_drawing_log(path: &Path, results: &[BatchResult]) -> Result<()> {
    std::fs::write(path, render_drawing_log(results))
        .with_context(|| format!("write drawing log: {}", path.display()))
}
