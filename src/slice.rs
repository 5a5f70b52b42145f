use crate::{boundary::QuestionBoundary, config::Config, engine::PdfBackend, merge::MergedDocument};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A planned cut of the merged document, before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub start: usize, // inclusive, 0-based
    pub end: usize,   // exclusive
    pub label: String,
    pub drawing_heavy: bool,
    /// 0-based merged page indices that tripped the edge-density threshold.
    pub drawing_pages: Vec<usize>,
}

impl ChunkSpec {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChunk {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub drawing_heavy: bool,
    pub drawing_pages: Vec<usize>,
    pub path: PathBuf,
}

/// Cuts `[0, page_count)` at each boundary. Chunk `i` runs from boundary `i` to
/// boundary `i + 1`; pages before the first boundary fold into the first chunk.
/// With no boundaries the whole document is one chunk labelled `unsplit_label`.
pub fn plan_chunks(
    page_count: usize,
    boundaries: &[QuestionBoundary],
    drawing_flags: &[bool],
    unsplit_label: &str,
) -> Vec<ChunkSpec> {
    if page_count == 0 {
        return Vec::new();
    }

    let mut cuts: Vec<(usize, &str)> = Vec::with_capacity(boundaries.len().max(1));
    for b in boundaries {
        if b.page >= page_count {
            warn!("boundary at page {} beyond document end {}", b.page, page_count);
            continue;
        }
        if cuts.last().is_some_and(|(page, _)| *page >= b.page) {
            warn!("ignoring out-of-order boundary at page {}", b.page);
            continue;
        }
        cuts.push((b.page, b.label.as_str()));
    }
    if cuts.is_empty() {
        cuts.push((0, unsplit_label));
    }

    let mut chunks = Vec::with_capacity(cuts.len());
    for (i, (page, label)) in cuts.iter().enumerate() {
        let start = if i == 0 { 0 } else { *page };
        let end = cuts.get(i + 1).map(|(next, _)| *next).unwrap_or(page_count);
        let drawing_pages: Vec<usize> = (start..end)
            .filter(|&p| drawing_flags.get(p).copied().unwrap_or(false))
            .collect();
        chunks.push(ChunkSpec {
            start,
            end,
            label: label.to_string(),
            drawing_heavy: !drawing_pages.is_empty(),
            drawing_pages,
        });
    }
    chunks
}

/// Filename-safe form of a heading label: whitespace runs become `_`,
/// anything outside `[A-Za-z0-9_-]` is dropped.
pub fn sanitize_label(label: &str) -> String {
    let joined = label.split_whitespace().collect::<Vec<_>>().join("_");
    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Destination file names for each chunk, de-duplicated within one document.
pub fn chunk_file_names(cfg: &Config, student_id: &str, chunks: &[ChunkSpec]) -> Vec<String> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    chunks
        .iter()
        .map(|ch| {
            let mut label = sanitize_label(&ch.label);
            if label.is_empty() {
                label = sanitize_label(&cfg.output.unsplit_label);
            }
            let n = seen.entry(label.clone()).or_insert(0);
            *n += 1;
            if *n > 1 {
                label = format!("{label}_{n}");
            }
            let marker = if ch.drawing_heavy {
                cfg.output.drawing_marker.as_str()
            } else {
                ""
            };
            format!("{student_id}_{label}{marker}.pdf")
        })
        .collect()
}

/// A chunk whose file could not be written. No file is left at `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkExport {
    pub written: Vec<OutputChunk>,
    pub failed: Vec<ChunkFailure>,
}

/// Writes one PDF per chunk under `student_dir`. Empty ranges are skipped.
///
/// Each chunk is written independently: a failed write is recorded and its
/// partial file removed, and the remaining chunks are still written.
pub fn export_chunks(
    cfg: &Config,
    backend: &dyn PdfBackend,
    doc: &MergedDocument,
    student_id: &str,
    student_dir: &Path,
    chunks: &[ChunkSpec],
) -> ChunkExport {
    let names = chunk_file_names(cfg, student_id, chunks);
    let mut out = ChunkExport::default();

    for (ch, name) in chunks.iter().zip(names) {
        if ch.start >= ch.end || ch.end > doc.page_count() {
            warn!(
                "{student_id}: skipping chunk {:?} with empty or invalid range {}..{}",
                ch.label, ch.start, ch.end
            );
            continue;
        }
        let path = student_dir.join(&name);
        if let Err(e) = backend.write_pages(doc, ch.range(), &path) {
            warn!("{student_id}: failed to write {name}: {e:#}");
            remove_partial(&path);
            out.failed.push(ChunkFailure {
                start: ch.start,
                end: ch.end,
                label: ch.label.clone(),
                path,
                error: format!("{e:#}"),
            });
            continue;
        }
        info!(
            "{student_id}: wrote {} (pages {}..{}, drawing={})",
            name, ch.start, ch.end, ch.drawing_heavy
        );
        out.written.push(OutputChunk {
            start: ch.start,
            end: ch.end,
            label: ch.label.clone(),
            drawing_heavy: ch.drawing_heavy,
            drawing_pages: ch.drawing_pages.clone(),
            path,
        });
    }
    out
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed partial chunk {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove partial chunk {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(label: &str, drawing_heavy: bool) -> ChunkSpec {
        ChunkSpec {
            start: 0,
            end: 1,
            label: label.into(),
            drawing_heavy,
            drawing_pages: Vec::new(),
        }
    }

    #[test]
    fn labels_become_file_safe() {
        assert_eq!(sanitize_label("Question 3"), "Question_3");
        assert_eq!(sanitize_label("Q 4/5:"), "Q_45");
    }

    #[test]
    fn repeated_labels_get_suffixes() {
        let cfg = Config::default();
        let names = chunk_file_names(
            &cfg,
            "s01",
            &[chunk("Question 1", false), chunk("Question 1", true), chunk("Question 2", false)],
        );
        assert_eq!(
            names,
            vec![
                "s01_Question_1.pdf",
                "s01_Question_1_2_drawing.pdf",
                "s01_Question_2.pdf"
            ]
        );
    }
}
