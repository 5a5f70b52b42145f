use crate::engine::PdfBackend;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub page_count: u32,
}

/// Position of one merged page inside its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub source: usize,
    pub page: u32, // 0-based within the source
}

/// One student's pages, concatenated in file order then page order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedDocument {
    pub sources: Vec<SourceDocument>,
    pub pages: Vec<PageRef>,
}

/// A maximal run of merged pages that are consecutive in a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRun {
    pub source: usize,
    pub first_page: u32,
    pub last_page: u32, // inclusive
}

impl MergedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Splits `range` into runs that can each be copied from one source in a single call.
    pub fn source_runs(&self, range: Range<usize>) -> Vec<SourceRun> {
        let end = range.end.min(self.pages.len());
        let start = range.start.min(end);
        let mut runs: Vec<SourceRun> = Vec::new();
        for p in &self.pages[start..end] {
            match runs.last_mut() {
                Some(run) if run.source == p.source && run.last_page + 1 == p.page => {
                    run.last_page = p.page;
                }
                _ => runs.push(SourceRun {
                    source: p.source,
                    first_page: p.page,
                    last_page: p.page,
                }),
            }
        }
        runs
    }
}

/// Opens every source up front. Any unreadable source fails the whole merge.
pub fn merge_sources(backend: &dyn PdfBackend, sources: &[PathBuf]) -> Result<MergedDocument> {
    if sources.is_empty() {
        bail!("no source documents to merge");
    }

    let mut docs = Vec::with_capacity(sources.len());
    let mut pages = Vec::new();

    for (source_idx, path) in sources.iter().enumerate() {
        let page_count = backend
            .page_count(path)
            .with_context(|| format!("unreadable source document: {}", path.display()))?;
        if page_count == 0 {
            warn!("source has no readable pages: {}", path.display());
        }
        debug!("merge {} pages from {}", page_count, path.display());
        pages.extend((0..page_count).map(|page| PageRef {
            source: source_idx,
            page,
        }));
        docs.push(SourceDocument {
            path: path.clone(),
            page_count,
        });
    }

    Ok(MergedDocument {
        sources: docs,
        pages,
    })
}

/// PDF files directly inside `dir`, sorted by file name.
pub fn list_source_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_pdf = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            out.push(path);
        }
    }
    out.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(out)
}
