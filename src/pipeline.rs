use crate::{
    boundary::{BoundaryMatcher, QuestionBoundary, locate_boundaries},
    classify::EdgeDensityClassifier,
    config::Config,
    engine::{PdfBackend, Recognition, Recognizer},
    merge::{MergedDocument, merge_sources},
    slice::{ChunkExport, ChunkSpec, export_chunks, plan_chunks},
    util::ensure_dir,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One student's folder and the PDFs found in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSubmission {
    pub student_id: String,
    pub sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    Ok,
    Skipped { reason: String },
}

/// What survives of a page after its bitmap has been classified and dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub index: usize,
    pub text: String,
    pub edge_pixels: u64,
    pub drawing_heavy: bool,
    pub status: PageStatus,
}

impl PageAnalysis {
    fn skipped(index: usize, reason: String) -> Self {
        Self {
            index,
            text: String::new(),
            edge_pixels: 0,
            drawing_heavy: false,
            status: PageStatus::Skipped { reason },
        }
    }
}

/// Classification results for a merged document, ready to be sliced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPlan {
    pub student_id: String,
    pub document: MergedDocument,
    pub pages: Vec<PageAnalysis>,
    pub boundaries: Vec<QuestionBoundary>,
    pub chunks: Vec<ChunkSpec>,
}

impl DocumentPlan {
    pub fn skipped_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| matches!(p.status, PageStatus::Skipped { .. }))
            .count()
    }
}

pub struct Pipeline<'m, P: PdfBackend, R: Recognizer> {
    cfg: Config,
    backend: P,
    recognizer: R,
    matcher: &'m dyn BoundaryMatcher,
    classifier: EdgeDensityClassifier,
}

impl<'m, P: PdfBackend, R: Recognizer> Pipeline<'m, P, R> {
    pub fn new(cfg: &Config, backend: P, recognizer: R, matcher: &'m dyn BoundaryMatcher) -> Self {
        Self {
            cfg: cfg.clone(),
            backend,
            recognizer,
            matcher,
            classifier: EdgeDensityClassifier::from_config(cfg),
        }
    }

    /// Merge, rasterize, recognize, classify and locate boundaries. Writes nothing.
    pub fn plan(&self, submission: &StudentSubmission) -> Result<DocumentPlan> {
        let started = Instant::now();
        let sid = submission.student_id.as_str();
        let document = merge_sources(&self.backend, &submission.sources)?;
        info!(
            "{sid}: merged {} pages from {} sources",
            document.page_count(),
            document.sources.len()
        );

        let pages = self.analyze_pages(sid, &document)?;

        // Boundary detection needs every page's text, so it runs after all pages.
        let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        let boundaries = locate_boundaries(self.matcher, &texts);
        if boundaries.is_empty() && !document.is_empty() {
            info!("{sid}: no question headings found; exporting unsplit");
        }

        let flags: Vec<bool> = pages.iter().map(|p| p.drawing_heavy).collect();
        let chunks = plan_chunks(
            document.page_count(),
            &boundaries,
            &flags,
            &self.cfg.output.unsplit_label,
        );
        debug!(?chunks, "{sid}: chunk plan in {:?}", started.elapsed());

        Ok(DocumentPlan {
            student_id: submission.student_id.clone(),
            document,
            pages,
            boundaries,
            chunks,
        })
    }

    /// Full unit of work for one student: plan, then write each chunk.
    pub fn run_submission(
        &self,
        submission: &StudentSubmission,
        output_root: &Path,
    ) -> Result<(DocumentPlan, ChunkExport)> {
        let plan = self.plan(submission)?;
        if plan.document.is_empty() {
            warn!("{}: merged document has no pages", plan.student_id);
            return Ok((plan, ChunkExport::default()));
        }

        let student_dir = output_root.join(&plan.student_id);
        ensure_dir(&student_dir)?;
        let export = export_chunks(
            &self.cfg,
            &self.backend,
            &plan.document,
            &plan.student_id,
            &student_dir,
            &plan.chunks,
        );
        Ok((plan, export))
    }

    fn analyze_pages(&self, sid: &str, document: &MergedDocument) -> Result<Vec<PageAnalysis>> {
        let dpi = self.cfg.render.rasterization_resolution;
        let mut pages: Vec<Option<PageAnalysis>> = vec![None; document.page_count()];
        let mut base = 0usize;

        for source in &document.sources {
            let count = source.page_count as usize;
            let mut visit = |page: u32, rendered: Result<image::DynamicImage>| {
                let page = page as usize;
                if page >= count {
                    warn!("{sid}: renderer produced extra page {page} for {}", source.path.display());
                    return;
                }
                let index = base + page;
                pages[index] = Some(match rendered {
                    Ok(img) => self.analyze_page(sid, index, &img),
                    Err(e) => {
                        warn!("{sid}: page {index} unrenderable, skipped: {e:#}");
                        PageAnalysis::skipped(index, format!("{e:#}"))
                    }
                });
                // `img` is dropped here; only the text and score are kept.
            };
            self.backend.render_pages(&source.path, dpi, &mut visit)?;
            base += count;
        }

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(index, p)| {
                p.unwrap_or_else(|| {
                    warn!("{sid}: page {index} was never rendered, skipped");
                    PageAnalysis::skipped(index, "page not rendered".into())
                })
            })
            .collect())
    }

    fn analyze_page(&self, sid: &str, index: usize, img: &image::DynamicImage) -> PageAnalysis {
        let text = match self.recognizer.recognize(img) {
            Ok(Recognition::Text(t)) => t,
            Ok(Recognition::Unreadable(reason)) => {
                warn!("{sid}: page {index} unreadable, skipped: {reason}");
                return PageAnalysis::skipped(index, reason);
            }
            Err(e) => {
                warn!("{sid}: text recognition failed on page {index}, skipped: {e:#}");
                return PageAnalysis::skipped(index, format!("{e:#}"));
            }
        };

        let score = self.classifier.classify(img);
        debug!(
            "{sid}: page {index} chars={} edge_pixels={} drawing={}",
            text.len(),
            score.edge_pixels,
            score.drawing_heavy
        );
        PageAnalysis {
            index,
            text,
            edge_pixels: score.edge_pixels,
            drawing_heavy: score.drawing_heavy,
            status: PageStatus::Ok,
        }
    }
}
