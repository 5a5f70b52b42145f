use super::{EngineDiag, PdfBackend, PdfService};
use crate::config::Config;
use crate::merge::MergedDocument;
use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::cell::RefCell;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

const OPEN_DOCUMENT_LIMIT: usize = 8;

/// Binds the PDFium library: configured directory, then `./`, then the system.
///
/// With pdfium-render's default `thread_safe` feature the returned `Pdfium`
/// holds a process-wide lock until it is dropped, so a process may only keep
/// one alive at a time. Share it through [`spawn_service`].
pub fn bind(cfg: &Config) -> Result<Pdfium> {
    let mut dirs = Vec::new();
    let configured = cfg.render.pdfium_library_path.trim();
    if !configured.is_empty() {
        dirs.push(configured);
    }
    dirs.push("./");

    let local = dirs.iter().find_map(|dir| {
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(*dir)).ok()
    });
    let bindings = match local {
        Some(b) => b,
        None => Pdfium::bind_to_system_library()
            .map_err(|e| anyhow!("failed to bind pdfium library: {e}"))?,
    };
    Ok(Pdfium::new(bindings))
}

/// Runs one PDFium instance on a dedicated thread for the whole process.
pub fn spawn_service(cfg: &Config) -> Result<PdfService> {
    let cfg = cfg.clone();
    PdfService::spawn("pdfium", move |serve| {
        let pdfium = bind(&cfg)?;
        let backend = PdfiumBackend::new(&pdfium);
        serve(&backend);
        Ok(())
    })
}

fn page_index(page: u32) -> Result<PdfPageIndex> {
    PdfPageIndex::try_from(page).map_err(|_| anyhow!("page {page} is beyond pdfium's page index range"))
}

/// PDF codec and rasterizer over a borrowed PDFium instance.
///
/// Recently opened sources stay loaded so that rendering a document page by
/// page parses it once.
pub struct PdfiumBackend<'a> {
    pdfium: &'a Pdfium,
    open: RefCell<Vec<(PathBuf, Rc<PdfDocument<'a>>)>>,
}

impl<'a> PdfiumBackend<'a> {
    pub fn new(pdfium: &'a Pdfium) -> Self {
        Self {
            pdfium,
            open: RefCell::new(Vec::new()),
        }
    }

    fn document(&self, source: &Path) -> Result<Rc<PdfDocument<'a>>> {
        let mut open = self.open.borrow_mut();
        if let Some((_, doc)) = open.iter().find(|(path, _)| path == source) {
            return Ok(doc.clone());
        }

        let doc = Rc::new(
            self.pdfium
                .load_pdf_from_file(source, None)
                .map_err(|e| anyhow!("pdfium: {e}"))
                .with_context(|| format!("open pdf: {}", source.display()))?,
        );
        if open.len() >= OPEN_DOCUMENT_LIMIT {
            open.remove(0);
        }
        open.push((source.to_path_buf(), doc.clone()));
        Ok(doc)
    }
}

impl PdfBackend for PdfiumBackend<'_> {
    fn doctor(&self) -> Result<EngineDiag> {
        let ok = self.pdfium.create_new_pdf().is_ok();
        Ok(EngineDiag {
            name: "pdfium".into(),
            version: None,
            ok,
            error: (!ok).then(|| "pdfium bound but cannot create documents".to_string()),
        })
    }

    fn page_count(&self, source: &Path) -> Result<u32> {
        Ok(self.document(source)?.pages().len() as u32)
    }

    fn render_page(&self, source: &Path, page: u32, dpi: u32) -> Result<DynamicImage> {
        let document = self.document(source)?;
        let render_cfg = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .render_form_data(true)
            .render_annotations(true);

        let pdf_page = document
            .pages()
            .get(page_index(page)?)
            .map_err(|e| anyhow!("load page {page} of {}: {e}", source.display()))?;
        let image = pdf_page
            .render_with_config(&render_cfg)
            .map(|bitmap| bitmap.as_image())
            .map_err(|e| anyhow!("render page {page} of {}: {e}", source.display()))?;
        Ok(image)
    }

    fn write_pages(&self, doc: &MergedDocument, pages: Range<usize>, dest: &Path) -> Result<()> {
        let mut out = self
            .pdfium
            .create_new_pdf()
            .map_err(|e| anyhow!("pdfium create document: {e}"))?;

        // Copy maximal runs of consecutive pages from the same source in one call.
        let mut written: u32 = 0;
        for run in doc.source_runs(pages) {
            let source_path = &doc.sources[run.source].path;
            let source = self.document(source_path)?;
            debug!(
                "copy {} pages {}..={} -> {}",
                source_path.display(),
                run.first_page,
                run.last_page,
                dest.display()
            );
            out.pages_mut()
                .copy_page_range_from_document(
                    &source,
                    page_index(run.first_page)?..=page_index(run.last_page)?,
                    page_index(written)?,
                )
                .map_err(|e| anyhow!("copy pages from {}: {e}", source_path.display()))?;
            written += run.last_page - run.first_page + 1;
        }

        out.save_to_file(dest)
            .map_err(|e| anyhow!("save {}: {e}", dest.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_index_rejects_pages_past_the_pdfium_limit() {
        assert_eq!(page_index(0).unwrap(), 0);
        let max = PdfPageIndex::MAX as u32;
        assert_eq!(page_index(max).unwrap(), PdfPageIndex::MAX);
        let err = page_index(max + 1).unwrap_err();
        assert!(err.to_string().contains("beyond pdfium's page index range"));
    }
}
