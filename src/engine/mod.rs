pub mod pdfium;
pub mod service;
pub mod tesseract;
pub mod types;

use crate::merge::MergedDocument;
use anyhow::Result;
use image::DynamicImage;
use std::ops::Range;
use std::path::Path;

pub use service::{PdfClient, PdfService};
pub use types::{EngineDiag, Recognition};

/// Receives each rendered page of one source document, in page order.
/// `Err` means that single page could not be rendered.
pub type PageVisitor<'a> = dyn FnMut(u32, Result<DynamicImage>) + 'a;

pub trait PdfBackend {
    fn doctor(&self) -> Result<EngineDiag>;
    /// Opens and parses `source`; an error means the document is unreadable.
    fn page_count(&self, source: &Path) -> Result<u32>;
    fn render_page(&self, source: &Path, page: u32, dpi: u32) -> Result<DynamicImage>;

    fn render_pages(&self, source: &Path, dpi: u32, visit: &mut PageVisitor<'_>) -> Result<()> {
        for page in 0..self.page_count(source)? {
            visit(page, self.render_page(source, page, dpi));
        }
        Ok(())
    }

    fn write_pages(&self, doc: &MergedDocument, pages: Range<usize>, dest: &Path) -> Result<()>;
}

pub trait Recognizer {
    fn doctor(&self) -> Result<EngineDiag>;
    fn recognize(&self, image: &DynamicImage) -> Result<Recognition>;
}
