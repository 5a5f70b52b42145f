//! In-memory stand-ins for pdfium and tesseract.
//!
//! A fake PDF is a text file starting with `%FAKEPDF`; every following line is a
//! page. Plain lines are the page's recognized text. Directives:
//! `#draw <text>` renders a high-edge bitmap, `#unrender` fails rendering,
//! `#unreadable` fails recognition, `#panic` makes the recognizer panic.
#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use exam_slicer::{
    config::Config,
    engine::{EngineDiag, PdfBackend, Recognition, Recognizer},
    merge::MergedDocument,
};
use image::{DynamicImage, GrayImage, Luma};
use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::path::Path;
use std::rc::Rc;

pub const HEADER: &str = "%FAKEPDF";

#[derive(Debug, Clone, PartialEq)]
enum FakePage {
    Text(String),
    Drawing(String),
    Unrender,
    Unreadable,
    Panic,
}

fn parse(source: &Path) -> Result<Vec<FakePage>> {
    let raw = std::fs::read_to_string(source)?;
    let mut lines = raw.lines();
    if lines.next() != Some(HEADER) {
        bail!("not a PDF: {}", source.display());
    }
    Ok(lines
        .map(|l| {
            if let Some(rest) = l.strip_prefix("#draw") {
                FakePage::Drawing(rest.trim().to_string())
            } else if l == "#unrender" {
                FakePage::Unrender
            } else if l == "#unreadable" {
                FakePage::Unreadable
            } else if l == "#panic" {
                FakePage::Panic
            } else {
                FakePage::Text(l.to_string())
            }
        })
        .collect())
}

pub fn blank_page() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([255])))
}

pub fn checkerboard_page() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, y| {
        if ((x / 8) + (y / 8)) % 2 == 0 {
            Luma([0])
        } else {
            Luma([255])
        }
    }))
}

type Slot = Rc<RefCell<Option<FakePage>>>;

pub struct FakeBackend {
    slot: Slot,
    writes: Cell<usize>,
    fail_write: Option<usize>,
}

impl FakeBackend {
    /// Makes the `n`th `write_pages` call (1-based) fail.
    pub fn failing_write(mut self, n: usize) -> Self {
        self.fail_write = Some(n);
        self
    }
}

pub struct FakeRecognizer {
    slot: Slot,
}

/// A backend/recognizer pair sharing the page currently being rendered.
pub fn fake_engines() -> (FakeBackend, FakeRecognizer) {
    let slot: Slot = Rc::new(RefCell::new(None));
    (
        FakeBackend {
            slot: slot.clone(),
            writes: Cell::new(0),
            fail_write: None,
        },
        FakeRecognizer { slot },
    )
}

impl PdfBackend for FakeBackend {
    fn doctor(&self) -> Result<EngineDiag> {
        Ok(EngineDiag {
            name: "fake-pdf".into(),
            version: None,
            ok: true,
            error: None,
        })
    }

    fn page_count(&self, source: &Path) -> Result<u32> {
        Ok(parse(source)?.len() as u32)
    }

    fn render_page(&self, source: &Path, page: u32, _dpi: u32) -> Result<DynamicImage> {
        let page = parse(source)?
            .into_iter()
            .nth(page as usize)
            .ok_or_else(|| anyhow!("page {page} out of range"))?;
        let image = match &page {
            FakePage::Unrender => bail!("corrupt page stream"),
            FakePage::Drawing(_) => checkerboard_page(),
            _ => blank_page(),
        };
        *self.slot.borrow_mut() = Some(page);
        Ok(image)
    }

    /// Writes one `<source file>:<page>` line per copied page.
    fn write_pages(&self, doc: &MergedDocument, pages: Range<usize>, dest: &Path) -> Result<()> {
        let call = self.writes.get() + 1;
        self.writes.set(call);
        if self.fail_write == Some(call) {
            // Leave a truncated file behind, like a disk filling up mid-save.
            std::fs::write(dest, "partial")?;
            bail!("disk full");
        }

        let mut out = String::new();
        for p in &doc.pages[pages] {
            let name = doc.sources[p.source]
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.push_str(&format!("{name}:{}\n", p.page));
        }
        std::fs::write(dest, out)?;
        Ok(())
    }
}

impl Recognizer for FakeRecognizer {
    fn doctor(&self) -> Result<EngineDiag> {
        Ok(EngineDiag {
            name: "fake-ocr".into(),
            version: None,
            ok: true,
            error: None,
        })
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<Recognition> {
        match self.slot.borrow_mut().take() {
            Some(FakePage::Text(t)) | Some(FakePage::Drawing(t)) => Ok(Recognition::Text(t)),
            Some(FakePage::Unreadable) => Ok(Recognition::Unreadable("blurry scan".into())),
            Some(FakePage::Panic) => panic!("recognizer crashed"),
            Some(FakePage::Unrender) | None => Err(anyhow!("recognize called without a page")),
        }
    }
}

pub fn write_fake_pdf(path: &Path, pages: &[&str]) {
    let mut body = String::from(HEADER);
    for p in pages {
        body.push('\n');
        body.push_str(p);
    }
    std::fs::write(path, body).unwrap();
}

/// Config tuned for the 64x64 fake bitmaps.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.detection.edge_density_threshold = 100;
    cfg.global.worker_count = 2;
    cfg
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}
