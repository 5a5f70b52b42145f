use super::{EngineDiag, PdfBackend};
use crate::merge::MergedDocument;
use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use image::DynamicImage;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::debug;

enum Request {
    Doctor {
        reply: Sender<Result<EngineDiag>>,
    },
    PageCount {
        source: PathBuf,
        reply: Sender<Result<u32>>,
    },
    RenderPage {
        source: PathBuf,
        page: u32,
        dpi: u32,
        reply: Sender<Result<DynamicImage>>,
    },
    WritePages {
        doc: MergedDocument,
        pages: Range<usize>,
        dest: PathBuf,
        reply: Sender<Result<()>>,
    },
}

/// Hands a backend to the service loop. Called at most once.
pub type Serve<'a> = dyn FnMut(&dyn PdfBackend) + 'a;

/// One PDF backend living on its own thread, shared by every worker.
///
/// Requests are handled one at a time, so the backend never sees concurrent
/// calls. Workers talk to it through [`PdfClient`] handles and do their own
/// recognition in parallel between requests.
pub struct PdfService {
    tx: Option<Sender<Request>>,
    handle: Option<JoinHandle<()>>,
}

impl PdfService {
    /// Starts the service thread and waits until `start` hands it a backend.
    ///
    /// `start` runs on the service thread, so the backend may borrow state that
    /// lives there. An error from `start` before it serves is returned here.
    pub fn spawn<F>(name: &str, start: F) -> Result<Self>
    where
        F: FnOnce(&mut Serve<'_>) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = unbounded::<Request>();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut served = false;
                let mut serve = |backend: &dyn PdfBackend| {
                    if served {
                        return;
                    }
                    served = true;
                    let _ = ready_tx.send(Ok(()));
                    serve_requests(backend, &rx);
                };
                if let Err(e) = start(&mut serve) {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| anyhow!("spawn {name} thread: {e}"))?;

        let mut service = Self {
            tx: Some(tx),
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(service),
            Ok(Err(e)) => {
                service.shutdown();
                Err(e)
            }
            Err(_) => {
                service.shutdown();
                Err(anyhow!("{name} thread exited before serving"))
            }
        }
    }

    pub fn client(&self) -> PdfClient {
        PdfClient {
            tx: self.tx.clone(),
        }
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PdfService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_requests(backend: &dyn PdfBackend, rx: &Receiver<Request>) {
    for request in rx.iter() {
        match request {
            Request::Doctor { reply } => {
                let _ = reply.send(backend.doctor());
            }
            Request::PageCount { source, reply } => {
                let _ = reply.send(backend.page_count(&source));
            }
            Request::RenderPage {
                source,
                page,
                dpi,
                reply,
            } => {
                let _ = reply.send(backend.render_page(&source, page, dpi));
            }
            Request::WritePages {
                doc,
                pages,
                dest,
                reply,
            } => {
                let _ = reply.send(backend.write_pages(&doc, pages, &dest));
            }
        }
    }
    debug!("pdf service: all clients gone, stopping");
}

/// Cheap, cloneable handle to a [`PdfService`].
#[derive(Clone)]
pub struct PdfClient {
    tx: Option<Sender<Request>>,
}

impl PdfClient {
    fn call<T>(&self, make: impl FnOnce(Sender<Result<T>>) -> Request) -> Result<T> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("pdf service is shut down"))?;
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(make(reply_tx))
            .map_err(|_| anyhow!("pdf service stopped"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("pdf service dropped the request"))?
    }
}

impl PdfBackend for PdfClient {
    fn doctor(&self) -> Result<EngineDiag> {
        self.call(|reply| Request::Doctor { reply })
    }

    fn page_count(&self, source: &Path) -> Result<u32> {
        self.call(|reply| Request::PageCount {
            source: source.to_path_buf(),
            reply,
        })
    }

    fn render_page(&self, source: &Path, page: u32, dpi: u32) -> Result<DynamicImage> {
        self.call(|reply| Request::RenderPage {
            source: source.to_path_buf(),
            page,
            dpi,
            reply,
        })
    }

    fn write_pages(&self, doc: &MergedDocument, pages: Range<usize>, dest: &Path) -> Result<()> {
        self.call(|reply| Request::WritePages {
            doc: doc.clone(),
            pages,
            dest: dest.to_path_buf(),
            reply,
        })
    }
}
