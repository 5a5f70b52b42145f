use crate::{
    boundary::BoundaryMatcher,
    config::Config,
    engine::{PdfBackend, Recognizer},
    merge::list_source_pdfs,
    pipeline::{Pipeline, StudentSubmission},
    report::{BatchResult, Outcome},
};
use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use indicatif::ProgressBar;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// One submission per visible subdirectory of `input_root`, sorted by name.
pub fn discover_submissions(input_root: &Path) -> Result<Vec<StudentSubmission>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(input_root)
        .with_context(|| format!("read input dir: {}", input_root.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("skipping non-UTF-8 folder name: {}", path.display());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        dirs.push((name.to_string(), path));
    }
    dirs.sort();

    let mut out = Vec::with_capacity(dirs.len());
    for (student_id, path) in dirs {
        let sources = list_source_pdfs(&path)?;
        if sources.is_empty() {
            warn!("no PDF found for {student_id}");
        }
        out.push(StudentSubmission {
            student_id,
            sources,
        });
    }
    Ok(out)
}

/// Runs every submission on a pool of `worker_count` threads.
///
/// Each worker gets its engines from `make_engines`, pulls units from a shared
/// queue and sends one `BatchResult` back per unit. A failing or panicking unit
/// only affects its own result. `make_engines` runs once per worker thread, so
/// anything exclusive (PDFium) should be handed out as a client of a shared
/// service rather than built there.
pub fn run_batch<F, P, R>(
    cfg: &Config,
    submissions: Vec<StudentSubmission>,
    output_root: &Path,
    matcher: &dyn BoundaryMatcher,
    make_engines: F,
    progress: &ProgressBar,
) -> Vec<BatchResult>
where
    F: Fn() -> Result<(P, R)> + Sync,
    P: PdfBackend,
    R: Recognizer,
{
    let total = submissions.len();
    let workers = cfg.effective_workers().clamp(1, total.max(1));
    info!("processing {total} students on {workers} workers");

    let ids: Vec<String> = submissions.iter().map(|s| s.student_id.clone()).collect();
    let (job_tx, job_rx) = unbounded::<StudentSubmission>();
    let (result_tx, result_rx) = unbounded::<BatchResult>();
    for s in submissions {
        let _ = job_tx.send(s);
    }
    drop(job_tx);
    progress.set_length(total as u64);

    let mut results = Vec::with_capacity(total);
    std::thread::scope(|scope| {
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let make_engines = &make_engines;
            scope.spawn(move || {
                let (backend, recognizer) = match catch_unwind(AssertUnwindSafe(make_engines)) {
                    Ok(Ok(engines)) => engines,
                    Ok(Err(e)) => {
                        error!("worker {worker}: engine setup failed: {e:#}");
                        return;
                    }
                    Err(panic) => {
                        error!("worker {worker}: engine setup panicked: {}", panic_message(&*panic));
                        return;
                    }
                };
                let pipeline = Pipeline::new(cfg, backend, recognizer, matcher);
                for submission in job_rx.iter() {
                    let result = run_unit(&pipeline, &submission, output_root);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        for result in result_rx.iter() {
            progress.inc(1);
            progress.set_message(result.student_id.clone());
            let done = progress.position();
            progress.suspend(|| match &result.outcome {
                Outcome::Success { chunks } => info!(
                    "[{done}/{total}] {} ok: {} chunks",
                    result.student_id,
                    chunks.len()
                ),
                Outcome::Partial {
                    chunks,
                    failed_chunks,
                } => warn!(
                    "[{done}/{total}] {} partial: {} chunks written, {} failed",
                    result.student_id,
                    chunks.len(),
                    failed_chunks.len()
                ),
                Outcome::Failed { error } => {
                    warn!("[{done}/{total}] {} failed: {error}", result.student_id)
                }
            });
            results.push(result);
        }
    });
    progress.finish_and_clear();

    // Units nobody picked up (every worker failed to start) are failures too.
    let seen: HashSet<String> = results.iter().map(|r| r.student_id.clone()).collect();
    for id in ids.iter().filter(|id| !seen.contains(*id)) {
        results.push(BatchResult::failed(id, "no worker available to process submission".into()));
    }

    results.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    results
}

fn run_unit<P: PdfBackend, R: Recognizer>(
    pipeline: &Pipeline<'_, P, R>,
    submission: &StudentSubmission,
    output_root: &Path,
) -> BatchResult {
    let started = Instant::now();
    let sid = submission.student_id.as_str();
    let ran = catch_unwind(AssertUnwindSafe(|| {
        pipeline.run_submission(submission, output_root)
    }));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match ran {
        Ok(Ok((plan, export))) => BatchResult {
            student_id: sid.to_string(),
            page_count: plan.document.page_count(),
            skipped_pages: plan.skipped_pages(),
            elapsed_ms,
            outcome: if export.failed.is_empty() {
                Outcome::Success {
                    chunks: export.written,
                }
            } else {
                Outcome::Partial {
                    chunks: export.written,
                    failed_chunks: export.failed,
                }
            },
        },
        Ok(Err(e)) => BatchResult {
            elapsed_ms,
            ..BatchResult::failed(sid, format!("{e:#}"))
        },
        Err(panic) => BatchResult {
            elapsed_ms,
            ..BatchResult::failed(sid, format!("worker crashed: {}", panic_message(&*panic)))
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = panic.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}
