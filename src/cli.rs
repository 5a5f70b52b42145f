use crate::{
    batch::{discover_submissions, run_batch},
    boundary::RegexMatcher,
    config::Config,
    engine::{PdfBackend, Recognizer, pdfium, tesseract::TesseractRecognizer},
    merge::list_source_pdfs,
    pipeline::{Pipeline, StudentSubmission},
    report::{BatchReport, write_drawing_log},
    util::{ensure_dir, now_rfc3339, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "exam-slicer")]
#[command(about = "Slice scanned exam PDFs into per-question files with OCR and drawing detection")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./exam-slicer.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that pdfium and tesseract are usable.
    Doctor {},
    /// Classify one student folder and print the chunk plan without writing PDFs.
    Plan {
        #[arg(long)]
        input: PathBuf,
    },
    /// Process every student folder under the input directory.
    Run {
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        dpi: Option<u32>,
        #[arg(long)]
        threshold: Option<u64>,
        #[arg(long)]
        pattern: Option<String>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let mut cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Command::Plan { input } => {
            cfg.validate()?;
            let _guard = init_logging(&args, &cfg, None)?;
            plan(&cfg, input)
        }
        Command::Run {
            input_dir,
            output_dir,
            workers,
            dpi,
            threshold,
            pattern,
        } => {
            if let Some(d) = input_dir {
                cfg.paths.input_dir = d.display().to_string();
            }
            if let Some(d) = output_dir {
                cfg.paths.output_dir = d.display().to_string();
            }
            if let Some(n) = workers {
                cfg.global.worker_count = *n;
            }
            if let Some(n) = dpi {
                cfg.render.rasterization_resolution = *n;
            }
            if let Some(n) = threshold {
                cfg.detection.edge_density_threshold = *n;
            }
            if let Some(p) = pattern {
                cfg.detection.question_pattern = p.clone();
            }
            cfg.validate()?;
            run(&args, &cfg)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("exam-slicer.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<()> {
    let pdf = match pdfium::spawn_service(cfg) {
        Ok(service) => serde_json::to_value(service.client().doctor()?)?,
        Err(e) => serde_json::json!({ "name": "pdfium", "ok": false, "error": format!("{e:#}") }),
    };
    let ocr = TesseractRecognizer::new(cfg)?.doctor()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "pdf": pdf,
            "ocr": ocr,
            "workers": cfg.effective_workers(),
        }))?
    );
    Ok(())
}

fn plan(cfg: &Config, input: &Path) -> Result<()> {
    let student_id = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("cannot derive student id from {}", input.display()))?
        .to_string();
    let submission = StudentSubmission {
        student_id,
        sources: list_source_pdfs(input)?,
    };

    let matcher = RegexMatcher::from_config(cfg)?;
    let service = pdfium::spawn_service(cfg)?;
    let pipeline = Pipeline::new(
        cfg,
        service.client(),
        TesseractRecognizer::new(cfg)?,
        &matcher,
    );
    let plan = pipeline.plan(&submission)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "student_id": plan.student_id,
            "page_count": plan.document.page_count(),
            "skipped_pages": plan.skipped_pages(),
            "boundaries": plan.boundaries,
            "chunks": plan.chunks,
        }))?
    );
    Ok(())
}

fn run(args: &Args, cfg: &Config) -> Result<()> {
    let input_root = PathBuf::from(&cfg.paths.input_dir);
    if !input_root.is_dir() {
        return Err(anyhow!("input dir does not exist: {}", input_root.display()));
    }
    let output_root = PathBuf::from(&cfg.paths.output_dir);
    ensure_dir(&output_root)?;

    let log_path = resolve_log_path(cfg, &output_root);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    info!(
        "input={} output={} config_sha256={}",
        input_root.display(),
        output_root.display(),
        cfg_hash
    );

    // Fail fast when the external tools are missing rather than failing every student.
    let ocr_diag = TesseractRecognizer::new(cfg)?.doctor()?;
    if !ocr_diag.ok {
        return Err(anyhow!(
            "tesseract unavailable: {}",
            ocr_diag.error.unwrap_or_default()
        ));
    }
    // One PDFium for the whole batch; workers share it and recognize in parallel.
    let pdf_service = pdfium::spawn_service(cfg)?;

    let started = now_rfc3339();
    let matcher = RegexMatcher::from_config(cfg)?;
    let submissions = discover_submissions(&input_root)?;
    let progress = progress_bar(args, cfg, submissions.len());
    let results = run_batch(
        cfg,
        submissions,
        &output_root,
        &matcher,
        || Ok((pdf_service.client(), TesseractRecognizer::new(cfg)?)),
        &progress,
    );
    drop(pdf_service);

    let drawing_log = output_root.join(&cfg.output.log_filename);
    write_drawing_log(&drawing_log, &results)?;

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - succeeded;
    let report_path = output_root.join(&cfg.output.report_filename);

    if cfg.output.write_report_json {
        let report = BatchReport {
            started,
            finished: now_rfc3339(),
            config_sha256: cfg_hash,
            input_dir: input_root.clone(),
            output_dir: output_root.clone(),
            worker_count: cfg.effective_workers(),
            succeeded,
            failed,
            results,
        };
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("write report: {}", report_path.display()))?;
    }

    info!(
        "processing complete: {succeeded} succeeded, {failed} failed; drawing log {}",
        drawing_log.display()
    );

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "total": succeeded + failed,
                "succeeded": succeeded,
                "failed": failed,
                "drawing_log": drawing_log,
                "report": cfg.output.write_report_json.then_some(&report_path),
            }))?
        );
    }

    Ok(())
}

fn progress_bar(args: &Args, cfg: &Config, total: usize) -> ProgressBar {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());
    if !progress_visible(level, std::io::stdout().is_terminal()) {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// The bar only draws on an interactive stdout, and stays out of the way of
/// debug output.
fn progress_visible(level: &str, stdout_is_tty: bool) -> bool {
    let level = level.to_ascii_lowercase();
    stdout_is_tty && !level.contains("debug") && !level.contains("trace")
}

fn resolve_log_path(cfg: &Config, output_root: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(output_root.join("logs").join("exam-slicer.log"))
}
