use super::{EngineDiag, Recognition, Recognizer};
use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, ImageFormat};
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Text recognition through the `tesseract` command line tool.
pub struct TesseractRecognizer {
    exe: PathBuf,
    language: String,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
}

/// Result of waiting on a child process.
enum Waited {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
}

impl TesseractRecognizer {
    pub fn new(cfg: &Config) -> Result<Self> {
        let exe = cfg.recognizer.tesseract_exe.trim();
        if exe.is_empty() {
            return Err(anyhow!("recognizer.tesseract_exe is empty"));
        }
        let timeout = match cfg.recognizer.page_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Ok(Self {
            exe: expand_tilde(exe),
            language: cfg.recognizer.language.clone(),
            extra_args: cfg.recognizer.extra_args.clone(),
            timeout,
        })
    }
}

impl Recognizer for TesseractRecognizer {
    fn doctor(&self) -> Result<EngineDiag> {
        let out = Command::new(&self.exe).arg("--version").output();
        Ok(match out {
            Ok(out) if out.status.success() => {
                // Older builds print the version banner on stderr.
                let banner = if out.stdout.is_empty() {
                    out.stderr
                } else {
                    out.stdout
                };
                EngineDiag {
                    name: "tesseract".into(),
                    version: String::from_utf8_lossy(&banner)
                        .lines()
                        .next()
                        .map(|l| l.trim().to_string()),
                    ok: true,
                    error: None,
                }
            }
            Ok(out) => EngineDiag {
                name: "tesseract".into(),
                version: None,
                ok: false,
                error: Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            },
            Err(e) => EngineDiag {
                name: "tesseract".into(),
                version: None,
                ok: false,
                error: Some(format!("{} not runnable: {e}", self.exe.display())),
            },
        })
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Recognition> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .with_context(|| "encode page bitmap as PNG")?;

        let mut cmd = Command::new(&self.exe);
        cmd.arg("stdin").arg("stdout");
        if !self.language.is_empty() {
            cmd.arg("-l").arg(&self.language);
        }
        cmd.args(&self.extra_args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", self.exe.display()))?;

        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            stdin.write_all(&png)?;
            stdin.flush()
        });

        let waited = wait_with_timeout(&mut child, self.timeout)?;
        if let Ok(Err(e)) = writer.join() {
            debug!("tesseract stdin closed early: {e}");
        }

        match waited {
            Waited::TimedOut => Ok(Recognition::Unreadable(format!(
                "tesseract exceeded {:?}",
                self.timeout.unwrap_or_default()
            ))),
            Waited::Exited { status, stderr, .. } if !status.success() => {
                Ok(Recognition::Unreadable(format!(
                    "tesseract exited with {status}: {}",
                    String::from_utf8_lossy(&stderr).trim()
                )))
            }
            Waited::Exited { stdout, .. } => {
                Ok(Recognition::Text(String::from_utf8_lossy(&stdout).into_owned()))
            }
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<Waited> {
    // Drain pipes while waiting so a chatty child can't block on a full buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Ok(Waited::Exited {
                status,
                stdout,
                stderr,
            });
        }

        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                warn!("tesseract timed out after {:?}", limit);
                let _ = child.kill();
                child.wait().with_context(|| "wait after kill")?;
                let _ = stdout_thread.join();
                let _ = stderr_thread.join();
                return Ok(Waited::TimedOut);
            }
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}
