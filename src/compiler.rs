//! Typst Compiler Contract
//!
//! The engine never links a PDF engine directly; it talks to a
//! [`TypstCompiler`] behind a trait. The bundled implementation shells out
//! to a `typst` binary with a wall-clock timeout, working through
//! scope-guarded temp files so nothing leaks on failure or panic.

use crossbeam_channel as channel;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

/// Hard cap on template size.
pub const TEMPLATE_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// Output formats the compiler contract supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pdf,
    Png,
    Svg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("invalid output format: {0}")]
    InvalidFormat(String),

    #[error("template is empty")]
    EmptyTemplate,

    #[error("template exceeds the size limit ({limit} bytes)")]
    TemplateTooLarge { limit: usize },

    #[error("compilation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("compilation failed: {details}")]
    Compile { details: String },

    #[error("compiler I/O failure: {0}")]
    Io(String),
}

/// The compiler contract. `compile` returns the finished document bytes;
/// PDF output always begins with the `%PDF` magic.
pub trait TypstCompiler: Send + Sync {
    fn compile(
        &self,
        template: &[u8],
        format: OutputFormat,
        timeout: Duration,
    ) -> Result<Vec<u8>, CompileError>;
}

/// Shells out to a `typst` binary.
pub struct CommandCompiler {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl CommandCompiler {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        CommandCompiler {
            binary: binary.into(),
            work_dir: std::env::temp_dir(),
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }
}

impl TypstCompiler for CommandCompiler {
    fn compile(
        &self,
        template: &[u8],
        format: OutputFormat,
        timeout: Duration,
    ) -> Result<Vec<u8>, CompileError> {
        validate_template(template)?;

        let scope = CompileScope::create(&self.work_dir, format)
            .map_err(|e| CompileError::Io(e.to_string()))?;
        std::fs::write(&scope.input, template).map_err(|e| CompileError::Io(e.to_string()))?;

        let mut child = Command::new(&self.binary)
            .arg("compile")
            .arg("--format")
            .arg(format.extension())
            .arg(&scope.input)
            .arg(&scope.output)
            .spawn()
            .map_err(|e| CompileError::Io(e.to_string()))?;

        // Wait on a helper thread so the caller gets a hard wall-clock bound.
        let pid = child.id();
        let (done_tx, done_rx) = channel::bounded(1);
        let waiter = std::thread::spawn(move || {
            let status = child.wait();
            let _ = done_tx.send(status);
        });

        let status = match done_rx.recv_timeout(timeout) {
            Ok(status) => {
                let _ = waiter.join();
                status.map_err(|e| CompileError::Io(e.to_string()))?
            }
            Err(_) => {
                // The child outlived its budget; kill it and let the waiter
                // reap the zombie.
                let _ = Command::new("kill").arg("-9").arg(pid.to_string()).status();
                let _ = waiter.join();
                return Err(CompileError::Timeout { timeout });
            }
        };

        if !status.success() {
            return Err(CompileError::Compile {
                details: format!("typst exited with {status}"),
            });
        }

        let bytes =
            std::fs::read(&scope.output).map_err(|e| CompileError::Io(e.to_string()))?;
        verify_output(&bytes, format)?;
        Ok(bytes)
    }
}

/// Template preconditions shared by all compiler implementations.
pub fn validate_template(template: &[u8]) -> Result<(), CompileError> {
    if template.is_empty() {
        return Err(CompileError::EmptyTemplate);
    }
    if template.len() > TEMPLATE_SIZE_LIMIT {
        return Err(CompileError::TemplateTooLarge {
            limit: TEMPLATE_SIZE_LIMIT,
        });
    }
    Ok(())
}

/// Output postconditions: PDF bytes must carry the `%PDF` magic.
pub fn verify_output(bytes: &[u8], format: OutputFormat) -> Result<(), CompileError> {
    if format == OutputFormat::Pdf && !bytes.starts_with(b"%PDF") {
        return Err(CompileError::Compile {
            details: "output does not start with %PDF".to_string(),
        });
    }
    Ok(())
}

/// Input/output temp files released on every exit path, panics included.
struct CompileScope {
    input: PathBuf,
    output: PathBuf,
}

impl CompileScope {
    fn create(dir: &Path, format: OutputFormat) -> std::io::Result<CompileScope> {
        std::fs::create_dir_all(dir)?;
        let id = uuid::Uuid::new_v4();
        Ok(CompileScope {
            input: dir.join(format!("reportflow-{id}.typ")),
            output: dir.join(format!("reportflow-{id}.{}", format.extension())),
        })
    }
}

impl Drop for CompileScope {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.input);
        let _ = std::fs::remove_file(&self.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_template_rejected() {
        assert_eq!(validate_template(b""), Err(CompileError::EmptyTemplate));
    }

    #[test]
    fn test_oversized_template_rejected() {
        let big = vec![b'x'; TEMPLATE_SIZE_LIMIT + 1];
        assert_eq!(
            validate_template(&big),
            Err(CompileError::TemplateTooLarge {
                limit: TEMPLATE_SIZE_LIMIT
            })
        );
    }

    #[test]
    fn test_small_template_accepted() {
        assert_eq!(validate_template(b"#grid(columns: (auto,))"), Ok(()));
    }

    #[test]
    fn test_pdf_magic_enforced() {
        assert!(verify_output(b"%PDF-1.7 rest", OutputFormat::Pdf).is_ok());
        assert!(verify_output(b"not a pdf", OutputFormat::Pdf).is_err());
        // Non-PDF formats carry no magic requirement.
        assert!(verify_output(b"<svg/>", OutputFormat::Svg).is_ok());
    }
}
