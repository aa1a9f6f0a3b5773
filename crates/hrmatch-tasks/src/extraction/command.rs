//! Extractors that shell out to document conversion tools.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use hrmatch_core::defaults::EXTRACTION_CMD_TIMEOUT_SECS;
use hrmatch_core::{Error, Result};

use super::TextExtractor;

/// Placeholder replaced by the temp file path in command arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0";

/// Run a command with a timeout, returning stdout as a string.
pub(crate) async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::Extraction(format!(
                "External command timed out after {}s",
                timeout_secs
            ))
        })?
        .map_err(|e| Error::Extraction(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Extraction(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extracts text by writing the document to a temp file and running a CLI tool
/// that prints plain text to stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    name: String,
    program: String,
    args: Vec<String>,
    suffix: &'static str,
    magic: Option<&'static [u8]>,
    timeout_secs: u64,
}

impl CommandExtractor {
    /// `args` may contain [`INPUT_PLACEHOLDER`]; without it the path is appended.
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            suffix: "",
            magic: None,
            timeout_secs: EXTRACTION_CMD_TIMEOUT_SECS,
        }
    }

    /// `pdftotext` from poppler-utils.
    pub fn pdftotext() -> Self {
        Self::new("pdftotext", "pdftotext", ["-enc", "UTF-8", INPUT_PLACEHOLDER, "-"])
            .with_suffix(".pdf")
            .with_magic(PDF_MAGIC)
    }

    /// `pandoc` converting Word documents to plain text.
    pub fn pandoc() -> Self {
        Self::new(
            "pandoc",
            "pandoc",
            ["-f", "docx", "-t", "plain", "--wrap=none", INPUT_PLACEHOLDER],
        )
        .with_suffix(".docx")
        .with_magic(ZIP_MAGIC)
    }

    /// `antiword` for legacy binary Word documents.
    pub fn antiword() -> Self {
        Self::new("antiword", "antiword", [INPUT_PLACEHOLDER])
            .with_suffix(".doc")
            .with_magic(OLE_MAGIC)
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_suffix(mut self, suffix: &'static str) -> Self {
        self.suffix = suffix;
        self
    }

    /// Skip documents that do not start with `magic`.
    pub fn with_magic(mut self, magic: &'static [u8]) -> Self {
        self.magic = Some(magic);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    async fn run(&self, data: &[u8]) -> Result<String> {
        let mut tmpfile = tempfile::Builder::new()
            .prefix("hrmatch-doc-")
            .suffix(self.suffix)
            .tempfile()
            .map_err(|e| Error::Extraction(format!("Failed to create temp file: {}", e)))?;
        tmpfile
            .write_all(data)
            .map_err(|e| Error::Extraction(format!("Failed to write temp file: {}", e)))?;
        let tmp_path = tmpfile.path().to_string_lossy().to_string();

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, &tmp_path))
            .collect();
        if !self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            args.push(tmp_path);
        }

        run_cmd_with_timeout(
            Command::new(&self.program).args(&args).kill_on_drop(true),
            self.timeout_secs,
        )
        .await
    }
}

#[async_trait]
impl TextExtractor for CommandExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, data: &[u8]) -> Option<String> {
        if data.is_empty() {
            return None;
        }
        if let Some(magic) = self.magic {
            if !data.starts_with(magic) {
                debug!(
                    subsystem = "extract",
                    component = self.name.as_str(),
                    "Document header does not match, skipping"
                );
                return None;
            }
        }

        match self.run(data).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!(
                    subsystem = "extract",
                    component = self.name.as_str(),
                    chars = text.len(),
                    "Extracted document text"
                );
                Some(text)
            }
            Ok(_) => {
                debug!(
                    subsystem = "extract",
                    component = self.name.as_str(),
                    "Command produced no text"
                );
                None
            }
            Err(e) => {
                warn!(
                    subsystem = "extract",
                    component = self.name.as_str(),
                    error = %e,
                    "Extraction command failed"
                );
                None
            }
        }
    }
}
