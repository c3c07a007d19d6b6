use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{OcrMcpError, Result};

use super::{OcrEngine, OcrRequest, RecognitionLevel};

/// Runs the `tesseract` CLI as a blocking child process per request.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    tessdata_dir: Option<PathBuf>,
}

impl TesseractEngine {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            tessdata_dir: config.tessdata_dir.clone(),
        }
    }

    fn command(&self, request: &OcrRequest) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(&request.path)
            .arg("stdout")
            .arg("-l")
            .arg(tesseract_languages(&request.languages));

        if let Some(dir) = &self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }

        // Skipping the inverted-text pass roughly halves recognition time.
        if request.recognition_level == RecognitionLevel::Fast {
            cmd.args(["-c", "tessedit_do_invert=0"]);
        }

        if !request.uses_language_correction {
            cmd.args(["-c", "load_system_dawg=0", "-c", "load_freq_dawg=0"]);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, request: &OcrRequest) -> Result<Vec<String>> {
        let mut cmd = self.command(request);
        debug!(command = ?cmd, "Running tesseract");

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OcrMcpError::ProcessingFailed(format!(
                    "tesseract executable '{}' not found",
                    self.binary.display()
                ))
            } else {
                OcrMcpError::ProcessingFailed(format!("Failed to run tesseract: {e}"))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrMcpError::ProcessingFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Split tesseract's plain-text output into lines, dropping the blank
/// paragraph separators and the trailing form feed.
fn parse_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.replace('\u{c}', ""))
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Map a BCP-47 tag to a Tesseract traineddata name. Unknown tags pass through.
pub fn tesseract_language(tag: &str) -> String {
    let normalized = tag.trim().replace('_', "-").to_lowercase();

    let script_specific = match normalized.as_str() {
        "zh-hans" | "zh-cn" | "zh-sg" => Some("chi_sim"),
        "zh-hant" | "zh-tw" | "zh-hk" | "zh-mo" => Some("chi_tra"),
        "sr-latn" => Some("srp_latn"),
        _ => None,
    };
    if let Some(code) = script_specific {
        return code.to_string();
    }

    let primary = normalized.split('-').next().unwrap_or_default();
    let code = match primary {
        "en" => "eng",
        "fr" => "fra",
        "de" => "deu",
        "es" => "spa",
        "it" => "ita",
        "pt" => "por",
        "nl" => "nld",
        "sv" => "swe",
        "da" => "dan",
        "no" | "nb" => "nor",
        "fi" => "fin",
        "pl" => "pol",
        "cs" => "ces",
        "tr" => "tur",
        "ru" => "rus",
        "uk" => "ukr",
        "el" => "ell",
        "ar" => "ara",
        "he" => "heb",
        "hi" => "hin",
        "th" => "tha",
        "vi" => "vie",
        "ja" => "jpn",
        "ko" => "kor",
        "zh" => "chi_sim",
        _ => return tag.trim().to_string(),
    };
    code.to_string()
}

/// Join mapped languages with `+`, keeping the first occurrence of each.
pub fn tesseract_languages(tags: &[String]) -> String {
    let mut codes: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let code = tesseract_language(tag);
        if !code.is_empty() && !codes.contains(&code) {
            codes.push(code);
        }
    }
    if codes.is_empty() {
        codes.push("eng".to_string());
    }
    codes.join("+")
}
