//! The recognition engine seam.
//!
//! The pipeline treats recognition as a black box: a prepared raster and a
//! language profile go in, spans come out. [`RecognitionEngine`] is the
//! single-method interface that makes alternative engines and test doubles
//! interchangeable. The production implementation, [`TesseractEngine`],
//! shells out to the system `tesseract` binary; the subprocess is spawned
//! with kill-on-drop so a timed-out request kills it rather than abandoning
//! it.

use crate::core::errors::ExtractError;
use crate::pipeline::raster::PreprocessedRaster;
use crate::pipeline::result::{RecognitionSpan, SpanRegion};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Black-box recognition capability: raster in, spans out.
#[async_trait]
pub trait RecognitionEngine: Send + Sync + std::fmt::Debug {
    /// Engine identifier for logs.
    fn name(&self) -> &'static str;

    /// Whether the given ISO language profile is installed.
    fn supports_language(&self, language: &str) -> bool;

    /// Recognizes text in a prepared raster.
    ///
    /// Implementations must be cancel-safe: dropping the returned future
    /// must stop (or kill) the underlying work, since the coordinator drops
    /// it on timeout.
    async fn recognize(
        &self,
        raster: &PreprocessedRaster,
        language: &str,
    ) -> Result<Vec<RecognitionSpan>, ExtractError>;
}

/// Configuration for the tesseract subprocess engine.
#[derive(Debug, Clone)]
pub struct TesseractConfig {
    /// Path or name of the tesseract executable.
    pub binary: PathBuf,
    /// Page segmentation mode passed as `--psm`. 6 ("assume a single uniform
    /// block of text") matches the preprocessed single-page input.
    pub page_segmentation_mode: u8,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            page_segmentation_mode: 6,
        }
    }
}

/// Recognition engine backed by the system `tesseract` binary.
#[derive(Debug)]
pub struct TesseractEngine {
    config: TesseractConfig,
    languages: HashSet<String>,
}

impl TesseractEngine {
    /// Probes the binary and the installed language packs.
    ///
    /// Fails fast at service start when the executable is missing, the same
    /// way model artifacts are validated before a server accepts traffic.
    pub fn new(config: TesseractConfig) -> Result<Self, ExtractError> {
        let output = std::process::Command::new(&config.binary)
            .arg("--list-langs")
            .output()
            .map_err(|e| {
                ExtractError::engine(format!(
                    "cannot execute {}: {e}",
                    config.binary.display()
                ))
            })?;

        if !output.status.success() {
            return Err(ExtractError::engine(format!(
                "{} --list-langs failed: {}",
                config.binary.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let languages = parse_language_list(&String::from_utf8_lossy(&output.stdout));
        debug!(count = languages.len(), "tesseract language packs found");

        Ok(Self { config, languages })
    }

    #[cfg(test)]
    pub(crate) fn with_languages(
        config: TesseractConfig,
        languages: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            config,
            languages: languages.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn supports_language(&self, language: &str) -> bool {
        self.languages.contains(language)
    }

    async fn recognize(
        &self,
        raster: &PreprocessedRaster,
        language: &str,
    ) -> Result<Vec<RecognitionSpan>, ExtractError> {
        if !self.supports_language(language) {
            return Err(ExtractError::UnsupportedLanguage {
                language: language.to_string(),
            });
        }

        let mut png = Vec::new();
        raster
            .pixels
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| ExtractError::engine(format!("raster encode failed: {e}")))?;

        let mut child = tokio::process::Command::new(&self.config.binary)
            .args(["stdin", "stdout", "-l", language])
            .args(["--psm", &self.config.page_segmentation_mode.to_string()])
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave an orphaned
            // engine process chewing CPU.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::engine_transient(format!("spawn failed: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractError::engine_transient("stdin unavailable"))?;
        stdin
            .write_all(&png)
            .await
            .map_err(|e| ExtractError::engine_transient(format!("stdin write failed: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExtractError::engine_transient(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, language));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv(&stdout))
    }
}

/// Turns a nonzero tesseract exit into the right taxonomy entry.
///
/// A missing traineddata file is a caller error (unsupported language);
/// anything else is an engine fault. Faults with no diagnostic output look
/// like a crash and are marked transient so the pipeline retries once.
fn classify_failure(stderr: &str, language: &str) -> ExtractError {
    let stderr = stderr.trim();
    if stderr.contains("Error opening data file") || stderr.contains("Failed loading language") {
        return ExtractError::UnsupportedLanguage {
            language: language.to_string(),
        };
    }
    if stderr.is_empty() {
        warn!("recognition engine exited without diagnostics, treating as crash");
        return ExtractError::engine_transient("engine exited without diagnostics");
    }
    ExtractError::engine(stderr.to_string())
}

/// Parses `tesseract --list-langs` output (first line is a banner).
fn parse_language_list(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses tesseract's TSV output into recognition spans.
///
/// Word-level rows (level 5) with a non-negative confidence and non-empty
/// text become spans; structural rows (page/block/line) and rejected words
/// (confidence -1) are skipped. Tesseract confidences are percentages.
fn parse_tsv(tsv: &str) -> Vec<RecognitionSpan> {
    let mut spans = Vec::new();
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        let Ok(level) = fields[0].parse::<u8>() else {
            continue;
        };
        if level != 5 {
            continue;
        }
        let (Ok(left), Ok(top), Ok(width), Ok(height), Ok(conf)) = (
            fields[6].parse::<f32>(),
            fields[7].parse::<f32>(),
            fields[8].parse::<f32>(),
            fields[9].parse::<f32>(),
            fields[10].parse::<f32>(),
        ) else {
            continue;
        };
        if conf < 0.0 {
            continue;
        }
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }
        spans.push(RecognitionSpan::new(
            SpanRegion::new(left, top, width, height),
            text,
            conf / 100.0,
        ));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
4\t1\t1\t1\t1\t0\t10\t10\t300\t20\t-1\t\n\
5\t1\t1\t1\t1\t1\t10\t10\t80\t20\t96.5\thello\n\
5\t1\t1\t1\t1\t2\t100\t12\t90\t18\t88.0\tworld\n\
5\t1\t1\t1\t1\t3\t200\t12\t30\t18\t-1\t\n\
5\t1\t1\t1\t1\t4\t250\t12\t30\t18\t70.0\t \n";

    #[test]
    fn tsv_word_rows_become_spans() {
        let spans = parse_tsv(SAMPLE_TSV);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text.as_ref(), "hello");
        assert!((spans[0].confidence - 0.965).abs() < 1e-6);
        assert_eq!(spans[0].region.x, 10.0);
        assert_eq!(spans[0].region.height, 20.0);
        assert_eq!(spans[1].text.as_ref(), "world");
    }

    #[test]
    fn tsv_rejected_and_blank_words_are_skipped() {
        let spans = parse_tsv(SAMPLE_TSV);
        assert!(spans.iter().all(|s| s.confidence >= 0.0));
        assert!(spans.iter().all(|s| !s.text.trim().is_empty()));
    }

    #[test]
    fn language_list_skips_banner() {
        let langs = parse_language_list("List of available languages (3):\neng\ndeu\nfra\n");
        assert_eq!(langs.len(), 3);
        assert!(langs.contains("eng"));
        assert!(langs.contains("fra"));
    }

    #[test]
    fn missing_traineddata_maps_to_unsupported_language() {
        let err = classify_failure(
            "Error opening data file /usr/share/tessdata/xyz.traineddata",
            "xyz",
        );
        assert!(matches!(err, ExtractError::UnsupportedLanguage { .. }));
    }

    #[test]
    fn silent_exit_is_transient() {
        let err = classify_failure("", "eng");
        assert!(matches!(
            err,
            ExtractError::Engine {
                transient: true,
                ..
            }
        ));
    }

    #[test]
    fn diagnosed_failure_is_not_transient() {
        let err = classify_failure("read_params_file: something broke", "eng");
        assert!(matches!(
            err,
            ExtractError::Engine {
                transient: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected_before_spawn() {
        let engine = TesseractEngine::with_languages(
            TesseractConfig::default(),
            ["eng".to_string()],
        );
        let raster = PreprocessedRaster::blank(10, 10);
        let err = engine.recognize(&raster, "klingon").await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedLanguage { .. }));
    }
}
