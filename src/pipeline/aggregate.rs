//! Span ordering and result assembly.
//!
//! Recognition spans arrive in engine order, which interleaves text from
//! adjacent lines. Spans are first clustered into line bands by vertical
//! position, with a tolerance proportional to the median span height, and
//! only then sorted left-to-right within each band. Sorting horizontally
//! before banding would interleave neighboring lines whenever their
//! baselines differ by a few pixels.

use crate::core::config::PipelineConfig;
use crate::pipeline::result::{ExtractionResult, RecognitionSpan, TextBlock};
use std::time::Duration;

/// Band tolerance as a fraction of the median span height. Half a glyph
/// height tolerates ragged baselines without merging adjacent lines.
const BAND_TOLERANCE_RATIO: f32 = 0.5;

/// Merges spans into ordered text blocks and computes the aggregate
/// confidence.
///
/// Spans below `config.min_confidence` are dropped first. An empty retained
/// set yields an empty result with confidence 0: "no legible text" is a
/// valid outcome, not a failure.
pub fn aggregate(
    spans: Vec<RecognitionSpan>,
    config: &PipelineConfig,
    duration: Duration,
) -> ExtractionResult {
    let retained: Vec<RecognitionSpan> = spans
        .into_iter()
        .filter(|span| span.confidence >= config.min_confidence && !span.text.trim().is_empty())
        .collect();

    if retained.is_empty() {
        return ExtractionResult::empty(duration);
    }

    let confidence = length_weighted_confidence(&retained);
    let bands = band_by_line(retained);

    let text_blocks = bands
        .into_iter()
        .map(|mut spans| {
            spans.sort_by(|a, b| {
                a.region
                    .x
                    .partial_cmp(&b.region.x)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let text = spans
                .iter()
                .map(|span| normalize_whitespace(&span.text))
                .collect::<Vec<_>>()
                .join(" ");
            TextBlock { spans, text }
        })
        .collect();

    ExtractionResult {
        text_blocks,
        confidence,
        duration,
    }
}

/// Clusters spans into line bands by vertical center.
///
/// Spans are walked top-to-bottom; a span joins the current band while its
/// center stays within the tolerance of the band's running mean center,
/// otherwise it opens a new band. The running mean keeps slowly drifting
/// baselines in one band without absorbing the next line.
fn band_by_line(mut spans: Vec<RecognitionSpan>) -> Vec<Vec<RecognitionSpan>> {
    let tolerance = (median_height(&spans) * BAND_TOLERANCE_RATIO).max(1.0);

    spans.sort_by(|a, b| {
        a.region
            .y_center()
            .partial_cmp(&b.region.y_center())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut bands: Vec<Vec<RecognitionSpan>> = Vec::new();
    let mut band_center_sum = 0.0f32;

    for span in spans {
        let center = span.region.y_center();
        match bands.last_mut() {
            Some(band) => {
                let band_mean = band_center_sum / band.len() as f32;
                if (center - band_mean).abs() <= tolerance {
                    band_center_sum += center;
                    band.push(span);
                } else {
                    band_center_sum = center;
                    bands.push(vec![span]);
                }
            }
            None => {
                band_center_sum = center;
                bands.push(vec![span]);
            }
        }
    }

    bands
}

/// Median span height; resistant to the occasional oversized detection box.
fn median_height(spans: &[RecognitionSpan]) -> f32 {
    let mut heights: Vec<f32> = spans.iter().map(|span| span.region.height).collect();
    heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = heights.len() / 2;
    if heights.len() % 2 == 1 {
        heights[mid]
    } else {
        (heights[mid - 1] + heights[mid]) / 2.0
    }
}

/// Mean confidence weighted by text length, so one long confident line
/// outweighs a scattering of short noisy fragments.
fn length_weighted_confidence(spans: &[RecognitionSpan]) -> f32 {
    let mut weighted = 0.0f64;
    let mut weight = 0.0f64;
    for span in spans {
        let len = span.text.trim().chars().count().max(1) as f64;
        weighted += f64::from(span.confidence) * len;
        weight += len;
    }
    if weight == 0.0 {
        0.0
    } else {
        (weighted / weight) as f32
    }
}

/// Collapses internal whitespace runs to single spaces and trims the ends.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::result::SpanRegion;

    fn span(x: f32, y: f32, text: &str, confidence: f32) -> RecognitionSpan {
        RecognitionSpan::new(SpanRegion::new(x, y, 40.0, 10.0), text, confidence)
    }

    #[test]
    fn reading_order_groups_bands_before_horizontal_sort() {
        // Vertical positions {10, 12, 50, 52}, horizontal {5, 80}: the
        // near rows must merge into two lines, each ordered left-to-right.
        let spans = vec![
            span(80.0, 12.0, "B", 0.9),
            span(5.0, 50.0, "C", 0.9),
            span(80.0, 52.0, "D", 0.9),
            span(5.0, 10.0, "A", 0.9),
        ];
        let result = aggregate(spans, &PipelineConfig::default(), Duration::ZERO);
        assert_eq!(result.text_blocks.len(), 2);
        assert_eq!(result.text_blocks[0].text, "A B");
        assert_eq!(result.text_blocks[1].text, "C D");
        assert_eq!(result.full_text(), "A B\nC D");
    }

    #[test]
    fn aggregate_is_deterministic() {
        let make = || {
            vec![
                span(80.0, 12.0, "two", 0.8),
                span(5.0, 10.0, "one", 0.9),
                span(5.0, 50.0, "three", 0.7),
            ]
        };
        let config = PipelineConfig::default();
        let a = aggregate(make(), &config, Duration::ZERO);
        let b = aggregate(make(), &config, Duration::ZERO);
        assert_eq!(a.full_text(), b.full_text());
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn low_confidence_spans_are_dropped() {
        let spans = vec![
            span(5.0, 10.0, "keep", 0.9),
            span(60.0, 10.0, "drop", 0.3),
        ];
        let config = PipelineConfig::default().with_min_confidence(0.5);
        let result = aggregate(spans, &config, Duration::ZERO);
        assert_eq!(result.full_text(), "keep");
    }

    #[test]
    fn empty_retained_set_is_a_valid_empty_result() {
        let config = PipelineConfig::default().with_min_confidence(0.5);
        let result = aggregate(
            vec![span(5.0, 10.0, "noise", 0.1)],
            &config,
            Duration::from_millis(7),
        );
        assert!(result.text_blocks.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.duration, Duration::from_millis(7));
    }

    #[test]
    fn no_spans_at_all_is_a_valid_empty_result() {
        let result = aggregate(Vec::new(), &PipelineConfig::default(), Duration::ZERO);
        assert!(result.text_blocks.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn confidence_is_length_weighted() {
        let spans = vec![
            span(5.0, 10.0, "a-long-confident-span", 1.0), // 21 chars
            span(5.0, 50.0, "bad", 0.0),                   // 3 chars
        ];
        let result = aggregate(spans, &PipelineConfig::default(), Duration::ZERO);
        let expected = 21.0 / 24.0;
        assert!((result.confidence - expected).abs() < 1e-6);
    }

    #[test]
    fn whitespace_is_normalized_within_spans() {
        let spans = vec![span(5.0, 10.0, "  spaced\t\tout  ", 0.9)];
        let result = aggregate(spans, &PipelineConfig::default(), Duration::ZERO);
        assert_eq!(result.full_text(), "spaced out");
    }

    #[test]
    fn single_span_single_band() {
        let result = aggregate(
            vec![span(5.0, 10.0, "only", 0.8)],
            &PipelineConfig::default(),
            Duration::ZERO,
        );
        assert_eq!(result.text_blocks.len(), 1);
        assert_eq!(result.text_blocks[0].spans.len(), 1);
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn drifting_baseline_stays_in_one_band() {
        // Centers drift by 2px per span with height 10; all within half a
        // glyph of the running mean.
        let spans = vec![
            span(5.0, 10.0, "a", 0.9),
            span(50.0, 12.0, "b", 0.9),
            span(95.0, 14.0, "c", 0.9),
        ];
        let result = aggregate(spans, &PipelineConfig::default(), Duration::ZERO);
        assert_eq!(result.text_blocks.len(), 1);
        assert_eq!(result.text_blocks[0].text, "a b c");
    }
}
