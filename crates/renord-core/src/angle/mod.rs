//! Page angle detection and correction.
//!
//! Three independent estimators each vote on the page's skew; an explicit
//! arbitration rule picks the winner and the chosen angle is applied as a
//! coarse 90°-multiple rotation plus a fine residual. This step never fails:
//! estimators that error or abstain simply contribute no vote.

mod estimators;

use image::{DynamicImage, GenericImageView, Rgba};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use tracing::debug;

use estimators::{
    binarize_otsu, ink_ratio, line_orientation_estimate, morphological_estimate,
    projection_profile_estimate,
};

/// One estimator's vote: detected page angle in degrees (clockwise
/// positive, range (-45°, 135°]) with a self-reported confidence.
#[derive(Debug, Clone, Copy)]
pub struct AngleEstimate {
    pub angle: f32,
    pub confidence: f32,
    pub estimator: &'static str,
}

/// The correction applied to a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleCorrection {
    /// Detected page angle, degrees clockwise.
    pub detected: f32,
    /// Coarse component of the detected angle (0, 90, 180 or 270).
    pub coarse: u16,
    /// Fine residual within the quadrant, degrees.
    pub fine: f32,
    /// Confidence of the winning vote (low for blank pages).
    pub confidence: f32,
}

impl AngleCorrection {
    /// A passthrough correction (nothing applied).
    pub fn identity(confidence: f32) -> Self {
        Self {
            detected: 0.0,
            coarse: 0,
            fine: 0.0,
            confidence,
        }
    }
}

/// Arbitrates estimator votes and produces corrected page bitmaps.
#[derive(Debug, Clone)]
pub struct AngleCorrector {
    /// Pages with less ink than this fraction pass through unrotated.
    blank_ink_threshold: f32,
    /// Maximum disagreement (degrees) between the two most confident
    /// votes before falling back to the median.
    disagreement_tolerance: f32,
    /// Thumbnail long edge used for estimation.
    estimation_size: u32,
}

impl Default for AngleCorrector {
    fn default() -> Self {
        Self {
            blank_ink_threshold: 0.002,
            disagreement_tolerance: 2.0,
            estimation_size: 512,
        }
    }
}

impl AngleCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect the page angle and return a corrected copy of the bitmap.
    /// The input is never mutated.
    pub fn correct(&self, image: &DynamicImage) -> (DynamicImage, AngleCorrection) {
        let thumbnail = self.thumbnail(image);
        let binary = binarize_otsu(&thumbnail);

        let ink = ink_ratio(&binary);
        if ink < self.blank_ink_threshold {
            debug!("Near-blank page (ink ratio {:.4}), passing through", ink);
            return (image.clone(), AngleCorrection::identity(0.1));
        }

        let mut votes: Vec<AngleEstimate> = Vec::with_capacity(3);
        for (name, estimate) in [
            ("line-orientation", line_orientation_estimate(&binary)),
            ("projection-profile", projection_profile_estimate(&binary)),
            ("morphology", morphological_estimate(&binary)),
        ] {
            match estimate {
                Some(vote) => {
                    debug!(
                        "Estimator {} voted {:.1}° (confidence {:.2})",
                        vote.estimator, vote.angle, vote.confidence
                    );
                    votes.push(vote);
                }
                None => debug!("Estimator {} abstained", name),
            }
        }

        if votes.is_empty() {
            return (image.clone(), AngleCorrection::identity(0.1));
        }

        let (detected, confidence) = arbitrate(&mut votes, self.disagreement_tolerance);
        let (coarse, fine) = decompose(detected);

        debug!(
            "Detected page angle {:.1}° (coarse {}°, fine {:.1}°, confidence {:.2})",
            detected, coarse, fine, confidence
        );

        let corrected = apply_correction(image, coarse, fine);
        (
            corrected,
            AngleCorrection {
                detected,
                coarse,
                fine,
                confidence,
            },
        )
    }

    fn thumbnail(&self, image: &DynamicImage) -> image::GrayImage {
        let (width, height) = image.dimensions();
        if width.max(height) <= self.estimation_size {
            return image.to_luma8();
        }
        image
            .resize(
                self.estimation_size,
                self.estimation_size,
                image::imageops::FilterType::Triangle,
            )
            .to_luma8()
    }
}

/// Pick the winning angle: the highest-confidence vote, unless the two most
/// confident votes disagree by more than the tolerance, in which case the
/// median of all votes guards against single-estimator outliers.
fn arbitrate(votes: &mut [AngleEstimate], tolerance: f32) -> (f32, f32) {
    votes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let top = votes[0];
    if votes.len() >= 2 && (votes[0].angle - votes[1].angle).abs() > tolerance {
        let mut angles: Vec<f32> = votes.iter().map(|v| v.angle).collect();
        angles.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = angles[angles.len() / 2];
        debug!(
            "Top votes disagree ({:.1}° vs {:.1}°), using median {:.1}°",
            votes[0].angle, votes[1].angle, median
        );
        return (median, top.confidence.min(votes[1].confidence));
    }

    (top.angle, top.confidence)
}

/// Split a detected angle into the nearest coarse orientation and the fine
/// residual within the quadrant.
fn decompose(detected: f32) -> (u16, f32) {
    let normalized = detected.rem_euclid(360.0);
    let coarse = ((normalized / 90.0).round() as u16 % 4) * 90;
    let fine = normalized - coarse as f32;
    let fine = if fine > 45.0 { fine - 360.0 } else { fine };
    (coarse, fine)
}

/// Rotate a bitmap by the inverse of the detected angle.
fn apply_correction(image: &DynamicImage, coarse: u16, fine: f32) -> DynamicImage {
    // Undo the coarse rotation: detected 90° CW is corrected by 270° CW.
    let coarse_corrected = rotate_coarse(image, (360 - coarse as u32 % 360) as u16 % 360);

    if fine.abs() < 0.5 {
        return coarse_corrected;
    }

    let rgba = coarse_corrected.to_rgba8();
    let rotated = rotate_about_center(
        &rgba,
        -fine.to_radians(),
        Interpolation::Bilinear,
        Rgba([255, 255, 255, 255]),
    );
    DynamicImage::ImageRgba8(rotated)
}

/// Rotate by a multiple of 90° clockwise.
pub fn rotate_coarse(image: &DynamicImage, degrees_cw: u16) -> DynamicImage {
    match degrees_cw % 360 {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image.clone(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_pages::{blank_page, striped_page};
    use super::*;
    use image::DynamicImage;

    fn dynamic(gray: image::GrayImage) -> DynamicImage {
        DynamicImage::ImageLuma8(gray)
    }

    #[test]
    fn test_blank_page_passes_through() {
        let page = dynamic(blank_page());
        let corrector = AngleCorrector::new();
        let (corrected, correction) = corrector.correct(&page);

        assert_eq!(correction.coarse, 0);
        assert_eq!(correction.fine, 0.0);
        assert!(correction.confidence <= 0.1);
        assert_eq!(corrected.dimensions(), page.dimensions());
    }

    #[test]
    fn test_upright_page_unchanged() {
        let page = dynamic(striped_page());
        let corrector = AngleCorrector::new();
        let (_, correction) = corrector.correct(&page);

        assert_eq!(correction.coarse, 0);
        assert!(correction.fine.abs() <= 1.5, "fine was {}", correction.fine);
    }

    #[test]
    fn test_rotated_page_detected_and_restored() {
        let rotated = dynamic(striped_page()).rotate90();
        let corrector = AngleCorrector::new();
        let (corrected, correction) = corrector.correct(&rotated);

        assert_eq!(correction.coarse, 90);
        // Correcting a 90°-rotated portrait page restores portrait.
        assert!(corrected.height() > corrected.width());
    }

    #[test]
    fn test_flip_ambiguity_passes_through() {
        // A 180°-rotated page is indistinguishable from an upright one to
        // the estimators; the pipeline resolves this by retrying the flip.
        let flipped = dynamic(striped_page()).rotate180();
        let corrector = AngleCorrector::new();
        let (_, correction) = corrector.correct(&flipped);
        assert_eq!(correction.coarse, 0);
    }

    #[test]
    fn test_small_skew_detected() {
        let page = striped_page();
        let skewed = imageproc::geometric_transformations::rotate_about_center(
            &page,
            5.0f32.to_radians(),
            imageproc::geometric_transformations::Interpolation::Bilinear,
            image::Luma([255]),
        );
        let corrector = AngleCorrector::new();
        let (_, correction) = corrector.correct(&dynamic(skewed));

        assert_eq!(correction.coarse, 0);
        assert!(
            (correction.fine - 5.0).abs() <= 2.5,
            "fine was {}",
            correction.fine
        );
    }

    #[test]
    fn test_decompose_splits_coarse_and_fine() {
        assert_eq!(decompose(0.0), (0, 0.0));
        assert_eq!(decompose(92.5), (90, 2.5));
        let (coarse, fine) = decompose(-3.0);
        assert_eq!(coarse, 0);
        assert!((fine - (-3.0)).abs() < 0.001);
    }

    #[test]
    fn test_arbitration_prefers_confidence_within_tolerance() {
        let mut votes = vec![
            AngleEstimate { angle: 1.0, confidence: 0.9, estimator: "a" },
            AngleEstimate { angle: 0.5, confidence: 0.7, estimator: "b" },
            AngleEstimate { angle: 90.0, confidence: 0.2, estimator: "c" },
        ];
        let (angle, _) = arbitrate(&mut votes, 2.0);
        assert_eq!(angle, 1.0);
    }

    #[test]
    fn test_arbitration_falls_back_to_median_on_disagreement() {
        let mut votes = vec![
            AngleEstimate { angle: 0.0, confidence: 0.9, estimator: "a" },
            AngleEstimate { angle: 90.0, confidence: 0.85, estimator: "b" },
            AngleEstimate { angle: 88.0, confidence: 0.5, estimator: "c" },
        ];
        let (angle, _) = arbitrate(&mut votes, 2.0);
        // Median of {0, 88, 90} guards against the outlier.
        assert_eq!(angle, 88.0);
    }
}
