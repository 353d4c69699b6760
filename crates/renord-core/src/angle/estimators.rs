//! Independent angle estimators for scanned pages.
//!
//! Each estimator is a pure function over a binarized page thumbnail and
//! returns a detected page angle (degrees, clockwise positive) with a
//! self-reported confidence, or abstains. Detected angles live in
//! (-45°, 135°]: the heuristics cannot tell 0° from 180° (nor 90° from
//! 270°); the caller resolves that ambiguity by retrying the flipped
//! orientation.

use image::GrayImage;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

use super::AngleEstimate;

/// Ink pixels darker than the Otsu split are mapped to 0, paper to 255.
pub(crate) fn binarize_otsu(gray: &GrayImage) -> GrayImage {
    let threshold = otsu_threshold(gray);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        let value = if pixel[0] < threshold { 0 } else { 255 };
        out.put_pixel(x, y, image::Luma([value]));
    }
    out
}

/// Otsu's global threshold over the grayscale histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 128;
    }

    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0f64;
    let mut weight_background = 0u64;
    let mut best_threshold = 128u8;
    let mut best_variance = 0.0f64;

    for t in 0..256 {
        weight_background += histogram[t];
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * histogram[t] as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_all - sum_background) / weight_foreground as f64;

        let between = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between > best_variance {
            best_variance = between;
            best_threshold = t as u8;
        }
    }

    best_threshold
}

/// Fraction of ink pixels in a binarized image.
pub(crate) fn ink_ratio(binary: &GrayImage) -> f32 {
    let total = (binary.width() * binary.height()).max(1);
    let ink = binary.pixels().filter(|p| p[0] == 0).count();
    ink as f32 / total as f32
}

/// Hough-style line-orientation estimator.
///
/// Accumulates votes over (theta, rho) for edge pixels of the binarized
/// page, takes the strongest line per orientation bin and picks the mode
/// orientation. Text rows form the dominant line family.
pub(crate) fn line_orientation_estimate(binary: &GrayImage) -> Option<AngleEstimate> {
    let edges = edge_pixels(binary);
    if edges.len() < 64 {
        return None;
    }

    // Sample to bound cost on dense pages.
    let step = (edges.len() / 4096).max(1);
    let sampled: Vec<(u32, u32)> = edges.into_iter().step_by(step).collect();

    let diagonal = ((binary.width().pow(2) + binary.height().pow(2)) as f64).sqrt();
    let rho_bins = (diagonal as usize / 2).max(1);
    let mut accumulator = vec![vec![0u32; rho_bins]; 180];

    for &(x, y) in &sampled {
        for theta_deg in 0..180usize {
            let theta = (theta_deg as f64).to_radians();
            let rho = x as f64 * theta.cos() + y as f64 * theta.sin();
            let bin = (((rho + diagonal) / (2.0 * diagonal)) * (rho_bins - 1) as f64) as usize;
            accumulator[theta_deg][bin.min(rho_bins - 1)] += 1;
        }
    }

    // Strongest single line per orientation; theta is the line normal, so
    // the line itself runs at theta - 90.
    let line_strength: Vec<u32> = accumulator
        .iter()
        .map(|row| row.iter().copied().max().unwrap_or(0))
        .collect();

    let (best_theta, &best_votes) = line_strength
        .iter()
        .enumerate()
        .max_by_key(|(_, &v)| v)?;
    if best_votes < 8 {
        return None;
    }

    let line_angle = ((best_theta as f32 - 90.0) % 180.0 + 180.0) % 180.0;
    let detected = if line_angle > 135.0 {
        line_angle - 180.0
    } else {
        line_angle
    };

    let runner_up = line_strength
        .iter()
        .enumerate()
        .filter(|(t, _)| (*t as i32 - best_theta as i32).abs() > 5)
        .map(|(_, &v)| v)
        .max()
        .unwrap_or(0);
    let confidence =
        ((best_votes - runner_up) as f32 / best_votes as f32).clamp(0.05, 0.99);

    Some(AngleEstimate {
        angle: detected,
        confidence,
        estimator: "line-orientation",
    })
}

fn edge_pixels(binary: &GrayImage) -> Vec<(u32, u32)> {
    let (width, height) = binary.dimensions();
    let mut edges = Vec::new();
    for y in 0..height.saturating_sub(1) {
        for x in 0..width.saturating_sub(1) {
            let here = binary.get_pixel(x, y)[0];
            let right = binary.get_pixel(x + 1, y)[0];
            let below = binary.get_pixel(x, y + 1)[0];
            if here != right || here != below {
                edges.push((x, y));
            }
        }
    }
    edges
}

/// Projection-profile estimator.
///
/// An upright page has strongly uneven row ink counts (text rows vs gaps),
/// so row variance dominates column variance. The coarse 0/90 decision
/// comes from the variance ratio; the fine skew is the trial rotation
/// maximizing text-row variance.
pub(crate) fn projection_profile_estimate(binary: &GrayImage) -> Option<AngleEstimate> {
    let row_var = projection_variance(binary, Axis::Row);
    let col_var = projection_variance(binary, Axis::Column);
    if row_var == 0.0 && col_var == 0.0 {
        return None;
    }

    let (coarse, ratio) = if col_var > row_var * 1.5 {
        (90.0f32, col_var / row_var.max(f64::EPSILON))
    } else {
        (0.0f32, row_var / col_var.max(f64::EPSILON))
    };

    // Sweep small trial rotations around the coarse pick for residual skew.
    let upright = if coarse == 90.0 {
        image::imageops::rotate270(binary)
    } else {
        binary.clone()
    };
    let fine = fine_skew_sweep(&upright);

    let confidence = (1.0 - 1.0 / ratio as f32).clamp(0.05, 0.99);
    Some(AngleEstimate {
        angle: coarse + fine,
        confidence,
        estimator: "projection-profile",
    })
}

enum Axis {
    Row,
    Column,
}

fn projection_variance(binary: &GrayImage, axis: Axis) -> f64 {
    let (width, height) = binary.dimensions();
    let bins = match axis {
        Axis::Row => height,
        Axis::Column => width,
    };
    if bins == 0 {
        return 0.0;
    }

    let mut counts = vec![0u32; bins as usize];
    for (x, y, pixel) in binary.enumerate_pixels() {
        if pixel[0] == 0 {
            let bin = match axis {
                Axis::Row => y,
                Axis::Column => x,
            };
            counts[bin as usize] += 1;
        }
    }

    let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / bins as f64;
    counts
        .iter()
        .map(|&c| (c as f64 - mean).powi(2))
        .sum::<f64>()
        / bins as f64
}

/// Coarse-then-refined sweep over [-15°, 15°] maximizing row variance.
fn fine_skew_sweep(upright: &GrayImage) -> f32 {
    let mut best_angle = 0.0f32;
    let mut best_var = rotated_row_variance(upright, 0.0);

    let mut angle = -15.0f32;
    while angle <= 15.0 {
        if angle != 0.0 {
            let var = rotated_row_variance(upright, angle);
            if var > best_var {
                best_var = var;
                best_angle = angle;
            }
        }
        angle += 3.0;
    }

    let center = best_angle;
    let mut angle = center - 2.0;
    while angle <= center + 2.0 {
        let var = rotated_row_variance(upright, angle);
        if var > best_var {
            best_var = var;
            best_angle = angle;
        }
        angle += 0.5;
    }

    best_angle
}

fn rotated_row_variance(binary: &GrayImage, angle_deg: f32) -> f64 {
    if angle_deg == 0.0 {
        return projection_variance(binary, Axis::Row);
    }
    let rotated = rotate_about_center(
        binary,
        -angle_deg.to_radians(),
        Interpolation::Nearest,
        image::Luma([255]),
    );
    projection_variance(&rotated, Axis::Row)
}

/// Morphological estimator.
///
/// Opens the page with horizontal and vertical line elements (realized as
/// run-length filters) and compares surviving ink mass. Text rows survive
/// the horizontal opening on an upright page.
pub(crate) fn morphological_estimate(binary: &GrayImage) -> Option<AngleEstimate> {
    const MIN_RUN: u32 = 15;

    let horizontal = run_mass(binary, MIN_RUN, Axis::Row);
    let vertical = run_mass(binary, MIN_RUN, Axis::Column);

    if horizontal == 0 && vertical == 0 {
        return None;
    }

    let (angle, dominant, other) = if vertical > horizontal * 13 / 10 {
        (90.0, vertical, horizontal)
    } else {
        (0.0, horizontal, vertical)
    };

    let ratio = dominant as f32 / (other as f32 + 1.0);
    let confidence = (1.0 - 1.0 / ratio).clamp(0.05, 0.95);

    Some(AngleEstimate {
        angle,
        confidence,
        estimator: "morphology",
    })
}

/// Total ink pixels belonging to runs of at least `min_run` along the axis.
fn run_mass(binary: &GrayImage, min_run: u32, axis: Axis) -> u64 {
    let (width, height) = binary.dimensions();
    let (outer, inner) = match axis {
        Axis::Row => (height, width),
        Axis::Column => (width, height),
    };

    let mut mass = 0u64;
    for o in 0..outer {
        let mut run = 0u32;
        for i in 0..inner {
            let (x, y) = match axis {
                Axis::Row => (i, o),
                Axis::Column => (o, i),
            };
            if binary.get_pixel(x, y)[0] == 0 {
                run += 1;
            } else {
                if run >= min_run {
                    mass += run as u64;
                }
                run = 0;
            }
        }
        if run >= min_run {
            mass += run as u64;
        }
    }
    mass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angle::test_pages::{blank_page, striped_page};

    #[test]
    fn test_otsu_splits_bimodal_histogram() {
        let mut gray = GrayImage::from_pixel(10, 10, image::Luma([240]));
        for x in 0..10 {
            gray.put_pixel(x, 5, image::Luma([10]));
        }
        let threshold = otsu_threshold(&gray);
        assert!(threshold > 10 && threshold <= 240);
    }

    #[test]
    fn test_projection_detects_upright_page() {
        let binary = binarize_otsu(&striped_page());
        let estimate = projection_profile_estimate(&binary).unwrap();
        assert!(estimate.angle.abs() < 2.0, "angle was {}", estimate.angle);
        assert!(estimate.confidence > 0.5);
    }

    #[test]
    fn test_projection_detects_rotated_page() {
        let rotated = image::imageops::rotate90(&striped_page());
        let binary = binarize_otsu(&rotated);
        let estimate = projection_profile_estimate(&binary).unwrap();
        assert!((estimate.angle - 90.0).abs() < 2.0, "angle was {}", estimate.angle);
    }

    #[test]
    fn test_morphology_detects_orientation() {
        let binary = binarize_otsu(&striped_page());
        let upright = morphological_estimate(&binary).unwrap();
        assert_eq!(upright.angle, 0.0);

        let rotated = binarize_otsu(&image::imageops::rotate90(&striped_page()));
        let sideways = morphological_estimate(&rotated).unwrap();
        assert_eq!(sideways.angle, 90.0);
    }

    #[test]
    fn test_line_orientation_detects_stripes() {
        let binary = binarize_otsu(&striped_page());
        let estimate = line_orientation_estimate(&binary).unwrap();
        assert!(estimate.angle.abs() < 3.0, "angle was {}", estimate.angle);
    }

    #[test]
    fn test_estimators_abstain_on_blank_page() {
        let binary = binarize_otsu(&blank_page());
        assert!(line_orientation_estimate(&binary).is_none());
        assert!(morphological_estimate(&binary).is_none());
    }
}
