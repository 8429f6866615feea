use std::fmt;

/// Absolute tolerance when comparing a candidate aspect ratio against the
/// viewport aspect ratio.
const ASPECT_TOLERANCE: f64 = 0.1;

/// A capture/preview resolution reported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for PreviewSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pick the best preview size for the given display viewport.
///
/// Two passes: first only sizes whose aspect ratio is within
/// `ASPECT_TOLERANCE` of the viewport's, minimizing the height distance to
/// the viewport. If no size passes the ratio filter, the filter is dropped
/// and the closest height wins across all sizes. Returns `None` only when
/// `sizes` is empty; callers treat that as "no size constraint applied".
pub fn select_optimal_size(
    sizes: &[PreviewSize],
    viewport_width: u32,
    viewport_height: u32,
) -> Option<PreviewSize> {
    if sizes.is_empty() {
        return None;
    }

    let target_ratio = viewport_width as f64 / viewport_height as f64;
    let height_diff = |size: &PreviewSize| (size.height as f64 - viewport_height as f64).abs();

    let ratio_matched = sizes
        .iter()
        .filter(|size| (size.aspect_ratio() - target_ratio).abs() <= ASPECT_TOLERANCE)
        .min_by(|a, b| height_diff(a).total_cmp(&height_diff(b)));

    // No aspect-correct candidate: ignore the ratio requirement
    ratio_matched
        .or_else(|| sizes.iter().min_by(|a, b| height_diff(a).total_cmp(&height_diff(b))))
        .copied()
}
