//! Paired format selection
//!
//! Given two devices, searches the cross-product of their pairing-capable
//! formats for the pair closest to a target profile. The search is pure and
//! can be re-run whenever the devices or the target change.

use super::traits::{CaptureDevice, FormatDescriptor, Resolution};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Score of a pair whose formats both match the target exactly
pub const PERFECT_SCORE: i64 = 10_000;

/// Default reliability ceiling, in scan lines
pub const DEFAULT_LINE_CEILING: u32 = 1080;

/// What the paired session should look like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetProfile {
    pub resolution: Resolution,
    pub frame_rate: u32,
}

impl TargetProfile {
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            frame_rate,
        }
    }
}

/// A primary/secondary format combination and its score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatPair {
    pub primary: FormatDescriptor,
    pub secondary: FormatDescriptor,
    pub score: i64,
}

impl FormatPair {
    /// Combined pixel-count distance from the target
    fn resolution_difference(&self, target: &TargetProfile) -> u64 {
        let wanted = target.resolution.pixels();
        wanted.abs_diff(self.primary.resolution.pixels())
            + wanted.abs_diff(self.secondary.resolution.pixels())
    }

    fn frame_rate_difference(&self, target: &TargetProfile) -> u32 {
        target.frame_rate.abs_diff(self.primary.frame_rate)
            + target.frame_rate.abs_diff(self.secondary.frame_rate)
    }

    /// `Greater` means `self` is the better pair
    fn rank(&self, other: &FormatPair, target: &TargetProfile) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| {
                other
                    .resolution_difference(target)
                    .cmp(&self.resolution_difference(target))
            })
            .then_with(|| {
                self.primary
                    .resolution
                    .pixels()
                    .cmp(&other.primary.resolution.pixels())
            })
            .then_with(|| {
                other
                    .frame_rate_difference(target)
                    .cmp(&self.frame_rate_difference(target))
            })
    }
}

/// Scores format pairs against a target profile
#[derive(Debug, Clone)]
pub struct FormatCompatibilityEngine {
    line_ceiling: u32,
}

impl Default for FormatCompatibilityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_CEILING)
    }
}

impl FormatCompatibilityEngine {
    pub fn new(line_ceiling: u32) -> Self {
        Self { line_ceiling }
    }

    /// Score for a pair; never increases as either format drifts from the target
    pub fn score(target: &TargetProfile, primary: &FormatDescriptor, secondary: &FormatDescriptor) -> i64 {
        let wanted = target.resolution.lines() as i64;
        let drift = (wanted - primary.resolution.lines() as i64).abs()
            + (wanted - secondary.resolution.lines() as i64).abs();
        PERFECT_SCORE - drift
    }

    fn within_ceiling(&self, format: &FormatDescriptor) -> bool {
        format.resolution.lines() <= self.line_ceiling
    }

    /// Every surviving pair, best first
    pub fn candidates(
        &self,
        primary: &CaptureDevice,
        secondary: &CaptureDevice,
        target: &TargetProfile,
    ) -> Vec<FormatPair> {
        let mut pairs: Vec<FormatPair> = primary
            .pairing_formats()
            .filter(|f| self.within_ceiling(f))
            .flat_map(move |p| {
                secondary
                    .pairing_formats()
                    .filter(move |f| self.within_ceiling(f))
                    .map(move |s| FormatPair {
                        primary: *p,
                        secondary: *s,
                        score: Self::score(target, p, s),
                    })
            })
            .collect();

        pairs.sort_by(|a, b| b.rank(a, target));
        pairs
    }

    /// Best pair for the two devices, or `None` when nothing survives the filter
    pub fn select_optimal_pair(
        &self,
        primary: &CaptureDevice,
        secondary: &CaptureDevice,
        target: &TargetProfile,
    ) -> Option<FormatPair> {
        let best = self.candidates(primary, secondary, target).into_iter().next();

        match &best {
            Some(pair) => tracing::debug!(
                "Selected format pair {} + {} (score {}) for {} / {}",
                pair.primary,
                pair.secondary,
                pair.score,
                primary.id,
                secondary.id
            ),
            None => tracing::debug!(
                "No compatible format pair for {} / {}",
                primary.id,
                secondary.id
            ),
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::{DevicePosition, DeviceType};

    fn device(id: &str, formats: Vec<FormatDescriptor>) -> CaptureDevice {
        CaptureDevice::new(id, id, DevicePosition::Back, DeviceType::WideAngle)
            .with_pairing(true)
            .with_formats(formats)
    }

    #[test]
    fn test_exact_match_scores_perfect() {
        let primary = device(
            "back",
            vec![
                FormatDescriptor::pairing(1080, 1920, 30),
                FormatDescriptor::pairing(4000, 3000, 30),
            ],
        );
        let secondary = device(
            "front",
            vec![
                FormatDescriptor::pairing(1080, 1920, 30),
                FormatDescriptor::pairing(720, 1280, 30),
            ],
        );
        let target = TargetProfile::new(1080, 1920, 30);

        let pair = FormatCompatibilityEngine::default()
            .select_optimal_pair(&primary, &secondary, &target)
            .unwrap();

        assert_eq!(pair.primary.resolution, Resolution::new(1080, 1920));
        assert_eq!(pair.secondary.resolution, Resolution::new(1080, 1920));
        assert_eq!(pair.score, PERFECT_SCORE);
    }

    #[test]
    fn test_over_ceiling_formats_are_excluded() {
        let primary = device("back", vec![FormatDescriptor::pairing(4000, 3000, 30)]);
        let secondary = device("front", vec![FormatDescriptor::pairing(1080, 1920, 30)]);
        let target = TargetProfile::new(3000, 4000, 30);

        let engine = FormatCompatibilityEngine::default();
        assert!(engine.select_optimal_pair(&primary, &secondary, &target).is_none());
    }

    #[test]
    fn test_no_returned_pair_exceeds_ceiling() {
        let formats = vec![
            FormatDescriptor::pairing(640, 480, 30),
            FormatDescriptor::pairing(1280, 720, 60),
            FormatDescriptor::pairing(1920, 1080, 30),
            FormatDescriptor::pairing(2560, 1440, 30),
            FormatDescriptor::pairing(3840, 2160, 30),
        ];
        let primary = device("back", formats.clone());
        let secondary = device("front", formats);
        let engine = FormatCompatibilityEngine::default();

        for lines in [480, 720, 1080, 1440, 2160] {
            let target = TargetProfile::new(lines * 16 / 9, lines, 30);
            for pair in engine.candidates(&primary, &secondary, &target) {
                assert!(pair.primary.resolution.lines() <= 1080);
                assert!(pair.secondary.resolution.lines() <= 1080);
            }
        }
    }

    #[test]
    fn test_non_pairing_formats_ignored() {
        let primary = device(
            "back",
            vec![
                FormatDescriptor::new(1920, 1080, 30),
                FormatDescriptor::pairing(1280, 720, 30),
            ],
        );
        let secondary = device("front", vec![FormatDescriptor::pairing(1280, 720, 30)]);
        let target = TargetProfile::new(1920, 1080, 30);

        let pair = FormatCompatibilityEngine::default()
            .select_optimal_pair(&primary, &secondary, &target)
            .unwrap();
        assert_eq!(pair.primary.resolution, Resolution::new(1280, 720));
        assert_eq!(pair.score, PERFECT_SCORE - 720);
    }

    #[test]
    fn test_score_monotonic_in_drift() {
        let target = TargetProfile::new(1920, 1080, 30);
        let reference = FormatDescriptor::pairing(1920, 1080, 30);
        let mut previous = i64::MAX;
        for lines in [1080, 1000, 900, 720, 480, 240] {
            let drifting = FormatDescriptor::pairing(lines * 16 / 9, lines, 30);
            let score = FormatCompatibilityEngine::score(&target, &drifting, &reference);
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn test_tie_broken_by_resolution_difference() {
        // Same line count, different widths: the one nearer the target pixel count wins
        let primary = device(
            "back",
            vec![
                FormatDescriptor::pairing(1440, 1080, 30),
                FormatDescriptor::pairing(1920, 1080, 30),
            ],
        );
        let secondary = device("front", vec![FormatDescriptor::pairing(1920, 1080, 30)]);
        let target = TargetProfile::new(1920, 1080, 30);

        let pair = FormatCompatibilityEngine::default()
            .select_optimal_pair(&primary, &secondary, &target)
            .unwrap();
        assert_eq!(pair.primary.resolution, Resolution::new(1920, 1080));
    }

    #[test]
    fn test_selection_is_repeatable() {
        let primary = device(
            "back",
            vec![
                FormatDescriptor::pairing(1280, 720, 30),
                FormatDescriptor::pairing(1920, 1080, 30),
            ],
        );
        let secondary = device("front", vec![FormatDescriptor::pairing(1280, 720, 30)]);
        let target = TargetProfile::new(1920, 1080, 30);
        let engine = FormatCompatibilityEngine::default();

        let first = engine.select_optimal_pair(&primary, &secondary, &target);
        let second = engine.select_optimal_pair(&primary, &secondary, &target);
        assert_eq!(first, second);
    }
}
