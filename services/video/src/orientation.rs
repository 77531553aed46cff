use serde::{Deserialize, Serialize};
use std::fmt;

/// 16:9
pub const TARGET_WIDE: f64 = 16.0 / 9.0;
/// 9:16
pub const TARGET_TALL: f64 = 9.0 / 16.0;
/// Absolute tolerance around each target ratio
pub const RATIO_TOLERANCE: f64 = 0.02;

// The bands must not overlap or the check order would decide the label.
const _: () = assert!(TARGET_WIDE - TARGET_TALL > 2.0 * RATIO_TOLERANCE);

/// Coarse orientation of a video, used to partition the object namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Other,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Other => "other",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `width / height` against the 16:9 and 9:16 bands.
///
/// A zero height yields an infinite ratio and classifies as `Other`.
pub fn classify(width: u32, height: u32) -> Orientation {
    let ratio = f64::from(width) / f64::from(height);

    if (ratio - TARGET_WIDE).abs() < RATIO_TOLERANCE {
        Orientation::Landscape
    } else if (ratio - TARGET_TALL).abs() < RATIO_TOLERANCE {
        Orientation::Portrait
    } else {
        Orientation::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_resolutions() {
        assert_eq!(classify(1920, 1080), Orientation::Landscape);
        assert_eq!(classify(1280, 720), Orientation::Landscape);
        assert_eq!(classify(3840, 2160), Orientation::Landscape);
        assert_eq!(classify(1080, 1920), Orientation::Portrait);
        assert_eq!(classify(720, 1280), Orientation::Portrait);
        assert_eq!(classify(1000, 1000), Orientation::Other);
        assert_eq!(classify(640, 480), Orientation::Other);
        assert_eq!(classify(2560, 1080), Orientation::Other);
    }

    #[test]
    fn test_tolerance_band_edges() {
        // 1.79 is within 0.02 of 1.778, 1.80 is not
        assert_eq!(classify(179, 100), Orientation::Landscape);
        assert_eq!(classify(180, 100), Orientation::Other);
        assert_eq!(classify(176, 100), Orientation::Landscape);
        assert_eq!(classify(175, 100), Orientation::Other);

        // 0.57 is within 0.02 of 0.5625, 0.59 is not
        assert_eq!(classify(57, 100), Orientation::Portrait);
        assert_eq!(classify(59, 100), Orientation::Other);
        assert_eq!(classify(55, 100), Orientation::Portrait);
        assert_eq!(classify(54, 100), Orientation::Other);
    }

    #[test]
    fn test_bands_are_disjoint() {
        // No ratio can be within tolerance of both targets.
        let gap = TARGET_WIDE - TARGET_TALL;
        assert!(gap > 2.0 * RATIO_TOLERANCE);

        for width in (100..=4000).step_by(7) {
            for height in [360u32, 720, 1080, 1920] {
                let ratio = f64::from(width) / f64::from(height);
                let wide = (ratio - TARGET_WIDE).abs() < RATIO_TOLERANCE;
                let tall = (ratio - TARGET_TALL).abs() < RATIO_TOLERANCE;
                assert!(!(wide && tall), "{width}x{height} matched both bands");
            }
        }
    }

    #[test]
    fn test_degenerate_height() {
        assert_eq!(classify(1920, 0), Orientation::Other);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Orientation::Landscape.to_string(), "landscape");
        assert_eq!(Orientation::Portrait.as_str(), "portrait");
        assert_eq!(
            serde_json::to_string(&Orientation::Other).unwrap(),
            "\"other\""
        );
    }
}
