use crate::config::Config;
use image::DynamicImage;
use imageproc::edges::canny;
use serde::{Deserialize, Serialize};

/// Flags drawing-heavy pages by counting Canny edge pixels.
///
/// Pure function of the bitmap and the thresholds; it keeps no state between pages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeDensityClassifier {
    pub threshold: u64,
    pub canny_low: f32,
    pub canny_high: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeScore {
    pub edge_pixels: u64,
    pub drawing_heavy: bool,
}

impl EdgeDensityClassifier {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            threshold: cfg.detection.edge_density_threshold,
            canny_low: cfg.detection.canny_low,
            canny_high: cfg.detection.canny_high,
        }
    }

    pub fn edge_pixels(&self, image: &DynamicImage) -> u64 {
        let gray = image.to_luma8();
        if gray.width() == 0 || gray.height() == 0 {
            return 0;
        }
        let edges = canny(&gray, self.canny_low, self.canny_high);
        edges.pixels().filter(|p| p.0[0] > 0).count() as u64
    }

    pub fn classify(&self, image: &DynamicImage) -> EdgeScore {
        let edge_pixels = self.edge_pixels(image);
        EdgeScore {
            edge_pixels,
            drawing_heavy: edge_pixels > self.threshold,
        }
    }
}
