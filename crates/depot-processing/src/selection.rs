//! Which derivative is served by default.

use depot_core::constants::PRIMARY_RATIO_CUTOFF;
use depot_core::CompressionType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub compression_type: CompressionType,
    pub chosen_size: u64,
    pub savings_percentage: f64,
}

fn ratio(size: u64, original: u64) -> f64 {
    if original == 0 {
        f64::INFINITY
    } else {
        size as f64 / original as f64
    }
}

/// Pick the primary derivative.
///
/// WebP wins if it is both smaller than PNG and under the cutoff ratio; PNG wins
/// next if it is under the cutoff; otherwise the smaller of the two is taken.
pub fn select_primary(original_size: u64, png_size: u64, webp_size: u64) -> Selection {
    let png_ratio = ratio(png_size, original_size);
    let webp_ratio = ratio(webp_size, original_size);

    let (compression_type, chosen_size) =
        if webp_ratio < png_ratio && webp_ratio < PRIMARY_RATIO_CUTOFF {
            (CompressionType::Webp, webp_size)
        } else if png_ratio < PRIMARY_RATIO_CUTOFF {
            (CompressionType::Png, png_size)
        } else if webp_size <= png_size {
            (CompressionType::Webp, webp_size)
        } else {
            (CompressionType::Png, png_size)
        };

    let savings_percentage = if original_size == 0 {
        0.0
    } else {
        (original_size as f64 - chosen_size as f64) / original_size as f64 * 100.0
    };

    Selection {
        compression_type,
        chosen_size,
        savings_percentage,
    }
}
