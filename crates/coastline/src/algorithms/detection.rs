use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::{
    error::{CoastlineError, Result},
    traits::MaskProcessor,
    types::{BinaryMask, LabeledComponents, BACKGROUND, FOREGROUND},
};

/// Per-component measurements gathered by [`ComponentFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStats {
    pub label: u32,
    pub area: usize,
    /// Whether the component holds a fully-foreground `k x k` block.
    pub has_block: bool,
}

/// Removes small or filament-like 8-connected components.
///
/// A component survives only when it has at least `min_size` pixels and
/// contains one fully-foreground `block_size x block_size` block.
#[derive(Debug, Clone)]
pub struct ComponentFilter {
    pub min_size: usize,
    pub block_size: usize,
}

impl Default for ComponentFilter {
    fn default() -> Self {
        Self {
            min_size: 4,
            block_size: 2,
        }
    }
}

impl ComponentFilter {
    pub fn label(&self, mask: &BinaryMask) -> LabeledComponents {
        let labels = connected_components(mask.image(), Connectivity::Eight, Luma([BACKGROUND]));
        let count = labels.pixels().map(|p| p[0]).max().unwrap_or(0);
        LabeledComponents { labels, count }
    }

    /// Area and block test for every label, indexed by `label - 1`.
    pub fn component_stats(&self, mask: &BinaryMask, components: &LabeledComponents) -> Vec<ComponentStats> {
        let mut stats: Vec<ComponentStats> = (1..=components.count)
            .map(|label| ComponentStats {
                label,
                area: 0,
                has_block: false,
            })
            .collect();

        for label in components.labels.pixels().map(|p| p[0]) {
            if label > 0 {
                stats[label as usize - 1].area += 1;
            }
        }

        let (width, height) = (mask.width(), mask.height());
        let k = self.block_size;
        if k == 0 || k > width || k > height {
            return stats;
        }

        // Summed-area table of foreground pixels; a block summing to k*k is
        // fully foreground and therefore lies inside a single component.
        let stride = width + 1;
        let mut integral = vec![0u32; stride * (height + 1)];
        for row in 0..height {
            let mut running = 0u32;
            for col in 0..width {
                running += mask.is_foreground(row, col) as u32;
                integral[(row + 1) * stride + col + 1] = integral[row * stride + col + 1] + running;
            }
        }

        let full = (k * k) as u32;
        for row in 0..=height - k {
            for col in 0..=width - k {
                let sum = integral[(row + k) * stride + col + k] + integral[row * stride + col]
                    - integral[row * stride + col + k]
                    - integral[(row + k) * stride + col];
                if sum == full {
                    let label = components.label_at(row, col);
                    stats[label as usize - 1].has_block = true;
                }
            }
        }
        stats
    }
}

impl MaskProcessor for ComponentFilter {
    fn process(&self, mask: &BinaryMask) -> Result<BinaryMask> {
        let components = self.label(mask);
        let stats = self.component_stats(mask, &components);
        let keep: Vec<bool> = stats
            .iter()
            .map(|s| s.area >= self.min_size && s.has_block)
            .collect();

        let removed = keep.iter().filter(|&&k| !k).count();
        debug!(
            components = components.count,
            removed,
            min_size = self.min_size,
            block_size = self.block_size,
            "component filter"
        );

        let image = GrayImage::from_fn(mask.width() as u32, mask.height() as u32, |x, y| {
            let label = components.labels.get_pixel(x, y)[0];
            if label > 0 && keep[label as usize - 1] {
                Luma([FOREGROUND])
            } else {
                Luma([BACKGROUND])
            }
        });
        Ok(mask.with_image(image))
    }
}

/// Reclassifies background pockets that do not reach the raster border.
#[derive(Debug, Clone, Default)]
pub struct HoleFiller {
    /// Pockets larger than this many pixels are left open.
    pub max_hole_area: Option<usize>,
}

impl MaskProcessor for HoleFiller {
    fn process(&self, mask: &BinaryMask) -> Result<BinaryMask> {
        let values = mask.distinct_values();
        if values.len() != 2 {
            return Err(CoastlineError::Precondition(format!(
                "hole filling needs a two-valued mask, found {} distinct values",
                values.len()
            )));
        }
        let (background, foreground) = (values[0], values[1]);
        let (width, height) = (mask.width() as u32, mask.height() as u32);

        // Background is 4-connected, the dual of 8-connected foreground.
        let pockets = GrayImage::from_fn(width, height, |x, y| {
            Luma([(mask.image().get_pixel(x, y)[0] == background) as u8])
        });
        let labels = connected_components(&pockets, Connectivity::Four, Luma([0u8]));
        let count = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;

        let mut touches_border = vec![false; count + 1];
        let mut area = vec![0usize; count + 1];
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            area[label] += 1;
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                touches_border[label] = true;
            }
        }

        let fillable = |label: usize| {
            label > 0
                && !touches_border[label]
                && self.max_hole_area.is_none_or(|max| area[label] <= max)
        };
        let filled = (1..=count).filter(|&l| fillable(l)).count();
        debug!(pockets = count, filled, "hole filling");

        let image = GrayImage::from_fn(width, height, |x, y| {
            if fillable(labels.get_pixel(x, y)[0] as usize) {
                Luma([foreground])
            } else {
                *mask.image().get_pixel(x, y)
            }
        });
        Ok(mask.with_image(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};

    fn mask_from_rows(rows: &[&str]) -> BinaryMask {
        let height = rows.len();
        let width = rows[0].len();
        BinaryMask::from_fn(width, height, GeoTransform::IDENTITY, Crs::local(), |r, c| {
            rows[r].as_bytes()[c] == b'#'
        })
    }

    #[test]
    fn diagonal_filament_is_removed_even_when_large() {
        let mask = mask_from_rows(&[
            "#.......",
            ".#......",
            "..#.....",
            "...#....",
            "....#...",
            ".....#..",
            "........",
            "........",
        ]);
        let filter = ComponentFilter {
            min_size: 4,
            block_size: 2,
        };
        let components = filter.label(&mask);
        assert_eq!(components.count, 1, "diagonal pixels are 8-connected");

        let out = filter.process(&mask).unwrap();
        assert_eq!(out.foreground_count(), 0);
    }

    #[test]
    fn small_blob_is_removed_and_large_blob_kept() {
        let mask = mask_from_rows(&[
            "##......",
            "##......",
            "........",
            "....###.",
            "....###.",
            "....###.",
            "........",
        ]);
        let filter = ComponentFilter {
            min_size: 5,
            block_size: 2,
        };
        let out = filter.process(&mask).unwrap();
        assert_eq!(out.foreground_count(), 9);
        assert!(!out.is_foreground(0, 0));
        assert!(out.is_foreground(4, 5));
    }

    #[test]
    fn filter_is_order_independent() {
        let mask = mask_from_rows(&["##.##", "##.##", ".....", "#...#"]);
        let filter = ComponentFilter::default();
        let stats = filter.component_stats(&mask, &filter.label(&mask));
        assert_eq!(stats.len(), 4);
        assert_eq!(stats.iter().filter(|s| s.has_block && s.area >= 4).count(), 2);
    }

    #[test]
    fn enclosed_pixel_is_filled() {
        let mask = mask_from_rows(&[".....", ".###.", ".#.#.", ".###.", "....."]);
        let out = HoleFiller::default().process(&mask).unwrap();
        assert!(out.is_foreground(2, 2));
        assert_eq!(out.foreground_count(), 9);
    }

    #[test]
    fn border_touching_background_is_never_filled() {
        let mask = mask_from_rows(&["#.#..", "#.#..", "###.."]);
        let out = HoleFiller::default().process(&mask).unwrap();
        assert!(!out.is_foreground(0, 1));
        assert!(!out.is_foreground(1, 1));
    }

    #[test]
    fn diagonal_gap_does_not_leak() {
        // The ring is 8-connected; its interior cannot escape through the
        // diagonal step because background is 4-connected.
        let mask = mask_from_rows(&["......", ".###..", ".#..#.", ".#..#.", "..###.", "......"]);
        let out = HoleFiller::default().process(&mask).unwrap();
        assert!(out.is_foreground(2, 2));
        assert!(out.is_foreground(3, 3));
    }

    #[test]
    fn large_pockets_can_be_kept() {
        let mask = mask_from_rows(&[
            "#######",
            "#.....#",
            "#.....#",
            "#######",
            ".......",
            ".###...",
            ".#.#...",
            ".###...",
        ]);
        let out = HoleFiller {
            max_hole_area: Some(4),
        }
        .process(&mask)
        .unwrap();
        assert!(!out.is_foreground(1, 1), "ten pixel lagoon stays open");
        assert!(out.is_foreground(6, 2), "single pixel pocket is filled");
    }

    #[test]
    fn uniform_mask_violates_precondition() {
        let mask = mask_from_rows(&["....", "...."]);
        assert!(matches!(
            HoleFiller::default().process(&mask),
            Err(CoastlineError::Precondition(_))
        ));
    }
}
