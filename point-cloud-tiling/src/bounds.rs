/// Planar bounds tracking and square grid partitioning
use crate::error::{Result, TilingError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    /// Create bounds, rejecting empty or inverted extents.
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self> {
        if !(x_min < x_max && y_min < y_max) {
            return Err(TilingError::InvalidArgument(format!(
                "degenerate bounding box ({x_min}, {y_min}, {x_max}, {y_max})"
            )));
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    /// Bounds initialised to infinity values, ready for `update`.
    pub fn empty() -> Self {
        Self {
            x_min: f64::INFINITY,
            y_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_max: f64::NEG_INFINITY,
        }
    }

    /// Grow bounds to include a point
    pub fn update(&mut self, x: f64, y: f64) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    /// Smallest box enclosing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Closed-interval membership on both axes.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// True when the box has a positive, finite extent.
    pub fn is_valid(&self) -> bool {
        self.x_min.is_finite()
            && self.y_min.is_finite()
            && self.x_max.is_finite()
            && self.y_max.is_finite()
            && self.x_min < self.x_max
            && self.y_min < self.y_max
    }
}

/// Divide `bbox` into an `n` by `n` grid.
///
/// Cells are emitted row-major over `(i, j)` where `i` steps along x and `j`
/// along y, so cell `i * n + j` spans
/// `[x_min + i*dx, x_min + (i+1)*dx] x [y_min + j*dy, y_min + (j+1)*dy]`.
/// Neighbouring cells share their boundary coordinates. The last cell along
/// each axis is pinned to `x_max` / `y_max` so rounding never leaves a gap.
pub fn split(bbox: &BoundingBox, n: usize) -> Result<Vec<BoundingBox>> {
    if n == 0 {
        return Err(TilingError::InvalidArgument(
            "split factor must be positive".to_string(),
        ));
    }

    let dx = bbox.width() / n as f64;
    let dy = bbox.height() / n as f64;

    let edge = |min: f64, max: f64, step: f64, k: usize| {
        if k == n { max } else { min + step * k as f64 }
    };

    let mut cells = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            cells.push(BoundingBox {
                x_min: edge(bbox.x_min, bbox.x_max, dx, i),
                y_min: edge(bbox.y_min, bbox.y_max, dy, j),
                x_max: edge(bbox.x_min, bbox.x_max, dx, i + 1),
                y_max: edge(bbox.y_min, bbox.y_max, dy, j + 1),
            });
        }
    }
    Ok(cells)
}
