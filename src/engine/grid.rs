//! Maps normalized click coordinates onto the fixed histogram grid.

use serde::Serialize;

/// Dimensions of the histogram grid. Fixed at process start and shared by every room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridSize {
    pub w: usize,
    pub h: usize,
}

impl GridSize {
    /// Builds a grid size, raising each dimension to at least one cell.
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w: w.max(1),
            h: h.max(1),
        }
    }

    /// Total number of cells (`w * h`).
    pub fn cells(&self) -> usize {
        self.w * self.h
    }

    /// Returns the row-major cell index for a normalized coordinate.
    ///
    /// Inputs outside `[0, 1]` are not rejected: each axis is clamped
    /// independently, so out-of-range clicks land on the nearest edge cell.
    pub fn bin(&self, x: f64, y: f64) -> usize {
        let xi = clamp_axis(x, self.w);
        let yi = clamp_axis(y, self.h);
        yi * self.w + xi
    }
}

fn clamp_axis(v: f64, len: usize) -> usize {
    let scaled = (v * len as f64).floor();
    // NaN compares false both ways and falls through to 0.
    if scaled >= (len - 1) as f64 {
        len - 1
    } else if scaled > 0.0 {
        scaled as usize
    } else {
        0
    }
}
