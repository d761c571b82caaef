//! Pan/zoom camera, content bounds, and fit math.
//!
//! The camera follows the convention of the host drawing surface: `point` is
//! the world-space translation applied before zoom, so the world coordinate
//! at the top-left of the screen is `-point`. `zoom` is a scale factor
//! (1.0 = no zoom).

#[cfg(test)]
#[path = "camera_test.rs"]
mod camera_test;

use serde::{Deserialize, Serialize};

use crate::doc::Shape;

/// Padding around fitted content, in screen pixels.
const FIT_PADDING: f64 = 64.0;

/// Fallback extent for point-like shapes with no explicit size.
const DEFAULT_SHAPE_EXTENT: f64 = 1.0;

/// Camera state for pan/zoom over the infinite canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// World-space translation.
    pub point: [f64; 2],
    /// Scale factor (1.0 = no zoom).
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self { point: [0.0, 0.0], zoom: 1.0 }
    }
}

impl Camera {
    /// Convert a screen-space point to world coordinates.
    #[must_use]
    pub fn screen_to_world(&self, screen: [f64; 2]) -> [f64; 2] {
        [
            screen[0] / self.zoom - self.point[0],
            screen[1] / self.zoom - self.point[1],
        ]
    }

    /// Convert a world-space point to screen coordinates.
    #[must_use]
    pub fn world_to_screen(&self, world: [f64; 2]) -> [f64; 2] {
        [
            (world[0] + self.point[0]) * self.zoom,
            (world[1] + self.point[1]) * self.zoom,
        ]
    }
}

/// Viewport size in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280.0, height: 720.0 }
    }
}

/// Axis-aligned world-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Bounds {
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    #[must_use]
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }
}

/// Bounding box of a single shape.
#[must_use]
pub fn shape_bounds(shape: &Shape) -> Bounds {
    let size = shape
        .size
        .unwrap_or([DEFAULT_SHAPE_EXTENT, DEFAULT_SHAPE_EXTENT]);
    Bounds {
        min: shape.point,
        max: [shape.point[0] + size[0], shape.point[1] + size[1]],
    }
}

/// Combined bounding box of a set of shapes, `None` when empty.
pub fn content_bounds<'a>(shapes: impl Iterator<Item = &'a Shape>) -> Option<Bounds> {
    shapes
        .map(shape_bounds)
        .reduce(|acc, b| acc.union(&b))
}

/// Camera that fits the given bounds into the viewport with padding.
///
/// The fitted zoom is clamped to at most 1.0 — small content is centered at
/// natural scale rather than magnified.
#[must_use]
pub fn camera_to_fit(bounds: &Bounds, viewport: &Viewport) -> Camera {
    let usable_w = (viewport.width - FIT_PADDING * 2.0).max(1.0);
    let usable_h = (viewport.height - FIT_PADDING * 2.0).max(1.0);
    let zoom = (usable_w / bounds.width().max(1.0))
        .min(usable_h / bounds.height().max(1.0))
        .min(1.0);

    // Center the content: point translates the world so the bounds' center
    // lands at the viewport center.
    let center = [
        bounds.min[0] + bounds.width() / 2.0,
        bounds.min[1] + bounds.height() / 2.0,
    ];
    let point = [
        viewport.width / (2.0 * zoom) - center[0],
        viewport.height / (2.0 * zoom) - center[1],
    ];
    Camera { point, zoom }
}

/// Clamp the camera so the visible viewport never extends past the content
/// bounds on the negative side (used in non-infinite-canvas mode).
#[must_use]
pub fn clamp_camera(camera: &Camera, bounds: &Bounds) -> Camera {
    // World coordinate at the screen origin is -point; the viewport must not
    // show space left of or above the content origin.
    let mut clamped = *camera;
    if -clamped.point[0] < bounds.min[0] {
        clamped.point[0] = -bounds.min[0];
    }
    if -clamped.point[1] < bounds.min[1] {
        clamped.point[1] = -bounds.min[1];
    }
    clamped
}
