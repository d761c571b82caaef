//! Camera controller: follow application, auto-fit, canvas limiting.
//!
//! A remote camera applies only when it comes from the *last* entry of the
//! follow chain. When the follower's viewport is smaller than the
//! followee's, both the camera point and zoom are scaled down so the
//! followed content stays fully visible instead of cropped.

#[cfg(test)]
#[path = "camera_test.rs"]
mod camera_test;

use canvas::camera::{self, Camera, Viewport};
use canvas::engine::{Engine, ToolLock};
use tracing::debug;

use crate::config::RoomConfig;
use crate::follow::FollowMachine;

/// Apply a followee's camera broadcast. Returns whether it was applied.
pub fn apply_remote_camera(
    engine: &mut Engine,
    follow: &FollowMachine,
    followee_id: &str,
    camera: &Camera,
    followee_viewport: Option<&Viewport>,
) -> bool {
    if follow.followee() != Some(followee_id) {
        return false;
    }

    let local = engine.viewport();
    let corrected = match followee_viewport {
        Some(remote) if local.width > 0.0 && local.height > 0.0 => {
            let ratio = (remote.width / local.width).max(remote.height / local.height);
            if ratio > 1.0 {
                Camera {
                    point: [camera.point[0] / ratio, camera.point[1] / ratio],
                    zoom: camera.zoom / ratio,
                }
            } else {
                *camera
            }
        }
        _ => *camera,
    };

    engine.set_camera(corrected.point, corrected.zoom, "follow");
    true
}

/// Fit the camera to the page content after a remote mutation. Skipped when
/// auto-scale is off, the local user is following someone, or a shape is
/// mid-creation / selected. Returns whether a fit ran.
pub fn auto_fit(engine: &mut Engine, config: &RoomConfig, following: bool) -> bool {
    if !config.auto_scale || following {
        return false;
    }
    if engine.tool_lock() == ToolLock::Creating || !engine.selection().is_empty() {
        return false;
    }

    engine.select_all();
    engine.zoom_to_selection();
    engine.select_none();
    debug!("auto-fit applied");
    true
}

/// Keep the viewport on the content in non-infinite-canvas mode. At zoom
/// above 1 the camera is clamped to the content bounds; at zoom ≤ 1 any
/// selected shapes are nudged back inside the visible viewport instead of
/// moving the camera.
pub fn limit_canvas(engine: &mut Engine) {
    let Some(bounds) = engine.content_bounds() else {
        return;
    };

    if engine.camera().zoom > 1.0 {
        let clamped = camera::clamp_camera(&engine.camera(), &bounds);
        if clamped != engine.camera() {
            engine.set_camera(clamped.point, clamped.zoom, "limit");
        }
        return;
    }

    let cam = engine.camera();
    let viewport = engine.viewport();
    let visible_min = cam.screen_to_world([0.0, 0.0]);
    let visible_max = cam.screen_to_world([viewport.width, viewport.height]);

    let selected: Vec<String> = engine.selection().to_vec();
    let mut moved = Vec::new();
    for id in &selected {
        let Some(shape) = engine.get_shape(id) else {
            continue;
        };
        let size = shape.size.unwrap_or([0.0, 0.0]);
        let mut point = shape.point;
        point[0] = point[0].clamp(visible_min[0], (visible_max[0] - size[0]).max(visible_min[0]));
        point[1] = point[1].clamp(visible_min[1], (visible_max[1] - size[1]).max(visible_min[1]));
        if point != shape.point {
            let mut nudged = shape.clone();
            nudged.point = point;
            moved.push(nudged);
        }
    }
    if !moved.is_empty() {
        // Nudged shapes are a local correction; the engine reports them as
        // a regular edit batch on the next flush.
        let _ = engine.patch_create(moved, Vec::new());
    }
}
