//! World-space vectors and safe-area containment checks

use serde::{Deserialize, Serialize};

/// Position in world space. Storm checks only use the horizontal plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Point on the ground plane
    pub const fn flat(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance ignoring height (players on a ridge are not "outside" the storm)
    pub fn distance_2d(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Linear interpolation, `alpha` is clamped to 0..=1
    pub fn lerp(&self, target: &Vec3, alpha: f32) -> Vec3 {
        let t = alpha.clamp(0.0, 1.0);
        Vec3 {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            z: self.z + (target.z - self.z) * t,
        }
    }

    /// Step toward `target` by at most `max_step`
    pub fn move_towards(&self, target: &Vec3, max_step: f32) -> Vec3 {
        let dist = self.distance_2d(target);
        if dist <= max_step || dist < 0.001 {
            return Vec3::new(target.x, target.y, self.z);
        }
        let scale = max_step / dist;
        Vec3::new(
            self.x + (target.x - self.x) * scale,
            self.y + (target.y - self.y) * scale,
            self.z,
        )
    }
}

/// Linear interpolation for scalars, `alpha` is clamped to 0..=1
pub fn lerp(a: f32, b: f32, alpha: f32) -> f32 {
    a + (b - a) * alpha.clamp(0.0, 1.0)
}

/// Check if a point is inside a circle on the ground plane (edge counts as inside)
pub fn is_in_circle(point: &Vec3, center: &Vec3, radius: f32) -> bool {
    let dx = point.x - center.x;
    let dy = point.y - center.y;
    dx * dx + dy * dy <= radius * radius
}

/// Distance from the circle edge (negative = inside, positive = outside)
pub fn distance_from_edge(point: &Vec3, center: &Vec3, radius: f32) -> f32 {
    point.distance_2d(center) - radius
}
