//! Ray / view intersection
//!
//! The compositor reports the pointer as a ray in display space. A view is a
//! rectangle on the plane `z = depth`; a ray hits it when it crosses that
//! plane in front of its origin, strictly inside the rectangle. Touching the
//! border is a miss.
//!
//! Local coordinates are in the view's pixel units with (0, 0) at the visual
//! top-left corner.

use crate::geometry::{SpaceGeometry, SurfaceGeometry};
use cgmath::{Vector2, Vector3};

/// A pointer ray in display space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f32>,
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Vector3<f32>, direction: Vector3<f32>) -> Self {
        Self { origin, direction }
    }

    /// Where the ray crosses the plane `z = depth`, if it does so in front of its origin
    pub fn plane_intersection(&self, depth: f32) -> Option<Vector2<f32>> {
        if self.direction.z == 0.0 {
            return None;
        }

        let t = (depth - self.origin.z) / self.direction.z;
        if !t.is_finite() || t <= 0.0 {
            return None;
        }

        let x = self.origin.x + self.direction.x * t;
        let y = self.origin.y + self.direction.y * t;
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }

        Some(Vector2::new(x, y))
    }
}

/// Intersect `ray` with a view and return local coordinates of the hit
pub fn intersect(
    ray: &Ray,
    space: &SpaceGeometry,
    surface: &SurfaceGeometry,
) -> Option<Vector2<f32>> {
    let point = ray.plane_intersection(space.depth)?;

    let (left, right) = (space.left(), space.right());
    let (bottom, top) = (space.bottom(), space.top());

    let inside = left < point.x && point.x < right && bottom < point.y && point.y < top;
    if !inside {
        return None;
    }

    let width = surface.width as f32;
    let height = surface.height as f32;
    let local_x = ((point.x - left) * width / (right - left)).clamp(0.0, width);
    let local_y = ((top - point.y) * height / (top - bottom)).clamp(0.0, height);

    Some(Vector2::new(local_x, local_y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square_view() -> (SpaceGeometry, SurfaceGeometry) {
        (
            SpaceGeometry::new(Vector2::new(0.0, 0.0), Vector2::new(5.0, 5.0), 0.0),
            SurfaceGeometry::new(0.0, 0.0, 100, 50),
        )
    }

    #[test]
    fn test_straight_ray_hits_center() {
        let (space, surface) = square_view();
        let ray = Ray::new(Vector3::new(0.0, 0.0, 10.0), Vector3::new(0.0, 0.0, -1.0));

        let local = intersect(&ray, &space, &surface).expect("center hit");
        assert_eq!(local, Vector2::new(50.0, 25.0));
    }

    #[test]
    fn test_top_left_maps_to_origin() {
        let (space, surface) = square_view();
        let ray = Ray::new(Vector3::new(-4.9, 4.9, 1.0), Vector3::new(0.0, 0.0, -1.0));

        let local = intersect(&ray, &space, &surface).unwrap();
        assert!(local.x < 2.0 && local.y < 1.0);
    }

    #[test]
    fn test_parallel_ray_misses() {
        let (space, surface) = square_view();
        let ray = Ray::new(Vector3::new(0.0, 0.0, 10.0), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(intersect(&ray, &space, &surface), None);
    }

    #[test]
    fn test_ray_pointing_away_misses() {
        let (space, surface) = square_view();
        let ray = Ray::new(Vector3::new(0.0, 0.0, 10.0), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(intersect(&ray, &space, &surface), None);
    }

    #[test]
    fn test_ray_starting_on_plane_misses() {
        let (space, surface) = square_view();
        let ray = Ray::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(intersect(&ray, &space, &surface), None);
    }

    #[test]
    fn test_boundary_is_a_miss() {
        let (space, surface) = square_view();
        let ray = Ray::new(Vector3::new(5.0, 0.0, 10.0), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(intersect(&ray, &space, &surface), None);
    }

    #[test]
    fn test_plane_depth_is_respected() {
        let space = SpaceGeometry::new(Vector2::new(0.0, 0.0), Vector2::new(1.0, 1.0), 2.0);
        let surface = SurfaceGeometry::new(0.0, 0.0, 10, 10);
        // Slanted ray reaches x = 0.5 at z = 2 but x = 1.5 at z = 0
        let ray = Ray::new(Vector3::new(-0.5, 0.0, 4.0), Vector3::new(0.5, 0.0, -1.0));

        let local = intersect(&ray, &space, &surface).unwrap();
        assert!((local.x - 7.5).abs() < 1e-4);

        let flat = SpaceGeometry { depth: 0.0, ..space };
        assert_eq!(intersect(&ray, &flat, &surface), None);
    }

    proptest! {
        #[test]
        fn prop_hit_iff_strictly_inside(
            ox in -20.0f32..20.0,
            oy in -20.0f32..20.0,
            oz in 0.5f32..20.0,
            dx in -2.0f32..2.0,
            dy in -2.0f32..2.0,
            dz in -4.0f32..-0.1,
            cx in -5.0f32..5.0,
            cy in -5.0f32..5.0,
            hx in 0.1f32..10.0,
            hy in 0.1f32..10.0,
            width in 1u32..2048,
            height in 1u32..2048,
        ) {
            let space = SpaceGeometry::new(Vector2::new(cx, cy), Vector2::new(hx, hy), 0.0);
            let surface = SurfaceGeometry::new(0.0, 0.0, width, height);
            let ray = Ray::new(Vector3::new(ox, oy, oz), Vector3::new(dx, dy, dz));

            let point = ray.plane_intersection(0.0).unwrap();
            let inside = space.left() < point.x && point.x < space.right()
                && space.bottom() < point.y && point.y < space.top();

            match intersect(&ray, &space, &surface) {
                Some(local) => {
                    prop_assert!(inside);
                    prop_assert!(local.x >= 0.0 && local.x <= width as f32);
                    prop_assert!(local.y >= 0.0 && local.y <= height as f32);
                }
                None => prop_assert!(!inside),
            }
        }

        #[test]
        fn prop_degenerate_rays_never_hit(
            ox in -20.0f32..20.0,
            oy in -20.0f32..20.0,
            oz in -20.0f32..20.0,
            dx in -2.0f32..2.0,
            dy in -2.0f32..2.0,
        ) {
            let space = SpaceGeometry::new(Vector2::new(0.0, 0.0), Vector2::new(100.0, 100.0), 0.0);
            let surface = SurfaceGeometry::new(0.0, 0.0, 64, 64);
            let ray = Ray::new(Vector3::new(ox, oy, oz), Vector3::new(dx, dy, 0.0));
            prop_assert_eq!(intersect(&ray, &space, &surface), None);
        }

        #[test]
        fn prop_rays_behind_plane_never_hit(
            oz in 0.1f32..20.0,
            dz in 0.1f32..4.0,
        ) {
            let space = SpaceGeometry::new(Vector2::new(0.0, 0.0), Vector2::new(100.0, 100.0), 0.0);
            let surface = SurfaceGeometry::new(0.0, 0.0, 64, 64);
            let ray = Ray::new(Vector3::new(0.0, 0.0, oz), Vector3::new(0.0, 0.0, dz));
            prop_assert_eq!(intersect(&ray, &space, &surface), None);
        }
    }
}
