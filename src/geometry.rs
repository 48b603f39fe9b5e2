//! Pixel and display-space geometry of views
//!
//! Every view has two geometries:
//! - [`SurfaceGeometry`]: position and size in pixels. Root views sit at the
//!   origin; nested views are positioned in their parent's pixel space,
//!   (0, 0) being the parent's top-left corner.
//! - [`SpaceGeometry`]: center and half extent in compositor display space
//!   (metres, y up), plus the depth of the view plane.
//!
//! The vertex quad sent to the GPU is derived from the space geometry.

use bytemuck::{Pod, Zeroable};
use cgmath::Vector2;
use std::mem::size_of;

/// Pixel geometry of a view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub x: f32,
    pub y: f32,
    pub width: u32,
    pub height: u32,
}

impl SurfaceGeometry {
    pub fn new(x: f32, y: f32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl Default for SurfaceGeometry {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0, 0)
    }
}

/// Display-space placement of a view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceGeometry {
    pub center: Vector2<f32>,
    pub half_extent: Vector2<f32>,
    /// Depth of the view plane
    pub depth: f32,
}

impl SpaceGeometry {
    pub fn new(center: Vector2<f32>, half_extent: Vector2<f32>, depth: f32) -> Self {
        Self {
            center,
            half_extent,
            depth,
        }
    }

    pub fn left(&self) -> f32 {
        self.center.x - self.half_extent.x
    }

    pub fn right(&self) -> f32 {
        self.center.x + self.half_extent.x
    }

    pub fn bottom(&self) -> f32 {
        self.center.y - self.half_extent.y
    }

    pub fn top(&self) -> f32 {
        self.center.y + self.half_extent.y
    }

    /// Whether the view covers no area and can never be hit
    pub fn is_degenerate(&self) -> bool {
        !(self.half_extent.x > 0.0 && self.half_extent.y > 0.0)
    }

    /// Place a nested view inside its parent.
    ///
    /// The parent's display-space size per pixel scales the child's pixel
    /// geometry; the child's pixel origin is the parent's top-left corner.
    pub fn nested(
        parent: &SpaceGeometry,
        parent_surface: &SurfaceGeometry,
        child_surface: &SurfaceGeometry,
        depth: f32,
    ) -> SpaceGeometry {
        if parent_surface.width == 0 || parent_surface.height == 0 {
            return SpaceGeometry::new(parent.center, Vector2::new(0.0, 0.0), depth);
        }

        let scale_x = parent.half_extent.x * 2.0 / parent_surface.width as f32;
        let scale_y = parent.half_extent.y * 2.0 / parent_surface.height as f32;

        let width = child_surface.width as f32;
        let height = child_surface.height as f32;

        let half_extent = Vector2::new(width * scale_x / 2.0, height * scale_y / 2.0);
        let center = Vector2::new(
            parent.left() + (child_surface.x + width / 2.0) * scale_x,
            parent.top() - (child_surface.y + height / 2.0) * scale_y,
        );

        SpaceGeometry::new(center, half_extent, depth)
    }
}

impl Default for SpaceGeometry {
    fn default() -> Self {
        Self::new(Vector2::new(0.0, 0.0), Vector2::new(0.0, 0.0), 0.0)
    }
}

/// One vertex of a view quad, laid out the way the shader reads it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Two triangles covering a view
pub type ViewQuad = [Vertex; 6];

/// Bytes reserved at the start of every view's shared buffer for its quad
pub const VERTEX_REGION_SIZE: usize = size_of::<ViewQuad>();

/// Stride of [`Vertex`] in the vertex buffer
pub const VERTEX_STRIDE: u32 = size_of::<Vertex>() as u32;

/// Byte offset of [`Vertex::position`]
pub const VERTEX_POSITION_OFFSET: u32 = 0;

/// Byte offset of [`Vertex::uv`]
pub const VERTEX_UV_OFFSET: u32 = size_of::<[f32; 3]>() as u32;

/// Build the quad for `space`; uv (0, 0) is the texture's top-left pixel
pub fn view_quad(space: &SpaceGeometry) -> ViewQuad {
    let z = space.depth;
    let a = Vertex {
        position: [space.left(), space.bottom(), z],
        uv: [0.0, 1.0],
    };
    let b = Vertex {
        position: [space.right(), space.bottom(), z],
        uv: [1.0, 1.0],
    };
    let c = Vertex {
        position: [space.right(), space.top(), z],
        uv: [1.0, 0.0],
    };
    let d = Vertex {
        position: [space.left(), space.top(), z],
        uv: [0.0, 0.0],
    };

    [a, b, c, a, d, c]
}
