//! Views: pixel surfaces placed in display space
//!
//! A view owns one shared memory region holding its vertex quad (first
//! [`VERTEX_REGION_SIZE`] bytes) followed by its BGRA texture, plus the GPU
//! objects that render it: a rendering unit on the toplevel's virtual object,
//! a vertex buffer, a texture and a shader program.
//!
//! Texture state machine:
//!
//! ```text
//! NoTexture -> FirstTextureAttached -> TextureCommitted <-> NewTextureAttached
//! ```
//!
//! A texture write moves `NoTexture` to `FirstTextureAttached` and
//! `TextureCommitted` to `NewTextureAttached`; a commit moves every state but
//! `NoTexture` to `TextureCommitted`.
//!
//! The surface size of a view always equals the size of its latest texture,
//! so local pixel coordinates are texel coordinates.

use crate::context::{Context, ViewId};
use crate::error::{Error, Result};
use crate::geometry::{
    view_quad, SpaceGeometry, SurfaceGeometry, VERTEX_POSITION_OFFSET, VERTEX_REGION_SIZE,
    VERTEX_STRIDE, VERTEX_UV_OFFSET,
};
use crate::protocol::{
    Handle, NewObject, Request, TextureFormat, Topology, VertexFormat, MAX_POOL_SIZE,
};
use crate::ray::{self, Ray};
use crate::shm::SharedBuffer;
use crate::signal::{Listener, Signal};
use cgmath::Vector2;
use log::debug;
use std::cell::{RefCell, RefMut};
use std::io;
use std::os::fd::AsFd;
use std::rc::{Rc, Weak};

const VERTEX_SHADER: &str = "#version 410\n\
uniform mat4 mvp;\n\
layout(location = 0) in vec4 position;\n\
layout(location = 1) in vec2 uv_in;\n\
out vec2 uv;\n\
void main()\n\
{\n\
  uv = uv_in;\n\
  gl_Position = mvp * position;\n\
}\n";

const FRAGMENT_SHADER: &str = "#version 410 core\n\
uniform sampler2D userTexture;\n\
in vec2 uv;\n\
out vec4 outputColor;\n\
void main()\n\
{\n\
  outputColor = texture(userTexture, uv);\n\
}\n";

/// Bytes per BGRA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Texture lifecycle of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureState {
    NoTexture,
    FirstTextureAttached,
    TextureCommitted,
    NewTextureAttached,
}

impl TextureState {
    /// State after a texture write
    pub fn after_write(self) -> Self {
        match self {
            TextureState::NoTexture => TextureState::FirstTextureAttached,
            TextureState::TextureCommitted => TextureState::NewTextureAttached,
            other => other,
        }
    }

    /// State after a commit
    pub fn after_commit(self) -> Self {
        match self {
            TextureState::NoTexture => TextureState::NoTexture,
            _ => TextureState::TextureCommitted,
        }
    }
}

/// Protocol objects owned by a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewResources {
    pub pool: Handle,
    pub vertex_raw_buffer: Handle,
    /// Created with the first non-empty texture
    pub texture_raw_buffer: Option<Handle>,
    pub vertex_buffer: Handle,
    pub texture: Handle,
    pub shader_program: Handle,
    pub rendering_unit: Handle,
}

struct ViewData {
    state: TextureState,
    surface: SurfaceGeometry,
    space: SpaceGeometry,
    /// Half extent negotiated by the toplevel; only used by root views
    root_half_extent: Vector2<f32>,
    pickable: bool,
    children: Vec<View>,
    parent_geometry: Option<Listener>,
    shm: Option<SharedBuffer>,
    resources: ViewResources,
    destroyed: bool,
}

impl ViewData {
    /// Texture bytes that fit without growing the region
    fn texture_capacity(&self) -> usize {
        self.shm
            .as_ref()
            .map(|shm| shm.len().saturating_sub(VERTEX_REGION_SIZE))
            .unwrap_or(0)
    }
}

struct ViewInner {
    id: ViewId,
    ctx: Rc<Context>,
    virtual_object: Handle,
    z_index: u32,
    parent: Option<WeakView>,
    data: RefCell<ViewData>,
    commit_signal: Signal<()>,
    destroy_signal: Signal<()>,
    geometry_signal: Signal<()>,
}

/// Shared handle to a view
#[derive(Clone)]
pub struct View {
    inner: Rc<ViewInner>,
}

/// Non-owning handle to a view
#[derive(Clone)]
pub struct WeakView {
    inner: Weak<ViewInner>,
}

impl WeakView {
    pub fn upgrade(&self) -> Option<View> {
        self.inner.upgrade().map(|inner| View { inner })
    }
}

impl std::fmt::Debug for WeakView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.upgrade() {
            Some(view) => write!(f, "WeakView({:?})", view.id()),
            None => write!(f, "WeakView(dropped)"),
        }
    }
}

impl View {
    /// Create the root view of a toplevel
    pub(crate) fn new_root(ctx: Rc<Context>, virtual_object: Handle) -> Result<View> {
        View::create(ctx, virtual_object, 0, None)
    }

    fn create(
        ctx: Rc<Context>,
        virtual_object: Handle,
        z_index: u32,
        parent: Option<WeakView>,
    ) -> Result<View> {
        let shm = SharedBuffer::create(VERTEX_REGION_SIZE)?;

        let pool = ctx.create(NewObject::ShmPool {
            fd: shm.as_fd(),
            size: shm.len(),
        });
        let vertex_raw_buffer = ctx.create(NewObject::RawBuffer {
            pool,
            offset: 0,
            size: VERTEX_REGION_SIZE,
        });
        let rendering_unit = ctx.create(NewObject::RenderingUnit { virtual_object });
        let vertex_buffer = ctx.create(NewObject::VertexBuffer);
        let shader_program = ctx.create(NewObject::ShaderProgram {
            vertex_shader: VERTEX_SHADER,
            fragment_shader: FRAGMENT_SHADER,
        });
        let texture = ctx.create(NewObject::Texture);

        ctx.send(Request::UnitAttachVertexBuffer {
            unit: rendering_unit,
            vertex_buffer,
        });
        ctx.send(Request::UnitAttachTexture {
            unit: rendering_unit,
            texture,
        });
        ctx.send(Request::UnitAttachShaderProgram {
            unit: rendering_unit,
            shader_program,
        });
        ctx.send(Request::AppendVertexInputAttribute {
            unit: rendering_unit,
            location: 0,
            format: VertexFormat::FloatVector3,
            offset: VERTEX_POSITION_OFFSET,
        });
        ctx.send(Request::AppendVertexInputAttribute {
            unit: rendering_unit,
            location: 1,
            format: VertexFormat::FloatVector2,
            offset: VERTEX_UV_OFFSET,
        });
        ctx.send(Request::SetTopology {
            unit: rendering_unit,
            topology: Topology::Triangles,
        });

        let id = ctx.allocate_view_id();
        let view = View {
            inner: Rc::new(ViewInner {
                id,
                ctx,
                virtual_object,
                z_index,
                parent,
                data: RefCell::new(ViewData {
                    state: TextureState::NoTexture,
                    surface: SurfaceGeometry::default(),
                    space: SpaceGeometry::default(),
                    root_half_extent: Vector2::new(0.0, 0.0),
                    pickable: true,
                    children: Vec::new(),
                    parent_geometry: None,
                    shm: Some(shm),
                    resources: ViewResources {
                        pool,
                        vertex_raw_buffer,
                        texture_raw_buffer: None,
                        vertex_buffer,
                        texture,
                        shader_program,
                        rendering_unit,
                    },
                    destroyed: false,
                }),
                commit_signal: Signal::new(),
                destroy_signal: Signal::new(),
                geometry_signal: Signal::new(),
            }),
        };

        debug!("created view {:?} at z {}", id, z_index);
        view.write_vertex_quad();
        Ok(view)
    }

    /// Create a nested view one Z level above this one.
    ///
    /// The child starts empty at the parent's top-left corner and follows
    /// the parent's geometry.
    pub fn create_child(&self) -> Result<View> {
        if self.is_destroyed() {
            return Err(Error::Destroyed("view"));
        }

        let child = View::create(
            Rc::clone(&self.inner.ctx),
            self.inner.virtual_object,
            self.inner.z_index + 1,
            Some(self.downgrade()),
        )?;

        let weak_child = child.downgrade();
        let listener = self.inner.geometry_signal.add(move |_| {
            if let Some(child) = weak_child.upgrade() {
                child.update_space_geometry();
            }
        });
        child.inner.data.borrow_mut().parent_geometry = Some(listener);
        self.inner.data.borrow_mut().children.push(child.clone());

        child.update_space_geometry();
        Ok(child)
    }

    pub fn downgrade(&self) -> WeakView {
        WeakView {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> ViewId {
        self.inner.id
    }

    pub fn state(&self) -> TextureState {
        self.inner.data.borrow().state
    }

    pub fn surface_geometry(&self) -> SurfaceGeometry {
        self.inner.data.borrow().surface
    }

    pub fn space_geometry(&self) -> SpaceGeometry {
        self.inner.data.borrow().space
    }

    /// 0 for root views, parent + 1 for nested ones
    pub fn z_index(&self) -> u32 {
        self.inner.z_index
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn parent(&self) -> Option<View> {
        self.inner.parent.as_ref().and_then(WeakView::upgrade)
    }

    pub fn children(&self) -> Vec<View> {
        self.inner.data.borrow().children.clone()
    }

    pub fn is_pickable(&self) -> bool {
        self.inner.data.borrow().pickable
    }

    /// Exclude this view from ray picking (its children are unaffected)
    pub fn set_pickable(&self, pickable: bool) {
        self.inner.data.borrow_mut().pickable = pickable;
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.data.borrow().destroyed
    }

    pub fn resources(&self) -> ViewResources {
        self.inner.data.borrow().resources
    }

    pub fn virtual_object(&self) -> Handle {
        self.inner.virtual_object
    }

    /// Emitted on every commit, before the view's state settles
    pub fn commit_signal(&self) -> &Signal<()> {
        &self.inner.commit_signal
    }

    /// Emitted once, before any resource of the view is released
    pub fn destroy_signal(&self) -> &Signal<()> {
        &self.inner.destroy_signal
    }

    /// Emitted after the space geometry is recomputed
    pub fn geometry_signal(&self) -> &Signal<()> {
        &self.inner.geometry_signal
    }

    /// Replace the texture with `pixels`, tightly packed BGRA rows
    pub fn set_texture(&self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        let expected = texture_len(width, height)?;
        if pixels.len() != expected {
            return Err(Error::InvalidPixelData {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        self.prepare_texture(width, height)?;
        {
            let mut data = self.inner.data.borrow_mut();
            let shm = data.shm.as_mut().ok_or(Error::Destroyed("view"))?;
            shm.as_mut_slice()[VERTEX_REGION_SIZE..VERTEX_REGION_SIZE + expected]
                .copy_from_slice(pixels);
        }
        self.attach_texture_image();
        Ok(())
    }

    /// Resize the texture and return its pixels for in-place drawing.
    ///
    /// Counts as a texture write. The returned guard borrows the view; drop
    /// it before calling other methods on the view.
    pub fn texture_buffer(&self, width: u32, height: u32) -> Result<RefMut<'_, [u8]>> {
        let len = self.prepare_texture(width, height)?;

        RefMut::filter_map(self.inner.data.borrow_mut(), |data| {
            data.shm
                .as_mut()
                .map(|shm| &mut shm.as_mut_slice()[VERTEX_REGION_SIZE..VERTEX_REGION_SIZE + len])
        })
        .map_err(|_| Error::Destroyed("view"))
    }

    /// Make room for a `width` x `height` texture and advance the state machine.
    ///
    /// Returns the texture length in bytes. Nothing changes on error.
    fn prepare_texture(&self, width: u32, height: u32) -> Result<usize> {
        if self.is_destroyed() {
            return Err(Error::Destroyed("view"));
        }

        let len = texture_len(width, height)?;

        let resized = {
            let data = self.inner.data.borrow();
            data.surface.width != width || data.surface.height != height
        };

        if len > self.inner.data.borrow().texture_capacity() {
            self.grow(len)?;
        }

        {
            let mut data = self.inner.data.borrow_mut();
            data.surface.width = width;
            data.surface.height = height;
            data.state = data.state.after_write();
        }

        if resized {
            debug!("view {:?} texture is now {}x{}", self.inner.id, width, height);
            self.update_space_geometry();
        }
        Ok(len)
    }

    /// Grow the shared region to hold `texture_len` texture bytes.
    ///
    /// Existing bytes are kept, new texture bytes are opaque white. The raw
    /// buffers are recreated over the resized pool and reattached.
    fn grow(&self, texture_len: usize) -> Result<()> {
        let ctx = &self.inner.ctx;
        let new_len = VERTEX_REGION_SIZE + texture_len;

        let (resources, attached_size) = {
            let mut data = self.inner.data.borrow_mut();
            let shm = data.shm.as_mut().ok_or(Error::Destroyed("view"))?;
            let old_len = shm.len();
            shm.resize(new_len)?;
            shm.as_mut_slice()[old_len..new_len].fill(u8::MAX);
            (data.resources, (data.surface.width, data.surface.height))
        };

        ctx.send(Request::ResizePool {
            pool: resources.pool,
            size: new_len,
        });

        ctx.send(Request::Destroy(resources.vertex_raw_buffer));
        let vertex_raw_buffer = ctx.create(NewObject::RawBuffer {
            pool: resources.pool,
            offset: 0,
            size: VERTEX_REGION_SIZE,
        });
        ctx.send(Request::AttachVertexBuffer {
            vertex_buffer: resources.vertex_buffer,
            raw_buffer: vertex_raw_buffer,
            stride: VERTEX_STRIDE,
        });

        if let Some(old) = resources.texture_raw_buffer {
            ctx.send(Request::Destroy(old));
        }
        let texture_raw_buffer = ctx.create(NewObject::RawBuffer {
            pool: resources.pool,
            offset: VERTEX_REGION_SIZE,
            size: texture_len,
        });
        if resources.texture_raw_buffer.is_some() {
            let (width, height) = attached_size;
            ctx.send(Request::AttachTextureImage {
                texture: resources.texture,
                raw_buffer: texture_raw_buffer,
                format: TextureFormat::Argb8888,
                width,
                height,
            });
        }

        let mut data = self.inner.data.borrow_mut();
        data.resources.vertex_raw_buffer = vertex_raw_buffer;
        data.resources.texture_raw_buffer = Some(texture_raw_buffer);
        debug!("view {:?} shared region grown to {} bytes", self.inner.id, new_len);
        Ok(())
    }

    fn attach_texture_image(&self) {
        let (resources, surface) = {
            let data = self.inner.data.borrow();
            (data.resources, data.surface)
        };
        if let Some(raw_buffer) = resources.texture_raw_buffer {
            self.inner.ctx.send(Request::AttachTextureImage {
                texture: resources.texture,
                raw_buffer,
                format: TextureFormat::Argb8888,
                width: surface.width,
                height: surface.height,
            });
        }
    }

    /// Submit pending content.
    ///
    /// The commit signal lets the owning toplevel finish window negotiation
    /// and commit the virtual object; nested views commit it themselves.
    pub fn commit(&self) {
        if self.is_destroyed() {
            debug!("commit on destroyed view {:?} ignored", self.inner.id);
            return;
        }

        if self.state() != TextureState::NoTexture {
            self.attach_texture_image();
        }

        self.inner.commit_signal.emit(&());

        if !self.is_root() {
            self.inner.ctx.send(Request::Commit {
                virtual_object: self.inner.virtual_object,
            });
        }

        let mut data = self.inner.data.borrow_mut();
        data.state = data.state.after_commit();
    }

    /// Run `callback` once, with the compositor timestamp, when it is a good time to draw
    pub fn add_frame_callback<F>(&self, callback: F)
    where
        F: FnOnce(u32) + 'static,
    {
        if self.is_destroyed() {
            debug!("frame callback on destroyed view {:?} dropped", self.inner.id);
            return;
        }

        let ctx = &self.inner.ctx;
        let handle = ctx.create(NewObject::Frame {
            virtual_object: self.inner.virtual_object,
        });
        ctx.add_frame(handle, self.inner.id, Box::new(callback));
    }

    /// Move a nested view within its parent, in parent pixels
    pub fn set_surface_position(&self, x: f32, y: f32) {
        {
            let mut data = self.inner.data.borrow_mut();
            if data.destroyed {
                return;
            }
            data.surface.x = x;
            data.surface.y = y;
        }
        self.update_space_geometry();
    }

    pub(crate) fn set_root_half_extent(&self, half_extent: Vector2<f32>) {
        self.inner.data.borrow_mut().root_half_extent = half_extent;
    }

    /// Recompute the display-space placement and upload the new quad.
    ///
    /// Root views are centered at the origin with the toplevel's negotiated
    /// half extent. Nested views follow their parent; children are updated
    /// through the geometry signal.
    pub fn update_space_geometry(&self) {
        if self.is_destroyed() {
            return;
        }

        let space = match &self.inner.parent {
            None => {
                let data = self.inner.data.borrow();
                SpaceGeometry::new(Vector2::new(0.0, 0.0), data.root_half_extent, 0.0)
            }
            Some(parent) => {
                let Some(parent) = parent.upgrade() else {
                    return;
                };
                let depth = self.inner.z_index as f32 * self.inner.ctx.config().z_layer_offset;
                let surface = self.surface_geometry();
                let parent_data = parent.inner.data.borrow();
                SpaceGeometry::nested(&parent_data.space, &parent_data.surface, &surface, depth)
            }
        };

        self.inner.data.borrow_mut().space = space;
        self.write_vertex_quad();
        self.inner.geometry_signal.emit(&());
    }

    fn write_vertex_quad(&self) {
        let resources = {
            let mut data = self.inner.data.borrow_mut();
            let quad = view_quad(&data.space);
            let Some(shm) = data.shm.as_mut() else {
                return;
            };
            shm.as_mut_slice()[..VERTEX_REGION_SIZE].copy_from_slice(bytemuck::cast_slice(&quad));
            data.resources
        };

        self.inner.ctx.send(Request::AttachVertexBuffer {
            vertex_buffer: resources.vertex_buffer,
            raw_buffer: resources.vertex_raw_buffer,
            stride: VERTEX_STRIDE,
        });
    }

    /// Local pixel coordinates where `pointer` hits this view
    pub fn intersect(&self, pointer: &Ray) -> Option<Vector2<f32>> {
        let data = self.inner.data.borrow();
        if data.destroyed || data.space.is_degenerate() {
            return None;
        }
        ray::intersect(pointer, &data.space, &data.surface)
    }

    /// This view and all its descendants, parents before children
    pub fn descendants(&self) -> Vec<View> {
        let mut views = vec![self.clone()];
        let mut i = 0;
        while i < views.len() {
            let children = views[i].children();
            views.extend(children);
            i += 1;
        }
        views
    }

    /// Release the view, its children and every protocol object it owns.
    ///
    /// Pending frame callbacks are dropped without running. Calling this
    /// more than once is harmless.
    pub fn destroy(&self) {
        {
            let mut data = self.inner.data.borrow_mut();
            if data.destroyed {
                return;
            }
            data.destroyed = true;
        }

        self.inner.destroy_signal.emit(&());

        let children = std::mem::take(&mut self.inner.data.borrow_mut().children);
        for child in children {
            child.destroy();
        }

        if let Some(parent) = self.parent() {
            parent
                .inner
                .data
                .borrow_mut()
                .children
                .retain(|child| child.id() != self.id());
        }

        let ctx = &self.inner.ctx;
        for frame in ctx.drop_frames_of(self.inner.id) {
            ctx.send(Request::Destroy(frame));
        }

        let (resources, shm, listener) = {
            let mut data = self.inner.data.borrow_mut();
            (data.resources, data.shm.take(), data.parent_geometry.take())
        };
        drop(listener);

        if let Some(texture_raw_buffer) = resources.texture_raw_buffer {
            ctx.send(Request::Destroy(texture_raw_buffer));
        }
        ctx.send(Request::Destroy(resources.texture));
        ctx.send(Request::Destroy(resources.shader_program));
        ctx.send(Request::Destroy(resources.vertex_raw_buffer));
        ctx.send(Request::Destroy(resources.vertex_buffer));
        ctx.send(Request::Destroy(resources.rendering_unit));
        ctx.send(Request::Destroy(resources.pool));
        if let Some(shm) = shm {
            shm.release();
        }

        debug!("destroyed view {:?}", self.inner.id);
    }
}

/// Texture bytes for `width` x `height`, if the whole region still fits one protocol pool
fn texture_len(width: u32, height: u32) -> Result<usize> {
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(BYTES_PER_PIXEL));
    let total = len.and_then(|len| len.checked_add(VERTEX_REGION_SIZE));

    match (len, total) {
        (Some(len), Some(total)) if total <= MAX_POOL_SIZE => Ok(len),
        _ => Err(Error::BufferResizeFailed {
            size: total.unwrap_or(usize::MAX),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{}x{} texture does not fit a shared memory pool", width, height),
            ),
        }),
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for View {}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.data.borrow();
        f.debug_struct("View")
            .field("id", &self.inner.id)
            .field("z_index", &self.inner.z_index)
            .field("state", &data.state)
            .field("surface", &data.surface)
            .field("destroyed", &data.destroyed)
            .finish()
    }
}
