//! [`Backend`] over a real compositor connection
//!
//! Requests go through the proxies generated from `protocol/zigen.xml`.
//! Every proxy carries its [`Handle`] as user data so events can name the
//! objects they refer to. Decoded events are buffered in an [`Inbox`] during
//! dispatch and handed to the caller afterwards.

use super::zigen::client::{
    zgn_compositor::ZgnCompositor,
    zgn_cuboid_window::{self, ZgnCuboidWindow},
    zgn_keyboard::{self, ZgnKeyboard},
    zgn_opengl::ZgnOpengl,
    zgn_opengl_rendering_unit::ZgnOpenglRenderingUnit,
    zgn_opengl_shader_program::ZgnOpenglShaderProgram,
    zgn_opengl_texture::ZgnOpenglTexture,
    zgn_opengl_vertex_buffer::ZgnOpenglVertexBuffer,
    zgn_raw_buffer::ZgnRawBuffer,
    zgn_ray::{self, ZgnRay},
    zgn_seat::{self, ZgnSeat},
    zgn_shell::ZgnShell,
    zgn_virtual_object::ZgnVirtualObject,
};
use super::{
    decode_u32_array, decode_vec3, encode_vec3, missing_globals, Backend, Capabilities, Event,
    Handle, NewObject, Request, MAX_POOL_SIZE,
};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use log::{debug, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use wayland_client::{
    backend::{ReadEventsGuard, WaylandError},
    globals::{registry_queue_init, GlobalListContents},
    protocol::{wl_callback, wl_registry, wl_shm, wl_shm_pool},
    Connection, Dispatch, EventQueue, Proxy, QueueHandle,
};

/// Resolve a socket name the way `wl_display_connect` does
pub fn resolve_socket(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) => Ok(PathBuf::from(dir).join(name)),
        None => Err(Error::Connect {
            socket: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "XDG_RUNTIME_DIR is not set"),
        }),
    }
}

/// Dispatch state of the event queue
#[derive(Debug, Default)]
pub struct Inbox {
    events: VecDeque<Event>,
}

impl Inbox {
    fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }
}

enum Object {
    VirtualObject(ZgnVirtualObject),
    Callback(wl_callback::WlCallback),
    CuboidWindow(ZgnCuboidWindow),
    Ray(ZgnRay),
    Keyboard(ZgnKeyboard),
    ShmPool(wl_shm_pool::WlShmPool),
    RawBuffer(ZgnRawBuffer),
    VertexBuffer(ZgnOpenglVertexBuffer),
    Texture(ZgnOpenglTexture),
    ShaderProgram(ZgnOpenglShaderProgram),
    RenderingUnit(ZgnOpenglRenderingUnit),
}

impl Object {
    fn destroy(self) {
        match self {
            Object::VirtualObject(p) => p.destroy(),
            // wl_callback has no destructor request
            Object::Callback(_) => {}
            Object::CuboidWindow(p) => p.destroy(),
            Object::Ray(p) => p.release(),
            Object::Keyboard(p) => p.release(),
            Object::ShmPool(p) => p.destroy(),
            Object::RawBuffer(p) => p.destroy(),
            Object::VertexBuffer(p) => p.destroy(),
            Object::Texture(p) => p.destroy(),
            Object::ShaderProgram(p) => p.destroy(),
            Object::RenderingUnit(p) => p.destroy(),
        }
    }
}

/// Look up a live proxy of the given kind or bail out with a warning
macro_rules! proxy {
    ($self:ident, $handle:expr, $variant:ident, $ret:expr) => {
        match $self.objects.get(&$handle) {
            Some(Object::$variant(proxy)) => proxy,
            _ => {
                warn!(
                    "{:?} is not a live {} object, request dropped",
                    $handle,
                    stringify!($variant)
                );
                return $ret;
            }
        }
    };
}

/// Conversion for `int` wire arguments; views never ask for more than [`MAX_POOL_SIZE`]
fn wire_int(value: usize) -> i32 {
    debug_assert!(value <= MAX_POOL_SIZE, "{} exceeds the protocol int range", value);
    i32::try_from(value).unwrap_or_else(|_| {
        warn!("{} does not fit a protocol int, clamping", value);
        i32::MAX
    })
}

fn map_wayland_error(error: WaylandError) -> Error {
    match error {
        WaylandError::Io(e) if e.kind() == io::ErrorKind::WouldBlock => Error::WouldBlock,
        WaylandError::Io(e) => Error::Io(e),
        WaylandError::Protocol(e) => Error::Protocol(e.to_string()),
    }
}

/// Connection to a zigen compositor
pub struct WaylandBackend {
    conn: Connection,
    backend: wayland_client::backend::Backend,
    queue: EventQueue<Inbox>,
    qh: QueueHandle<Inbox>,
    inbox: Inbox,
    compositor: ZgnCompositor,
    seat: ZgnSeat,
    shell: ZgnShell,
    shm: wl_shm::WlShm,
    opengl: ZgnOpengl,
    objects: HashMap<Handle, Object>,
    read_guard: Option<ReadEventsGuard>,
    next_handle: u64,
}

impl WaylandBackend {
    /// Connect, perform the initial registry round-trip and bind every required global
    pub fn connect(config: &SessionConfig) -> Result<Self> {
        let socket = resolve_socket(&config.socket)?;
        info!("connecting to compositor at {}", socket.display());

        let stream = UnixStream::connect(&socket).map_err(|source| Error::Connect {
            socket: socket.clone(),
            source,
        })?;
        let conn = Connection::from_socket(stream).map_err(|e| Error::Connect {
            socket: socket.clone(),
            source: io::Error::new(io::ErrorKind::Other, e),
        })?;

        let (globals, queue) = registry_queue_init::<Inbox>(&conn)
            .map_err(|e| Error::Protocol(format!("initial registry round-trip failed: {}", e)))?;

        let advertised: Vec<String> = globals.contents().with_list(|list| {
            list.iter()
                .map(|global| global.interface.clone())
                .collect()
        });
        debug!("compositor advertised {} globals", advertised.len());

        let missing = missing_globals(&advertised);
        if !missing.is_empty() {
            return Err(Error::CompositorNotSupported { missing });
        }

        let qh = queue.handle();
        let mut next_handle = 0u64;
        let mut allocate = || {
            next_handle += 1;
            Handle::from_raw(next_handle)
        };
        let bind_failed = |e: wayland_client::globals::BindError| Error::Protocol(e.to_string());

        let compositor = globals
            .bind::<ZgnCompositor, _, _>(&qh, 1..=1, allocate())
            .map_err(bind_failed)?;
        let seat = globals
            .bind::<ZgnSeat, _, _>(&qh, 1..=1, allocate())
            .map_err(bind_failed)?;
        let shell = globals
            .bind::<ZgnShell, _, _>(&qh, 1..=1, allocate())
            .map_err(bind_failed)?;
        let shm = globals
            .bind::<wl_shm::WlShm, _, _>(&qh, 1..=1, allocate())
            .map_err(bind_failed)?;
        let opengl = globals
            .bind::<ZgnOpengl, _, _>(&qh, 1..=1, allocate())
            .map_err(bind_failed)?;

        let backend = conn.backend();
        info!("bound zigen globals");

        Ok(Self {
            conn,
            backend,
            queue,
            qh,
            inbox: Inbox::default(),
            compositor,
            seat,
            shell,
            shm,
            opengl,
            objects: HashMap::new(),
            read_guard: None,
            next_handle,
        })
    }

    fn allocate(&mut self) -> Handle {
        self.next_handle += 1;
        Handle::from_raw(self.next_handle)
    }

    fn build(&self, handle: Handle, object: NewObject<'_>) -> Option<Object> {
        let qh = &self.qh;
        let built = match object {
            NewObject::VirtualObject => {
                Object::VirtualObject(self.compositor.create_virtual_object(qh, handle))
            }
            NewObject::Frame { virtual_object } => {
                let vo = proxy!(self, virtual_object, VirtualObject, None);
                Object::Callback(vo.frame(qh, handle))
            }
            NewObject::CuboidWindow {
                virtual_object,
                half_size,
            } => {
                let vo = proxy!(self, virtual_object, VirtualObject, None);
                Object::CuboidWindow(self.shell.get_cuboid_window(
                    vo,
                    encode_vec3(half_size),
                    qh,
                    handle,
                ))
            }
            NewObject::Ray => Object::Ray(self.seat.get_ray(qh, handle)),
            NewObject::Keyboard => Object::Keyboard(self.seat.get_keyboard(qh, handle)),
            NewObject::ShmPool { fd, size } => {
                Object::ShmPool(self.shm.create_pool(fd, wire_int(size), qh, handle))
            }
            NewObject::RawBuffer { pool, offset, size } => {
                let pool = proxy!(self, pool, ShmPool, None);
                Object::RawBuffer(self.opengl.create_raw_buffer(
                    pool,
                    wire_int(offset),
                    wire_int(size),
                    qh,
                    handle,
                ))
            }
            NewObject::VertexBuffer => {
                Object::VertexBuffer(self.opengl.create_vertex_buffer(qh, handle))
            }
            NewObject::Texture => Object::Texture(self.opengl.create_texture(qh, handle)),
            NewObject::ShaderProgram {
                vertex_shader,
                fragment_shader,
            } => Object::ShaderProgram(self.opengl.create_shader_program(
                vertex_shader.to_owned(),
                fragment_shader.to_owned(),
                qh,
                handle,
            )),
            NewObject::RenderingUnit { virtual_object } => {
                let vo = proxy!(self, virtual_object, VirtualObject, None);
                Object::RenderingUnit(self.opengl.create_rendering_unit(vo, qh, handle))
            }
        };
        Some(built)
    }
}

impl Backend for WaylandBackend {
    fn create(&mut self, object: NewObject<'_>) -> Handle {
        let handle = self.allocate();
        if let Some(built) = self.build(handle, object) {
            self.objects.insert(handle, built);
        }
        handle
    }

    fn send(&mut self, request: Request) {
        trace!("request {:?}", request);
        match request {
            Request::Destroy(handle) => match self.objects.remove(&handle) {
                Some(object) => object.destroy(),
                None => debug!("{:?} already gone", handle),
            },
            Request::Commit { virtual_object } => {
                proxy!(self, virtual_object, VirtualObject, ()).commit();
            }
            Request::AckConfigure { window, serial } => {
                proxy!(self, window, CuboidWindow, ()).ack_configure(serial);
            }
            Request::Move { window, serial } => {
                proxy!(self, window, CuboidWindow, ()).start_move(&self.seat, serial);
            }
            Request::ResizePool { pool, size } => {
                proxy!(self, pool, ShmPool, ()).resize(wire_int(size));
            }
            Request::AttachVertexBuffer {
                vertex_buffer,
                raw_buffer,
                stride,
            } => {
                let raw = proxy!(self, raw_buffer, RawBuffer, ());
                proxy!(self, vertex_buffer, VertexBuffer, ()).attach(raw, stride);
            }
            Request::AttachTextureImage {
                texture,
                raw_buffer,
                format,
                width,
                height,
            } => {
                let raw = proxy!(self, raw_buffer, RawBuffer, ());
                proxy!(self, texture, Texture, ()).attach_2d(raw, format as u32, width, height);
            }
            Request::UnitAttachVertexBuffer {
                unit,
                vertex_buffer,
            } => {
                let vb = proxy!(self, vertex_buffer, VertexBuffer, ());
                proxy!(self, unit, RenderingUnit, ()).attach_vertex_buffer(vb);
            }
            Request::UnitAttachTexture { unit, texture } => {
                let texture = proxy!(self, texture, Texture, ());
                proxy!(self, unit, RenderingUnit, ()).attach_texture(texture);
            }
            Request::UnitAttachShaderProgram {
                unit,
                shader_program,
            } => {
                let program = proxy!(self, shader_program, ShaderProgram, ());
                proxy!(self, unit, RenderingUnit, ()).attach_shader_program(program);
            }
            Request::AppendVertexInputAttribute {
                unit,
                location,
                format,
                offset,
            } => {
                proxy!(self, unit, RenderingUnit, ()).append_vertex_input_attribute(
                    location,
                    format as u32,
                    offset,
                );
            }
            Request::SetTopology { unit, topology } => {
                proxy!(self, unit, RenderingUnit, ()).set_topology(topology as u32);
            }
        }
    }

    fn prepare_read(&mut self) -> Result<()> {
        if self.read_guard.is_some() {
            return Ok(());
        }
        match self.queue.prepare_read() {
            Some(guard) => {
                self.read_guard = Some(guard);
                Ok(())
            }
            None => Err(Error::WouldBlock),
        }
    }

    fn cancel_read(&mut self) {
        // Dropping the guard cancels the read
        self.read_guard.take();
    }

    fn read_events(&mut self) -> Result<()> {
        let guard = self.read_guard.take().ok_or(Error::ReadNotPrepared)?;
        let count = guard.read().map_err(map_wayland_error)?;
        trace!("read {} events", count);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.conn.flush().map_err(map_wayland_error)
    }

    fn dispatch_pending(&mut self) -> Result<Vec<Event>> {
        self.queue
            .dispatch_pending(&mut self.inbox)
            .map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(self.inbox.events.drain(..).collect())
    }

    fn fd(&self) -> BorrowedFd<'_> {
        self.backend.poll_fd()
    }
}

impl Drop for WaylandBackend {
    fn drop(&mut self) {
        self.read_guard.take();
        for (_, object) in self.objects.drain() {
            object.destroy();
        }
        self.opengl.destroy();
        if let Err(e) = self.conn.flush() {
            debug!("final flush failed: {}", e);
        }
    }
}

impl std::fmt::Debug for WaylandBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaylandBackend")
            .field("objects", &self.objects.len())
            .field("read_prepared", &self.read_guard.is_some())
            .finish()
    }
}

fn handle_of<P: Proxy>(proxy: &P) -> Option<Handle> {
    proxy.data::<Handle>().copied()
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for Inbox {
    fn event(
        _state: &mut Self,
        _registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::GlobalRemove { name } = event {
            debug!("global {} removed", name);
        }
    }
}

impl Dispatch<ZgnSeat, Handle> for Inbox {
    fn event(
        state: &mut Self,
        _seat: &ZgnSeat,
        event: zgn_seat::Event,
        _data: &Handle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let zgn_seat::Event::Capabilities { capabilities } = event;
        state.push(Event::SeatCapabilities(Capabilities::from_bits_truncate(
            capabilities,
        )));
    }
}

impl Dispatch<ZgnRay, Handle> for Inbox {
    fn event(
        state: &mut Self,
        _ray: &ZgnRay,
        event: zgn_ray::Event,
        _data: &Handle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zgn_ray::Event::Enter {
                serial,
                virtual_object,
                origin,
                direction,
            } => {
                let (Some(vo), Some(origin), Some(direction)) = (
                    handle_of(&virtual_object),
                    decode_vec3(&origin),
                    decode_vec3(&direction),
                ) else {
                    warn!("malformed ray enter dropped");
                    return;
                };
                state.push(Event::RayEnter {
                    serial,
                    virtual_object: vo,
                    origin,
                    direction,
                });
            }
            zgn_ray::Event::Leave {
                serial,
                virtual_object,
            } => {
                if let Some(vo) = handle_of(&virtual_object) {
                    state.push(Event::RayLeave {
                        serial,
                        virtual_object: vo,
                    });
                }
            }
            zgn_ray::Event::Motion {
                time,
                origin,
                direction,
            } => {
                let (Some(origin), Some(direction)) = (decode_vec3(&origin), decode_vec3(&direction))
                else {
                    warn!("malformed ray motion dropped");
                    return;
                };
                state.push(Event::RayMotion {
                    time,
                    origin,
                    direction,
                });
            }
            zgn_ray::Event::Button {
                serial,
                time,
                button,
                state: button_state,
            } => state.push(Event::RayButton {
                serial,
                time,
                button,
                state: button_state.into(),
            }),
        }
    }
}

impl Dispatch<ZgnKeyboard, Handle> for Inbox {
    fn event(
        state: &mut Self,
        _keyboard: &ZgnKeyboard,
        event: zgn_keyboard::Event,
        _data: &Handle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zgn_keyboard::Event::Keymap { format, fd, size } => {
                state.push(Event::KeyboardKeymap { format, fd, size })
            }
            zgn_keyboard::Event::Enter {
                serial,
                virtual_object,
                keys,
            } => {
                if let Some(vo) = handle_of(&virtual_object) {
                    state.push(Event::KeyboardEnter {
                        serial,
                        virtual_object: vo,
                        keys: decode_u32_array(&keys),
                    });
                }
            }
            zgn_keyboard::Event::Leave {
                serial,
                virtual_object,
            } => {
                if let Some(vo) = handle_of(&virtual_object) {
                    state.push(Event::KeyboardLeave {
                        serial,
                        virtual_object: vo,
                    });
                }
            }
            zgn_keyboard::Event::Key {
                serial,
                time,
                key,
                state: key_state,
            } => state.push(Event::KeyboardKey {
                serial,
                time,
                key,
                state: key_state.into(),
            }),
            zgn_keyboard::Event::Modifiers {
                serial,
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
            } => state.push(Event::KeyboardModifiers {
                serial,
                depressed: mods_depressed,
                latched: mods_latched,
                locked: mods_locked,
                group,
            }),
        }
    }
}

impl Dispatch<ZgnCuboidWindow, Handle> for Inbox {
    fn event(
        state: &mut Self,
        _window: &ZgnCuboidWindow,
        event: zgn_cuboid_window::Event,
        data: &Handle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let zgn_cuboid_window::Event::Configure { serial, half_size } = event;
        state.push(Event::WindowConfigure {
            window: *data,
            serial,
            half_size: decode_vec3(&half_size),
        });
    }
}

impl Dispatch<wl_callback::WlCallback, Handle> for Inbox {
    fn event(
        state: &mut Self,
        _callback: &wl_callback::WlCallback,
        event: wl_callback::Event,
        data: &Handle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            state.push(Event::FrameDone {
                callback: *data,
                time: callback_data,
            });
        }
    }
}

impl Dispatch<wl_shm::WlShm, Handle> for Inbox {
    fn event(
        _state: &mut Self,
        _shm: &wl_shm::WlShm,
        event: wl_shm::Event,
        _data: &Handle,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            trace!("shm format {:?}", format);
        }
    }
}

/// Interfaces without events
macro_rules! ignore_events {
    ($($iface:ty),* $(,)?) => {
        $(
            impl Dispatch<$iface, Handle> for Inbox {
                fn event(
                    _state: &mut Self,
                    _proxy: &$iface,
                    _event: <$iface as Proxy>::Event,
                    _data: &Handle,
                    _conn: &Connection,
                    _qh: &QueueHandle<Self>,
                ) {
                }
            }
        )*
    };
}

ignore_events!(
    ZgnCompositor,
    ZgnVirtualObject,
    ZgnShell,
    ZgnOpengl,
    ZgnRawBuffer,
    ZgnOpenglVertexBuffer,
    ZgnOpenglShaderProgram,
    ZgnOpenglTexture,
    ZgnOpenglRenderingUnit,
    wl_shm_pool::WlShmPool,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_resolve_socket_absolute_path() {
        let path = resolve_socket("/tmp/zigen-test").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/zigen-test"));
    }

    #[test]
    #[serial]
    fn test_resolve_socket_in_runtime_dir() {
        let dir = tempfile::tempdir().unwrap();
        let previous = std::env::var_os("XDG_RUNTIME_DIR");
        std::env::set_var("XDG_RUNTIME_DIR", dir.path());

        let path = resolve_socket("zigen-0").unwrap();
        assert_eq!(path, dir.path().join("zigen-0"));

        std::env::remove_var("XDG_RUNTIME_DIR");
        assert!(matches!(
            resolve_socket("zigen-0"),
            Err(Error::Connect { .. })
        ));

        if let Some(previous) = previous {
            std::env::set_var("XDG_RUNTIME_DIR", previous);
        }
    }

    #[test]
    #[serial]
    fn test_connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            socket: dir.path().join("nobody-listens").to_string_lossy().into_owned(),
            ..SessionConfig::default()
        };

        let err = WaylandBackend::connect(&config).unwrap_err();
        assert!(err.is_fatal_construction());
    }

    #[test]
    fn test_wire_int_saturates() {
        assert_eq!(wire_int(42), 42);
        assert_eq!(wire_int(MAX_POOL_SIZE), i32::MAX);
    }
}
