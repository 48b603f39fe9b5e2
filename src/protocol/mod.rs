//! Typed seam between the toolkit and the protocol marshalling layer
//!
//! Views, toplevels and the display never touch protocol proxies directly.
//! They create objects with [`NewObject`], issue [`Request`]s and consume
//! decoded [`Event`]s through a [`Backend`]. Objects are named by opaque
//! [`Handle`]s allocated by the backend.
//!
//! Two backends exist:
//! - [`wayland::WaylandBackend`] talks to a real compositor through
//!   `wayland-client` and the bindings generated from `protocol/zigen.xml`.
//! - [`crate::testing::MockBackend`] records requests and replays scripted
//!   events.

pub mod wayland;
pub mod zigen;

use crate::error::Result;
use bitflags::bitflags;
use cgmath::Vector3;
use std::os::fd::{BorrowedFd, OwnedFd};

/// Client-side name of a protocol object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

bitflags! {
    /// Input devices currently offered by the seat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const RAY = 1;
        const KEYBOARD = 2;
    }
}

/// Pointer button state as reported by the ray
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonState {
    Released,
    Pressed,
}

impl From<u32> for ButtonState {
    fn from(raw: u32) -> Self {
        if raw == 0 {
            ButtonState::Released
        } else {
            ButtonState::Pressed
        }
    }
}

/// Key state as reported by the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Released,
    Pressed,
}

impl From<u32> for KeyState {
    fn from(raw: u32) -> Self {
        if raw == 0 {
            KeyState::Released
        } else {
            KeyState::Pressed
        }
    }
}

/// Texture pixel formats understood by the GPU interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TextureFormat {
    /// 32-bit little-endian ARGB, i.e. bytes B, G, R, A in memory
    Argb8888 = 0,
}

/// Vertex attribute component layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VertexFormat {
    Float = 0,
    FloatVector2 = 1,
    FloatVector3 = 2,
    FloatVector4 = 3,
}

/// Primitive assembly mode of a rendering unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Topology {
    Lines = 1,
    Triangles = 4,
}

/// Objects a [`Backend`] can create
#[derive(Debug)]
pub enum NewObject<'a> {
    VirtualObject,
    /// One-shot frame callback on a virtual object
    Frame { virtual_object: Handle },
    CuboidWindow {
        virtual_object: Handle,
        half_size: Vector3<f32>,
    },
    Ray,
    Keyboard,
    ShmPool { fd: BorrowedFd<'a>, size: usize },
    /// A byte range of a shm pool usable as GPU buffer storage
    RawBuffer {
        pool: Handle,
        offset: usize,
        size: usize,
    },
    VertexBuffer,
    Texture,
    ShaderProgram {
        vertex_shader: &'a str,
        fragment_shader: &'a str,
    },
    RenderingUnit { virtual_object: Handle },
}

/// Requests that do not create objects
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Destroy or release any object created through [`Backend::create`]
    Destroy(Handle),
    Commit {
        virtual_object: Handle,
    },
    AckConfigure {
        window: Handle,
        serial: u32,
    },
    /// Start an interactive move of a window, driven by the seat
    Move {
        window: Handle,
        serial: u32,
    },
    ResizePool {
        pool: Handle,
        size: usize,
    },
    AttachVertexBuffer {
        vertex_buffer: Handle,
        raw_buffer: Handle,
        stride: u32,
    },
    AttachTextureImage {
        texture: Handle,
        raw_buffer: Handle,
        format: TextureFormat,
        width: u32,
        height: u32,
    },
    UnitAttachVertexBuffer {
        unit: Handle,
        vertex_buffer: Handle,
    },
    UnitAttachTexture {
        unit: Handle,
        texture: Handle,
    },
    UnitAttachShaderProgram {
        unit: Handle,
        shader_program: Handle,
    },
    AppendVertexInputAttribute {
        unit: Handle,
        location: u32,
        format: VertexFormat,
        offset: u32,
    },
    SetTopology {
        unit: Handle,
        topology: Topology,
    },
}

/// Decoded compositor events
#[derive(Debug)]
pub enum Event {
    SeatCapabilities(Capabilities),
    RayEnter {
        serial: u32,
        virtual_object: Handle,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
    },
    RayLeave {
        serial: u32,
        virtual_object: Handle,
    },
    RayMotion {
        time: u32,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
    },
    RayButton {
        serial: u32,
        time: u32,
        button: u32,
        state: ButtonState,
    },
    KeyboardKeymap {
        format: u32,
        fd: OwnedFd,
        size: u32,
    },
    KeyboardEnter {
        serial: u32,
        virtual_object: Handle,
        keys: Vec<u32>,
    },
    KeyboardLeave {
        serial: u32,
        virtual_object: Handle,
    },
    KeyboardKey {
        serial: u32,
        time: u32,
        key: u32,
        state: KeyState,
    },
    KeyboardModifiers {
        serial: u32,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    },
    /// Authoritative window half size; `None` when the payload was malformed
    WindowConfigure {
        window: Handle,
        serial: u32,
        half_size: Option<Vector3<f32>>,
    },
    FrameDone {
        callback: Handle,
        time: u32,
    },
}

/// Protocol marshalling layer used by a [`crate::Display`]
///
/// Implementations are single-threaded and driven entirely by the caller
/// through the readiness methods.
pub trait Backend {
    /// Create a protocol object and return its handle
    fn create(&mut self, object: NewObject<'_>) -> Handle;

    /// Queue a request
    fn send(&mut self, request: Request);

    /// Announce the intention to read from the connection.
    ///
    /// Fails with [`crate::Error::WouldBlock`] while events that were already
    /// read are waiting to be dispatched.
    fn prepare_read(&mut self) -> Result<()>;

    /// Undo a successful [`Backend::prepare_read`] without reading
    fn cancel_read(&mut self);

    /// Read whatever the compositor sent. Requires a prepared read.
    fn read_events(&mut self) -> Result<()>;

    /// Write queued requests to the connection
    fn flush(&mut self) -> Result<()>;

    /// Decode every event already read from the connection
    fn dispatch_pending(&mut self) -> Result<Vec<Event>>;

    /// Descriptor to poll for readability
    fn fd(&self) -> BorrowedFd<'_>;
}

/// Largest pool or buffer size expressible as a protocol `int`
pub const MAX_POOL_SIZE: usize = i32::MAX as usize;

/// Globals a compositor must advertise for a session to start
pub const REQUIRED_GLOBALS: [&str; 5] = [
    "zgn_compositor",
    "zgn_seat",
    "zgn_shell",
    "wl_shm",
    "zgn_opengl",
];

/// Required globals absent from `advertised`, in [`REQUIRED_GLOBALS`] order
pub fn missing_globals<S: AsRef<str>>(advertised: &[S]) -> Vec<&'static str> {
    REQUIRED_GLOBALS
        .iter()
        .copied()
        .filter(|required| !advertised.iter().any(|name| name.as_ref() == *required))
        .collect()
}

/// Decode an array of three native-endian f32
pub fn decode_vec3(bytes: &[u8]) -> Option<Vector3<f32>> {
    if bytes.len() != 3 * std::mem::size_of::<f32>() {
        return None;
    }
    let mut values = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    Some(Vector3::new(values.next()?, values.next()?, values.next()?))
}

/// Encode a vector as an array of three native-endian f32
pub fn encode_vec3(v: Vector3<f32>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(12);
    for value in [v.x, v.y, v.z] {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
    bytes
}

/// Decode an array of native-endian u32, ignoring a trailing partial element
pub fn decode_u32_array(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
