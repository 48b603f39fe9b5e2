//! Display sessions
//!
//! A [`Display`] owns the compositor connection (through a [`Backend`]),
//! the toplevels created on it and the seat's ray and keyboard objects. It
//! routes input to views and tracks pointer and keyboard focus with
//! [`Tracked`] references, so a focused view or toplevel that is destroyed
//! is simply forgotten.
//!
//! The display never blocks on its own. Hosts integrate it into their event
//! loop with the readiness protocol:
//!
//! 1. [`Display::prepare_read`], dispatching pending events while it
//!    reports [`Error::WouldBlock`]
//! 2. [`Display::flush`]
//! 3. poll [`Display::fd`] for readability
//! 4. [`Display::read_events`] (or [`Display::cancel_read`])
//! 5. [`Display::dispatch_pending`]
//!
//! [`Display::dispatch`] runs one such cycle with `poll(2)`.

mod handler;

pub use self::handler::DisplayHandler;

use crate::config::SessionConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::protocol::wayland::WaylandBackend;
use crate::protocol::{Backend, Capabilities, Event, Handle, NewObject, Request};
use crate::ray::Ray;
use crate::signal::{Listener, Tracked};
use crate::toplevel::{Toplevel, WeakToplevel};
use crate::view::{View, WeakView};
use cgmath::Vector2;
use log::{debug, info};
use std::io;
use std::cell::RefCell;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::rc::Rc;

/// Cursor image shown at the pointer position inside the focused view
#[derive(Debug, Clone, Copy)]
pub struct CursorImage<'a> {
    /// Tightly packed BGRA rows
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Pixel of the image placed under the pointer
    pub hotspot_x: i32,
    pub hotspot_y: i32,
}

/// A live toplevel and the listener that unregisters it on destroy
struct Registered {
    toplevel: Toplevel,
    _destroyed: Listener,
}

struct Cursor {
    view: View,
    hotspot: Vector2<f32>,
}

/// A connection to the compositor and everything created on it
pub struct Display {
    ctx: Rc<Context>,
    fd: OwnedFd,
    toplevels: Rc<RefCell<Vec<Registered>>>,
    capabilities: Capabilities,
    ray: Option<Handle>,
    keyboard: Option<Handle>,
    focus_toplevel: Tracked<WeakToplevel>,
    focus_view: Tracked<WeakView>,
    pointer_local: Vector2<f32>,
    cursor: Option<Cursor>,
}

impl Display {
    /// Connect to the compositor named by `config`
    pub fn connect(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let backend = WaylandBackend::connect(config)?;
        info!("display session established");
        Self::with_backend(Box::new(backend), config.clone())
    }

    /// Run a session over an already connected backend
    pub fn with_backend(backend: Box<dyn Backend>, config: SessionConfig) -> Result<Self> {
        let fd = backend.fd().try_clone_to_owned()?;
        Ok(Self {
            ctx: Rc::new(Context::new(backend, config)),
            fd,
            toplevels: Rc::new(RefCell::new(Vec::new())),
            capabilities: Capabilities::empty(),
            ray: None,
            keyboard: None,
            focus_toplevel: Tracked::new(),
            focus_view: Tracked::new(),
            pointer_local: Vector2::new(0.0, 0.0),
            cursor: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        self.ctx.config()
    }

    /// Input devices currently offered by the seat
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Live toplevels in creation order
    pub fn toplevels(&self) -> Vec<Toplevel> {
        self.toplevels
            .borrow()
            .iter()
            .map(|registered| registered.toplevel.clone())
            .collect()
    }

    pub fn focused_view(&self) -> Option<View> {
        self.focus_view.get().and_then(|weak| weak.upgrade())
    }

    pub fn focused_toplevel(&self) -> Option<Toplevel> {
        self.focus_toplevel.get().and_then(|weak| weak.upgrade())
    }

    pub fn create_toplevel(&mut self) -> Result<Toplevel> {
        if self.ctx.is_closed() {
            return Err(Error::Destroyed("display"));
        }
        let toplevel = Toplevel::new(Rc::clone(&self.ctx))?;

        let registry = Rc::downgrade(&self.toplevels);
        let virtual_object = toplevel.virtual_object();
        let destroyed = toplevel.destroy_signal().add(move |_| {
            if let Some(registry) = registry.upgrade() {
                registry
                    .borrow_mut()
                    .retain(|r| r.toplevel.virtual_object() != virtual_object);
            }
        });

        self.toplevels.borrow_mut().push(Registered {
            toplevel: toplevel.clone(),
            _destroyed: destroyed,
        });
        Ok(toplevel)
    }

    /// Same as [`Toplevel::destroy`]; either way the display forgets it
    pub fn destroy_toplevel(&mut self, toplevel: &Toplevel) {
        toplevel.destroy();
    }

    /// Show `image` at the pointer, or remove the cursor with `None`.
    ///
    /// Without pointer focus there is nowhere to show a new cursor and the
    /// call does nothing.
    pub fn set_cursor(&mut self, image: Option<CursorImage<'_>>) -> Result<()> {
        let Some(image) = image else {
            self.destroy_cursor();
            return Ok(());
        };

        let existing = self
            .cursor
            .as_ref()
            .filter(|cursor| !cursor.view.is_destroyed())
            .map(|cursor| cursor.view.clone());
        let view = match existing {
            Some(view) => view,
            None => {
                let Some(parent) = self.focused_view() else {
                    debug!("no pointer focus, cursor not shown");
                    return Ok(());
                };
                let view = parent.create_child()?;
                view.set_pickable(false);
                view
            }
        };

        view.set_texture(image.pixels, image.width, image.height)?;
        self.cursor = Some(Cursor {
            view,
            hotspot: Vector2::new(image.hotspot_x as f32, image.hotspot_y as f32),
        });
        self.move_cursor();
        Ok(())
    }

    /// The cursor view, while one is shown
    pub fn cursor_view(&self) -> Option<View> {
        self.cursor
            .as_ref()
            .filter(|cursor| !cursor.view.is_destroyed())
            .map(|cursor| cursor.view.clone())
    }

    fn move_cursor(&mut self) {
        let Some(cursor) = &self.cursor else {
            return;
        };
        if cursor.view.is_destroyed() {
            self.cursor = None;
            return;
        }
        let position = self.pointer_local - cursor.hotspot;
        cursor.view.set_surface_position(position.x, position.y);
        cursor.view.commit();
    }

    fn destroy_cursor(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.view.destroy();
        }
    }

    fn backend<R>(&self, f: impl FnOnce(&mut dyn Backend) -> Result<R>) -> Result<R> {
        self.ctx
            .with_backend(f)
            .unwrap_or(Err(Error::Destroyed("display")))
    }

    /// See the module docs. Fails with [`Error::WouldBlock`] while read events await dispatch.
    pub fn prepare_read(&mut self) -> Result<()> {
        self.backend(|backend| backend.prepare_read())
    }

    pub fn cancel_read(&mut self) {
        self.ctx.with_backend(|backend| backend.cancel_read());
    }

    pub fn read_events(&mut self) -> Result<()> {
        self.backend(|backend| backend.read_events())
    }

    /// Send queued requests; [`Error::WouldBlock`] means wait for writability and retry
    pub fn flush(&mut self) -> Result<()> {
        self.backend(|backend| backend.flush())
    }

    /// Descriptor to poll for readability
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Route every event already read, returning how many there were
    pub fn dispatch_pending<H>(&mut self, handler: &mut H) -> Result<usize>
    where
        H: DisplayHandler + ?Sized,
    {
        let events = self.backend(|backend| backend.dispatch_pending())?;
        let count = events.len();
        for event in events {
            self.handle_event(event, handler);
        }
        Ok(count)
    }

    /// Block until events arrive and route them.
    ///
    /// Requests that could not be flushed are retried whenever the
    /// connection becomes writable while waiting.
    pub fn dispatch<H>(&mut self, handler: &mut H) -> Result<usize>
    where
        H: DisplayHandler + ?Sized,
    {
        match self.prepare_read() {
            Ok(()) => {}
            Err(Error::WouldBlock) => return self.dispatch_pending(handler),
            Err(e) => return Err(e),
        }

        let mut unflushed = match self.flush_pending() {
            Ok(unflushed) => unflushed,
            Err(e) => {
                self.cancel_read();
                return Err(e);
            }
        };

        loop {
            let readiness = match poll_fd(self.fd.as_raw_fd(), unflushed) {
                Ok(readiness) => readiness,
                Err(e) => {
                    self.cancel_read();
                    return Err(e.into());
                }
            };

            if unflushed && readiness.writable {
                unflushed = match self.flush_pending() {
                    Ok(unflushed) => unflushed,
                    Err(e) => {
                        self.cancel_read();
                        return Err(e);
                    }
                };
            }
            if readiness.readable {
                break;
            }
        }

        match self.read_events() {
            Ok(()) | Err(Error::WouldBlock) => {}
            Err(e) => return Err(e),
        }
        self.dispatch_pending(handler)
    }

    /// Flush, reporting whether requests are still queued
    fn flush_pending(&mut self) -> Result<bool> {
        match self.flush() {
            Ok(()) => Ok(false),
            Err(e) if e.is_transient() => {
                debug!("flush would block, waiting for writability");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn toplevel_by_virtual_object(&self, virtual_object: Handle) -> Option<Toplevel> {
        self.toplevels
            .borrow()
            .iter()
            .find(|r| r.toplevel.virtual_object() == virtual_object)
            .map(|r| r.toplevel.clone())
    }

    fn toplevel_by_window(&self, window: Handle) -> Option<Toplevel> {
        self.toplevels
            .borrow()
            .iter()
            .find(|r| r.toplevel.window() == Some(window))
            .map(|r| r.toplevel.clone())
    }

    fn handle_event<H>(&mut self, event: Event, handler: &mut H)
    where
        H: DisplayHandler + ?Sized,
    {
        match event {
            Event::SeatCapabilities(capabilities) => {
                self.update_capabilities(capabilities, handler)
            }
            Event::RayEnter {
                virtual_object,
                origin,
                direction,
                ..
            } => {
                let Some(toplevel) = self.toplevel_by_virtual_object(virtual_object) else {
                    debug!("ray entered unknown virtual object {:?}", virtual_object);
                    return;
                };
                self.focus_toplevel
                    .set(toplevel.downgrade(), toplevel.destroy_signal());
                self.update_pointer(&toplevel, &Ray::new(origin, direction), None, handler);
            }
            Event::RayMotion {
                time,
                origin,
                direction,
            } => {
                let Some(toplevel) = self.focused_toplevel() else {
                    return;
                };
                self.update_pointer(&toplevel, &Ray::new(origin, direction), Some(time), handler);
            }
            Event::RayLeave { .. } => self.release_pointer_focus(handler),
            Event::RayButton {
                serial,
                time,
                button,
                state,
            } => handler.pointer_button(serial, time, button, state),
            Event::KeyboardKeymap { format, fd, size } => handler.keyboard_keymap(format, fd, size),
            Event::KeyboardEnter {
                serial,
                virtual_object,
                keys,
            } => match self.toplevel_by_virtual_object(virtual_object) {
                Some(toplevel) => handler.keyboard_enter(serial, &toplevel.view(), &keys),
                None => debug!("keyboard entered unknown virtual object {:?}", virtual_object),
            },
            Event::KeyboardLeave {
                serial,
                virtual_object,
            } => match self.toplevel_by_virtual_object(virtual_object) {
                Some(toplevel) => handler.keyboard_leave(serial, &toplevel.view()),
                None => debug!("keyboard left unknown virtual object {:?}", virtual_object),
            },
            Event::KeyboardKey {
                serial,
                time,
                key,
                state,
            } => handler.keyboard_key(serial, time, key, state),
            Event::KeyboardModifiers {
                serial,
                depressed,
                latched,
                locked,
                group,
            } => handler.keyboard_modifiers(serial, depressed, latched, locked, group),
            Event::WindowConfigure {
                window,
                serial,
                half_size,
            } => match self.toplevel_by_window(window) {
                Some(toplevel) => toplevel.configure(serial, half_size),
                None => debug!("configure for unknown window {:?}", window),
            },
            Event::FrameDone { callback, time } => {
                self.ctx.send(Request::Destroy(callback));
                match self.ctx.take_frame(callback) {
                    Some(run) => run(time),
                    None => debug!("frame done for a dropped callback {:?}", callback),
                }
            }
        }
    }

    fn update_capabilities<H>(&mut self, capabilities: Capabilities, handler: &mut H)
    where
        H: DisplayHandler + ?Sized,
    {
        if capabilities.contains(Capabilities::RAY) {
            if self.ray.is_none() {
                self.ray = Some(self.ctx.create(NewObject::Ray));
            }
        } else if let Some(ray) = self.ray.take() {
            self.ctx.send(Request::Destroy(ray));
            self.release_pointer_focus(handler);
        }

        if capabilities.contains(Capabilities::KEYBOARD) {
            if self.keyboard.is_none() {
                self.keyboard = Some(self.ctx.create(NewObject::Keyboard));
            }
        } else if let Some(keyboard) = self.keyboard.take() {
            self.ctx.send(Request::Destroy(keyboard));
        }

        debug!("seat capabilities {:?}", capabilities);
        self.capabilities = capabilities;
        handler.seat_capabilities(capabilities);
    }

    /// Recompute the view under the pointer; `time` is set for motion events
    fn update_pointer<H>(
        &mut self,
        toplevel: &Toplevel,
        ray: &Ray,
        time: Option<u32>,
        handler: &mut H,
    ) where
        H: DisplayHandler + ?Sized,
    {
        let hit = toplevel.pick_view(ray);
        let current = self.focused_view();

        if let Some(current) = &current {
            if hit.as_ref().map(|(view, _)| view) != Some(current) {
                handler.pointer_leave(current);
                self.focus_view.clear();
                self.destroy_cursor();
            }
        }

        let Some((view, local)) = hit else {
            return;
        };
        self.pointer_local = local;

        if current.as_ref() != Some(&view) {
            handler.pointer_enter(&view, local.x, local.y);
            self.focus_view.set(view.downgrade(), view.destroy_signal());
        } else if let Some(time) = time {
            handler.pointer_motion(time, local.x, local.y);
            self.move_cursor();
        }
    }

    fn release_pointer_focus<H>(&mut self, handler: &mut H)
    where
        H: DisplayHandler + ?Sized,
    {
        if let Some(view) = self.focused_view() {
            handler.pointer_leave(&view);
        }
        self.focus_view.clear();
        self.focus_toplevel.clear();
        self.destroy_cursor();
    }

    fn teardown(&mut self) {
        if self.ctx.is_closed() {
            return;
        }

        self.focus_view.clear();
        self.focus_toplevel.clear();
        self.destroy_cursor();

        let toplevels = std::mem::take(&mut *self.toplevels.borrow_mut());
        for registered in toplevels {
            registered.toplevel.destroy();
        }

        if let Some(ray) = self.ray.take() {
            self.ctx.send(Request::Destroy(ray));
        }
        if let Some(keyboard) = self.keyboard.take() {
            self.ctx.send(Request::Destroy(keyboard));
        }

        if let Some(Err(e)) = self.ctx.with_backend(|backend| backend.flush()) {
            debug!("flush during teardown failed: {}", e);
        }
        self.ctx.close();
        info!("display session closed");
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Display {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Display")
            .field("toplevels", &self.toplevels.borrow().len())
            .field("capabilities", &self.capabilities)
            .field("ray", &self.ray)
            .field("keyboard", &self.keyboard)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    readable: bool,
    writable: bool,
}

/// Block until `fd` is readable, or also writable when `want_write` is set.
///
/// Hangups and errors count as readable so the following read reports them.
fn poll_fd(fd: i32, want_write: bool) -> io::Result<Readiness> {
    let mut events = libc::POLLIN;
    if want_write {
        events |= libc::POLLOUT;
    }
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        // SAFETY: `pollfd` is a valid, exclusively borrowed array of one entry
        let ret = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if ret >= 0 {
            let revents = pollfd.revents;
            let readable = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
            return Ok(Readiness {
                readable: revents & readable != 0,
                writable: revents & libc::POLLOUT != 0,
            });
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
