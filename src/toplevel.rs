//! Toplevels: window-like containers owning one root view
//!
//! A toplevel has no compositor-side window until its root view is
//! committed with its first texture. It then asks the shell for a cuboid
//! window sized after the texture; the compositor answers asynchronously
//! with a configure carrying the authoritative half size, which drives the
//! root view's space geometry.

use crate::context::Context;
use crate::error::Result;
use crate::protocol::{Handle, NewObject, Request};
use crate::ray::Ray;
use crate::signal::{Listener, Signal};
use crate::view::{TextureState, View};
use cgmath::{Vector2, Vector3};
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

struct ToplevelInner {
    ctx: Rc<Context>,
    virtual_object: Handle,
    view: View,
    window: Cell<Option<Handle>>,
    view_commit: RefCell<Option<Listener>>,
    destroy_signal: Signal<()>,
    destroyed: Cell<bool>,
}

/// Shared handle to a toplevel
#[derive(Clone)]
pub struct Toplevel {
    inner: Rc<ToplevelInner>,
}

/// Non-owning handle to a toplevel
#[derive(Clone)]
pub struct WeakToplevel {
    inner: Weak<ToplevelInner>,
}

impl WeakToplevel {
    pub fn upgrade(&self) -> Option<Toplevel> {
        self.inner.upgrade().map(|inner| Toplevel { inner })
    }
}

impl Toplevel {
    pub(crate) fn new(ctx: Rc<Context>) -> Result<Toplevel> {
        let virtual_object = ctx.create(NewObject::VirtualObject);
        let view = match View::new_root(Rc::clone(&ctx), virtual_object) {
            Ok(view) => view,
            Err(e) => {
                ctx.send(Request::Destroy(virtual_object));
                return Err(e);
            }
        };

        let inner = Rc::new_cyclic(|weak: &Weak<ToplevelInner>| {
            let weak = weak.clone();
            let listener = view.commit_signal().add(move |_| {
                if let Some(inner) = weak.upgrade() {
                    Toplevel { inner }.on_view_commit();
                }
            });

            ToplevelInner {
                ctx,
                virtual_object,
                view,
                window: Cell::new(None),
                view_commit: RefCell::new(Some(listener)),
                destroy_signal: Signal::new(),
                destroyed: Cell::new(false),
            }
        });

        debug!("created toplevel {:?}", virtual_object);
        Ok(Toplevel { inner })
    }

    pub fn downgrade(&self) -> WeakToplevel {
        WeakToplevel {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// The root view
    pub fn view(&self) -> View {
        self.inner.view.clone()
    }

    pub fn virtual_object(&self) -> Handle {
        self.inner.virtual_object
    }

    /// The cuboid window, once the first texture was committed
    pub fn window(&self) -> Option<Handle> {
        self.inner.window.get()
    }

    pub fn destroy_signal(&self) -> &Signal<()> {
        &self.inner.destroy_signal
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    fn on_view_commit(&self) {
        let view = &self.inner.view;
        let ctx = &self.inner.ctx;

        if view.state() == TextureState::FirstTextureAttached && self.inner.window.get().is_none() {
            let config = ctx.config();
            let surface = view.surface_geometry();
            let half_size = Vector3::new(
                surface.width as f32 / 2.0 / config.pixel_scale + config.cuboid_padding,
                surface.height as f32 / 2.0 / config.pixel_scale + config.cuboid_padding,
                config.surface_thickness,
            );

            let window = ctx.create(NewObject::CuboidWindow {
                virtual_object: self.inner.virtual_object,
                half_size,
            });
            self.inner.window.set(Some(window));
            debug!("requested window {:?} with half size {:?}", window, half_size);
        }

        ctx.send(Request::Commit {
            virtual_object: self.inner.virtual_object,
        });
    }

    /// Apply a window configure from the compositor
    pub(crate) fn configure(&self, serial: u32, half_size: Option<Vector3<f32>>) {
        let Some(window) = self.inner.window.get() else {
            debug!("configure for a toplevel without window ignored");
            return;
        };
        let ctx = &self.inner.ctx;
        ctx.send(Request::AckConfigure { window, serial });

        let Some(half_size) = half_size else {
            warn!("window configure {} carried an invalid half size", serial);
            return;
        };

        let padding = ctx.config().cuboid_padding;
        let half_extent = Vector2::new(
            (half_size.x - padding).max(0.0),
            (half_size.y - padding).max(0.0),
        );

        self.inner.view.set_root_half_extent(half_extent);
        self.inner.view.update_space_geometry();
        ctx.send(Request::Commit {
            virtual_object: self.inner.virtual_object,
        });
    }

    /// Start an interactive move driven by the seat; ignored before the window exists
    pub fn start_move(&self, serial: u32) {
        match self.inner.window.get() {
            Some(window) => self.inner.ctx.send(Request::Move { window, serial }),
            None => debug!("move requested before the window exists"),
        }
    }

    /// The topmost pickable view hit by `ray` and the local coordinates of the hit.
    ///
    /// Higher Z wins; among equal Z the most recently created view wins.
    pub fn pick_view(&self, ray: &Ray) -> Option<(View, Vector2<f32>)> {
        if self.is_destroyed() {
            return None;
        }

        let mut candidates: Vec<View> = self
            .inner
            .view
            .descendants()
            .into_iter()
            .filter(View::is_pickable)
            .collect();
        candidates.sort_by(|a, b| (b.z_index(), b.id()).cmp(&(a.z_index(), a.id())));

        candidates
            .into_iter()
            .find_map(|view| view.intersect(ray).map(|local| (view, local)))
    }

    /// Destroy the root view, the window and the virtual object
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }

        self.inner.destroy_signal.emit(&());
        self.inner.view_commit.borrow_mut().take();
        self.inner.view.destroy();

        let ctx = &self.inner.ctx;
        if let Some(window) = self.inner.window.take() {
            ctx.send(Request::Destroy(window));
        }
        ctx.send(Request::Destroy(self.inner.virtual_object));
        debug!("destroyed toplevel {:?}", self.inner.virtual_object);
    }
}

impl PartialEq for Toplevel {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Toplevel {}

impl std::fmt::Debug for Toplevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toplevel")
            .field("virtual_object", &self.inner.virtual_object)
            .field("window", &self.inner.window.get())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::testing::{Created, MockBackend};

    fn setup() -> (MockBackend, Toplevel) {
        let mock = MockBackend::new();
        let ctx = Rc::new(Context::new(mock.boxed(), SessionConfig::default()));
        let toplevel = Toplevel::new(ctx).unwrap();
        (mock, toplevel)
    }

    fn white(width: u32, height: u32) -> Vec<u8> {
        vec![u8::MAX; width as usize * height as usize * 4]
    }

    fn window_of(mock: &MockBackend) -> Vec<(Handle, Created)> {
        mock.created()
            .into_iter()
            .filter(|(_, c)| matches!(c, Created::CuboidWindow { .. }))
            .collect()
    }

    #[test]
    fn test_no_window_until_first_texture_commit() {
        let (mock, toplevel) = setup();

        toplevel.view().commit();
        assert!(toplevel.window().is_none());
        assert!(window_of(&mock).is_empty());

        toplevel.view().set_texture(&white(400, 200), 400, 200).unwrap();
        toplevel.view().commit();

        let windows = window_of(&mock);
        assert_eq!(windows.len(), 1);
        let Created::CuboidWindow { half_size, .. } = windows[0].1 else {
            unreachable!()
        };
        assert!((half_size.x - 0.25).abs() < 1e-6);
        assert!((half_size.y - 0.15).abs() < 1e-6);
        assert!((half_size.z - 0.001).abs() < 1e-9);
        assert_eq!(toplevel.view().state(), TextureState::TextureCommitted);

        toplevel.view().set_texture(&white(400, 200), 400, 200).unwrap();
        toplevel.view().commit();
        assert_eq!(window_of(&mock).len(), 1);
    }

    #[test]
    fn test_configure_acks_and_updates_geometry() {
        let (mock, toplevel) = setup();
        toplevel.view().set_texture(&white(4, 4), 4, 4).unwrap();
        toplevel.view().commit();
        let window = toplevel.window().unwrap();

        toplevel.configure(7, Some(Vector3::new(0.55, 0.3, 0.001)));

        assert!(mock
            .requests()
            .contains(&Request::AckConfigure { window, serial: 7 }));
        let space = toplevel.view().space_geometry();
        assert!((space.half_extent.x - 0.5).abs() < 1e-6);
        assert!((space.half_extent.y - 0.25).abs() < 1e-6);
        assert_eq!(space.center, Vector2::new(0.0, 0.0));
    }

    #[test]
    fn test_malformed_configure_is_acked_and_ignored() {
        let (mock, toplevel) = setup();
        toplevel.view().set_texture(&white(4, 4), 4, 4).unwrap();
        toplevel.view().commit();
        let window = toplevel.window().unwrap();
        let before = toplevel.view().space_geometry();

        toplevel.configure(9, None);

        assert!(mock
            .requests()
            .contains(&Request::AckConfigure { window, serial: 9 }));
        assert_eq!(toplevel.view().space_geometry(), before);
    }

    #[test]
    fn test_move_requires_window() {
        let (mock, toplevel) = setup();
        toplevel.start_move(1);
        assert!(!mock
            .requests()
            .iter()
            .any(|r| matches!(r, Request::Move { .. })));

        toplevel.view().set_texture(&white(2, 2), 2, 2).unwrap();
        toplevel.view().commit();
        toplevel.start_move(2);
        assert!(mock.requests().contains(&Request::Move {
            window: toplevel.window().unwrap(),
            serial: 2,
        }));
    }

    #[test]
    fn test_pick_prefers_higher_z_then_newer() {
        let (_mock, toplevel) = setup();
        let root = toplevel.view();
        root.set_texture(&white(100, 100), 100, 100).unwrap();
        root.commit();
        toplevel.configure(1, Some(Vector3::new(1.05, 1.05, 0.001)));

        let older = root.create_child().unwrap();
        older.set_texture(&white(50, 50), 50, 50).unwrap();
        let newer = root.create_child().unwrap();
        newer.set_texture(&white(50, 50), 50, 50).unwrap();

        let ray = Ray::new(Vector3::new(-0.5, 0.5, 10.0), Vector3::new(0.0, 0.0, -1.0));
        let (hit, local) = toplevel.pick_view(&ray).unwrap();
        assert_eq!(hit, newer);
        assert!((local.x - 25.0).abs() < 1e-2);

        newer.set_pickable(false);
        assert_eq!(toplevel.pick_view(&ray).unwrap().0, older);

        let outside = Ray::new(Vector3::new(0.5, -0.5, 10.0), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(toplevel.pick_view(&outside).unwrap().0, root);
    }

    #[test]
    fn test_destroy_order() {
        let (mock, toplevel) = setup();
        toplevel.view().set_texture(&white(2, 2), 2, 2).unwrap();
        toplevel.view().commit();
        let window = toplevel.window().unwrap();
        let pool = toplevel.view().resources().pool;

        let signalled = Rc::new(Cell::new(false));
        let _listener = {
            let signalled = signalled.clone();
            toplevel.destroy_signal().add(move |_| signalled.set(true))
        };

        toplevel.destroy();
        toplevel.destroy();

        assert!(signalled.get());
        assert!(toplevel.view().is_destroyed());
        let tail: Vec<Request> = mock.requests().into_iter().rev().take(3).collect();
        assert_eq!(
            tail,
            vec![
                Request::Destroy(toplevel.virtual_object()),
                Request::Destroy(window),
                Request::Destroy(pool),
            ]
        );
    }
}
