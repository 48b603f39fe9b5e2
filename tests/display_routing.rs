//! Input routing tests for display sessions
//!
//! These drive a [`Display`] over the recording backend, playing the
//! compositor by delivering seat events, and check what reaches the
//! application handler.

use anyhow::Result;
use cgmath::Vector3;
use std::os::fd::OwnedFd;
use zsurface::protocol::{Event, Handle};
use zsurface::testing::{Created, MockBackend};
use zsurface::{
    ButtonState, Capabilities, CursorImage, Display, DisplayHandler, KeyState, SessionConfig,
    Toplevel, View, ViewId,
};

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Capabilities(Capabilities),
    Enter(ViewId),
    Motion(u32),
    Leave(ViewId),
    Button(u32, ButtonState),
    Keymap(u32, u32),
    KeyboardEnter(ViewId, Vec<u32>),
    KeyboardLeave(ViewId),
    Key(u32, KeyState),
    Modifiers(u32),
}

#[derive(Default)]
struct Recorder {
    seen: Vec<Seen>,
}

impl DisplayHandler for Recorder {
    fn seat_capabilities(&mut self, capabilities: Capabilities) {
        self.seen.push(Seen::Capabilities(capabilities));
    }

    fn pointer_enter(&mut self, view: &View, _x: f32, _y: f32) {
        self.seen.push(Seen::Enter(view.id()));
    }

    fn pointer_motion(&mut self, time: u32, _x: f32, _y: f32) {
        self.seen.push(Seen::Motion(time));
    }

    fn pointer_leave(&mut self, view: &View) {
        self.seen.push(Seen::Leave(view.id()));
    }

    fn pointer_button(&mut self, _serial: u32, _time: u32, button: u32, state: ButtonState) {
        self.seen.push(Seen::Button(button, state));
    }

    fn keyboard_keymap(&mut self, format: u32, _fd: OwnedFd, size: u32) {
        self.seen.push(Seen::Keymap(format, size));
    }

    fn keyboard_enter(&mut self, _serial: u32, view: &View, keys: &[u32]) {
        self.seen.push(Seen::KeyboardEnter(view.id(), keys.to_vec()));
    }

    fn keyboard_leave(&mut self, _serial: u32, view: &View) {
        self.seen.push(Seen::KeyboardLeave(view.id()));
    }

    fn keyboard_key(&mut self, _serial: u32, _time: u32, key: u32, state: KeyState) {
        self.seen.push(Seen::Key(key, state));
    }

    fn keyboard_modifiers(&mut self, _serial: u32, depressed: u32, _: u32, _: u32, _: u32) {
        self.seen.push(Seen::Modifiers(depressed));
    }
}

fn white(width: u32, height: u32) -> Vec<u8> {
    vec![u8::MAX; width as usize * height as usize * 4]
}

/// A toplevel whose 100x100 root spans [-1, 1] on both axes, with two
/// 50x50 children side by side along its top edge
struct Scene {
    mock: MockBackend,
    display: Display,
    toplevel: Toplevel,
    left: View,
    right: View,
}

fn scene() -> Result<Scene> {
    let mock = MockBackend::new();
    let mut display = Display::with_backend(mock.boxed(), SessionConfig::default())?;
    let toplevel = display.create_toplevel()?;

    let root = toplevel.view();
    root.set_texture(&white(100, 100), 100, 100)?;
    root.commit();

    mock.deliver(Event::WindowConfigure {
        window: toplevel.window().expect("window after first commit"),
        serial: 1,
        half_size: Some(Vector3::new(1.05, 1.05, 0.001)),
    });
    display.dispatch_pending(&mut ())?;

    let left = root.create_child()?;
    left.set_texture(&white(50, 50), 50, 50)?;
    let right = root.create_child()?;
    right.set_texture(&white(50, 50), 50, 50)?;
    right.set_surface_position(50.0, 0.0);

    Ok(Scene {
        mock,
        display,
        toplevel,
        left,
        right,
    })
}

fn toward(x: f32, y: f32) -> (Vector3<f32>, Vector3<f32>) {
    (Vector3::new(x, y, 10.0), Vector3::new(0.0, 0.0, -1.0))
}

fn enter(scene: &Scene, x: f32, y: f32) -> Event {
    let (origin, direction) = toward(x, y);
    Event::RayEnter {
        serial: 1,
        virtual_object: scene.toplevel.virtual_object(),
        origin,
        direction,
    }
}

fn motion(time: u32, x: f32, y: f32) -> Event {
    let (origin, direction) = toward(x, y);
    Event::RayMotion {
        time,
        origin,
        direction,
    }
}

#[test]
fn test_motion_between_siblings_leaves_then_enters() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();

    scene.mock.deliver(enter(&scene, -0.5, 0.5));
    scene.mock.deliver(motion(10, -0.4, 0.5));
    scene.mock.deliver(motion(20, 0.5, 0.5));
    scene.display.dispatch_pending(&mut recorder)?;

    assert_eq!(
        recorder.seen,
        vec![
            Seen::Enter(scene.left.id()),
            Seen::Motion(10),
            Seen::Leave(scene.left.id()),
            Seen::Enter(scene.right.id()),
        ]
    );
    assert_eq!(scene.display.focused_view(), Some(scene.right.clone()));
    assert_eq!(scene.display.focused_toplevel(), Some(scene.toplevel.clone()));
    Ok(())
}

#[test]
fn test_motion_off_children_falls_back_to_root() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();

    scene.mock.deliver(enter(&scene, -0.5, 0.5));
    scene.mock.deliver(motion(5, -0.5, -0.5));
    scene.display.dispatch_pending(&mut recorder)?;

    let root = scene.toplevel.view();
    assert_eq!(
        recorder.seen,
        vec![
            Seen::Enter(scene.left.id()),
            Seen::Leave(scene.left.id()),
            Seen::Enter(root.id()),
        ]
    );
    Ok(())
}

#[test]
fn test_ray_leave_releases_focus() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();

    scene.mock.deliver(enter(&scene, 0.5, 0.5));
    scene.mock.deliver(Event::RayLeave {
        serial: 2,
        virtual_object: scene.toplevel.virtual_object(),
    });
    scene.mock.deliver(motion(30, 0.5, 0.5));
    scene.display.dispatch_pending(&mut recorder)?;

    assert_eq!(
        recorder.seen,
        vec![Seen::Enter(scene.right.id()), Seen::Leave(scene.right.id())]
    );
    assert!(scene.display.focused_view().is_none());
    assert!(scene.display.focused_toplevel().is_none());
    Ok(())
}

#[test]
fn test_destroyed_focus_is_forgotten() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();

    scene.mock.deliver(enter(&scene, 0.5, 0.5));
    scene.display.dispatch_pending(&mut recorder)?;
    assert_eq!(scene.display.focused_view(), Some(scene.right.clone()));

    scene.right.destroy();
    assert!(scene.display.focused_view().is_none());

    scene.mock.deliver(motion(40, -0.5, 0.5));
    scene.display.dispatch_pending(&mut recorder)?;
    assert_eq!(recorder.seen.last(), Some(&Seen::Enter(scene.left.id())));
    Ok(())
}

#[test]
fn test_enter_on_unknown_virtual_object_is_dropped() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();
    let (origin, direction) = toward(0.5, 0.5);

    scene.mock.deliver(Event::RayEnter {
        serial: 1,
        virtual_object: Handle::from_raw(9999),
        origin,
        direction,
    });
    scene.mock.deliver(motion(1, 0.5, 0.5));
    scene.display.dispatch_pending(&mut recorder)?;

    assert!(recorder.seen.is_empty());
    assert!(scene.display.focused_toplevel().is_none());
    Ok(())
}

#[test]
fn test_buttons_reach_the_handler() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();

    scene.mock.deliver(Event::RayButton {
        serial: 3,
        time: 4,
        button: 0x110,
        state: ButtonState::Pressed,
    });
    scene.display.dispatch_pending(&mut recorder)?;

    assert_eq!(
        recorder.seen,
        vec![Seen::Button(0x110, ButtonState::Pressed)]
    );
    Ok(())
}

#[test]
fn test_seat_capabilities_create_and_release_devices() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();
    let both = Capabilities::RAY | Capabilities::KEYBOARD;

    scene.mock.deliver(Event::SeatCapabilities(both));
    scene.display.dispatch_pending(&mut recorder)?;

    let rays = scene.mock.created_where(|c| matches!(c, Created::Ray));
    let keyboards = scene.mock.created_where(|c| matches!(c, Created::Keyboard));
    assert_eq!(rays.len(), 1);
    assert_eq!(keyboards.len(), 1);
    assert_eq!(scene.display.capabilities(), both);

    // Repeating the same capabilities must not create duplicates
    scene.mock.deliver(Event::SeatCapabilities(both));
    scene.mock.deliver(enter(&scene, 0.5, 0.5));
    scene.mock.deliver(Event::SeatCapabilities(Capabilities::KEYBOARD));
    scene.display.dispatch_pending(&mut recorder)?;

    assert_eq!(scene.mock.created_where(|c| matches!(c, Created::Ray)).len(), 1);
    assert!(!scene.mock.is_live(rays[0]));
    assert!(scene.mock.is_live(keyboards[0]));
    assert!(scene.display.focused_view().is_none());
    assert_eq!(
        recorder.seen,
        vec![
            Seen::Capabilities(both),
            Seen::Capabilities(both),
            Seen::Enter(scene.right.id()),
            Seen::Leave(scene.right.id()),
            Seen::Capabilities(Capabilities::KEYBOARD),
        ]
    );
    Ok(())
}

#[test]
fn test_keyboard_events_follow_the_toplevel() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();
    let root = scene.toplevel.view();
    let vo = scene.toplevel.virtual_object();

    let keymap = tempfile::tempfile()?;
    scene.mock.deliver(Event::KeyboardKeymap {
        format: 1,
        fd: OwnedFd::from(keymap),
        size: 48,
    });
    scene.mock.deliver(Event::KeyboardEnter {
        serial: 1,
        virtual_object: vo,
        keys: vec![30, 31],
    });
    scene.mock.deliver(Event::KeyboardKey {
        serial: 2,
        time: 3,
        key: 30,
        state: KeyState::Released,
    });
    scene.mock.deliver(Event::KeyboardModifiers {
        serial: 4,
        depressed: 1,
        latched: 0,
        locked: 0,
        group: 0,
    });
    scene.mock.deliver(Event::KeyboardEnter {
        serial: 5,
        virtual_object: Handle::from_raw(9999),
        keys: Vec::new(),
    });
    scene.mock.deliver(Event::KeyboardLeave {
        serial: 6,
        virtual_object: vo,
    });
    scene.display.dispatch_pending(&mut recorder)?;

    assert_eq!(
        recorder.seen,
        vec![
            Seen::Keymap(1, 48),
            Seen::KeyboardEnter(root.id(), vec![30, 31]),
            Seen::Key(30, KeyState::Released),
            Seen::Modifiers(1),
            Seen::KeyboardLeave(root.id()),
        ]
    );
    Ok(())
}

#[test]
fn test_cursor_follows_pointer_inside_focused_view() -> Result<()> {
    let mut scene = scene()?;
    let mut recorder = Recorder::default();

    // No focus yet, nowhere to show it
    let arrow = [0u8, 0, 0, u8::MAX].repeat(4);
    let image = CursorImage {
        pixels: &arrow,
        width: 2,
        height: 2,
        hotspot_x: 1,
        hotspot_y: 1,
    };
    scene.display.set_cursor(Some(image))?;
    assert!(scene.display.cursor_view().is_none());

    scene.mock.deliver(enter(&scene, -0.5, 0.5));
    scene.display.dispatch_pending(&mut recorder)?;
    scene.display.set_cursor(Some(image))?;

    let cursor = scene.display.cursor_view().expect("cursor view");
    assert_eq!(cursor.parent(), Some(scene.left.clone()));
    assert!(!cursor.is_pickable());
    let surface = cursor.surface_geometry();
    assert!((surface.x - 24.0).abs() < 1e-2);
    assert!((surface.y - 24.0).abs() < 1e-2);

    // -0.3 is 10 pixels right of the left child's center
    scene.mock.deliver(motion(7, -0.3, 0.5));
    scene.display.dispatch_pending(&mut recorder)?;
    assert!((cursor.surface_geometry().x - 34.0).abs() < 1e-2);
    assert_eq!(scene.display.focused_view(), Some(scene.left.clone()));

    scene.mock.deliver(Event::RayLeave {
        serial: 2,
        virtual_object: scene.toplevel.virtual_object(),
    });
    scene.display.dispatch_pending(&mut recorder)?;
    assert!(cursor.is_destroyed());
    assert!(scene.display.cursor_view().is_none());
    Ok(())
}
