//! Application callbacks for input routed by a [`crate::Display`]

use crate::protocol::{ButtonState, Capabilities, KeyState};
use crate::view::View;
use std::os::fd::OwnedFd;

/// Receives input routed to views.
///
/// Every method has an empty default so handlers only implement what they
/// use. Pointer coordinates are local to the view, in pixels from its
/// top-left corner.
#[allow(unused_variables)]
pub trait DisplayHandler {
    /// The seat now offers exactly `capabilities`
    fn seat_capabilities(&mut self, capabilities: Capabilities) {}

    fn pointer_enter(&mut self, view: &View, x: f32, y: f32) {}

    fn pointer_motion(&mut self, time: u32, x: f32, y: f32) {}

    fn pointer_leave(&mut self, view: &View) {}

    fn pointer_button(&mut self, serial: u32, time: u32, button: u32, state: ButtonState) {}

    /// Keymap to interpret key codes with; the handler owns the descriptor
    fn keyboard_keymap(&mut self, format: u32, fd: OwnedFd, size: u32) {}

    fn keyboard_enter(&mut self, serial: u32, view: &View, keys: &[u32]) {}

    fn keyboard_leave(&mut self, serial: u32, view: &View) {}

    fn keyboard_key(&mut self, serial: u32, time: u32, key: u32, state: KeyState) {}

    fn keyboard_modifiers(
        &mut self,
        serial: u32,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    ) {
    }
}

/// Handler that ignores everything
impl DisplayHandler for () {}
