//! Signal/listener observer primitive
//!
//! A [`Signal`] broadcasts lifecycle notifications (destroy, commit, geometry
//! change) to callbacks registered with [`Signal::add`]. The signal does not
//! own its listeners: registration returns a [`Listener`] token which
//! unregisters the callback when it is removed or dropped, so an observer
//! that goes away can never be called again.
//!
//! Emission is synchronous and in registration order. Callbacks may remove
//! themselves, remove other listeners or register new ones while the signal
//! is being emitted:
//! - a listener removed during emission is not called afterwards,
//! - every listener still registered when its turn comes is called,
//! - listeners added during emission are first called on the next emission.
//!
//! [`Tracked`] builds on this to hold a reference that clears itself when its
//! referent emits its destroy signal.

use log::trace;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Callback<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Slot<T> {
    id: u64,
    callback: Callback<T>,
}

struct Registry<T> {
    next_id: u64,
    slots: Vec<Slot<T>>,
}

impl<T> Registry<T> {
    fn contains(&self, id: u64) -> bool {
        self.slots.iter().any(|slot| slot.id == id)
    }
}

/// Type-erased view of a registry used by [`Listener`]
trait Unregister {
    fn unregister(&self, id: u64);
}

impl<T> Unregister for RefCell<Registry<T>> {
    fn unregister(&self, id: u64) {
        self.borrow_mut().slots.retain(|slot| slot.id != id);
    }
}

/// Broadcasts `&T` to every registered listener
pub struct Signal<T> {
    registry: Rc<RefCell<Registry<T>>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    /// Register a callback. It stays registered as long as the returned
    /// [`Listener`] is alive and not removed.
    #[must_use = "dropping the listener unregisters the callback immediately"]
    pub fn add<F>(&self, callback: F) -> Listener
    where
        F: FnMut(&T) + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.slots.push(Slot {
            id,
            callback: Rc::new(RefCell::new(callback)),
        });

        let weak: Weak<dyn Unregister> = Rc::downgrade(&self.registry) as Weak<dyn Unregister>;
        Listener {
            id,
            registry: Some(weak),
        }
    }

    /// Call every registered listener with `data`
    pub fn emit(&self, data: &T) {
        let snapshot: Vec<(u64, Callback<T>)> = self
            .registry
            .borrow()
            .slots
            .iter()
            .map(|slot| (slot.id, Rc::clone(&slot.callback)))
            .collect();

        for (id, callback) in snapshot {
            if !self.registry.borrow().contains(id) {
                continue;
            }
            // A listener that re-emits the signal it is subscribed to must not re-enter itself
            match callback.try_borrow_mut() {
                Ok(mut callback) => (&mut *callback)(data),
                Err(_) => trace!("skipping re-entrant listener {}", id),
            }
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.registry.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.registry.borrow().slots.len())
            .finish()
    }
}

/// Registration token returned by [`Signal::add`]
pub struct Listener {
    id: u64,
    registry: Option<Weak<dyn Unregister>>,
}

impl Listener {
    /// Unregister from the signal. Safe to call more than once and after the
    /// signal itself is gone.
    pub fn remove(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unregister(self.id);
        }
    }

    /// Whether this listener can still be reached by its signal
    pub fn is_linked(&self) -> bool {
        self.registry
            .as_ref()
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// A reference that is cleared when its referent is destroyed.
///
/// [`Tracked::set`] stores the value and subscribes to the referent's destroy
/// signal; when that signal fires the slot is emptied. Replacing or clearing
/// the value unsubscribes from the previous referent.
pub struct Tracked<T> {
    slot: Rc<RefCell<Option<T>>>,
    listener: Option<Listener>,
}

impl<T: Clone + 'static> Tracked<T> {
    pub fn new() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
            listener: None,
        }
    }

    /// Track `value` until `destroy_signal` fires or the value is replaced
    pub fn set(&mut self, value: T, destroy_signal: &Signal<()>) {
        self.clear();
        *self.slot.borrow_mut() = Some(value);

        let slot = Rc::downgrade(&self.slot);
        self.listener = Some(destroy_signal.add(move |_| {
            if let Some(slot) = slot.upgrade() {
                slot.borrow_mut().take();
            }
        }));
    }

    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Clear the slot and return what it held
    pub fn take(&mut self) -> Option<T> {
        if let Some(mut listener) = self.listener.take() {
            listener.remove();
        }
        self.slot.borrow_mut().take()
    }

    pub fn clear(&mut self) {
        self.take();
    }
}

impl<T: Clone + 'static> Default for Tracked<T> {
    fn default() -> Self {
        Self::new()
    }
}
