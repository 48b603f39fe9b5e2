//! State shared by a display and every toplevel and view it creates

use crate::config::SessionConfig;
use crate::protocol::{Backend, Handle, NewObject, Request};
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Monotonic id of a view; later views compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

struct PendingFrame {
    owner: ViewId,
    callback: Box<dyn FnOnce(u32)>,
}

pub(crate) struct Context {
    /// `None` once the session has been torn down
    backend: RefCell<Option<Box<dyn Backend>>>,
    config: SessionConfig,
    frames: RefCell<HashMap<Handle, PendingFrame>>,
    next_view_id: Cell<u64>,
}

impl Context {
    pub(crate) fn new(backend: Box<dyn Backend>, config: SessionConfig) -> Self {
        Self {
            backend: RefCell::new(Some(backend)),
            config,
            frames: RefCell::new(HashMap::new()),
            next_view_id: Cell::new(0),
        }
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn allocate_view_id(&self) -> ViewId {
        let id = self.next_view_id.get() + 1;
        self.next_view_id.set(id);
        ViewId(id)
    }

    pub(crate) fn create(&self, object: NewObject<'_>) -> Handle {
        match self.backend.borrow_mut().as_mut() {
            Some(backend) => backend.create(object),
            None => {
                debug!("session is closed, not creating {:?}", object);
                Handle::from_raw(0)
            }
        }
    }

    pub(crate) fn send(&self, request: Request) {
        match self.backend.borrow_mut().as_mut() {
            Some(backend) => backend.send(request),
            None => debug!("session is closed, dropping {:?}", request),
        }
    }

    /// Run `f` with the backend, or return `None` after teardown
    pub(crate) fn with_backend<R>(&self, f: impl FnOnce(&mut dyn Backend) -> R) -> Option<R> {
        self.backend
            .borrow_mut()
            .as_mut()
            .map(|backend| f(backend.as_mut()))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.backend.borrow().is_none()
    }

    /// Drop the backend, closing the connection
    pub(crate) fn close(&self) {
        let backend = self.backend.borrow_mut().take();
        drop(backend);
        self.frames.borrow_mut().clear();
    }

    pub(crate) fn add_frame(&self, callback: Handle, owner: ViewId, f: Box<dyn FnOnce(u32)>) {
        self.frames.borrow_mut().insert(
            callback,
            PendingFrame {
                owner,
                callback: f,
            },
        );
    }

    /// Remove a pending frame callback so it can be run without holding any borrow
    pub(crate) fn take_frame(&self, callback: Handle) -> Option<Box<dyn FnOnce(u32)>> {
        self.frames
            .borrow_mut()
            .remove(&callback)
            .map(|pending| pending.callback)
    }

    /// Drop every pending frame callback of `owner` unrun and return their handles
    pub(crate) fn drop_frames_of(&self, owner: ViewId) -> Vec<Handle> {
        let mut frames = self.frames.borrow_mut();
        let handles: Vec<Handle> = frames
            .iter()
            .filter(|(_, pending)| pending.owner == owner)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &handles {
            frames.remove(handle);
        }
        handles
    }

    #[cfg(test)]
    pub(crate) fn pending_frames(&self) -> usize {
        self.frames.borrow().len()
    }
}
