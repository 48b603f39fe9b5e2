//! In-memory [`Backend`] for tests
//!
//! [`MockBackend`] records every object it creates and every request it is
//! sent, and lets a test play the compositor by queueing events. Clones share
//! state, so a test keeps one clone for inspection and hands another to the
//! [`crate::Display`].
//!
//! Events pushed with [`MockBackend::push_event`] sit "on the wire": the fd
//! becomes readable and they only reach [`Backend::dispatch_pending`] after a
//! prepared [`Backend::read_events`]. [`MockBackend::deliver`] skips the wire
//! and queues an event as already read, which makes
//! [`Backend::prepare_read`] fail until it is dispatched.

use crate::error::{Error, Result};
use crate::protocol::{Backend, Event, Handle, NewObject, Request};
use cgmath::Vector3;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::FileExt;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

/// Owned mirror of a [`NewObject`]
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    VirtualObject,
    Frame {
        virtual_object: Handle,
    },
    CuboidWindow {
        virtual_object: Handle,
        half_size: Vector3<f32>,
    },
    Ray,
    Keyboard,
    ShmPool {
        size: usize,
    },
    RawBuffer {
        pool: Handle,
        offset: usize,
        size: usize,
    },
    VertexBuffer,
    Texture,
    ShaderProgram,
    RenderingUnit {
        virtual_object: Handle,
    },
}

/// One entry of the request log
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Created(Handle, Created),
    Sent(Request),
}

struct MockState {
    next_handle: u64,
    log: Vec<Recorded>,
    live: HashSet<Handle>,
    pools: HashMap<Handle, File>,
    wire: VecDeque<Event>,
    inbound: VecDeque<Event>,
    read_prepared: bool,
    flushes: usize,
    writer: UnixStream,
}

/// Recording backend; see the module docs
#[derive(Clone)]
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
    reader: Rc<UnixStream>,
}

impl MockBackend {
    pub fn new() -> Self {
        let (reader, writer) = UnixStream::pair().expect("socket pair for mock backend");
        reader
            .set_nonblocking(true)
            .expect("non-blocking mock socket");

        Self {
            state: Rc::new(RefCell::new(MockState {
                next_handle: 0,
                log: Vec::new(),
                live: HashSet::new(),
                pools: HashMap::new(),
                wire: VecDeque::new(),
                inbound: VecDeque::new(),
                read_prepared: false,
                flushes: 0,
                writer,
            })),
            reader: Rc::new(reader),
        }
    }

    /// A boxed clone ready to hand to [`crate::Display::with_backend`]
    pub fn boxed(&self) -> Box<dyn Backend> {
        Box::new(self.clone())
    }

    /// Queue an event on the wire and make the fd readable
    pub fn push_event(&self, event: Event) {
        let mut state = self.state.borrow_mut();
        state.wire.push_back(event);
        let _ = state.writer.write_all(&[1]);
    }

    /// Queue an event as already read from the connection
    pub fn deliver(&self, event: Event) {
        self.state.borrow_mut().inbound.push_back(event);
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    /// Requests sent so far, in order
    pub fn requests(&self) -> Vec<Request> {
        self.state
            .borrow()
            .log
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Sent(request) => Some(request.clone()),
                Recorded::Created(..) => None,
            })
            .collect()
    }

    /// Objects created so far, in order
    pub fn created(&self) -> Vec<(Handle, Created)> {
        self.state
            .borrow()
            .log
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Created(handle, created) => Some((*handle, created.clone())),
                Recorded::Sent(_) => None,
            })
            .collect()
    }

    /// Handles of created objects matching `predicate`, in creation order
    pub fn created_where<F>(&self, predicate: F) -> Vec<Handle>
    where
        F: Fn(&Created) -> bool,
    {
        self.created()
            .into_iter()
            .filter(|(_, created)| predicate(created))
            .map(|(handle, _)| handle)
            .collect()
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.state.borrow().live.contains(&handle)
    }

    /// Number of objects created and not yet destroyed
    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn flush_count(&self) -> usize {
        self.state.borrow().flushes
    }

    pub fn is_read_prepared(&self) -> bool {
        self.state.borrow().read_prepared
    }

    /// Read `len` bytes at `offset` of a shm pool the way the compositor would
    pub fn pool_bytes(&self, pool: Handle, offset: usize, len: usize) -> io::Result<Vec<u8>> {
        let state = self.state.borrow();
        let file = state
            .pools
            .get(&pool)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown pool"))?;
        let mut bytes = vec![0u8; len];
        file.read_exact_at(&mut bytes, offset as u64)?;
        Ok(bytes)
    }

    fn drain_fd(&self) {
        let mut sink = [0u8; 64];
        let mut reader: &UnixStream = &self.reader;
        while let Ok(n) = reader.read(&mut sink) {
            if n == 0 {
                break;
            }
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MockBackend")
            .field("live", &state.live.len())
            .field("wire", &state.wire.len())
            .field("inbound", &state.inbound.len())
            .finish()
    }
}

impl Backend for MockBackend {
    fn create(&mut self, object: NewObject<'_>) -> Handle {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = Handle::from_raw(state.next_handle);

        let created = match object {
            NewObject::VirtualObject => Created::VirtualObject,
            NewObject::Frame { virtual_object } => Created::Frame { virtual_object },
            NewObject::CuboidWindow {
                virtual_object,
                half_size,
            } => Created::CuboidWindow {
                virtual_object,
                half_size,
            },
            NewObject::Ray => Created::Ray,
            NewObject::Keyboard => Created::Keyboard,
            NewObject::ShmPool { fd, size } => {
                if let Ok(owned) = fd.try_clone_to_owned() {
                    state.pools.insert(handle, File::from(owned));
                }
                Created::ShmPool { size }
            }
            NewObject::RawBuffer { pool, offset, size } => {
                Created::RawBuffer { pool, offset, size }
            }
            NewObject::VertexBuffer => Created::VertexBuffer,
            NewObject::Texture => Created::Texture,
            NewObject::ShaderProgram { .. } => Created::ShaderProgram,
            NewObject::RenderingUnit { virtual_object } => {
                Created::RenderingUnit { virtual_object }
            }
        };

        state.live.insert(handle);
        state.log.push(Recorded::Created(handle, created));
        handle
    }

    fn send(&mut self, request: Request) {
        let mut state = self.state.borrow_mut();
        if let Request::Destroy(handle) = request {
            state.live.remove(&handle);
            state.pools.remove(&handle);
        }
        state.log.push(Recorded::Sent(request));
    }

    fn prepare_read(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.inbound.is_empty() {
            return Err(Error::WouldBlock);
        }
        state.read_prepared = true;
        Ok(())
    }

    fn cancel_read(&mut self) {
        self.state.borrow_mut().read_prepared = false;
    }

    fn read_events(&mut self) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if !state.read_prepared {
                return Err(Error::ReadNotPrepared);
            }
            state.read_prepared = false;
            if state.wire.is_empty() {
                return Err(Error::WouldBlock);
            }
            let wire: Vec<Event> = state.wire.drain(..).collect();
            state.inbound.extend(wire);
        }
        self.drain_fd();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.state.borrow_mut().flushes += 1;
        Ok(())
    }

    fn dispatch_pending(&mut self) -> Result<Vec<Event>> {
        Ok(self.state.borrow_mut().inbound.drain(..).collect())
    }

    fn fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Capabilities;

    #[test]
    fn test_readiness_transitions() {
        let mock = MockBackend::new();
        let mut backend = mock.clone();

        assert!(matches!(backend.read_events(), Err(Error::ReadNotPrepared)));

        mock.push_event(Event::SeatCapabilities(Capabilities::RAY));
        backend.prepare_read().unwrap();
        backend.read_events().unwrap();
        assert!(matches!(backend.prepare_read(), Err(Error::WouldBlock)));

        assert_eq!(backend.dispatch_pending().unwrap().len(), 1);
        backend.prepare_read().unwrap();
        backend.cancel_read();
        assert!(!mock.is_read_prepared());
    }

    #[test]
    fn test_destroy_tracks_liveness() {
        let mock = MockBackend::new();
        let mut backend = mock.clone();

        let vo = backend.create(NewObject::VirtualObject);
        assert!(mock.is_live(vo));
        backend.send(Request::Destroy(vo));
        assert!(!mock.is_live(vo));
        assert_eq!(mock.requests(), vec![Request::Destroy(vo)]);
    }
}
