use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};

use tracing::{event, Level};

use crate::OperationKind;

/// Reusable buffer and state for one socket operation at a time.
pub struct Descriptor {
    serial: usize,
    kind: Option<OperationKind>,
    buffer: Vec<u8>,
}

impl Descriptor {
    /// Unique number of this descriptor within its pool, stable across reuse.
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// The operation this descriptor is currently bound to, if any.
    pub fn kind(&self) -> Option<OperationKind> {
        self.kind
    }

    /// Bytes currently held, either received data or data waiting to be written.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Mutable access to fill the descriptor before a write.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub(crate) fn bind(&mut self, kind: OperationKind) {
        self.kind = Some(kind);
    }

    pub(crate) fn buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    fn detach(&mut self, buffer_size: usize) {
        self.kind = None;
        self.buffer.clear();

        // Don't let one oversized response pin memory for the lifetime of the pool
        if self.buffer.capacity() > buffer_size * 4 {
            self.buffer.shrink_to(buffer_size);
        }
    }
}

/// Free list of descriptors, shareable across worker threads.
#[derive(Clone)]
pub struct CompletionPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    buffer_size: usize,
    max_idle: usize,
    created: AtomicUsize,
    free: Mutex<Vec<Descriptor>>,
}

impl CompletionPool {
    /// Create a pool handing out descriptors with `buffer_size` bytes of capacity.
    pub fn new(buffer_size: usize) -> Self {
        Self::with_max_idle(buffer_size, usize::MAX)
    }

    /// Create a pool that keeps at most `max_idle` released descriptors around.
    pub fn with_max_idle(buffer_size: usize, max_idle: usize) -> Self {
        let shared = PoolShared {
            buffer_size,
            max_idle,
            created: AtomicUsize::new(0),
            free: Mutex::new(Vec::new()),
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Take a descriptor, recycling a released one if available.
    pub fn acquire(&self) -> Descriptor {
        if let Some(descriptor) = self.free().pop() {
            return descriptor;
        }

        let serial = self.shared.created.fetch_add(1, Ordering::Relaxed);
        event!(Level::TRACE, serial, "creating descriptor");

        Descriptor {
            serial,
            kind: None,
            buffer: Vec::with_capacity(self.shared.buffer_size),
        }
    }

    /// Return a descriptor whose operation has completed.
    ///
    /// The descriptor is detached from its operation and cleared before it can be handed out
    /// again.
    pub fn release(&self, mut descriptor: Descriptor) {
        descriptor.detach(self.shared.buffer_size);

        let mut free = self.free();
        if free.len() < self.shared.max_idle {
            free.push(descriptor);
        }
    }

    /// Total descriptors ever created by this pool.
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::Relaxed)
    }

    /// Descriptors currently available for reuse.
    pub fn idle(&self) -> usize {
        self.free().len()
    }

    fn free(&self) -> MutexGuard<Vec<Descriptor>> {
        // The free list is valid at every point a holder could panic, so poisoning is harmless
        self.shared
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
