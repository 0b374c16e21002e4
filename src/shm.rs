//! The shared segment: a POSIX shared-memory object holding the ring.
//!
//! The supervisor creates the segment and is the only process that ever
//! unlinks it; generators attach to the pre-existing name and fail fast if
//! it is absent. Every field is reached through the typed accessors below;
//! raw offsets never escape this module.
//!
//! Concurrency discipline: the four scalar words are atomics; the slot
//! array is plain bytes whose ownership is handed back and forth by the
//! free-slot/used-slot semaphores (a slot is writable only by the producer
//! holding a free permit for it, and readable only by the consumer holding
//! its used permit).

use std::cell::UnsafeCell;
use std::fmt;
use std::mem;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

/// Number of ring slots.
pub const RING_CAPACITY: usize = 40;

/// Bytes per slot, including the terminating NUL.
pub const SLOT_LEN: usize = 100;

/// Longest record a slot can carry (one byte stays NUL).
pub const MAX_RECORD_LEN: usize = SLOT_LEN - 1;

/// Initial watermark: the largest removal-set size a generator may submit.
pub const EDGE_CEILING: u32 = 8;

/// In-memory layout of the shared segment.
///
/// Field order matches the wire contract: watermark, write index, read
/// index, terminate flag, then the slot array.
#[repr(C)]
pub struct RingLayout {
    best_edge_count: AtomicU32,
    write_index: AtomicU32,
    read_index: AtomicU32,
    terminate: AtomicU32,
    slots: UnsafeCell<[[u8; SLOT_LEN]; RING_CAPACITY]>,
}

const SEGMENT_BYTES: NonZeroUsize = match NonZeroUsize::new(mem::size_of::<RingLayout>()) {
    Some(n) => n,
    None => unreachable!(),
};

/// A mapped view of the shared segment.
pub struct SharedSegment {
    name: String,
    _fd: OwnedFd,
    ptr: NonNull<RingLayout>,
    is_owner: bool,
}

// SAFETY: all scalar fields are atomics; slot bytes are only touched under
// the semaphore hand-off discipline documented on the module.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Creates and initializes the segment (supervisor side).
    ///
    /// Uses `O_CREAT | O_EXCL`: a leftover segment from a crashed run or a
    /// concurrently running supervisor is an error, not something to adopt.
    /// Partially created resources are rolled back before returning.
    ///
    /// # Errors
    /// Fails if the object exists, cannot be sized, or cannot be mapped.
    pub fn create(name: &str) -> Result<Self, ShmError> {
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| ShmError::Create {
            name: name.to_string(),
            cause: e.to_string(),
        })?;

        if let Err(e) = ftruncate(&fd, SEGMENT_BYTES.get() as i64) {
            let _ = shm_unlink(name);
            return Err(ShmError::Resize {
                name: name.to_string(),
                cause: e.to_string(),
            });
        }

        let segment = match Self::map(name, fd, true) {
            Ok(segment) => segment,
            Err(e) => {
                let _ = shm_unlink(name);
                return Err(e);
            }
        };

        // ftruncate zero-fills the object; only the watermark needs a
        // non-zero starting value.
        let layout = segment.layout();
        layout.best_edge_count.store(EDGE_CEILING, Ordering::Release);
        layout.write_index.store(0, Ordering::Release);
        layout.read_index.store(0, Ordering::Release);
        layout.terminate.store(0, Ordering::Release);
        Ok(segment)
    }

    /// Attaches to the pre-existing segment (generator side).
    ///
    /// # Errors
    /// A missing segment is a fatal, reported error: the supervisor must
    /// be started first; generators never wait for it.
    pub fn attach(name: &str) -> Result<Self, ShmError> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|e| ShmError::Open {
            name: name.to_string(),
            cause: e.to_string(),
        })?;
        Self::map(name, fd, false)
    }

    fn map(name: &str, fd: OwnedFd, is_owner: bool) -> Result<Self, ShmError> {
        let addr = unsafe {
            mmap(
                None,
                SEGMENT_BYTES,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(|e| ShmError::Map {
            name: name.to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            _fd: fd,
            ptr: addr.cast::<RingLayout>(),
            is_owner,
        })
    }

    #[inline]
    fn layout(&self) -> &RingLayout {
        // SAFETY: the mapping is live for the lifetime of `self` and sized
        // to `RingLayout`; see the module concurrency discipline.
        unsafe { self.ptr.as_ref() }
    }

    /// The segment's resource name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ------------------------------------------------------------------
    // Scalar accessors
    // ------------------------------------------------------------------

    /// Current watermark: smallest accepted removal-set size so far.
    #[inline]
    pub fn best_edge_count(&self) -> u32 {
        self.layout().best_edge_count.load(Ordering::Acquire)
    }

    /// Lowers the watermark. Callers must hold the protocol mutex.
    #[inline]
    pub(crate) fn set_best_edge_count(&self, count: u32) {
        self.layout().best_edge_count.store(count, Ordering::Release);
    }

    /// Whether the 0→1 terminate transition has happened.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.layout().terminate.load(Ordering::Acquire) != 0
    }

    /// Sets the terminate flag; true if this call made the transition.
    #[inline]
    pub(crate) fn set_terminated(&self) -> bool {
        self.layout().terminate.swap(1, Ordering::AcqRel) == 0
    }

    /// Advances the producer cursor; returns the slot index just claimed.
    /// Callers must hold the protocol mutex.
    #[inline]
    pub(crate) fn advance_write_index(&self) -> usize {
        let layout = self.layout();
        let idx = layout.write_index.load(Ordering::Acquire);
        layout
            .write_index
            .store((idx + 1) % RING_CAPACITY as u32, Ordering::Release);
        idx as usize
    }

    /// Advances the consumer cursor; returns the slot index just released.
    /// The consumer is the single writer of `read_index`, so no mutex.
    #[inline]
    pub(crate) fn advance_read_index(&self) -> usize {
        let layout = self.layout();
        let idx = layout.read_index.load(Ordering::Acquire);
        layout
            .read_index
            .store((idx + 1) % RING_CAPACITY as u32, Ordering::Release);
        idx as usize
    }

    // ------------------------------------------------------------------
    // Slot accessors
    // ------------------------------------------------------------------

    /// Writes a record into a slot the caller owns via a free permit.
    ///
    /// The slot is zero-filled past the record, preserving NUL termination.
    ///
    /// # Panics
    /// Panics if the record exceeds [`MAX_RECORD_LEN`]; the protocol layer
    /// rejects oversize records before claiming a slot.
    pub(crate) fn write_slot(&self, idx: usize, record: &[u8]) {
        assert!(record.len() <= MAX_RECORD_LEN, "record exceeds slot");
        // SAFETY: the free permit for `idx` gives this producer exclusive
        // slot ownership until it posts the used permit.
        let slot = unsafe { &mut (*self.layout().slots.get())[idx] };
        slot[..record.len()].copy_from_slice(record);
        slot[record.len()..].fill(0);
    }

    /// Reads a slot the caller owns via a used permit, bounded by the slot
    /// length (a defensive read: a missing NUL cannot run past the slot).
    pub(crate) fn read_slot(&self, idx: usize) -> Vec<u8> {
        // SAFETY: the used permit for `idx` gives the single consumer
        // exclusive slot ownership until it posts the free permit.
        let slot = unsafe { &(*self.layout().slots.get())[idx] };
        let len = slot.iter().position(|&b| b == 0).unwrap_or(SLOT_LEN);
        slot[..len].to_vec()
    }

    /// Zeroes a slot after consumption.
    pub(crate) fn clear_slot(&self, idx: usize) {
        // SAFETY: as in `read_slot`.
        let slot = unsafe { &mut (*self.layout().slots.get())[idx] };
        slot.fill(0);
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr.cast(), SEGMENT_BYTES.get());
        }
        // Only the owner unlinks; attached processes merely detach.
        if self.is_owner {
            let _ = shm_unlink(self.name.as_str());
        }
    }
}

impl fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("is_owner", &self.is_owner)
            .finish()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from shared-segment setup, each naming the failing operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShmError {
    /// `shm_open(O_CREAT | O_EXCL)` failed.
    Create {
        /// Segment name.
        name: String,
        /// OS error text.
        cause: String,
    },
    /// `shm_open` on a pre-existing name failed.
    Open {
        /// Segment name.
        name: String,
        /// OS error text.
        cause: String,
    },
    /// `ftruncate` to the ring size failed.
    Resize {
        /// Segment name.
        name: String,
        /// OS error text.
        cause: String,
    },
    /// `mmap` failed.
    Map {
        /// Segment name.
        name: String,
        /// OS error text.
        cause: String,
    },
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShmError::Create { name, cause } => {
                write!(f, "could not create shared segment {name}: {cause}")
            }
            ShmError::Open { name, cause } => {
                write!(f, "could not open shared segment {name}: {cause}")
            }
            ShmError::Resize { name, cause } => {
                write!(f, "could not size shared segment {name}: {cause}")
            }
            ShmError::Map { name, cause } => {
                write!(f, "could not map shared segment {name}: {cause}")
            }
        }
    }
}

impl std::error::Error for ShmError {}
