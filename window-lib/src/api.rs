//! Types used in public API

use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::{
    element::ElementKind,
    error::{Result, WindowLibError},
};

pub type SmallVec<T> = ::smallvec::SmallVec<[T; 8]>;

/// Number of physical copies of every window, selected by `round % depth`.
/// Consecutive rounds land on disjoint memory, so a call for round N+1 can
/// start while round N slots are still draining.
pub const PING_PONG_DEPTH: u64 = 2;

/// Logical queues inside every window copy.
pub const QUEUE_COUNT: usize = 2;

/// A logical queue inside a rank's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum Queue {
    /// Peer contributions pushed by producer units.
    Inbox = 0,
    /// Reduced slices awaiting the gather pull-back.
    Result = 1,
}

impl Queue {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Monotone flag encoding for `(round, step)`.
///
/// A flag cell never goes backwards: later rounds produce strictly larger
/// values, so a stale store from round N can never satisfy a wait issued
/// for round N+1. Steps must stay below `u32::MAX`.
pub fn flag_epoch(round: u64, step: u32) -> u64 {
    (round << 32) | (step as u64 + 1)
}

/// Coordinates of one flag cell, carried by errors for postmortems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagCoord {
    pub rank: usize,
    pub round: u64,
    pub queue: Queue,
    pub step: u32,
}

impl std::fmt::Display for FlagCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rank {} round {} queue {:?} step {}",
            self.rank, self.round, self.queue, self.step
        )
    }
}

/// A borrowed byte span of one queue slot.
///
/// The span stays valid for the lifetime of the owning `Window`; whether it
/// may be read or written at any point in time is governed entirely by the
/// flag protocol, not by this handle.
#[derive(Debug, Clone, Copy)]
pub struct SlotRef {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for SlotRef {}
unsafe impl Sync for SlotRef {}

impl SlotRef {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// View the first `count` elements of the slot as a tensor reference.
    pub fn tensor(&self, kind: ElementKind, count: usize) -> Result<TensorRef> {
        if count * kind.size_of() > self.len {
            return Err(WindowLibError::InvalidArgument(format!(
                "{} x {:?} does not fit a {}-byte slot",
                count, kind, self.len
            )));
        }
        Ok(TensorRef { ptr: self.ptr, count, kind })
    }
}

/// A caller-owned device buffer: pointer, element count and element kind.
/// Referenced but never owned or freed by this library.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef {
    ptr: NonNull<u8>,
    count: usize,
    kind: ElementKind,
}

unsafe impl Send for TensorRef {}
unsafe impl Sync for TensorRef {}

impl TensorRef {
    pub fn new(ptr: NonNull<u8>, count: usize, kind: ElementKind) -> Self {
        Self { ptr, count, kind }
    }

    pub fn from_slice<T: crate::element::Element>(data: &[T]) -> Self {
        Self {
            // The protocol decides when writes happen; a shared slice input
            // is only ever read.
            ptr: unsafe { NonNull::new_unchecked(data.as_ptr() as *mut u8) },
            count: data.len(),
            kind: T::KIND,
        }
    }

    pub fn from_mut_slice<T: crate::element::Element>(data: &mut [T]) -> Self {
        Self {
            ptr: unsafe { NonNull::new_unchecked(data.as_mut_ptr() as *mut u8) },
            count: data.len(),
            kind: T::KIND,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn byte_len(&self) -> usize {
        self.count * self.kind.size_of()
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// A sub-range of `count` elements starting at element `offset`.
    pub fn slice(&self, offset: usize, count: usize) -> Result<TensorRef> {
        if offset + count > self.count {
            return Err(WindowLibError::InvalidArgument(format!(
                "slice [{}, {}) out of a {}-element buffer",
                offset,
                offset + count,
                self.count
            )));
        }
        let ptr = unsafe { self.ptr.add(offset * self.kind.size_of()) };
        Ok(TensorRef { ptr, count, kind: self.kind })
    }
}
