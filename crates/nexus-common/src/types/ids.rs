//! Core identifier types for the runner engine.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Runner identifier - uniquely identifies one operator node within a plan.
///
/// Ids are assigned densely from zero by the plan builder, so a runner id is
/// also the runner's slot in the plan arena.
///
/// # Example
///
/// ```rust
/// use nexus_common::types::RunnerId;
///
/// let id = RunnerId::new(3);
/// assert_eq!(id.as_usize(), 3);
/// assert_eq!(id.next(), RunnerId::new(4));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RunnerId(u32);

impl RunnerId {
    /// Invalid runner ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(u32::MAX);

    /// First runner ID handed out by a plan builder.
    pub const FIRST: Self = Self(0);

    /// Creates a new `RunnerId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the id as an arena index.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the next runner ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid runner ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "RunnerId(INVALID)")
        } else {
            write!(f, "RunnerId({})", self.0)
        }
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RunnerId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<RunnerId> for u32 {
    #[inline]
    fn from(id: RunnerId) -> Self {
        id.0
    }
}

/// Task identifier - identifies one task of a cluster job.
///
/// A job built for a single node has exactly one task, the main task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TaskId(u32);

impl TaskId {
    /// The main task of a job.
    pub const MAIN: Self = Self(0);

    /// Creates a new `TaskId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for the main task.
    #[inline]
    #[must_use]
    pub const fn is_main(self) -> bool {
        self.0 == Self::MAIN.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
