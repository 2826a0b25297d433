//! Window frames.
//!
//! A [`FrameNode`] describes which rows around the current row an
//! aggregation sees. Bounds are expressed as signed offsets: preceding
//! bounds are negative, following bounds positive, the current row is zero,
//! and unbounded ends map to `i64::MIN` / `i64::MAX`.
//!
//! Frames are evaluated as *history* frames: the four `history_*` metrics
//! clamp every future-looking bound to zero, so a window never contains
//! rows after the current one.

use std::fmt;
use std::ops::Range;

use nexus_common::constants::{UNBOUNDED_FOLLOWING_OFFSET, UNBOUNDED_PRECEDING_OFFSET};
use serde::{Deserialize, Serialize};

use crate::error::{VmError, VmResult};

/// Kind of a frame bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundType {
    /// `UNBOUNDED PRECEDING`.
    PrecedingUnbound,
    /// `k OPEN PRECEDING`, excluding the k-th row.
    OpenPreceding,
    /// `k PRECEDING`.
    Preceding,
    /// `CURRENT ROW`.
    Current,
    /// `k OPEN FOLLOWING`, excluding the k-th row.
    OpenFollowing,
    /// `k FOLLOWING`.
    Following,
    /// `UNBOUNDED FOLLOWING`.
    FollowingUnbound,
}

/// One end of a frame extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameBound {
    /// Bound kind.
    pub bound_type: BoundType,
    /// Unsigned distance from the current row.
    pub offset: i64,
    /// True when `offset` is a time interval rather than a row count.
    pub is_time_offset: bool,
}

impl FrameBound {
    /// Creates a bound.
    pub const fn new(bound_type: BoundType, offset: i64, is_time_offset: bool) -> Self {
        Self {
            bound_type,
            offset,
            is_time_offset,
        }
    }

    /// `k PRECEDING`.
    pub const fn preceding(k: i64) -> Self {
        Self::new(BoundType::Preceding, k, false)
    }

    /// `k OPEN PRECEDING`.
    pub const fn open_preceding(k: i64) -> Self {
        Self::new(BoundType::OpenPreceding, k, false)
    }

    /// `k FOLLOWING`.
    pub const fn following(k: i64) -> Self {
        Self::new(BoundType::Following, k, false)
    }

    /// `k OPEN FOLLOWING`.
    pub const fn open_following(k: i64) -> Self {
        Self::new(BoundType::OpenFollowing, k, false)
    }

    /// `CURRENT ROW`.
    pub const fn current() -> Self {
        Self::new(BoundType::Current, 0, false)
    }

    /// `UNBOUNDED PRECEDING`.
    pub const fn unbounded_preceding() -> Self {
        Self::new(BoundType::PrecedingUnbound, 0, false)
    }

    /// `UNBOUNDED FOLLOWING`.
    pub const fn unbounded_following() -> Self {
        Self::new(BoundType::FollowingUnbound, 0, false)
    }

    /// Marks the offset as a time interval.
    #[must_use]
    pub const fn time(mut self) -> Self {
        self.is_time_offset = true;
        self
    }

    /// Signed offset of this bound relative to the current row.
    ///
    /// Open bounds exclude their endpoint, which moves the offset one step
    /// toward zero.
    pub const fn signed_offset(&self) -> i64 {
        match self.bound_type {
            BoundType::Current => 0,
            BoundType::Following => self.offset,
            BoundType::OpenFollowing => self.offset.saturating_sub(1),
            BoundType::Preceding => self.offset.saturating_neg(),
            BoundType::OpenPreceding => 1i64.saturating_sub(self.offset),
            BoundType::PrecedingUnbound => UNBOUNDED_PRECEDING_OFFSET,
            BoundType::FollowingUnbound => UNBOUNDED_FOLLOWING_OFFSET,
        }
    }

    /// Returns true for the two unbounded kinds.
    pub const fn is_unbounded(&self) -> bool {
        matches!(
            self.bound_type,
            BoundType::PrecedingUnbound | BoundType::FollowingUnbound
        )
    }
}

impl fmt::Display for FrameBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "UNBOUND")
        } else {
            write!(f, "{}", self.signed_offset())
        }
    }
}

/// Start and end bound of one frame dimension. A missing bound is
/// unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameExtent {
    /// Start bound.
    pub start: Option<FrameBound>,
    /// End bound.
    pub end: Option<FrameBound>,
}

impl FrameExtent {
    /// Creates an extent.
    pub const fn new(start: Option<FrameBound>, end: Option<FrameBound>) -> Self {
        Self { start, end }
    }

    /// Creates an extent with both bounds present.
    pub const fn between(start: FrameBound, end: FrameBound) -> Self {
        Self::new(Some(start), Some(end))
    }

    fn same_shape(&self, other: &FrameExtent) -> bool {
        self.start.is_some() == other.start.is_some() && self.end.is_some() == other.end.is_some()
    }

    /// Pointwise union: the earlier start and the later end.
    fn union(&self, other: &FrameExtent) -> FrameExtent {
        let pick = |a: Option<FrameBound>, b: Option<FrameBound>, earlier: bool| match (a, b) {
            (Some(a), Some(b)) => {
                let a_first = a.signed_offset() <= b.signed_offset();
                Some(if a_first == earlier { a } else { b })
            }
            _ => None,
        };
        FrameExtent {
            start: pick(self.start, other.start, true),
            end: pick(self.end, other.end, false),
        }
    }

    fn validate(&self) -> VmResult<()> {
        for bound in [self.start, self.end].into_iter().flatten() {
            if bound.offset < 0 {
                return Err(VmError::invalid_plan(format!(
                    "frame bound offset {} is negative",
                    bound.offset
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start.signed_offset() > end.signed_offset() {
                return Err(VmError::invalid_plan(format!(
                    "frame start {start} is after frame end {end}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for FrameExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        match self.start {
            Some(b) => write!(f, "{b}")?,
            None => write!(f, "UNBOUND")?,
        }
        write!(f, ",")?;
        match self.end {
            Some(b) => write!(f, "{b}")?,
            None => write!(f, "UNBOUND")?,
        }
        write!(f, "]")
    }
}

/// Kind of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Row-count window.
    Rows,
    /// Order-key range window.
    Range,
    /// Order-key range window, optionally capped to the newest rows.
    RowsRange,
    /// Union of a rows window and a rows-range window.
    RowsMergeRowsRange,
}

impl FrameType {
    /// Returns the frame type name.
    pub const fn as_str(self) -> &'static str {
        match self {
            FrameType::Rows => "ROWS",
            FrameType::Range => "RANGE",
            FrameType::RowsRange => "ROWS_RANGE",
            FrameType::RowsMergeRowsRange => "ROWS_MERGE_ROWS_RANGE",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A window frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameNode {
    /// Frame kind.
    pub frame_type: FrameType,
    /// Order-key range extent.
    pub frame_range: Option<FrameExtent>,
    /// Row-count extent.
    pub frame_rows: Option<FrameExtent>,
    /// Maximum window size for rows-range-like frames; 0 means no cap.
    pub frame_maxsize: i64,
}

fn clamp_history(offset: i64) -> i64 {
    offset.min(0)
}

impl FrameNode {
    /// Creates a frame.
    pub const fn new(
        frame_type: FrameType,
        frame_range: Option<FrameExtent>,
        frame_rows: Option<FrameExtent>,
        frame_maxsize: i64,
    ) -> Self {
        Self {
            frame_type,
            frame_range,
            frame_rows,
            frame_maxsize,
        }
    }

    /// `ROWS BETWEEN start AND end`.
    pub const fn rows(start: FrameBound, end: FrameBound) -> Self {
        Self::new(FrameType::Rows, None, Some(FrameExtent::between(start, end)), 0)
    }

    /// `RANGE BETWEEN start AND end`.
    pub const fn range(start: FrameBound, end: FrameBound) -> Self {
        Self::new(FrameType::Range, Some(FrameExtent::between(start, end)), None, 0)
    }

    /// `ROWS_RANGE BETWEEN start AND end`.
    pub const fn rows_range(start: FrameBound, end: FrameBound) -> Self {
        Self::new(FrameType::RowsRange, Some(FrameExtent::between(start, end)), None, 0)
    }

    /// A frame with no extents: all history up to the current row.
    pub const fn unbounded(frame_type: FrameType) -> Self {
        Self::new(frame_type, None, None, 0)
    }

    /// Sets the max window size.
    #[must_use]
    pub const fn with_maxsize(mut self, maxsize: i64) -> Self {
        self.frame_maxsize = maxsize;
        self
    }

    /// Checks offsets, bound order and max size.
    pub fn validate(&self) -> VmResult<()> {
        if self.frame_maxsize < 0 {
            return Err(VmError::invalid_plan(format!(
                "frame maxsize {} is negative",
                self.frame_maxsize
            )));
        }
        if let Some(range) = &self.frame_range {
            range.validate()?;
        }
        if let Some(rows) = &self.frame_rows {
            rows.validate()?;
        }
        Ok(())
    }

    /// Start of the range extent, clamped to history.
    pub fn history_range_start(&self) -> i64 {
        let start = self.frame_range.and_then(|r| r.start);
        match (&self.frame_rows, &self.frame_range, start) {
            (None, None, _) => UNBOUNDED_PRECEDING_OFFSET,
            (None, _, None) => UNBOUNDED_PRECEDING_OFFSET,
            (Some(_), _, None) => 0,
            (_, _, Some(start)) => clamp_history(start.signed_offset()),
        }
    }

    /// End of the range extent, clamped to history.
    pub fn history_range_end(&self) -> i64 {
        self.frame_range
            .and_then(|r| r.end)
            .map_or(0, |end| clamp_history(end.signed_offset()))
    }

    /// Start of the rows extent, clamped to history.
    pub fn history_rows_start(&self) -> i64 {
        let start = self.frame_rows.and_then(|r| r.start);
        match (&self.frame_range, &self.frame_rows, start) {
            (None, None, _) => UNBOUNDED_PRECEDING_OFFSET,
            (None, _, None) => UNBOUNDED_PRECEDING_OFFSET,
            (Some(_), _, None) => 0,
            (_, _, Some(start)) => clamp_history(start.signed_offset()),
        }
    }

    /// End of the rows extent, clamped to history.
    pub fn history_rows_end(&self) -> i64 {
        if self.frame_rows.is_none() && self.frame_range.is_none() {
            return UNBOUNDED_PRECEDING_OFFSET;
        }
        self.frame_rows
            .and_then(|r| r.end)
            .map_or(0, |end| clamp_history(end.signed_offset()))
    }

    /// Returns true when the frame ends strictly before the current row.
    pub fn is_history_frame(&self) -> bool {
        match self.frame_type {
            FrameType::Rows => self.history_rows_end() < 0,
            FrameType::Range | FrameType::RowsRange | FrameType::RowsMergeRowsRange => {
                self.history_range_end() < 0
            }
        }
    }

    /// Like [`is_history_frame`](Self::is_history_frame), but a merged
    /// frame needs both of its ends before the current row, and a range
    /// frame never qualifies.
    pub fn is_pure_history_frame(&self) -> bool {
        match self.frame_type {
            FrameType::Rows => self.history_rows_end() < 0,
            FrameType::RowsRange => self.history_range_end() < 0,
            FrameType::RowsMergeRowsRange => {
                self.history_range_end() < 0 && self.history_rows_end() < 0
            }
            FrameType::Range => false,
        }
    }

    /// Returns true for frames bounded by order-key range and row count.
    pub const fn is_rows_range_like(&self) -> bool {
        matches!(
            self.frame_type,
            FrameType::RowsRange | FrameType::RowsMergeRowsRange
        )
    }

    /// Returns true for rows-range-like frames with a size cap.
    pub const fn is_rows_range_like_max_size(&self) -> bool {
        self.is_rows_range_like() && self.frame_maxsize > 0
    }

    fn same_shape(&self, other: &FrameNode) -> bool {
        let shape = |a: &Option<FrameExtent>, b: &Option<FrameExtent>| match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_shape(b),
            _ => false,
        };
        shape(&self.frame_range, &other.frame_range) && shape(&self.frame_rows, &other.frame_rows)
    }

    /// Returns true if one scan over the merged frame can serve both
    /// frames.
    ///
    /// Frames merge only when they have the same type and the same extent
    /// layout. A capped frame also needs identical ends, since its cap is
    /// counted back from its end. Different caps merge only when
    /// `allow_maxsize_merge` is set.
    pub fn can_merge_with(&self, other: &FrameNode, allow_maxsize_merge: bool) -> bool {
        if self.frame_type != other.frame_type || !self.same_shape(other) {
            return false;
        }
        if self.frame_maxsize > 0 || other.frame_maxsize > 0 {
            if self.history_range_end() != other.history_range_end()
                || self.history_rows_end() != other.history_rows_end()
            {
                return false;
            }
            if self.frame_maxsize != other.frame_maxsize && !allow_maxsize_merge {
                return false;
            }
        }
        true
    }

    /// The smallest frame containing both frames, if they can merge.
    pub fn merge(&self, other: &FrameNode, allow_maxsize_merge: bool) -> Option<FrameNode> {
        if !self.can_merge_with(other, allow_maxsize_merge) {
            return None;
        }
        let union = |a: &Option<FrameExtent>, b: &Option<FrameExtent>| match (a, b) {
            (Some(a), Some(b)) => Some(a.union(b)),
            _ => None,
        };
        let maxsize = if self.frame_maxsize == 0 || other.frame_maxsize == 0 {
            0
        } else {
            self.frame_maxsize.max(other.frame_maxsize)
        };
        Some(FrameNode {
            frame_type: self.frame_type,
            frame_range: union(&self.frame_range, &other.frame_range),
            frame_rows: union(&self.frame_rows, &other.frame_rows),
            frame_maxsize: maxsize,
        })
    }

    /// Positions visible from row `current` of a segment whose order keys
    /// are `keys`, in ascending order.
    ///
    /// The result is a half-open range of positions that never extends past
    /// `current`.
    pub fn window_range(&self, keys: &[i64], current: usize) -> Range<usize> {
        if current >= keys.len() {
            return 0..0;
        }
        if self.frame_rows.is_none() && self.frame_range.is_none() {
            return 0..current + 1;
        }

        let (mut lo, hi) = match self.frame_type {
            FrameType::Rows => self.rows_bounds(current),
            FrameType::Range | FrameType::RowsRange => self.range_bounds(keys, current),
            FrameType::RowsMergeRowsRange => {
                let (rows_lo, rows_hi) = self.rows_bounds(current);
                let (range_lo, range_hi) = self.range_bounds(keys, current);
                (rows_lo.min(range_lo), rows_hi.max(range_hi))
            }
        };

        if self.is_rows_range_like_max_size() {
            let cap = usize::try_from(self.frame_maxsize).unwrap_or(usize::MAX);
            lo = lo.max(hi.saturating_sub(cap));
        }

        if hi <= lo {
            return lo..lo;
        }
        lo..hi
    }

    fn rows_bounds(&self, current: usize) -> (usize, usize) {
        let cur = i64::try_from(current).unwrap_or(i64::MAX);
        let start = self.history_rows_start();
        let lo = if start == UNBOUNDED_PRECEDING_OFFSET {
            0
        } else {
            usize::try_from(cur.saturating_add(start).max(0)).unwrap_or(0)
        };
        let hi = usize::try_from((cur + 1).saturating_add(self.history_rows_end()).max(0))
            .unwrap_or(0);
        (lo, hi)
    }

    fn range_bounds(&self, keys: &[i64], current: usize) -> (usize, usize) {
        let history = &keys[..=current];
        let key = keys[current];
        let start = self.history_range_start();
        let lo = if start == UNBOUNDED_PRECEDING_OFFSET {
            0
        } else {
            let lower = key.saturating_add(start);
            history.partition_point(|&k| k < lower)
        };
        let upper = key.saturating_add(self.history_range_end());
        let hi = history.partition_point(|&k| k <= upper);
        (lo, hi)
    }
}

impl fmt::Display for FrameNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.frame_type)?;
        match (&self.frame_rows, &self.frame_range) {
            (Some(rows), Some(range)) => write!(f, "(rows={rows}, range={range})")?,
            (Some(rows), None) => write!(f, "{rows}")?,
            (None, Some(range)) => write!(f, "{range}")?,
            (None, None) => write!(f, "[UNBOUND,UNBOUND]")?,
        }
        if self.frame_maxsize > 0 {
            write!(f, ", maxsize={}", self.frame_maxsize)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signed_offsets() {
        assert_eq!(FrameBound::preceding(5).signed_offset(), -5);
        assert_eq!(FrameBound::following(3).signed_offset(), 3);
        assert_eq!(FrameBound::current().signed_offset(), 0);
        assert_eq!(FrameBound::open_preceding(5).signed_offset(), -4);
        assert_eq!(FrameBound::open_following(3).signed_offset(), 2);
        assert_eq!(FrameBound::unbounded_preceding().signed_offset(), i64::MIN);
        assert_eq!(FrameBound::unbounded_following().signed_offset(), i64::MAX);
    }

    #[test]
    fn test_history_classification() {
        let frame = FrameNode::rows(FrameBound::preceding(10), FrameBound::preceding(1));
        assert!(frame.is_history_frame());
        assert!(frame.is_pure_history_frame());

        let frame = FrameNode::rows(FrameBound::preceding(10), FrameBound::current());
        assert!(!frame.is_history_frame());

        let frame = FrameNode::range(
            FrameBound::preceding(100).time(),
            FrameBound::preceding(10).time(),
        );
        assert!(frame.is_history_frame());
        assert!(!frame.is_pure_history_frame());
    }

    #[test]
    fn test_merge_frame_pure_history_needs_both_ends() {
        let frame = FrameNode::new(
            FrameType::RowsMergeRowsRange,
            Some(FrameExtent::between(FrameBound::preceding(100), FrameBound::preceding(5))),
            Some(FrameExtent::between(FrameBound::preceding(3), FrameBound::current())),
            0,
        );
        assert!(frame.is_history_frame());
        assert!(!frame.is_pure_history_frame());

        let frame = FrameNode::new(
            FrameType::RowsMergeRowsRange,
            Some(FrameExtent::between(FrameBound::preceding(100), FrameBound::preceding(5))),
            Some(FrameExtent::between(FrameBound::preceding(3), FrameBound::preceding(1))),
            0,
        );
        assert!(frame.is_pure_history_frame());
    }

    #[test]
    fn test_history_metrics_clamp_future() {
        let frame = FrameNode::rows(FrameBound::preceding(2), FrameBound::following(4));
        assert_eq!(frame.history_rows_start(), -2);
        assert_eq!(frame.history_rows_end(), 0);

        let frame = FrameNode::range(FrameBound::following(3), FrameBound::following(4));
        assert_eq!(frame.history_range_start(), 0);
        assert_eq!(frame.history_range_end(), 0);
    }

    #[test]
    fn test_history_metrics_absent_extents() {
        let frame = FrameNode::unbounded(FrameType::Rows);
        assert_eq!(frame.history_range_start(), i64::MIN);
        assert_eq!(frame.history_rows_start(), i64::MIN);
        assert_eq!(frame.history_rows_end(), i64::MIN);
        assert_eq!(frame.history_range_end(), 0);

        let frame = FrameNode::new(
            FrameType::Rows,
            None,
            Some(FrameExtent::new(None, Some(FrameBound::current()))),
            0,
        );
        assert_eq!(frame.history_rows_start(), i64::MIN);
        assert_eq!(frame.history_range_start(), 0);

        let frame = FrameNode::new(
            FrameType::RowsMergeRowsRange,
            Some(FrameExtent::new(None, Some(FrameBound::current()))),
            Some(FrameExtent::new(None, Some(FrameBound::current()))),
            0,
        );
        assert_eq!(frame.history_range_start(), 0);
        assert_eq!(frame.history_rows_start(), 0);
    }

    #[test]
    fn test_rows_range_like() {
        let frame = FrameNode::rows_range(FrameBound::preceding(10), FrameBound::current());
        assert!(frame.is_rows_range_like());
        assert!(!frame.is_rows_range_like_max_size());
        assert!(frame.with_maxsize(3).is_rows_range_like_max_size());
        assert!(!FrameNode::rows(FrameBound::preceding(1), FrameBound::current())
            .with_maxsize(3)
            .is_rows_range_like_max_size());
    }

    #[test]
    fn test_validate() {
        assert!(FrameNode::rows(FrameBound::preceding(2), FrameBound::current())
            .validate()
            .is_ok());
        assert!(FrameNode::rows(FrameBound::current(), FrameBound::preceding(2))
            .validate()
            .is_err());
        assert!(FrameNode::rows(FrameBound::preceding(-2), FrameBound::current())
            .validate()
            .is_err());
        assert!(FrameNode::rows_range(FrameBound::preceding(2), FrameBound::current())
            .with_maxsize(-1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_display() {
        let frame = FrameNode::rows(FrameBound::preceding(2), FrameBound::current());
        assert_eq!(frame.to_string(), "ROWS[-2,0]");

        let frame = FrameNode::rows_range(FrameBound::unbounded_preceding(), FrameBound::open_preceding(3))
            .with_maxsize(10);
        assert_eq!(frame.to_string(), "ROWS_RANGE[UNBOUND,-2], maxsize=10");

        let extent = FrameExtent::new(None, Some(FrameBound::following(1)));
        assert_eq!(extent.to_string(), "[UNBOUND,1]");
    }

    const KEYS: [i64; 5] = [1000, 1002, 1004, 1005, 1006];

    #[test]
    fn test_window_rows() {
        let frame = FrameNode::rows(FrameBound::preceding(2), FrameBound::current());
        assert_eq!(frame.window_range(&KEYS, 3), 1..4);
        assert_eq!(frame.window_range(&KEYS, 0), 0..1);

        let frame = FrameNode::rows(FrameBound::preceding(3), FrameBound::preceding(1));
        assert_eq!(frame.window_range(&KEYS, 4), 1..4);
        assert_eq!(frame.window_range(&KEYS, 0), 0..0);

        let frame = FrameNode::rows(FrameBound::unbounded_preceding(), FrameBound::current());
        assert_eq!(frame.window_range(&KEYS, 4), 0..5);
    }

    #[test]
    fn test_window_range() {
        let frame = FrameNode::range(FrameBound::preceding(3).time(), FrameBound::current());
        assert_eq!(frame.window_range(&KEYS, 3), 1..4);

        let frame = FrameNode::range(FrameBound::preceding(4).time(), FrameBound::preceding(1).time());
        assert_eq!(frame.window_range(&KEYS, 4), 2..4);

        let frame = FrameNode::rows_range(FrameBound::preceding(6).time(), FrameBound::current())
            .with_maxsize(2);
        assert_eq!(frame.window_range(&KEYS, 4), 3..5);
    }

    #[test]
    fn test_window_never_looks_forward() {
        let frame = FrameNode::rows(FrameBound::preceding(1), FrameBound::following(2));
        assert_eq!(frame.window_range(&KEYS, 2), 1..3);
        let frame = FrameNode::range(FrameBound::preceding(1), FrameBound::following(10));
        assert_eq!(frame.window_range(&KEYS, 3), 2..4);
    }

    #[test]
    fn test_window_merge_frame() {
        let frame = FrameNode::new(
            FrameType::RowsMergeRowsRange,
            Some(FrameExtent::between(FrameBound::preceding(1), FrameBound::current())),
            Some(FrameExtent::between(FrameBound::preceding(3), FrameBound::current())),
            0,
        );
        assert_eq!(frame.window_range(&KEYS, 4), 1..5);
    }

    #[test]
    fn test_window_out_of_range_current() {
        let frame = FrameNode::unbounded(FrameType::Rows);
        assert_eq!(frame.window_range(&KEYS, 9), 0..0);
        assert_eq!(frame.window_range(&KEYS, 2), 0..3);
    }

    #[test]
    fn test_can_merge_with() {
        let a = FrameNode::rows(FrameBound::preceding(2), FrameBound::current());
        let b = FrameNode::rows(FrameBound::preceding(5), FrameBound::preceding(1));
        assert!(a.can_merge_with(&b, false));
        let merged = a.merge(&b, false).unwrap();
        assert_eq!(merged, FrameNode::rows(FrameBound::preceding(5), FrameBound::current()));

        let range = FrameNode::range(FrameBound::preceding(2), FrameBound::current());
        assert!(!a.can_merge_with(&range, true));
        assert!(a.merge(&range, true).is_none());
    }

    #[test]
    fn test_can_merge_with_maxsize() {
        let a = FrameNode::rows_range(FrameBound::preceding(10), FrameBound::current()).with_maxsize(3);
        let b = FrameNode::rows_range(FrameBound::preceding(20), FrameBound::current()).with_maxsize(5);
        assert!(!a.can_merge_with(&b, false));
        assert!(a.can_merge_with(&b, true));
        assert_eq!(a.merge(&b, true).unwrap().frame_maxsize, 5);

        let c = FrameNode::rows_range(FrameBound::preceding(20), FrameBound::preceding(1)).with_maxsize(3);
        assert!(!a.can_merge_with(&c, true));
    }

    fn bound_strategy() -> impl Strategy<Value = FrameBound> {
        prop_oneof![
            Just(FrameBound::unbounded_preceding()),
            (0i64..8).prop_map(FrameBound::preceding),
            (1i64..8).prop_map(FrameBound::open_preceding),
            Just(FrameBound::current()),
            (0i64..3).prop_map(FrameBound::following),
        ]
    }

    fn extent_strategy() -> impl Strategy<Value = FrameExtent> {
        (bound_strategy(), bound_strategy()).prop_map(|(a, b)| {
            if a.signed_offset() <= b.signed_offset() {
                FrameExtent::between(a, b)
            } else {
                FrameExtent::between(b, a)
            }
        })
    }

    fn frame_pair() -> impl Strategy<Value = (FrameNode, FrameNode)> {
        let frame_type = prop_oneof![
            Just(FrameType::Rows),
            Just(FrameType::Range),
            Just(FrameType::RowsRange),
            Just(FrameType::RowsMergeRowsRange),
        ];
        (
            frame_type,
            extent_strategy(),
            extent_strategy(),
            extent_strategy(),
            extent_strategy(),
            prop_oneof![Just(0i64), 1i64..4],
            prop_oneof![Just(0i64), 1i64..4],
            any::<bool>(),
        )
            .prop_map(|(ty, r1, w1, r2, w2, m1, m2, share_end)| {
                let (range, rows) = match ty {
                    FrameType::Rows => ((None, None), (Some(w1), Some(w2))),
                    FrameType::Range | FrameType::RowsRange => ((Some(r1), Some(r2)), (None, None)),
                    FrameType::RowsMergeRowsRange => ((Some(r1), Some(r2)), (Some(w1), Some(w2))),
                };
                let a = FrameNode::new(ty, range.0, rows.0, m1);
                let mut b = FrameNode::new(ty, range.1, rows.1, m2);
                if share_end {
                    let align = |mine: &mut Option<FrameExtent>, theirs: &Option<FrameExtent>| {
                        if let (Some(mine), Some(theirs)) = (mine.as_mut(), theirs) {
                            mine.end = theirs.end;
                            if let (Some(s), Some(e)) = (mine.start, mine.end) {
                                if s.signed_offset() > e.signed_offset() {
                                    mine.start = mine.end;
                                }
                            }
                        }
                    };
                    align(&mut b.frame_range, &a.frame_range);
                    align(&mut b.frame_rows, &a.frame_rows);
                }
                (a, b)
            })
    }

    fn window_sum(values: &[i64], window: Range<usize>) -> i64 {
        values[window].iter().sum()
    }

    proptest! {
        #[test]
        fn prop_merged_scan_serves_both_frames(
            (a, b) in frame_pair(),
            mut keys in prop::collection::vec(0i64..40, 1..24),
        ) {
            keys.sort_unstable();
            let values: Vec<i64> = (0..keys.len() as i64).map(|i| (i * 7) % 13 - 4).collect();

            if let Some(merged) = a.merge(&b, true) {
                for current in 0..keys.len() {
                    let scan = merged.window_range(&keys, current);
                    let scan_start = scan.start.min(current);

                    for frame in [&a, &b] {
                        let direct = frame.window_range(&keys, current);
                        if !direct.is_empty() {
                            prop_assert!(direct.start >= scan_start, "{} not inside {}", frame, merged);
                        }
                        let local = frame.window_range(&keys[scan_start..=current], current - scan_start);
                        let shifted = local.start + scan_start..local.end + scan_start;
                        prop_assert_eq!(
                            window_sum(&values, direct.clone()),
                            window_sum(&values, shifted),
                            "frame {} merged {} at {}", frame, merged, current
                        );
                    }
                }
            }
        }

        #[test]
        fn prop_window_is_history(
            (a, _b) in frame_pair(),
            mut keys in prop::collection::vec(0i64..40, 1..24),
        ) {
            keys.sort_unstable();
            for current in 0..keys.len() {
                let window = a.window_range(&keys, current);
                prop_assert!(window.end <= current + 1);
                prop_assert!(window.start <= window.end);
            }
        }
    }
}
