//! System-wide constants for the runner engine.
//!
//! This module defines constants shared by the row codec, the frame model
//! and plan construction.

// =============================================================================
// Row Format Constants
// =============================================================================

/// Row format version written into every encoded row header.
pub const ROW_FORMAT_VERSION: u8 = 1;

/// Encoded row header size in bytes.
///
/// The header contains: version (1), reserved (1), total size (4).
pub const ROW_HEADER_SIZE: usize = 6;

/// Maximum encoded row size in bytes (16 MB).
pub const MAX_ROW_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Frame Constants
// =============================================================================

/// Signed offset of an unbounded preceding frame bound.
pub const UNBOUNDED_PRECEDING_OFFSET: i64 = i64::MIN;

/// Signed offset of an unbounded following frame bound.
pub const UNBOUNDED_FOLLOWING_OFFSET: i64 = i64::MAX;

// =============================================================================
// Catalog Constants
// =============================================================================

/// Database holding request tables in request mode.
pub const REQUEST_DATABASE: &str = "request";

/// Separator placed between key column values in a partition key.
pub const PARTITION_KEY_SEPARATOR: char = '|';
