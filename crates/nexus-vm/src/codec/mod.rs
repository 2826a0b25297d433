//! Row codec.
//!
//! Converts between typed [`Value`]s and the binary row format carried in
//! [`Slice`]s.

mod row;
mod value;

pub use row::{RowBuilder, RowView, Slice};
pub use value::Value;
