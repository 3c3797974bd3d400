//! Type definitions for ronydb storage.

mod query;
mod row;

pub use query::*;
pub use row::*;
