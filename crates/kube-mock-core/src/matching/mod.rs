//! Request matching utilities.

mod path;
mod payload;
mod query;
pub mod selector;

pub use path::{path_matches, PathMatch};
pub use payload::{body_matches, object_intersects};
pub use query::parse_query_string;
pub use selector::{FieldSelector, LabelSelector, SelectorError};
