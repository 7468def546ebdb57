pub mod adapter;
pub mod error;
pub mod introspect;
pub mod registry;
pub mod side_table;

pub use adapter::*;
pub use error::*;
pub use introspect::declared_fields;
pub use registry::*;
pub use side_table::IdentityTable;

/// Keyword arguments handed to a configuration constructor.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;
