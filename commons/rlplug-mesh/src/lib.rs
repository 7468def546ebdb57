pub mod axis_rules;
pub mod equivalence;
pub mod error;
pub mod mesh;
pub mod sharding;

pub use axis_rules::*;
pub use equivalence::*;
pub use error::*;
pub use mesh::*;
pub use sharding::*;
