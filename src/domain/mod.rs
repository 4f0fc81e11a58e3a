pub mod keys;
pub mod types;

pub use keys::*;
pub use types::*;
