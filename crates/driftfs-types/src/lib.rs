#[allow(non_snake_case)]
pub mod status_code;

pub mod result;
pub mod status;

#[macro_use]
pub mod strong_type;

pub mod ids;

// Re-export commonly used items at the crate root.
pub use ids::*;
pub use result::{make_error, make_error_msg, Result};
pub use status::Status;
pub use status_code::*;
