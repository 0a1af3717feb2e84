//! Result type alias for TreeMirror operations

use crate::Error;

/// Result type alias for TreeMirror operations
pub type Result<T> = std::result::Result<T, Error>;
