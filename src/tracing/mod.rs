//! Tracing helpers shared by the library and the replay binary

mod error_ext;

pub use error_ext::{ErrorTraceExt, ServiceFailureExt};
