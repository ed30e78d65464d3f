pub mod classify;

pub use classify::{ClassifyRequest, ClassifyResponse, ErrorEnvelope};
