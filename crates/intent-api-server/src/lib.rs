//! Session-aware intent classification service.
//!
//! A request's text is appended to its session transcript, the transcript is
//! classified by a remote chat model into one allow-listed action, and that
//! action is executed by an [`ActionRunner`](services::ActionRunner).

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod utils;

pub use router::build_router;
