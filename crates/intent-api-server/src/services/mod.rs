pub mod action_runner;
pub mod classifier_service;
pub mod dispatch_service;
pub mod session;

pub use action_runner::{ActionRunner, ProcessActionRunner};
pub use classifier_service::{Classifier, ClassifierService};
pub use dispatch_service::{DispatchConfig, DispatchService};
pub use session::SessionStore;
