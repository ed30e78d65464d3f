pub mod settings;

pub use settings::{
    ActionsConfig, ClassifierConfig, PromptsConfig, ServerConfig, SessionsConfig, Settings,
};
