use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::models::{ClassifyRequest, ClassifyResponse};
use crate::services::action_runner::{ActionError, ActionRunner};
use crate::services::classifier_service::{Classifier, ClassifierError};
use crate::services::session::{ConversationContext, Role, SessionStore, StoreFull};

/// Steps of one request, in order. Any non-terminal step may move to
/// `Errored`, which is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    ContextLoaded,
    Classified,
    ActionValidated,
    ActionExecuted,
    Responded,
    Errored,
}

impl DispatchStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded | Self::Errored)
    }

    pub fn can_advance_to(self, next: DispatchStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Errored || self.next_step() == Some(next)
    }

    fn next_step(self) -> Option<DispatchStage> {
        match self {
            Self::Received => Some(Self::ContextLoaded),
            Self::ContextLoaded => Some(Self::Classified),
            Self::Classified => Some(Self::ActionValidated),
            Self::ActionValidated => Some(Self::ActionExecuted),
            Self::ActionExecuted => Some(Self::Responded),
            Self::Responded | Self::Errored => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("action {action} failed: {source}")]
    ActionExecutionFailed {
        action: String,
        #[source]
        source: ActionError,
    },

    #[error(transparent)]
    SessionStoreExhausted(#[from] StoreFull),
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Classifier(e) => e.kind(),
            Self::UnknownAction(_) => "UnknownAction",
            Self::ActionExecutionFailed { .. } => "ActionExecutionFailed",
            Self::SessionStoreExhausted(_) => "SessionStoreExhausted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub allowed_actions: Vec<String>,
    pub system_instruction: String,
    /// Hold the session's turn lock for the whole request.
    pub serialize_turns: bool,
}

impl DispatchConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            allowed_actions: settings.actions.allowed.clone(),
            system_instruction: settings
                .prompts
                .render_system_instruction(&settings.actions.allowed),
            serialize_turns: settings.sessions.serialize_turns,
        }
    }
}

/// Runs one classification request end to end.
pub struct DispatchService {
    store: Arc<SessionStore>,
    classifier: Arc<dyn Classifier>,
    runner: Arc<dyn ActionRunner>,
    config: DispatchConfig,
}

impl DispatchService {
    pub fn new(
        store: Arc<SessionStore>,
        classifier: Arc<dyn Classifier>,
        runner: Arc<dyn ActionRunner>,
        config: DispatchConfig,
    ) -> Self {
        info!(
            "Dispatch service ready: {} allowed actions, serialize_turns={}",
            config.allowed_actions.len(),
            config.serialize_turns
        );
        Self {
            store,
            classifier,
            runner,
            config,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn is_allowed(&self, action: &str) -> bool {
        self.config.allowed_actions.iter().any(|a| a == action)
    }

    pub async fn dispatch(
        &self,
        request: &ClassifyRequest,
        cancel: &CancellationToken,
    ) -> Result<ClassifyResponse, DispatchError> {
        let start_time = Instant::now();
        let mut stage = DispatchStage::Received;

        let result = self.run(request, cancel, &mut stage).await;

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => info!(
                "Dispatch completed: session={}, action={}, status={}, {}ms",
                request.session_id, response.action, response.status, elapsed_ms
            ),
            Err(e) => {
                let failed_at = stage;
                advance(&mut stage, DispatchStage::Errored, &request.session_id);
                warn!(
                    session_id = %request.session_id,
                    failed_at = ?failed_at,
                    kind = e.kind(),
                    "Dispatch failed after {}ms: {}",
                    elapsed_ms,
                    e
                );
            }
        }
        result
    }

    async fn run(
        &self,
        request: &ClassifyRequest,
        cancel: &CancellationToken,
        stage: &mut DispatchStage,
    ) -> Result<ClassifyResponse, DispatchError> {
        let session_id = request.session_id.as_str();

        let ctx = self.store.try_get_context(session_id)?;
        advance(stage, DispatchStage::ContextLoaded, session_id);

        let result = self.run_turn(&ctx, request, cancel, stage).await;

        // The user turn is in the history even when the turn failed.
        self.store.save_context(&ctx);
        if result.is_ok() {
            advance(stage, DispatchStage::Responded, session_id);
        }
        result
    }

    async fn run_turn(
        &self,
        ctx: &Arc<ConversationContext>,
        request: &ClassifyRequest,
        cancel: &CancellationToken,
        stage: &mut DispatchStage,
    ) -> Result<ClassifyResponse, DispatchError> {
        let session_id = request.session_id.as_str();

        let _turn = if self.config.serialize_turns {
            Some(ctx.turn_lock().lock().await)
        } else {
            None
        };

        if let Some(properties) = &request.properties {
            for (key, value) in properties {
                ctx.set_property(key.clone(), value.clone());
            }
        }
        if ctx.ensure_system_message(&self.config.system_instruction) {
            debug!("Seeded system instruction for session {}", session_id);
        }
        ctx.add_message(Role::User, &request.text);

        // Snapshot; no context lock is held across the network call.
        let transcript = ctx.messages();
        let classification = self.classifier.classify(&transcript, cancel).await?;
        advance(stage, DispatchStage::Classified, session_id);

        let action = classification.action;
        if !self.is_allowed(&action) {
            return Err(DispatchError::UnknownAction(action));
        }
        advance(stage, DispatchStage::ActionValidated, session_id);

        let output = self
            .runner
            .run_action(&action)
            .await
            .map_err(|source| DispatchError::ActionExecutionFailed {
                action: action.clone(),
                source,
            })?;
        advance(stage, DispatchStage::ActionExecuted, session_id);

        ctx.set_property("last_action", action.as_str());
        ctx.set_property("last_status", output.status.as_str());

        Ok(ClassifyResponse {
            action,
            keywords: classification.keywords,
            message: output.message,
            status: output.status,
        })
    }
}

fn advance(stage: &mut DispatchStage, next: DispatchStage, session_id: &str) {
    debug_assert!(
        stage.can_advance_to(next),
        "illegal dispatch transition {:?} -> {:?}",
        stage,
        next
    );
    debug!(session_id = %session_id, from = ?*stage, to = ?next, "Dispatch stage");
    *stage = next;
}
