//! The conversation pipeline engine.
//!
//! A [`ChatFlow`] runs its stages strictly in registration order over one
//! [`ConversationContext`]. Each stage returns its output and the engine
//! records it under that stage's derived key, so a stage can only ever
//! produce its own entry and can only see entries of stages before it.
//! The first failing stage aborts the run.

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::context::{flow_key, ConversationContext, FlowValue};
use crate::error::ChatError;

/// One pipeline step.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Display name; the flow data key is derived from it.
    fn name(&self) -> &str;

    /// Enrich `context`, appending messages as needed.
    ///
    /// Returns the value to record under this stage's key, or `None` when
    /// the stage had nothing to contribute.
    async fn process(&self, context: &mut ConversationContext)
        -> Result<Option<FlowValue>, ChatError>;
}

struct RegisteredStage {
    key: String,
    stage: Box<dyn Stage>,
}

/// Ordered list of stages.
#[derive(Default)]
pub struct ChatFlow {
    stages: Vec<RegisteredStage>,
}

impl ChatFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage. Fails if another stage already derives the same key.
    pub fn register<S: Stage + 'static>(&mut self, stage: S) -> Result<(), ChatError> {
        let key = flow_key(stage.name());
        if self.stages.iter().any(|s| s.key == key) {
            return Err(ChatError::DuplicateStageKey(key));
        }
        debug!(stage = stage.name(), %key, "Registered pipeline stage");
        self.stages.push(RegisteredStage {
            key,
            stage: Box::new(stage),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Flow data keys in execution order.
    pub fn stage_keys(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.key.as_str())
    }

    /// Run every stage over `context`.
    ///
    /// Flow data left from a previous run is cleared first. On failure the
    /// error names the stage that raised it.
    pub async fn execute(&self, context: &mut ConversationContext) -> Result<(), ChatError> {
        context.clear_flow();
        for registered in &self.stages {
            let name = registered.stage.name();
            debug!(stage = name, "Running pipeline stage");
            match registered.stage.process(context).await {
                Ok(Some(value)) => context.record(&registered.key, value),
                Ok(None) => debug!(stage = name, "Stage recorded no flow data"),
                Err(e) => {
                    error!(stage = name, error = %e, "Pipeline stage failed");
                    return Err(ChatError::Stage {
                        stage: name.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }
        info!(stages = self.stages.len(), "Pipeline completed");
        Ok(())
    }
}

impl std::fmt::Debug for ChatFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stage_keys()).finish()
    }
}
