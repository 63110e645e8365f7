//! The four-stage pipeline orchestrator

use std::sync::Arc;
use tracing::debug;

use headroom_core::{CompressionOracle, Conversation};

use crate::artifact::ArtifactStore;
use crate::compactor::ToolOutputCompactor;
use crate::counter::TokenCounter;
use crate::digest::squeeze_digest;
use crate::error::ContextError;
use crate::rules::DeterministicCompressor;
use crate::trimmer::trim_to_budget;
use crate::types::{ContextConfig, ContextStep, ManagedConversation, PipelineStage};

/// Orchestrates the four budgeting stages over a conversation.
///
/// Stages run unconditionally in fixed order and every run produces exactly
/// four [`ContextStep`] records. A stage reports `applied = false` when its
/// config flag is off, when no oracle was supplied (stage 3), or when the
/// conversation is already within budget before the stage begins; in the
/// last case the remaining stages are recorded as no-ops rather than
/// omitted, so the report shape stays uniform.
pub struct ContextManager {
    counter: Arc<dyn TokenCounter>,
    config: ContextConfig,
    compactor: ToolOutputCompactor,
    compressor: DeterministicCompressor,
    oracle: Option<Arc<dyn CompressionOracle>>,
}

impl ContextManager {
    /// Create a manager over a counter, a long-lived artifact store, and a
    /// validated configuration
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        artifacts: Arc<dyn ArtifactStore>,
        config: ContextConfig,
    ) -> Self {
        Self {
            counter,
            config,
            compactor: ToolOutputCompactor::new(Arc::clone(&artifacts)),
            compressor: DeterministicCompressor::new(artifacts),
            oracle: None,
        }
    }

    /// Supply the compression oracle used by the digest-squeeze stage.
    ///
    /// Without an oracle, stage 3 is always recorded as a no-op.
    pub fn with_oracle(mut self, oracle: Arc<dyn CompressionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Run the pipeline so the conversation fits `budget` tokens.
    ///
    /// Fails with a validation error for an empty conversation or a zero
    /// budget; all other failures (oracle, compaction) recover locally and
    /// never fail the run. Falling short of the budget is reported through
    /// the token counts, not as an error.
    pub async fn manage_context(
        &self,
        conversation: Conversation,
        budget: usize,
    ) -> Result<ManagedConversation, ContextError> {
        if conversation.is_empty() {
            return Err(ContextError::Validation(
                "cannot manage an empty conversation".to_string(),
            ));
        }
        if budget == 0 {
            return Err(ContextError::Validation(
                "budget must be positive".to_string(),
            ));
        }

        let original_tokens = self.counter.count_conversation(&conversation);
        let mut conv = conversation;
        let mut steps = Vec::with_capacity(PipelineStage::ALL.len());

        for stage in PipelineStage::ALL {
            let tokens_before = self.counter.count_conversation(&conv);
            let mut next = conv.clone();
            let mut ran = false;

            if tokens_before > budget {
                match stage {
                    PipelineStage::ToolDeterministicCompaction
                        if self.config.enable_deterministic_compression =>
                    {
                        next = self.compactor.compact(conv.clone().into_messages()).await.into();
                        ran = true;
                    }
                    PipelineStage::HistoryCompression
                        if self.config.enable_deterministic_compression =>
                    {
                        next = self
                            .compressor
                            .compress(
                                conv.clone().into_messages(),
                                &*self.counter,
                                budget,
                                self.config.enable_subjective_edits,
                            )
                            .await
                            .into();
                        ran = true;
                    }
                    PipelineStage::LlmHistorySqueeze if self.config.enable_llm_compression => {
                        if let Some(oracle) = &self.oracle {
                            next = squeeze_digest(
                                conv.clone().into_messages(),
                                &*self.counter,
                                &**oracle,
                                self.config.summary_token_target,
                            )
                            .await
                            .into();
                            ran = true;
                        }
                    }
                    PipelineStage::FinalTokenTrim => {
                        let outcome = trim_to_budget(
                            conv.clone(),
                            &*self.counter,
                            budget,
                            self.config.headroom_percent(),
                        )?;
                        next = outcome.conversation;
                        ran = true;
                    }
                    _ => {}
                }
            }

            let applied = ran && next != conv;
            let tokens_after = self.counter.count_conversation(&next);
            debug!(
                "Stage {}: {} -> {} tokens (applied: {})",
                stage, tokens_before, tokens_after, applied
            );
            steps.push(ContextStep {
                stage,
                conversation: next.clone(),
                tokens_before,
                tokens_after,
                applied,
            });
            conv = next;
        }

        let final_tokens = self.counter.count_conversation(&conv);
        let applied_count = steps.iter().filter(|s| s.applied).count();
        let summary = format!(
            "Managed conversation: {original_tokens} -> {final_tokens} tokens \
             ({} saved, {applied_count} of {} stages applied)",
            original_tokens.saturating_sub(final_tokens),
            PipelineStage::ALL.len(),
        );

        Ok(ManagedConversation {
            conversation: conv,
            steps,
            original_tokens,
            final_tokens,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use async_trait::async_trait;
    use headroom_core::{Message, OracleError, HISTORY_SUMMARY_MARKER};

    struct MockCounter;

    impl TokenCounter for MockCounter {
        fn count_text(&self, text: &str) -> usize {
            text.len() / 4
        }
    }

    struct ShorteningOracle;

    #[async_trait]
    impl CompressionOracle for ShorteningOracle {
        async fn complete(&self, _prompt: &Conversation) -> Result<String, OracleError> {
            Ok("condensed".to_string())
        }
    }

    fn manager(config: ContextConfig) -> ContextManager {
        ContextManager::new(
            Arc::new(MockCounter),
            Arc::new(MemoryArtifactStore::new()),
            config,
        )
    }

    #[tokio::test]
    async fn empty_conversation_is_a_validation_error() {
        let result = manager(ContextConfig::default())
            .manage_context(Conversation::new(), 1000)
            .await;
        assert!(matches!(result, Err(ContextError::Validation(_))));
    }

    #[tokio::test]
    async fn zero_budget_is_a_validation_error() {
        let conv: Conversation = vec![Message::user("Hello")].into();
        let result = manager(ContextConfig::default()).manage_context(conv, 0).await;
        assert!(matches!(result, Err(ContextError::Validation(_))));
    }

    #[tokio::test]
    async fn within_budget_run_records_four_unapplied_steps() {
        let conv: Conversation = vec![Message::user("Hello")].into();
        let managed = manager(ContextConfig::default())
            .manage_context(conv.clone(), 100_000)
            .await
            .unwrap();

        assert_eq!(managed.steps.len(), 4);
        assert!(managed.steps.iter().all(|s| !s.applied));
        assert!(managed.steps_applied().is_empty());
        assert_eq!(managed.original_tokens, managed.final_tokens);
        assert_eq!(managed.conversation, conv);
    }

    #[tokio::test]
    async fn final_tokens_never_exceed_original() {
        let conv: Conversation = (0..40)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i} with enough text to weigh something"))
                } else {
                    Message::assistant(format!("answer {i} with enough text to weigh something"))
                }
            })
            .collect();

        let managed = manager(ContextConfig::default())
            .manage_context(conv, 100)
            .await
            .unwrap();

        assert!(managed.final_tokens <= managed.original_tokens);
        assert!(managed.final_tokens <= 100);
        let trim_step = &managed.steps[3];
        assert_eq!(trim_step.stage, PipelineStage::FinalTokenTrim);
        assert!(trim_step.applied);
        assert!(managed.summary.contains("stages applied"));
    }

    #[tokio::test]
    async fn oversized_tool_output_is_compacted_in_stage_one() {
        let store = Arc::new(MemoryArtifactStore::new());
        let mgr = ContextManager::new(
            Arc::new(MockCounter),
            store.clone(),
            ContextConfig::default(),
        );
        let conv: Conversation = vec![
            Message::user("run the query"),
            Message::tool("r".repeat(10_000), "call_1"),
        ]
        .into();

        let managed = mgr.manage_context(conv, 500).await.unwrap();

        let step = &managed.steps[0];
        assert_eq!(step.stage, PipelineStage::ToolDeterministicCompaction);
        assert!(step.applied);
        assert!(step.tokens_after < step.tokens_before);
        assert!(!store.is_empty().await);
    }

    #[tokio::test]
    async fn digest_squeeze_runs_only_with_an_oracle() {
        let digest = Message::system(format!(
            "{HISTORY_SUMMARY_MARKER} {}",
            "pile of historical detail. ".repeat(200)
        ));
        let conv: Conversation = vec![digest, Message::user("latest")].into();

        // Without an oracle the stage is a recorded no-op.
        let managed = manager(ContextConfig::default())
            .manage_context(conv.clone(), 200)
            .await
            .unwrap();
        assert!(!managed.steps[2].applied);

        // With an oracle the digest shrinks in place.
        let managed = manager(ContextConfig::default())
            .with_oracle(Arc::new(ShorteningOracle))
            .manage_context(conv, 200)
            .await
            .unwrap();
        let squeeze = &managed.steps[2];
        assert_eq!(squeeze.stage, PipelineStage::LlmHistorySqueeze);
        assert!(squeeze.applied);
        assert!(managed.conversation.messages()[0]
            .content
            .starts_with(HISTORY_SUMMARY_MARKER));
    }

    #[tokio::test]
    async fn disabled_stages_are_recorded_as_noops() {
        let config = ContextConfig::default()
            .with_deterministic_compression(false)
            .with_llm_compression(false);
        let conv: Conversation = (0..30)
            .map(|i| Message::user(format!("message {i} carrying some amount of text")))
            .collect();

        let managed = manager(config).manage_context(conv, 100).await.unwrap();

        assert_eq!(managed.steps.len(), 4);
        assert!(!managed.steps[0].applied);
        assert!(!managed.steps[1].applied);
        assert!(!managed.steps[2].applied);
        // The hard backstop still runs.
        assert!(managed.steps[3].applied);
        assert!(managed.final_tokens <= 100);
    }
}
