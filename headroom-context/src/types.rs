//! Configuration and report types for the pipeline

use serde::{Deserialize, Serialize};

use headroom_core::Conversation;

use crate::error::ContextError;

/// The four pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Tool-output compaction and externalization
    ToolDeterministicCompaction,
    /// Deterministic rule-based history compression
    HistoryCompression,
    /// Model-assisted digest squeeze
    LlmHistorySqueeze,
    /// Hard-budget trimming
    FinalTokenTrim,
}

impl PipelineStage {
    /// All stages, in the fixed order they run
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::ToolDeterministicCompaction,
        PipelineStage::HistoryCompression,
        PipelineStage::LlmHistorySqueeze,
        PipelineStage::FinalTokenTrim,
    ];

    /// Stage name for reports and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolDeterministicCompaction => "tool_deterministic_compaction",
            Self::HistoryCompression => "history_compression",
            Self::LlmHistorySqueeze => "llm_history_squeeze",
            Self::FinalTokenTrim => "final_token_trim",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable pipeline configuration
///
/// Build with [`ContextConfig::default`] and the `with_` setters; the
/// headroom setter validates its range at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    headroom_percent: f32,
    /// Maximum semantic blocks retained by legacy summarization. Carried
    /// through for compatibility; the pipeline does not read it.
    pub max_semantic_blocks: usize,
    /// Legacy rolling-summary flag, carried through for compatibility
    pub enable_rolling_summary: bool,
    /// Gates stages 1 and 2
    pub enable_deterministic_compression: bool,
    /// Gates stage 3
    pub enable_llm_compression: bool,
    /// Token target for digest messages, the stage-3 cap
    pub summary_token_target: usize,
    /// Gates the subjective rule set inside stage 2
    pub enable_subjective_edits: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            headroom_percent: 0.1,
            max_semantic_blocks: 8,
            enable_rolling_summary: true,
            enable_deterministic_compression: true,
            enable_llm_compression: true,
            summary_token_target: 512,
            enable_subjective_edits: true,
        }
    }
}

impl ContextConfig {
    /// Set the headroom fraction reserved as a safety margin.
    ///
    /// Fails unless `0 <= headroom < 1`.
    pub fn with_headroom_percent(mut self, headroom_percent: f32) -> Result<Self, ContextError> {
        if !(0.0..1.0).contains(&headroom_percent) {
            return Err(ContextError::Validation(format!(
                "headroom percent must be in [0, 1), got {headroom_percent}"
            )));
        }
        self.headroom_percent = headroom_percent;
        Ok(self)
    }

    /// Enable or disable stages 1 and 2
    pub fn with_deterministic_compression(mut self, enabled: bool) -> Self {
        self.enable_deterministic_compression = enabled;
        self
    }

    /// Enable or disable stage 3
    pub fn with_llm_compression(mut self, enabled: bool) -> Self {
        self.enable_llm_compression = enabled;
        self
    }

    /// Enable or disable the subjective rule set inside stage 2
    pub fn with_subjective_edits(mut self, enabled: bool) -> Self {
        self.enable_subjective_edits = enabled;
        self
    }

    /// Set the token target for digest messages (the stage-3 cap)
    pub fn with_summary_token_target(mut self, target: usize) -> Self {
        self.summary_token_target = target;
        self
    }

    /// The validated headroom fraction
    pub fn headroom_percent(&self) -> f32 {
        self.headroom_percent
    }
}

/// Record of one pipeline stage's effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStep {
    /// Which stage this record describes
    pub stage: PipelineStage,
    /// Conversation snapshot after the stage
    pub conversation: Conversation,
    /// Token count before the stage
    pub tokens_before: usize,
    /// Token count after the stage
    pub tokens_after: usize,
    /// Whether the stage actually changed the conversation
    pub applied: bool,
}

impl ContextStep {
    /// Tokens saved by this stage (never negative)
    pub fn tokens_saved(&self) -> usize {
        self.tokens_before.saturating_sub(self.tokens_after)
    }

    /// Ratio of tokens after to tokens before (1.0 for a no-op)
    pub fn compression_ratio(&self) -> f64 {
        if self.tokens_before == 0 {
            1.0
        } else {
            self.tokens_after as f64 / self.tokens_before as f64
        }
    }
}

/// Final output of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedConversation {
    /// The resulting conversation
    pub conversation: Conversation,
    /// Exactly four step records, one per stage, skipped stages included
    pub steps: Vec<ContextStep>,
    /// Token count before the run
    pub original_tokens: usize,
    /// Token count after the run
    pub final_tokens: usize,
    /// Human-readable description of what the run did
    pub summary: String,
}

impl ManagedConversation {
    /// Total tokens saved across the run
    pub fn tokens_saved(&self) -> usize {
        self.original_tokens.saturating_sub(self.final_tokens)
    }

    /// Overall compression ratio (1.0 when nothing changed)
    pub fn compression_ratio(&self) -> f64 {
        if self.original_tokens == 0 {
            1.0
        } else {
            self.final_tokens as f64 / self.original_tokens as f64
        }
    }

    /// The subsequence of steps that actually changed the conversation
    pub fn steps_applied(&self) -> Vec<&ContextStep> {
        self.steps.iter().filter(|s| s.applied).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headroom_is_validated_at_construction() {
        assert!(ContextConfig::default().with_headroom_percent(0.0).is_ok());
        assert!(ContextConfig::default().with_headroom_percent(0.25).is_ok());
        assert!(ContextConfig::default().with_headroom_percent(1.0).is_err());
        assert!(ContextConfig::default().with_headroom_percent(-0.1).is_err());
    }

    #[test]
    fn step_derived_quantities() {
        let step = ContextStep {
            stage: PipelineStage::HistoryCompression,
            conversation: Conversation::new(),
            tokens_before: 200,
            tokens_after: 50,
            applied: true,
        };
        assert_eq!(step.tokens_saved(), 200 - 50);
        assert!((step.compression_ratio() - 0.25).abs() < f64::EPSILON);

        let noop = ContextStep {
            stage: PipelineStage::FinalTokenTrim,
            conversation: Conversation::new(),
            tokens_before: 0,
            tokens_after: 0,
            applied: false,
        };
        assert_eq!(noop.tokens_saved(), 0);
        assert!((noop.compression_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stage_order_is_fixed() {
        let names: Vec<&str> = PipelineStage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "tool_deterministic_compaction",
                "history_compression",
                "llm_history_squeeze",
                "final_token_trim",
            ]
        );
    }
}
