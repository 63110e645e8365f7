//! End-to-end pipeline tests

use std::sync::Arc;

use async_trait::async_trait;
use headroom_context::{
    ArtifactKey, ArtifactStore, ContextConfig, ContextManager, MemoryArtifactStore,
    TiktokenCounter, TokenCounter, ToolOutputCompactor,
};
use headroom_core::{CompressionOracle, Conversation, Message, OracleError, HISTORY_SUMMARY_MARKER};

struct FixedOracle(&'static str);

#[async_trait]
impl CompressionOracle for FixedOracle {
    async fn complete(&self, _prompt: &Conversation) -> Result<String, OracleError> {
        Ok(self.0.to_string())
    }
}

fn real_counter() -> Arc<TiktokenCounter> {
    Arc::new(TiktokenCounter::for_model("gpt-4").expect("tokenizer construction"))
}

fn alternating_conversation(n: usize) -> Conversation {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!("user turn {i}: please look into the next item"))
            } else {
                Message::assistant(format!("assistant turn {i}: done, moving on to the next"))
            }
        })
        .collect()
}

#[test]
fn counting_is_idempotent_and_empty_costs_the_overhead() {
    let counter = real_counter();

    let empty = Conversation::new();
    assert_eq!(counter.count_conversation(&empty), 10);

    let conv = alternating_conversation(6);
    let first = counter.count_conversation(&conv);
    for _ in 0..3 {
        assert_eq!(counter.count_conversation(&conv), first);
    }
}

#[tokio::test]
async fn forty_message_conversation_is_trimmed_to_budget() {
    let counter = real_counter();
    let managed = ContextManager::new(
        counter.clone(),
        Arc::new(MemoryArtifactStore::new()),
        ContextConfig::default(),
    )
    .manage_context(alternating_conversation(40), 100)
    .await
    .unwrap();

    assert!(managed.final_tokens <= managed.original_tokens);
    assert!(managed.final_tokens <= 100);
    assert_eq!(managed.steps.len(), 4);
    let trim = &managed.steps[3];
    assert!(trim.applied);
    assert!(managed
        .steps_applied()
        .iter()
        .all(|s| s.tokens_after <= s.tokens_before));
}

#[tokio::test]
async fn large_json_tool_output_round_trips_through_the_artifact_store() {
    let store = Arc::new(MemoryArtifactStore::new());
    let compactor = ToolOutputCompactor::new(store.clone());

    let rows: Vec<String> = (0..120)
        .map(|i| format!(r#"{{"row":{i},"value":"some recorded measurement {i}"}}"#))
        .collect();
    let mut payload = format!("[{}]", rows.join(","));
    while payload.len() < 10_000 {
        payload = format!("[{payload},{payload}]");
    }

    let out = compactor
        .compact(vec![Message::tool(payload.clone(), "call_reports")])
        .await;

    assert!(out[0].content.contains("EXTERNALIZED"));
    assert_eq!(out[0].tool_call_id.as_deref(), Some("call_reports"));

    let key = ArtifactKey::for_content(&payload);
    assert!(store.exists(&key).await);
    assert_eq!(store.retrieve(&key).await.unwrap(), Some(payload));
}

#[tokio::test]
async fn single_message_run_reports_four_unapplied_steps() {
    let managed = ContextManager::new(
        real_counter(),
        Arc::new(MemoryArtifactStore::new()),
        ContextConfig::default(),
    )
    .manage_context(vec![Message::user("Hello")].into(), 1_000_000)
    .await
    .unwrap();

    assert_eq!(managed.steps.len(), 4);
    assert!(managed.steps.iter().all(|s| !s.applied));
    assert_eq!(managed.original_tokens, managed.final_tokens);
}

#[tokio::test]
async fn pinned_digest_survives_a_full_over_budget_run() {
    let counter = real_counter();
    let mut conv = Conversation::new();
    conv.push(Message::system(format!(
        "{HISTORY_SUMMARY_MARKER} {}",
        "settled decisions from earlier in the session. ".repeat(40)
    )));
    for msg in alternating_conversation(30).into_messages() {
        conv.push(msg);
    }

    let managed = ContextManager::new(
        counter,
        Arc::new(MemoryArtifactStore::new()),
        ContextConfig::default().with_summary_token_target(64),
    )
    .with_oracle(Arc::new(FixedOracle("the settled decisions, condensed")))
    .manage_context(conv, 150)
    .await
    .unwrap();

    // The digest survives in first position, squeezed but pinned.
    let first = &managed.conversation.messages()[0];
    assert!(first.content.starts_with(HISTORY_SUMMARY_MARKER));
    assert!(managed.final_tokens <= 150);
}

#[tokio::test]
async fn rerunning_a_managed_conversation_is_a_noop() {
    let counter = real_counter();
    let store = Arc::new(MemoryArtifactStore::new());
    let config = ContextConfig::default();

    let first = ContextManager::new(counter.clone(), store.clone(), config.clone())
        .manage_context(alternating_conversation(40), 120)
        .await
        .unwrap();

    let second = ContextManager::new(counter, store, config)
        .manage_context(first.conversation.clone(), 120)
        .await
        .unwrap();

    assert!(second.steps_applied().is_empty());
    assert_eq!(second.conversation, first.conversation);
    assert_eq!(second.original_tokens, second.final_tokens);
}
