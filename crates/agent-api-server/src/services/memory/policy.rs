use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use super::token_counter::TokenCounter;
use super::types::{Memory, Turn, TurnRole};

/// Model-backed summarization oracle.
///
/// Receives the current running summary (if any) and the turns being evicted, in
/// chronological order, and returns the replacement summary.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, existing: Option<String>, turns: Vec<Turn>) -> Result<String>;
}

/// Result of recording turns into a memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Turns folded into the running summary by this call.
    pub summarized_turns: usize,
    /// The oracle failed; the turns stayed verbatim and folding is retried next time.
    pub deferred: bool,
}

/// Keeps a [`Memory`] within its token budget by folding the oldest turns into the
/// running summary.
pub struct SummarizingPolicy {
    counter: TokenCounter,
    summarizer: Arc<dyn Summarizer>,
}

impl SummarizingPolicy {
    pub fn new(tokens_per_turn: usize, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            counter: TokenCounter::new(tokens_per_turn),
            summarizer,
        }
    }

    pub fn counter(&self) -> TokenCounter {
        self.counter
    }

    pub async fn record_turn(
        &self,
        memory: &mut Memory,
        role: TurnRole,
        text: impl Into<String>,
    ) -> RecordOutcome {
        memory.push_turn(Turn::new(role, text));
        self.enforce_budget(memory).await
    }

    /// Record a completed user/assistant exchange and prune once.
    pub async fn record_exchange(
        &self,
        memory: &mut Memory,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
    ) -> RecordOutcome {
        memory.push_turn(Turn::user(user_text));
        memory.push_turn(Turn::assistant(assistant_text));
        self.enforce_budget(memory).await
    }

    async fn enforce_budget(&self, memory: &mut Memory) -> RecordOutcome {
        let budget = memory.token_budget();
        let mut evicted = Vec::new();

        while self.counter.exceeds(memory.turn_count(), budget) {
            match memory.pop_oldest() {
                Some(turn) => evicted.push(turn),
                None => break,
            }
        }

        if evicted.is_empty() {
            return RecordOutcome::default();
        }

        let count = evicted.len();
        debug!(
            "Folding {} turn(s) into summary (estimate {} > budget {})",
            count,
            self.counter.estimate(memory.turn_count() + count),
            budget
        );

        let existing = memory.summary().map(str::to_owned);
        let folded = self
            .summarizer
            .summarize(existing, evicted.clone())
            .await
            .and_then(|summary| {
                if summary.trim().is_empty() {
                    Err(anyhow!("summarizer returned an empty summary"))
                } else {
                    Ok(summary)
                }
            });

        match folded {
            Ok(summary) => {
                memory.set_summary(summary);
                memory.metadata.summarizations += 1;
                RecordOutcome {
                    summarized_turns: count,
                    deferred: false,
                }
            }
            Err(e) => {
                warn!("Summarization failed, keeping {} turn(s) verbatim: {:#}", count, e);
                memory.restore_oldest(evicted);
                memory.metadata.failed_summarizations += 1;
                RecordOutcome {
                    summarized_turns: 0,
                    deferred: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic oracle: the summary is the previous summary plus one line per turn.
    struct LineSummarizer {
        calls: Mutex<Vec<usize>>,
    }

    impl LineSummarizer {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Summarizer for LineSummarizer {
        async fn summarize(&self, existing: Option<String>, turns: Vec<Turn>) -> Result<String> {
            self.calls.lock().unwrap().push(turns.len());
            let mut lines: Vec<String> = existing
                .map(|s| s.lines().map(str::to_owned).collect())
                .unwrap_or_default();
            lines.extend(turns.iter().map(|t| format!("{:?}: {}", t.role(), t.content())));
            Ok(lines.join("\n"))
        }
    }

    fn alternating(i: usize) -> TurnRole {
        if i % 2 == 0 {
            TurnRole::User
        } else {
            TurnRole::Assistant
        }
    }

    #[tokio::test]
    async fn test_budget_never_exceeded() {
        let summarizer = Arc::new(LineSummarizer::new());
        let policy = SummarizingPolicy::new(100, summarizer);
        let mut memory = Memory::new(500);

        for i in 0..23 {
            policy
                .record_turn(&mut memory, alternating(i), format!("turn {}", i))
                .await;
            assert!(policy.counter().estimate(memory.turn_count()) <= memory.token_budget());
        }
        assert_eq!(memory.turn_count(), 5);
        assert_eq!(memory.metadata.total_turns, 23);
    }

    #[tokio::test]
    async fn test_two_turn_budget_scenario() {
        let summarizer = Arc::new(LineSummarizer::new());
        let policy = SummarizingPolicy::new(100, summarizer.clone());
        let mut memory = Memory::new(2 * 100);

        policy.record_turn(&mut memory, TurnRole::User, "T1").await;
        policy.record_turn(&mut memory, TurnRole::Assistant, "T2").await;
        assert!(memory.summary().is_none());

        let outcome = policy.record_turn(&mut memory, TurnRole::User, "T3").await;
        assert_eq!(outcome.summarized_turns, 1);
        assert_eq!(memory.summary(), Some("User: T1"));
        let kept: Vec<&str> = memory.turns().map(Turn::content).collect();
        assert_eq!(kept, vec!["T2", "T3"]);

        policy.record_turn(&mut memory, TurnRole::Assistant, "T4").await;
        policy.record_turn(&mut memory, TurnRole::User, "T5").await;

        let snapshot = memory.snapshot();
        assert_eq!(snapshot.recent_messages.len(), 2);
        assert_eq!(snapshot.recent_messages[0].content(), "T4");
        assert_eq!(snapshot.recent_messages[1].content(), "T5");
        assert!(snapshot.summary.is_some());
        assert_eq!(summarizer.calls(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_incremental_and_single_pass_folds_agree() {
        let a = Turn::user("A");
        let b = Turn::assistant("B");
        let c = Turn::user("C");
        let oracle = LineSummarizer::new();

        let partial = oracle
            .summarize(None, vec![a.clone(), b.clone()])
            .await
            .unwrap();
        let incremental = oracle.summarize(Some(partial), vec![c.clone()]).await.unwrap();
        let single_pass = oracle.summarize(None, vec![a, b, c]).await.unwrap();

        assert_eq!(incremental, single_pass);
    }

    #[tokio::test]
    async fn test_exchange_folds_in_one_call() {
        let summarizer = Arc::new(LineSummarizer::new());
        let policy = SummarizingPolicy::new(100, summarizer.clone());
        let mut memory = Memory::new(200);

        policy.record_exchange(&mut memory, "q1", "a1").await;
        let outcome = policy.record_exchange(&mut memory, "q2", "a2").await;

        assert_eq!(outcome.summarized_turns, 2);
        assert_eq!(summarizer.calls(), vec![2]);
        assert_eq!(memory.summary(), Some("User: q1\nAssistant: a1"));
    }

    #[tokio::test]
    async fn test_oracle_failure_keeps_turns() {
        let mut mock = MockSummarizer::new();
        mock.expect_summarize()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("model unavailable")));
        let policy = SummarizingPolicy::new(100, Arc::new(mock));
        let mut memory = Memory::new(200);

        policy.record_turn(&mut memory, TurnRole::User, "T1").await;
        policy.record_turn(&mut memory, TurnRole::Assistant, "T2").await;
        let outcome = policy.record_turn(&mut memory, TurnRole::User, "T3").await;

        assert!(outcome.deferred);
        assert_eq!(outcome.summarized_turns, 0);
        let kept: Vec<&str> = memory.turns().map(Turn::content).collect();
        assert_eq!(kept, vec!["T1", "T2", "T3"]);
        assert!(memory.summary().is_none());
        assert_eq!(memory.metadata.failed_summarizations, 1);
    }

    #[tokio::test]
    async fn test_blank_summary_keeps_turns_and_previous_summary() {
        let mut mock = MockSummarizer::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_summarize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("User is Ana, likes Rust".to_string()));
        mock.expect_summarize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("   ".to_string()));
        let policy = SummarizingPolicy::new(100, Arc::new(mock));
        let mut memory = Memory::new(200);

        for text in ["T1", "T2", "T3"] {
            policy.record_turn(&mut memory, TurnRole::User, text).await;
        }
        assert_eq!(memory.summary(), Some("User is Ana, likes Rust"));

        let outcome = policy.record_turn(&mut memory, TurnRole::Assistant, "T4").await;

        assert!(outcome.deferred);
        assert_eq!(outcome.summarized_turns, 0);
        assert_eq!(memory.summary(), Some("User is Ana, likes Rust"));
        let kept: Vec<&str> = memory.turns().map(Turn::content).collect();
        assert_eq!(kept, vec!["T2", "T3", "T4"]);
        assert_eq!(memory.metadata.failed_summarizations, 1);
    }

    #[tokio::test]
    async fn test_deferred_turns_fold_on_next_record() {
        let mut mock = MockSummarizer::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_summarize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow::anyhow!("timeout")));
        mock.expect_summarize()
            .withf(|existing, turns| existing.is_none() && turns.len() == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("T1 and T2 happened".to_string()));
        let policy = SummarizingPolicy::new(100, Arc::new(mock));
        let mut memory = Memory::new(200);

        for text in ["T1", "T2", "T3"] {
            policy.record_turn(&mut memory, TurnRole::User, text).await;
        }
        let outcome = policy.record_turn(&mut memory, TurnRole::Assistant, "T4").await;

        assert_eq!(outcome.summarized_turns, 2);
        assert_eq!(memory.summary(), Some("T1 and T2 happened"));
        assert_eq!(memory.turn_count(), 2);
    }
}
