//! Session-scoped conversation memory
//!
//! - `SessionStore`: session id → memory, with idle expiry and capacity eviction
//! - `SummarizingPolicy`: folds the oldest turns into a running summary once the
//!   estimated size of the recent turns exceeds the token budget

mod policy;
mod store;
mod token_counter;
pub mod types;

pub use policy::{RecordOutcome, Summarizer, SummarizingPolicy};
pub use store::{InMemorySessionStore, SessionHandle, SessionStore};
pub use token_counter::TokenCounter;
pub use types::{Memory, MemoryMetadata, MemorySnapshot, Turn, TurnRole};

#[cfg(test)]
pub use policy::MockSummarizer;
