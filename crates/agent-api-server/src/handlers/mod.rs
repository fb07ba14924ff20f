pub mod agent;
pub mod documents;
pub mod health;
pub mod rag;
