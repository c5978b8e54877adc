//! PetroRAG Context Engine
//!
//! The retrieval orchestration control loop and its components:
//! - Priority-ordered query router with built-in strategies
//! - Relevance grader with deterministic checks before the scoring model
//! - Question rewriter
//! - Tool execution and grounded answer generation
//! - The orchestrator tying them together

pub mod answer;
pub mod grader;
pub mod orchestrator;
pub mod rewriter;
pub mod router;
pub mod tools;

pub use answer::{AnswerGenerator, LlmAnswerGenerator};
pub use grader::{GradeShortcut, GradeVerdict, Grader, GraderConfig, Verdict};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Outcome, OutcomeStatus, Services};
pub use rewriter::Rewriter;
pub use router::{Router, RouterConfig, RoutingDecision, RoutingStrategy};
pub use tools::{HttpToolExecutor, StaticToolExecutor, ToolExecutor};
