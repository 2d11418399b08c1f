//! The Planner Driver (C6): the invocation contract for a streaming
//! model collaborator, plus the validation logic that turns its raw
//! output into a [`aa_domain::entities::PlanDecision`].

pub mod decision;
pub mod driver;
pub mod traits;

pub use decision::{parse_decision, synthesize_invalid_terminal};
pub use driver::{accumulate_stream, build_request, drive_decision, AccumulatedTurn};
pub use traits::{ChatRequest, ChatResponse, LlmStream};
