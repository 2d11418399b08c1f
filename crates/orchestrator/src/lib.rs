//! The Agent Loop (C7), Event Stream (C8), Block Persistence (C9), and
//! Background Tasks (C10): the per-turn scheduler that ties the Context
//! Hub, Planner Driver, and Tool Runner into one cancellable execution
//! (§4.7-§4.10). Transport (HTTP/SSE), auth, and concrete storage/LLM
//! backends are out of scope here — this crate only consumes those as
//! collaborator traits.

pub mod runtime;
pub mod state;

pub use runtime::events::{Event, EventSink, EventSource};
pub use runtime::turn::{run_turn, TurnInput};
pub use state::Engine;
