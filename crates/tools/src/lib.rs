//! Tool Registry & Runner (C5): the catalog the planner sees, the
//! invocation contract concrete tools implement, and the runner that
//! applies retry/timeout policy around a single call (§4.5).

pub mod events;
pub mod executor;
pub mod registry;
pub mod runner;

pub use events::{tool_event_channel, ToolEvent, ToolEventReceiver, ToolEventSender};
pub use executor::{Emit, RuntimeCtx, ToolExecutor, ToolOutcome, ToolProgress, ToolProgressType};
pub use registry::ToolRegistry;
pub use runner::ToolRunner;
