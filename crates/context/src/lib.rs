//! Context assembly: token estimation, renderable section types, the
//! builders that populate them from storage, and the Hub that caches and
//! composes them into one turn's prompt context (§4.1-4.4).

pub mod builders;
pub mod hub;
pub mod sections;
pub mod token;
pub mod truncation;

pub use hub::{ContextHub, ContextView, TurnInputs};
pub use sections::Section;
