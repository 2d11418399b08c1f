//! Opaque stable identifiers. All ids are UUIDv4 strings; newtypes keep
//! entity ids from being swapped by accident at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ReportId);
id_type!(CompletionId);
id_type!(AgentExecutionId);
id_type!(CompletionBlockId);
id_type!(PlanDecisionId);
id_type!(ToolExecutionId);
id_type!(ContextSnapshotId);
