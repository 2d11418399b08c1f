//! Per-completion cancellation tokens (§5, §9).
//!
//! Every running turn gets a `CancelToken`, polled at each of the loop's
//! suspension points (§5). Calling `cancel()` — from an external stop
//! request or a fatal error path — signals the loop to stop cleanly at
//! its next check, not immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aa_domain::ids::CompletionId;
use parking_lot::Mutex;

/// A cancellation flag shared between the loop task and whoever can
/// request a stop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the cancel token for every currently running completion, so an
/// external "stop this completion" request can reach a token created
/// inside `run_turn` without threading it through the caller.
pub struct CancelMap {
    tokens: Mutex<HashMap<CompletionId, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, completion_id: CompletionId) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(completion_id, token.clone());
        token
    }

    /// Requests a stop for a running completion. Returns `false` if no
    /// turn is currently running for it.
    pub fn cancel(&self, completion_id: CompletionId) -> bool {
        if let Some(token) = self.tokens.lock().get(&completion_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Called once the turn has reached a terminal state.
    pub fn remove(&self, completion_id: CompletionId) {
        self.tokens.lock().remove(&completion_id);
    }

    pub fn is_running(&self, completion_id: CompletionId) -> bool {
        self.tokens.lock().contains_key(&completion_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_map_register_and_cancel() {
        let map = CancelMap::new();
        let completion_id = CompletionId::new();
        let token = map.register(completion_id);
        assert!(!token.is_cancelled());
        assert!(map.is_running(completion_id));

        assert!(map.cancel(completion_id));
        assert!(token.is_cancelled());

        map.remove(completion_id);
        assert!(!map.is_running(completion_id));
        assert!(!map.cancel(completion_id));
    }

    #[test]
    fn cancel_nonexistent_completion_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel(CompletionId::new()));
    }

    #[test]
    fn is_running_false_for_unregistered() {
        let map = CancelMap::new();
        assert!(!map.is_running(CompletionId::new()));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        let completion_id = CompletionId::new();
        map.register(completion_id);
        map.remove(completion_id);
        map.remove(completion_id);
        assert!(!map.is_running(completion_id));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let completion_id = CompletionId::new();
        let old_token = map.register(completion_id);
        let new_token = map.register(completion_id);

        assert!(!old_token.is_cancelled());
        assert!(!new_token.is_cancelled());

        map.cancel(completion_id);
        assert!(new_token.is_cancelled());
    }

    #[test]
    fn cancel_token_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancel_token_default() {
        let token = CancelToken::default();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_map_default_trait() {
        let map = CancelMap::default();
        assert!(!map.is_running(CompletionId::new()));
    }
}
