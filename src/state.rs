use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::AppConfig;
use crate::upstream::CompletionInitiator;

/// Shared application state accessible to all handlers.
///
/// Read-only after start-up apart from the request-id counter.
pub struct AppState {
    pub config: AppConfig,
    pub initiator: CompletionInitiator,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, initiator: CompletionInitiator) -> Self {
        Self {
            config,
            initiator,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// A fresh request id, unique within this process.
    #[must_use]
    pub fn next_request_id(&self) -> uuid::Uuid {
        self.request_ids.next_id()
    }
}

/// Seeded counter that yields UUID-shaped ids without a syscall per request.
struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    fn new() -> Self {
        let seed = (u128::from(fastrand::u64(..)) << 64) | u128::from(fastrand::u64(..));
        Self {
            seed,
            counter: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> uuid::Uuid {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }
}
