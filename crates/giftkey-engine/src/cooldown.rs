use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;

/// Last successful execution time per gift.
///
/// Only executions are recorded; a suppressed or paused gift leaves the ledger
/// untouched.
#[derive(Clone, Default)]
pub struct CooldownLedger {
    /// Last execution per gift.
    last: Arc<Mutex<HashMap<String, Instant>>>,
}

impl CooldownLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `gift` may fire again, or `None` if it may fire now.
    pub fn remaining(&self, gift: &str, cooldown: Duration) -> Option<Duration> {
        if cooldown.is_zero() {
            return None;
        }
        let last = *self.last.lock().get(gift)?;
        let elapsed = Instant::now().saturating_duration_since(last);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    /// Record an execution of `gift` at the current instant.
    pub fn record(&self, gift: &str) {
        self.last.lock().insert(gift.to_string(), Instant::now());
    }

    /// Number of gifts with a recorded execution.
    pub fn len(&self) -> usize {
        self.last.lock().len()
    }

    /// True when nothing has fired yet.
    pub fn is_empty(&self) -> bool {
        self.last.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn blocks_until_cooldown_elapses() {
        let ledger = CooldownLedger::new();
        let cd = Duration::from_millis(1000);
        assert_eq!(ledger.remaining("rose", cd), None);
        ledger.record("rose");
        advance(Duration::from_millis(500)).await;
        assert_eq!(ledger.remaining("rose", cd), Some(Duration::from_millis(500)));
        assert_eq!(ledger.remaining("lion", cd), None);
        advance(Duration::from_millis(500)).await;
        assert_eq!(ledger.remaining("rose", cd), None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cooldown_never_blocks() {
        let ledger = CooldownLedger::new();
        ledger.record("rose");
        assert_eq!(ledger.remaining("rose", Duration::ZERO), None);
        assert_eq!(ledger.len(), 1);
    }
}
