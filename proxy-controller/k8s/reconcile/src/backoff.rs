use crate::ResourceId;
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::time::Duration;

/// Tracks consecutive reconciliation failures per ProxyDef and computes
/// exponentially growing retry delays.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ResourceId, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn failed(&self, id: &ResourceId) -> Duration {
        let failures = {
            let mut map = self.failures.lock();
            let n = map.entry(id.clone()).or_default();
            *n = n.saturating_add(1);
            *n
        };
        self.delay(failures)
    }

    pub fn reset(&self, id: &ResourceId) {
        self.failures.lock().remove(id);
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1 << exp).min(self.max)
    }
}
