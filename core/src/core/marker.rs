use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Unique token embedded in exactly one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mints `__WS__<session><seq>__` markers.
///
/// The random session prefix separates concurrent scanner processes, the
/// sequence number guarantees uniqueness within one factory.
pub struct MarkerFactory {
    session: u32,
    seq: AtomicU64,
}

impl MarkerFactory {
    pub fn new() -> Self {
        Self {
            session: rand::rng().random(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> Marker {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        Marker(format!("__WS__{:08x}{:06x}__", self.session, n))
    }

    pub fn issued(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

impl Default for MarkerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_marker_shape() {
        let factory = MarkerFactory::new();
        let m = factory.next();
        assert!(m.as_str().starts_with("__WS__"));
        assert!(m.as_str().ends_with("__"));
        assert!(m.as_str()[6..m.as_str().len() - 2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_markers_unique_across_threads() {
        let factory = Arc::new(MarkerFactory::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let f = Arc::clone(&factory);
                std::thread::spawn(move || (0..500).map(|_| f.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for m in h.join().unwrap() {
                assert!(seen.insert(m));
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(factory.issued(), 2000);
    }
}
