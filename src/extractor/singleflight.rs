//! Collapses concurrent work for the same key onto one in-flight execution.
//!
//! Two simultaneous requests for the same uncached identifier must not spawn
//! two extractions: the second waits on the first's gate, then re-checks the
//! cache inside its own turn. Gates are removed once no caller holds them.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct SingleFlight {
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            gates: DashMap::new(),
        }
    }

    /// Runs `work` while holding the per-key gate. Callers for the same key
    /// serialize; the closure is expected to consult the shared cache first so
    /// followers observe the leader's result instead of repeating it.
    pub async fn run<T, F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let gate = self
            .gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _held = gate.lock().await;
            work().await
        };

        // Drop the map entry once only the map itself and this handle
        // reference the gate; later arrivals simply create a fresh one.
        self.gates
            .remove_if(key, |_, entry| Arc::strong_count(entry) <= 2);

        result
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let flight = Arc::new(SingleFlight::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("dQw4w9WgXcQ", || async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let flight = Arc::new(SingleFlight::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let flight = flight.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("key-{i:07}xxxx");
                flight
                    .run(&key, || async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn gates_are_cleaned_up() {
        let flight = SingleFlight::new();
        flight.run("dQw4w9WgXcQ", || async {}).await;
        assert_eq!(flight.gate_count(), 0);
    }
}
