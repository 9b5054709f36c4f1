//! Single-flight coordination: at most one computation in progress per key.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs block on a condvar and receive a clone of the
//! leader's result. Once the leader finishes the key is released, so the
//! next call after that starts fresh.
//!
//! If the leader unwinds before producing a value, waiters wake up, see the
//! call abandoned and retry from the top (one of them becomes the new leader).

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

enum CallState<V> {
    Pending,
    Done(V),
    Abandoned,
}

struct Call<V> {
    state: Mutex<CallState<V>>,
    done: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Pending),
            done: Condvar::new(),
        }
    }

    fn finish(&self, state: CallState<V>) {
        *self.state.lock() = state;
        self.done.notify_all();
    }

    /// Block until the leader settles. `None` means it gave up.
    fn wait(&self) -> Option<V> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                CallState::Pending => self.done.wait(&mut state),
                CallState::Done(value) => return Some(value.clone()),
                CallState::Abandoned => return None,
            }
        }
    }
}

/// Deduplicates concurrent work by key.
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Releases the key and settles the call even if the leader unwinds.
struct LeaderGuard<'a, K: Eq + Hash, V: Clone> {
    flight: &'a SingleFlight<K, V>,
    key: Option<K>,
    call: Arc<Call<V>>,
}

impl<K: Eq + Hash, V: Clone> LeaderGuard<'_, K, V> {
    fn complete(mut self, value: V) -> V {
        if let Some(key) = self.key.take() {
            self.flight.calls.lock().remove(&key);
        }
        self.call.finish(CallState::Done(value.clone()));
        value
    }
}

impl<K: Eq + Hash, V: Clone> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.flight.calls.lock().remove(&key);
            self.call.finish(CallState::Abandoned);
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or wait for the run already in flight.
    pub fn run<F>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> V,
    {
        loop {
            let call = {
                let mut calls = self.calls.lock();
                match calls.get(&key) {
                    Some(call) => Err(Arc::clone(call)),
                    None => {
                        let call = Arc::new(Call::new());
                        calls.insert(key.clone(), Arc::clone(&call));
                        Ok(call)
                    }
                }
            };

            match call {
                Ok(call) => {
                    let guard = LeaderGuard {
                        flight: self,
                        key: Some(key),
                        call,
                    };
                    let value = work();
                    return guard.complete(value);
                }
                Err(call) => {
                    if let Some(value) = call.wait() {
                        return value;
                    }
                }
            }
        }
    }
}
