//! Named one-shot wake-ups.
//!
//! Timers live only as long as the process. Anything that must outlive a
//! restart is also written to the state store and re-armed by recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;

use dnsgate_types::{EpochMillis, TimerName};

use crate::clock::Clock;

/// Schedules named wake-ups and delivers their names when they fire.
///
/// Scheduling a name that is already pending replaces the earlier schedule.
pub trait TimerService: Send + Sync {
    fn schedule(&self, name: &TimerName, at: EpochMillis);

    /// No-op when nothing is pending under `name`.
    fn cancel(&self, name: &TimerName);
}

struct Pending {
    at: EpochMillis,
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    pending: HashMap<TimerName, Pending>,
}

/// [`TimerService`] on tokio timers. Fired names arrive on the receiver
/// returned by [`TokioTimers::new`].
///
/// Must be used from within a tokio runtime.
pub struct TokioTimers {
    clock: Arc<dyn Clock>,
    fired: mpsc::UnboundedSender<TimerName>,
    registry: Arc<Mutex<Registry>>,
}

impl TokioTimers {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<TimerName>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let timers = Self {
            clock,
            fired,
            registry: Arc::new(Mutex::new(Registry::default())),
        };
        (timers, rx)
    }

    /// Pending names and their deadlines, sorted by name.
    #[must_use]
    pub fn pending(&self) -> Vec<(TimerName, EpochMillis)> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = registry
            .pending
            .iter()
            .map(|(name, p)| (name.clone(), p.at))
            .collect();
        out.sort();
        out
    }

    #[must_use]
    pub fn deadline(&self, name: &TimerName) -> Option<EpochMillis> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.pending.get(name).map(|p| p.at)
    }
}

impl TimerService for TokioTimers {
    fn schedule(&self, name: &TimerName, at: EpochMillis) {
        let delay = Duration::from_millis(at.saturating_sub(self.clock.now_ms()).max(0) as u64);
        let (handle, registration) = AbortHandle::new_pair();

        let generation = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.next_generation += 1;
            let generation = registry.next_generation;
            let replaced = registry.pending.insert(
                name.clone(),
                Pending {
                    at,
                    generation,
                    handle,
                },
            );
            if let Some(previous) = replaced {
                previous.handle.abort();
            }
            generation
        };

        let registry = Arc::clone(&self.registry);
        let fired = self.fired.clone();
        let owned = name.clone();
        let task = async move {
            tokio::time::sleep(delay).await;
            {
                let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                match registry.pending.get(&owned) {
                    Some(p) if p.generation == generation => {
                        registry.pending.remove(&owned);
                    }
                    _ => return,
                }
            }
            tracing::debug!(timer = %owned, "Timer fired");
            let _ = fired.send(owned);
        };
        tokio::spawn(async move {
            let _ = Abortable::new(task, registration).await;
        });
        tracing::debug!(timer = %name, at, delay_ms = delay.as_millis(), "Timer scheduled");
    }

    fn cancel(&self, name: &TimerName) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = registry.pending.remove(name) {
            previous.handle.abort();
            tracing::debug!(timer = %name, "Timer cancelled");
        }
    }
}
