use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SingleFlightError<E> {
    #[error("{0}")]
    Upstream(E),
    #[error("in-flight work for key {key} aborted: {reason}")]
    Aborted { key: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// This caller started the work.
    Leader,
    /// This caller attached to work another caller started.
    Follower,
}

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, SingleFlightError<E>>>>;

struct InFlight<T, E>
where
    T: Clone,
    E: Clone,
{
    generation: u64,
    outcome: SharedOutcome<T, E>,
}

/// Collapses concurrent work for the same key into one execution.
///
/// The first caller for a key spawns the supplier on the runtime; later callers await the
/// same outcome. The entry is removed as soon as the work finishes, success or failure,
/// so nothing is cached past completion. The supplier keeps running if every caller goes
/// away.
pub struct SingleFlight<T, E>
where
    T: Clone,
    E: Clone,
{
    in_flight: Arc<DashMap<String, InFlight<T, E>>>,
    next_generation: AtomicU64,
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, supplier: F) -> Result<T, SingleFlightError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.join(key, supplier).await.1
    }

    pub async fn join<F, Fut>(
        &self,
        key: &str,
        supplier: F,
    ) -> (FlightRole, Result<T, SingleFlightError<E>>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (role, outcome) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => (FlightRole::Follower, entry.get().outcome.clone()),
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let outcome = self.launch(key.to_string(), generation, supplier);
                entry.insert(InFlight {
                    generation,
                    outcome: outcome.clone(),
                });
                (FlightRole::Leader, outcome)
            }
        };

        if role == FlightRole::Follower {
            debug!(key, "joined in-flight work");
        }

        (role, outcome.await)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn launch<F, Fut>(&self, key: String, generation: u64, supplier: F) -> SharedOutcome<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let task_map = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = supplier().await.map_err(SingleFlightError::Upstream);
            task_map.remove_if(&task_key, |_, entry| entry.generation == generation);
            result
        });

        let waiter_map = Arc::clone(&self.in_flight);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    waiter_map.remove_if(&key, |_, entry| entry.generation == generation);
                    Err(SingleFlightError::Aborted {
                        key,
                        reason: join_error.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }
}
