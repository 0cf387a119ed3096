//! Coalescing, memoizing fetch primitive.
//!
//! [`SingleFlightCache`] wraps a producer (typically an HTTP list fetch).
//! Any number of concurrent [`get`](SingleFlightCache::get) calls made while
//! no value is cached share one producer invocation and all receive its
//! outcome. Successful values stay cached until [`reset`] or [`update`];
//! failures are delivered to every waiter and then forgotten, so the next
//! `get` starts a fresh attempt.
//!
//! The producer runs on its own Tokio task, spawned after the slot lock is
//! released. Waiters dropping their futures does not abort it.
//!
//! [`reset`]: SingleFlightCache::reset
//! [`update`]: SingleFlightCache::update

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

/// Errors observed by callers of [`SingleFlightCache::get`].
#[derive(Debug, thiserror::Error)]
pub enum SingleFlightError<E> {
    /// The producer returned an error. Shared by every waiter of that attempt.
    #[error("producer failed: {0}")]
    Producer(Arc<E>),

    /// The producer task ended without reporting (it panicked).
    #[error("producer task ended without a result")]
    Abandoned,
}

impl<E> Clone for SingleFlightError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Producer(e) => Self::Producer(Arc::clone(e)),
            Self::Abandoned => Self::Abandoned,
        }
    }
}

type Outcome<T, E> = Result<T, SingleFlightError<E>>;
type Flight<T, E> = Shared<BoxFuture<'static, Outcome<T, E>>>;
type Producer<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

enum Slot<T, E> {
    Empty,
    InFlight { epoch: u64, flight: Flight<T, E> },
    Ready(T),
}

struct State<T, E> {
    slot: Slot<T, E>,
    /// Bumped for every launched attempt so a finishing producer can tell
    /// whether the slot still belongs to it.
    epoch: u64,
}

/// A single memoized value produced at most once per flight.
pub struct SingleFlightCache<T, E> {
    producer: Producer<T, E>,
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> SingleFlightCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create an empty cache around `producer`.
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            producer: Arc::new(move || producer().boxed()),
            state: Arc::new(Mutex::new(State {
                slot: Slot::Empty,
                epoch: 0,
            })),
        }
    }

    /// Return the cached value, joining or starting a producer flight if
    /// there is none.
    pub async fn get(&self) -> Outcome<T, E> {
        let (flight, launch) = {
            let mut state = lock(&self.state);

            let joinable = match &state.slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::InFlight { flight, .. } => match flight.peek() {
                    Some(Ok(value)) => return Ok(value.clone()),
                    // A finished failure is never reused.
                    Some(Err(_)) => None,
                    None => Some(flight.clone()),
                },
                Slot::Empty => None,
            };

            match joinable {
                Some(flight) => (flight, None),
                None => {
                    state.epoch += 1;
                    let epoch = state.epoch;
                    let (tx, rx) = oneshot::channel::<Outcome<T, E>>();
                    let flight = rx
                        .map(|received| received.unwrap_or(Err(SingleFlightError::Abandoned)))
                        .boxed()
                        .shared();
                    state.slot = Slot::InFlight {
                        epoch,
                        flight: flight.clone(),
                    };
                    (flight, Some((epoch, tx)))
                }
            }
        };

        if let Some((epoch, tx)) = launch {
            self.launch(epoch, tx);
        }

        flight.await
    }

    /// Forget any cached value or in-flight reference.
    ///
    /// An in-flight producer is not cancelled: callers already waiting on it
    /// still receive its outcome, but it no longer populates the cache.
    pub fn reset(&self) {
        lock(&self.state).slot = Slot::Empty;
    }

    /// Install `value` as the cached result.
    ///
    /// Later `get` calls return it immediately. Callers already waiting on
    /// an in-flight producer still receive that producer's outcome.
    pub fn update(&self, value: T) {
        lock(&self.state).slot = Slot::Ready(value);
    }

    /// Non-suspending read: the value if one has been produced successfully.
    pub fn peek_if_ready(&self) -> Option<T> {
        match &lock(&self.state).slot {
            Slot::Ready(value) => Some(value.clone()),
            Slot::InFlight { flight, .. } => match flight.peek() {
                Some(Ok(value)) => Some(value.clone()),
                _ => None,
            },
            Slot::Empty => None,
        }
    }

    /// Whether a producer invocation is currently outstanding.
    pub fn is_in_flight(&self) -> bool {
        match &lock(&self.state).slot {
            Slot::InFlight { flight, .. } => flight.peek().is_none(),
            _ => false,
        }
    }

    fn launch(&self, epoch: u64, tx: oneshot::Sender<Outcome<T, E>>) {
        let produce = (self.producer)();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let outcome = produce
                .await
                .map_err(|e| SingleFlightError::Producer(Arc::new(e)));

            {
                let mut state = lock(&state);
                let owns_slot =
                    matches!(state.slot, Slot::InFlight { epoch: current, .. } if current == epoch);
                if owns_slot {
                    state.slot = match &outcome {
                        Ok(value) => Slot::Ready(value.clone()),
                        Err(_) => Slot::Empty,
                    };
                } else {
                    tracing::trace!(epoch, "Single-flight result superseded by reset or update");
                }
            }

            // Every waiter may already be gone; the cache is updated regardless.
            let _ = tx.send(outcome);
        });
    }
}

fn lock<T, E>(state: &Mutex<State<T, E>>) -> MutexGuard<'_, State<T, E>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
