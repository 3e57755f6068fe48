//! Bounded concurrency: a FIFO slot pool and list-draining iterators.
//!
//! All helpers here multiplex futures on the calling task; nothing is spawned
//! except the deferred release in [`PoolToken::release_after`]. Work items
//! are drained from a shared queue, and cancellation is a
//! [`CancellationToken`] checked before every dequeue, so in-flight calls
//! finish but nothing new starts.
//!
//! There are no timeouts. A token that is never released permanently shrinks
//! its pool; a caller that can never be granted a slot stalls its stage.

use std::{
  collections::{HashMap, VecDeque},
  future::Future,
  hash::Hash,
  sync::Arc,
  time::Duration,
};

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

// ─── ConcurrencyPool ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Error)]
#[error("concurrency pool is closed")]
pub struct PoolClosed;

/// A counting semaphore with a FIFO wait queue.
///
/// Cloning is cheap and every clone shares the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyPool {
  semaphore: Arc<Semaphore>,
  size:      usize,
}

impl ConcurrencyPool {
  /// A pool with `size` slots (at least one).
  pub fn new(size: usize) -> Self {
    let size = size.max(1);
    Self { semaphore: Arc::new(Semaphore::new(size)), size }
  }

  /// Wait for a free slot. Waiters are served in arrival order.
  pub async fn acquire(&self) -> Result<PoolToken, PoolClosed> {
    let permit = Arc::clone(&self.semaphore)
      .acquire_owned()
      .await
      .map_err(|_| PoolClosed)?;
    Ok(PoolToken { permit })
  }

  /// Slots currently free.
  pub fn available(&self) -> usize { self.semaphore.available_permits() }

  /// Tokens handed out and not yet released, including parked ones.
  pub fn in_flight(&self) -> usize { self.size - self.available() }

  /// Refuse all current and future waiters. Outstanding tokens stay valid.
  pub fn close(&self) { self.semaphore.close(); }
}

/// One granted slot. Consuming the token releases the slot exactly once;
/// dropping it releases immediately.
#[must_use = "dropping a PoolToken releases its slot immediately"]
#[derive(Debug)]
pub struct PoolToken {
  permit: OwnedSemaphorePermit,
}

impl PoolToken {
  /// Hand the slot to the next waiter, or back to the pool.
  pub fn release(self) { drop(self.permit); }

  /// Keep the slot parked for `delay`, then release it. Must be called from
  /// within a tokio runtime when `delay` is non-zero.
  pub fn release_after(self, delay: Duration) {
    if delay.is_zero() {
      return self.release();
    }
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      self.release();
    });
  }
}

// ─── BoundedIterator ─────────────────────────────────────────────────────────

/// Run `f` over every item with at most `limit` calls in flight.
///
/// Each call receives the shared [`CancellationToken`]; cancelling it stops
/// further dequeues. Ordering between items is not guaranteed. An error from
/// one item does not stop the others; the first error is returned once every
/// worker has drained.
pub async fn each<T, E, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Result<(), E>
where
  F: Fn(T, CancellationToken) -> Fut,
  Fut: Future<Output = Result<(), E>>,
{
  each_until(items, limit, CancellationToken::new(), f).await
}

/// [`each`] with a caller-supplied cancellation token.
pub async fn each_until<T, E, F, Fut>(
  items: Vec<T>,
  limit: usize,
  cancel: CancellationToken,
  f: F,
) -> Result<(), E>
where
  F: Fn(T, CancellationToken) -> Fut,
  Fut: Future<Output = Result<(), E>>,
{
  let queue = Mutex::new(VecDeque::from(items));
  let (queue, f, cancel) = (&queue, &f, &cancel);

  let workers = (0..limit.max(1)).map(|_| async move {
    let mut first_error = None;
    while !cancel.is_cancelled() {
      let Some(item) = queue.lock().await.pop_front() else {
        break;
      };
      if let Err(e) = f(item, cancel.clone()).await {
        first_error.get_or_insert(e);
      }
    }
    first_error
  });

  match join_all(workers).await.into_iter().flatten().next() {
    Some(e) => Err(e),
    None => Ok(()),
  }
}

/// Evaluate `items` in waves of at most `limit`. After every wave has fully
/// settled, `on_batch` runs with the running total of items evaluated. That
/// is the resumable boundary: a crash loses at most the current wave.
///
/// Per-item failures are the evaluator's to handle. An error from
/// `on_batch` stops the iteration and is returned.
pub async fn batch<T, E, F, Fut, B, BFut>(
  items: Vec<T>,
  limit: usize,
  eval: F,
  on_batch: B,
) -> Result<usize, E>
where
  F: Fn(T) -> Fut,
  Fut: Future<Output = ()>,
  B: FnMut(usize) -> BFut,
  BFut: Future<Output = Result<(), E>>,
{
  batch_until(items, limit, &CancellationToken::new(), eval, on_batch).await
}

/// [`batch`] that stops starting new waves once `cancel` fires.
pub async fn batch_until<T, E, F, Fut, B, BFut>(
  items: Vec<T>,
  limit: usize,
  cancel: &CancellationToken,
  eval: F,
  mut on_batch: B,
) -> Result<usize, E>
where
  F: Fn(T) -> Fut,
  Fut: Future<Output = ()>,
  B: FnMut(usize) -> BFut,
  BFut: Future<Output = Result<(), E>>,
{
  let limit = limit.max(1);
  let mut remaining = items.into_iter();
  let mut processed = 0;

  while !cancel.is_cancelled() {
    let wave: Vec<T> = remaining.by_ref().take(limit).collect();
    if wave.is_empty() {
      break;
    }
    processed += wave.len();
    join_all(wave.into_iter().map(&eval)).await;
    on_batch(processed).await?;
  }

  Ok(processed)
}

/// [`each`] variant that collects keyed results. `f` returns `None` to
/// contribute nothing. Keys are expected to be disjoint; if two items yield
/// the same key, the later one wins.
pub async fn map_to_object<T, K, V, E, F, Fut>(
  items: Vec<T>,
  limit: usize,
  f: F,
) -> Result<HashMap<K, V>, E>
where
  K: Eq + Hash,
  F: Fn(T) -> Fut,
  Fut: Future<Output = Result<Option<(K, V)>, E>>,
{
  let map = Mutex::new(HashMap::new());
  let (map_ref, f_ref) = (&map, &f);

  each(items, limit, move |item, _cancel| async move {
    if let Some((key, value)) = f_ref(item).await? {
      map_ref.lock().await.insert(key, value);
    }
    Ok(())
  })
  .await?;

  Ok(map.into_inner())
}
