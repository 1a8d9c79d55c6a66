//! Per-entity write ordering within one process
//!
//! Every update for an entity takes a [`Ticket`] when it is dispatched. The
//! ticket resolves once the previous ticket for the same id has been dropped,
//! so writes to one entity run one at a time and in dispatch order while
//! writes to different entities still run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

/// FIFO turnstiles keyed by entity id
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteLanes {
    inner: Arc<Mutex<Lanes>>,
}

#[derive(Debug, Default)]
struct Lanes {
    next: u64,
    /// Newest ticket per id and the receiver its successor waits on
    tails: HashMap<String, (u64, oneshot::Receiver<()>)>,
}

impl WriteLanes {
    fn lock(&self) -> MutexGuard<'_, Lanes> {
        // The map stays consistent across a panic in another holder.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the next place in line for `id`
    pub(crate) fn ticket(&self, id: &str) -> Ticket {
        let (done, turn) = oneshot::channel();
        let mut lanes = self.lock();
        lanes.next += 1;
        let generation = lanes.next;
        let previous = lanes
            .tails
            .insert(id.to_string(), (generation, turn))
            .map(|(_, turn)| turn);

        Ticket {
            lanes: self.clone(),
            id: id.to_string(),
            generation,
            previous,
            _done: done,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().tails.len()
    }
}

/// A place in one entity's write lane; dropping it lets the next one through
#[derive(Debug)]
pub(crate) struct Ticket {
    lanes: WriteLanes,
    id: String,
    generation: u64,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl Ticket {
    /// Resolve once every earlier ticket for the same id is gone
    pub(crate) async fn wait(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // Nothing is ever sent; the sender being dropped is the signal.
            let _ = previous.await;
            self.previous = None;
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut lanes = self.lanes.lock();
        if lanes.tails.get(&self.id).map(|(g, _)| *g) == Some(self.generation) {
            lanes.tails.remove(&self.id);
        }
    }
}
