use crate::Cycle;
use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Aged<T> {
    value: T,
    ready_at: Cycle,
}

/// Bounded FIFO whose entries become visible only after an aging latency.
///
/// Models the pipeline stages between two components: an entry enqueued at
/// cycle `c` is dequeueable at `c + latency`. The owner advances the queue's
/// clock once per simulated cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgingQueue<T> {
    inner: VecDeque<Aged<T>>,
    capacity: usize,
    latency: Cycle,
    now: Cycle,
}

impl<T> AgingQueue<T> {
    #[must_use]
    pub fn new(capacity: usize, latency: Cycle) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: VecDeque::with_capacity(capacity),
            capacity,
            latency,
            now: 0,
        }
    }

    /// Ages every entry by one cycle.
    pub fn advance(&mut self) {
        self.now += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn space(&self) -> usize {
        self.capacity - self.inner.len()
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.inner.len() >= self.capacity
    }

    /// Head entry if it has aged through the queue.
    #[must_use]
    pub fn ready_front(&self) -> Option<&T> {
        let head = self.inner.front()?;
        (head.ready_at <= self.now).then_some(&head.value)
    }

    #[must_use]
    pub fn ready(&self) -> bool {
        self.ready_front().is_some()
    }

    pub fn enqueue(&mut self, value: T) {
        assert!(
            !self.full(),
            "enqueue into full queue (capacity {})",
            self.capacity
        );
        self.inner.push_back(Aged {
            value,
            ready_at: self.now + self.latency,
        });
    }

    /// Removes the head entry. Callers check readiness via
    /// [`AgingQueue::ready_front`] first.
    pub fn dequeue(&mut self) -> Option<T> {
        self.inner.pop_front().map(|aged| aged.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter().map(|aged| &aged.value)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
