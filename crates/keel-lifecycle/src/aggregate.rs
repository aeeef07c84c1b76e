//! Append-only accumulator shared between concurrent workers

use parking_lot::Mutex;

/// Lock-guarded, append-only sequence
///
/// Appends are totally ordered by lock acquisition. No append is lost, so
/// the final length always equals the number of items appended.
#[derive(Debug)]
pub struct Aggregator<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Aggregator<T> {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Create an empty aggregator with room for `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append one item, returning the new length
    pub fn append(&self, item: T) -> usize {
        let mut items = self.items.lock();
        items.push(item);
        items.len()
    }

    /// Append several items under a single lock, returning the new length
    pub fn extend(&self, new_items: impl IntoIterator<Item = T>) -> usize {
        let mut items = self.items.lock();
        items.extend(new_items);
        items.len()
    }

    /// Current number of items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Remove and return everything appended so far, in append order
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Consume the aggregator and return the items in append order
    pub fn into_inner(self) -> Vec<T> {
        self.items.into_inner()
    }
}

impl<T> Default for Aggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Aggregator<T> {
    /// Copy of the items appended so far
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}
