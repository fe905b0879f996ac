//! Run buffer.

use rayon;

/// In-memory buffer collecting a single initial run. Limited by the run capacity (records count).
pub struct RunBuffer<T> {
    capacity: usize,
    inner: Vec<T>,
}

impl<T> RunBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        RunBuffer {
            capacity,
            inner: Vec::new(),
        }
    }

    /// Adds a new record to the buffer.
    pub fn push(&mut self, item: T) {
        self.inner.push(item);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the run capacity.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.capacity
    }
}

impl<T> IntoIterator for RunBuffer<T> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<T: Send> rayon::slice::ParallelSliceMut<T> for RunBuffer<T> {
    fn as_parallel_slice_mut(&mut self) -> &mut [T] {
        self.inner.as_mut_slice()
    }
}
