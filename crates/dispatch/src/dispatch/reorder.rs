//! Reorder buffer
//!
//! Holds completions that finished ahead of an earlier item and releases them
//! strictly by submission index.

use std::collections::BTreeMap;

/// Errors from misuse of the reorder buffer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReorderError {
    #[error("completion for index {index} arrived after cursor {cursor} passed it")]
    AlreadyEmitted { index: u64, cursor: u64 },

    #[error("duplicate completion for index {0}")]
    Duplicate(u64),
}

/// Index-keyed buffer that releases values in order
///
/// # Example
///
/// ```
/// use everruns_dispatch::dispatch::ReorderBuffer;
///
/// let mut buffer = ReorderBuffer::new();
/// buffer.complete(1, "b").unwrap();
/// assert_eq!(buffer.pop_ready(), None);
///
/// buffer.complete(0, "a").unwrap();
/// let ready: Vec<_> = buffer.drain_ready().collect();
/// assert_eq!(ready, vec!["a", "b"]);
/// ```
#[derive(Debug)]
pub struct ReorderBuffer<V> {
    pending: BTreeMap<u64, V>,
    cursor: u64,
    peak: usize,
}

impl<V> Default for ReorderBuffer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ReorderBuffer<V> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            cursor: 0,
            peak: 0,
        }
    }

    /// Insert the value for `index`
    pub fn complete(&mut self, index: u64, value: V) -> Result<(), ReorderError> {
        if index < self.cursor {
            return Err(ReorderError::AlreadyEmitted {
                index,
                cursor: self.cursor,
            });
        }
        if self.pending.contains_key(&index) {
            return Err(ReorderError::Duplicate(index));
        }
        self.pending.insert(index, value);
        self.peak = self.peak.max(self.pending.len());
        Ok(())
    }

    /// Release the value at the cursor, if it has arrived
    pub fn pop_ready(&mut self) -> Option<V> {
        let value = self.pending.remove(&self.cursor)?;
        self.cursor += 1;
        Some(value)
    }

    /// Release every contiguous value from the cursor onwards
    pub fn drain_ready(&mut self) -> impl Iterator<Item = V> + '_ {
        std::iter::from_fn(move || self.pop_ready())
    }

    /// Next index to release
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Values held back waiting for an earlier index
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Largest number of values held at once
    pub fn peak_len(&self) -> usize {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_releases_in_order() {
        let mut buffer = ReorderBuffer::new();
        for index in [3, 1, 4, 0, 2] {
            buffer.complete(index, index * 10).unwrap();
        }

        let released: Vec<_> = buffer.drain_ready().collect();
        assert_eq!(released, vec![0, 10, 20, 30, 40]);
        assert_eq!(buffer.cursor(), 5);
        assert!(buffer.is_empty());
        assert_eq!(buffer.peak_len(), 5);
    }

    #[test]
    fn test_gap_holds_later_values() {
        let mut buffer = ReorderBuffer::new();
        buffer.complete(0, 'a').unwrap();
        buffer.complete(2, 'c').unwrap();

        assert_eq!(buffer.pop_ready(), Some('a'));
        assert_eq!(buffer.pop_ready(), None);
        assert_eq!(buffer.len(), 1);

        buffer.complete(1, 'b').unwrap();
        assert_eq!(buffer.drain_ready().collect::<String>(), "bc");
    }

    #[test]
    fn test_rejects_duplicates_and_stale() {
        let mut buffer = ReorderBuffer::new();
        buffer.complete(1, ()).unwrap();
        assert_eq!(buffer.complete(1, ()), Err(ReorderError::Duplicate(1)));

        buffer.complete(0, ()).unwrap();
        buffer.drain_ready().for_each(drop);
        assert_eq!(
            buffer.complete(0, ()),
            Err(ReorderError::AlreadyEmitted {
                index: 0,
                cursor: 2
            })
        );
    }
}
