//! Fixed-size windowing over an ordered item sequence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from batch planning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,
}

/// Validated batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct BatchSize(usize);

impl BatchSize {
    /// Window length used when nothing else is configured.
    pub const DEFAULT: BatchSize = BatchSize(25);

    pub fn new(size: usize) -> Result<Self, BatchError> {
        if size == 0 {
            Err(BatchError::ZeroBatchSize)
        } else {
            Ok(Self(size))
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }

    /// Number of windows needed for `len` items: `ceil(len / size)`.
    pub fn windows_for(&self, len: usize) -> usize {
        len.div_ceil(self.0)
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<usize> for BatchSize {
    type Error = BatchError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BatchSize> for usize {
    fn from(value: BatchSize) -> Self {
        value.0
    }
}

/// One contiguous window over the input sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a, T> {
    /// 1-based window number within the stage
    pub number: usize,

    /// Position of the first item in the full sequence
    pub offset: usize,

    /// Items of this window; the oracle sees them as indices `1..=items.len()`
    pub items: &'a [T],
}

impl<'a, T> Window<'a, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item addressed by a 1-based wire index.
    pub fn item(&self, wire_index: usize) -> Option<&'a T> {
        wire_index.checked_sub(1).and_then(|i| self.items.get(i))
    }
}

/// Split `items` into consecutive windows of `size`; the last may be shorter.
pub fn windows<T>(items: &[T], size: BatchSize) -> impl Iterator<Item = Window<'_, T>> {
    items
        .chunks(size.get())
        .enumerate()
        .map(move |(i, chunk)| Window {
            number: i + 1,
            offset: i * size.get(),
            items: chunk,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(BatchSize::new(0), Err(BatchError::ZeroBatchSize));
        assert!(serde_json::from_str::<BatchSize>("0").is_err());
        assert_eq!(serde_json::from_str::<BatchSize>("10").unwrap().get(), 10);
    }

    #[test]
    fn test_thirty_items_make_two_windows() {
        let items: Vec<u32> = (0..30).collect();
        let all: Vec<_> = windows(&items, BatchSize::DEFAULT).collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].len(), 25);
        assert_eq!(all[1].len(), 5);
        assert_eq!(all[1].offset, 25);
        assert_eq!(all[1].number, 2);
        assert_eq!(all[1].item(1), Some(&25));
        assert_eq!(all[1].item(0), None);
        assert_eq!(all[1].item(6), None);
    }

    #[test]
    fn test_empty_input_has_no_windows() {
        let items: Vec<u32> = Vec::new();
        assert_eq!(windows(&items, BatchSize::DEFAULT).count(), 0);
        assert_eq!(BatchSize::DEFAULT.windows_for(0), 0);
    }

    proptest! {
        #[test]
        fn prop_window_count_is_ceiling(len in 1usize..500, size in 1usize..60) {
            let items: Vec<usize> = (0..len).collect();
            let size = BatchSize::new(size).unwrap();
            let all: Vec<_> = windows(&items, size).collect();

            prop_assert_eq!(all.len(), (len + size.get() - 1) / size.get());
            prop_assert_eq!(all.len(), size.windows_for(len));
            prop_assert!(all.iter().all(|w| !w.is_empty() && w.len() <= size.get()));

            let flattened: Vec<usize> = all.iter().flat_map(|w| w.items.iter().copied()).collect();
            prop_assert_eq!(flattened, items.clone());

            for w in &all {
                for local in 1..=w.len() {
                    prop_assert_eq!(*w.item(local).unwrap(), w.offset + local - 1);
                }
            }
        }
    }
}
