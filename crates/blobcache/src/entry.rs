//! A single cached blob

use std::sync::Arc;

/// One key/value pair owned by the cache. Both halves are private copies;
/// nothing the caller passed in is retained.
pub(crate) struct Entry {
    key: Arc<[u8]>,
    data: Box<[u8]>,
}

impl Entry {
    pub(crate) fn new(key: Arc<[u8]>, value: &[u8]) -> Self {
        Self {
            key,
            data: Box::from(value),
        }
    }

    /// Bytes charged against the cache budget
    pub(crate) fn total_size(&self) -> usize {
        self.key.len() + self.data.len()
    }

    pub(crate) fn data_size(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Peek when `out` is `None`, copy otherwise.
    ///
    /// # Panics
    /// If `out` is not exactly the stored size. Callers are expected to peek
    /// first; partial copies would hide their bug.
    pub(crate) fn read_data(&self, out: Option<&mut [u8]>) -> usize {
        match out {
            None => self.data_size(),
            Some(buf) => {
                assert_eq!(
                    buf.len(),
                    self.data.len(),
                    "copy-mode load needs a buffer of exactly the stored size"
                );
                buf.copy_from_slice(&self.data);
                buf.len()
            }
        }
    }
}
