use std::sync::Mutex;

use crate::error::SortError;

struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

/// Recycles chunk read buffers across the chunking pipeline. Every rented
/// buffer has exactly one owner at a time: the reader fills it, the sorter
/// parses it, the writer persists it and returns it here. The outstanding
/// cap is the memory ceiling of the chunking phase, not a hint - exceeding it
/// is an error.
pub(crate) struct BufferPool {
    state: Mutex<PoolState>,
    limit: usize,
}

impl BufferPool {
    pub(crate) fn new(limit: usize) -> BufferPool {
        BufferPool {
            state: Mutex::new(PoolState {
                free: Vec::new(),
                outstanding: 0,
            }),
            limit,
        }
    }

    /// Rent a buffer of exactly `len` initialized bytes, reusing a released
    /// allocation when one is available.
    pub(crate) fn rent(&self, len: usize) -> Result<Vec<u8>, SortError> {
        let mut buffer = {
            let mut state = self.state.lock().unwrap();
            if state.outstanding >= self.limit {
                return Err(SortError::ResourceExhausted {
                    outstanding: state.outstanding,
                    limit: self.limit,
                });
            }
            state.outstanding += 1;
            state.free.pop().unwrap_or_default()
        };
        buffer.clear();
        buffer.resize(len, 0);
        Ok(buffer)
    }

    pub(crate) fn release(&self, buffer: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.free.push(buffer);
    }
}
