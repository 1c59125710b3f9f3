use crate::models::RecordMap;
use crate::services::decoder::{DecodeError, ImageDecoder};
use thiserror::Error;

/// Errors raised by the session cache.
///
/// `OutOfRange` and `InvalidState` mean the cache bookkeeping is wrong, not
/// that the user did something unexpected.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{requested} images requested but the cache holds at most {capacity}")]
    OutOfRange { requested: usize, capacity: usize },

    #[error("Index {index} is outside the session ({total} images)")]
    IndexOutOfBounds { index: usize, total: usize },

    #[error("{0} is tracked as resident but holds no decoded image")]
    InvalidState(String),

    #[error("Image decoding failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Bounded cache deciding which records hold a decoded image.
///
/// The resident list is ordered oldest first. Every [`prepare`](Self::prepare)
/// rebuilds it around the selected picture: the current one, then the next,
/// then the previous, depending on capacity. Residents outside that window are
/// evicted oldest first, and residents inside it are kept without decoding
/// again.
///
/// Records are referenced by file name; the pixels themselves live in each
/// record's decoded slot.
#[derive(Debug)]
pub struct SessionCache {
    capacity: usize,
    resident: Vec<String>,
}

impl SessionCache {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity as usize;
        Self {
            capacity,
            resident: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// File names of the cached records, oldest first
    pub fn resident(&self) -> &[String] {
        &self.resident
    }

    pub fn len(&self) -> usize {
        self.resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resident.is_empty()
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.resident.iter().any(|name| name == file_name)
    }

    /// Positions worth having decoded when `selected_index` is on screen,
    /// highest priority first.
    pub fn desired_indices(&self, selected_index: usize, total_count: usize) -> Vec<usize> {
        let mut desired = Vec::with_capacity(3);
        if self.capacity >= 1 && selected_index < total_count {
            desired.push(selected_index);
        }
        if self.capacity >= 2 && selected_index + 1 < total_count {
            desired.push(selected_index + 1);
        }
        if self.capacity >= 3 && selected_index > 0 && selected_index < total_count {
            desired.push(selected_index - 1);
        }
        desired
    }

    /// Rebuild the resident set around `selected_index`.
    ///
    /// `records` must be in display order. Returns how many pictures were
    /// decoded by this call.
    pub fn prepare(
        &mut self,
        records: &mut RecordMap,
        selected_index: usize,
        total_count: usize,
        decoder: &dyn ImageDecoder,
    ) -> Result<usize, CacheError> {
        if self.capacity == 0 {
            return Ok(0);
        }

        if selected_index >= total_count || total_count > records.len() {
            return Err(CacheError::IndexOutOfBounds {
                index: selected_index,
                total: total_count.min(records.len()),
            });
        }

        let desired: Vec<String> = self
            .desired_indices(selected_index, total_count)
            .into_iter()
            .filter_map(|index| records.get_index(index).map(|(name, _)| name.clone()))
            .collect();

        if desired.len() > self.capacity {
            return Err(CacheError::OutOfRange {
                requested: desired.len(),
                capacity: self.capacity,
            });
        }

        // Residents that stay wanted are re-queued below without a decache.
        self.resident.retain(|name| !desired.contains(name));

        let to_decache = (self.resident.len() + desired.len()).saturating_sub(self.capacity);
        tracing::debug!(
            "[SessionCache] {} to decache... ({}/{})",
            to_decache,
            self.resident.len() + desired.len(),
            self.capacity
        );

        for _ in 0..to_decache {
            let oldest = self.resident.remove(0);
            Self::decache(records, &oldest)?;
        }

        let mut decoded = 0;
        for (position, name) in desired.iter().enumerate() {
            let Some(record) = records.get_mut(name) else {
                continue;
            };
            if !record.is_cached() {
                tracing::debug!(
                    "[SessionCache] [Caching] {} ({}/{})",
                    record.full_path,
                    position + 1,
                    desired.len()
                );
                match decoder.decode(&record.full_path) {
                    Ok(image) => {
                        record.store_decoded(image);
                        decoded += 1;
                    }
                    Err(e) => {
                        // Kept residents later in the window still hold pixels
                        self.track_cached(records, &desired[position + 1..]);
                        return Err(e.into());
                    }
                }
            }
            self.resident.push(name.clone());
        }

        Ok(decoded)
    }

    fn track_cached(&mut self, records: &RecordMap, names: &[String]) {
        for name in names {
            if records.get(name).is_some_and(|record| record.is_cached()) {
                self.resident.push(name.clone());
            }
        }
    }

    /// Decache every resident record and forget them.
    ///
    /// Failures are logged and skipped so one inconsistent record cannot keep
    /// the others in memory.
    pub fn clear(&mut self, records: &mut RecordMap) {
        for name in self.resident.drain(..) {
            if let Err(e) = Self::decache(records, &name) {
                tracing::warn!("[SessionCache] Ignoring decache failure during clear: {}", e);
            }
        }
    }

    /// Drop the decoded image of `file_name`.
    ///
    /// Only valid on a resident record; a record without pixels means the
    /// cache and the record disagree.
    fn decache(records: &mut RecordMap, file_name: &str) -> Result<(), CacheError> {
        let image = records
            .get_mut(file_name)
            .and_then(|record| record.take_decoded())
            .ok_or_else(|| CacheError::InvalidState(file_name.to_string()))?;

        tracing::debug!("[SessionCache] [Decaching] {}", file_name);
        drop(image);
        Ok(())
    }
}
