//! Record payloads written to the store

use serde::{Deserialize, Serialize};

use super::WorkItem;
use crate::error::ItemWriteError;

/// Iteration counter value of a record nobody has processed yet
pub const UNPROCESSED_ITERATION: i64 = -1;

/// Per-entry cost of the placeholder value list
const VALUE_WIDTH: u64 = std::mem::size_of::<f64>() as u64;

/// Fixed cost of the iteration counter
const ITERATION_WIDTH: u64 = std::mem::size_of::<i64>() as u64;

/// Which payload shape the generator produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum PayloadShape {
    /// Zero-filled bytes of exactly the requested size
    #[default]
    Blob,
    /// Named record with two lists grown until the target size is reached
    Structured { entry_width: usize },
}

impl PayloadShape {
    /// Build the record for a work item
    pub fn build(&self, item: &WorkItem) -> Result<Record, ItemWriteError> {
        match *self {
            PayloadShape::Blob => {
                let size = usize::try_from(item.target_size_bytes).map_err(|_| {
                    ItemWriteError::Build {
                        index: item.index,
                        reason: format!(
                            "{} bytes does not fit in memory on this platform",
                            item.target_size_bytes
                        ),
                    }
                })?;
                Ok(Record::Blob(vec![0u8; size]))
            },
            PayloadShape::Structured { entry_width } => {
                StructuredRecord::grow_to(item, entry_width).map(Record::Structured)
            },
        }
    }
}

/// Structured payload.
///
/// `entries` and `values` always have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub name: String,
    pub entries: Vec<String>,
    pub values: Vec<f64>,
    pub iteration: i64,
}

impl StructuredRecord {
    /// Grow both lists in lockstep until the analytic footprint reaches the
    /// item's target size.
    pub fn grow_to(item: &WorkItem, entry_width: usize) -> Result<Self, ItemWriteError> {
        if entry_width == 0 {
            return Err(ItemWriteError::Build {
                index: item.index,
                reason: "entry width must be positive".to_string(),
            });
        }

        let mut record = Self {
            name: format!("record_{}", item.index),
            entries: Vec::new(),
            values: Vec::new(),
            iteration: UNPROCESSED_ITERATION,
        };

        let per_entry = entry_width as u64 + VALUE_WIDTH;
        let remaining = item.target_size_bytes.saturating_sub(record.footprint_bytes());
        let expected = usize::try_from(remaining.div_ceil(per_entry)).unwrap_or(usize::MAX);
        record.entries.reserve(expected);
        record.values.reserve(expected);

        while record.footprint_bytes() < item.target_size_bytes {
            let n = record.entries.len();
            record.entries.push(fixed_width_entry(n, entry_width));
            record.values.push(0.0);
        }

        Ok(record)
    }

    /// Width of each entry, or `None` for an empty record
    pub fn entry_width(&self) -> Option<usize> {
        self.entries.first().map(String::len)
    }

    /// Analytic in-memory size: name bytes, entry bytes, one f64 per entry and
    /// the iteration counter.
    pub fn footprint_bytes(&self) -> u64 {
        let entry_bytes: u64 = self.entries.iter().map(|e| e.len() as u64).sum();
        self.name.len() as u64
            + entry_bytes
            + self.values.len() as u64 * VALUE_WIDTH
            + ITERATION_WIDTH
    }
}

/// Zero-padded decimal of exactly `width` ASCII bytes
fn fixed_width_entry(n: usize, width: usize) -> String {
    let digits = n.to_string();
    if digits.len() >= width {
        digits[digits.len() - width..].to_string()
    } else {
        format!("{digits:0>width$}")
    }
}

/// Value stored under a record key
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Record {
    Blob(Vec<u8>),
    Structured(StructuredRecord),
}

impl Record {
    /// Bytes this record accounts for in the store
    pub fn footprint_bytes(&self) -> u64 {
        match self {
            Record::Blob(bytes) => bytes.len() as u64,
            Record::Structured(record) => record.footprint_bytes(),
        }
    }
}

// Blobs are routinely tens of megabytes; print their size, not their bytes.
impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Record::Blob(bytes) => f.debug_struct("Blob").field("len", &bytes.len()).finish(),
            Record::Structured(record) => f
                .debug_struct("Structured")
                .field("name", &record.name)
                .field("entries", &record.entries.len())
                .field("iteration", &record.iteration)
                .finish(),
        }
    }
}
