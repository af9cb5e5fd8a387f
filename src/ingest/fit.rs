//! Shrinks record metadata until its serialized form fits a byte budget.

use serde::Serialize;

use crate::models::ChunkMetadata;

/// Default per-record metadata budget of the vector store.
pub const DEFAULT_METADATA_BUDGET: usize = 40 * 1024;

/// Appended to text that was cut to fit the budget.
pub const ELLIPSIS: &str = "…";

/// A serializable payload with a single text field that may be shortened.
pub trait TruncatableText: Serialize + Clone {
    fn text(&self) -> Option<&str>;

    /// Replace the text and flag the payload as truncated.
    fn set_truncated_text(&mut self, text: String);
}

impl TruncatableText for ChunkMetadata {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn set_truncated_text(&mut self, text: String) {
        self.text = Some(text);
        self.truncated = Some(true);
    }
}

/// Serialized JSON size in bytes.
pub fn serialized_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(usize::MAX)
}

/// Return `record` unchanged if it fits `budget`; otherwise keep the longest
/// text prefix (in characters) that fits with the ellipsis marker appended.
///
/// Never fails: when not even an empty prefix fits, the empty-prefix record
/// is returned and the caller decides what to do with it.
pub fn fit_to_budget<T: TruncatableText>(record: &T, budget: usize) -> T {
    if serialized_size(record) <= budget {
        return record.clone();
    }
    let Some(text) = record.text() else {
        return record.clone();
    };

    // Byte offset of every char boundary, so a prefix of `l` chars is text[..bounds[l]].
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    let with_prefix = |chars: usize| -> T {
        let mut candidate = record.clone();
        candidate.set_truncated_text(format!("{}{ELLIPSIS}", &text[..bounds[chars]]));
        candidate
    };

    let (mut lo, mut hi) = (0usize, bounds.len() - 1);
    let mut best: Option<usize> = None;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        if serialized_size(&with_prefix(mid)) <= budget {
            best = Some(mid);
            lo = mid + 1;
        } else if mid == 0 {
            break;
        } else {
            hi = mid - 1;
        }
    }

    match best {
        Some(chars) => with_prefix(chars),
        None => {
            tracing::warn!(budget, "Metadata exceeds budget even with empty text");
            with_prefix(0)
        }
    }
}
