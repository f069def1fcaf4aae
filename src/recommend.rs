//! Content-based recommendations from a reader's recent loans.

use crate::index::SimilarityIndex;
use crate::model::BookId;
use std::collections::BTreeSet;

/// Candidates similar to the books in `history`.
///
/// For each source book, the `per_source` most similar other books with a
/// similarity strictly above zero are taken; the union is returned. Sources
/// missing from the index (added after the last rebuild) contribute nothing.
///
/// Ids in the result may refer to books removed since the index was built;
/// callers resolve them against the catalog and drop the missing ones.
pub fn candidates(index: &SimilarityIndex, history: &[BookId], per_source: usize) -> BTreeSet<BookId> {
    let mut picked = BTreeSet::new();

    for &source in history {
        let Some(ranked) = index.ranked(source) else {
            tracing::debug!(book = %source, "loan history book not in index, skipped");
            continue;
        };

        picked.extend(
            ranked
                .into_iter()
                .take(per_source)
                .filter(|(_, score)| *score > 0.0)
                .map(|(id, _)| id),
        );
    }

    picked
}
