//! The catalog index
//!
//! Turns every book's text into a TF-IDF feature vector over the whole
//! catalog and precomputes the pairwise cosine similarity of all books.
//!
//! Weights follow the usual smoothed formulation: a term occurring `tf` times
//! in a book and in `df` of the `n` books weighs `tf * (ln((1 + n) / (1 + df)) + 1)`,
//! and each book's vector is L2-normalized, so the dot product of two vectors
//! is their cosine similarity.
//!
//! [`IndexStore`] holds the index currently served. A rebuild computes the new
//! index off to the side and swaps it in whole.

use crate::error::StoreError;
use crate::model::{Book, BookId};
use crate::vector::{SparseVec, dot_product, l2_norm};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "above", "across", "after", "afterwards", "again", "against", "all",
        "almost", "alone", "along", "already", "also", "although", "always", "am", "among",
        "amongst", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
        "anywhere", "are", "around", "as", "at", "back", "be", "became", "because", "become",
        "becomes", "becoming", "been", "before", "beforehand", "behind", "being", "below",
        "beside", "besides", "between", "beyond", "both", "but", "by", "can", "cannot",
        "could", "did", "do", "does", "done", "down", "due", "during", "each", "either",
        "else", "elsewhere", "enough", "etc", "even", "ever", "every", "everyone",
        "everything", "everywhere", "except", "few", "for", "former", "formerly", "from",
        "further", "had", "has", "have", "he", "hence", "her", "here", "hereafter", "hereby",
        "herein", "hers", "herself", "him", "himself", "his", "how", "however", "ie", "if",
        "in", "indeed", "into", "is", "it", "its", "itself", "just", "last", "latter",
        "latterly", "least", "less", "made", "many", "may", "me", "meanwhile", "might",
        "mine", "more", "moreover", "most", "mostly", "much", "must", "my", "myself",
        "namely", "neither", "never", "nevertheless", "next", "no", "nobody", "none",
        "noone", "nor", "not", "nothing", "now", "nowhere", "of", "off", "often", "on",
        "once", "one", "only", "onto", "or", "other", "others", "otherwise", "our", "ours",
        "ourselves", "out", "over", "own", "per", "perhaps", "please", "rather", "re",
        "same", "seem", "seemed", "seeming", "seems", "several", "she", "should", "since",
        "so", "some", "somehow", "someone", "something", "sometime", "sometimes",
        "somewhere", "still", "such", "than", "that", "the", "their", "them", "themselves",
        "then", "thence", "there", "thereafter", "thereby", "therefore", "therein",
        "thereupon", "these", "they", "this", "those", "though", "through", "throughout",
        "thru", "thus", "to", "together", "too", "toward", "towards", "under", "until", "up",
        "upon", "us", "very", "via", "was", "we", "well", "were", "what", "whatever", "when",
        "whence", "whenever", "where", "whereafter", "whereas", "whereby", "wherein",
        "whereupon", "wherever", "whether", "which", "while", "whither", "who", "whoever",
        "whole", "whom", "whose", "why", "will", "with", "within", "without", "would", "yet",
        "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

/// Splits text into lowercase word tokens of at least two characters,
/// dropping English stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(*t))
        .map(|t| t.to_string())
        .collect()
}

/// TF-IDF weights of one book, L2-normalized. Terms are indices into the
/// vocabulary the vectors were fitted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub book_id: BookId,
    pub weights: SparseVec,
}

/// Fits TF-IDF over `books` and returns the vocabulary (sorted terms) and one
/// feature vector per book, in input order.
///
/// A book whose text has no indexable terms gets an empty vector.
pub fn feature_vectors(books: &[Book]) -> (Vec<String>, Vec<FeatureVector>) {
    let docs: Vec<Vec<String>> = books.iter().map(|b| tokenize(&b.feature_text())).collect();

    let mut doc_freq: BTreeMap<&str, usize> = BTreeMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(|t| t.as_str()).collect();
        for term in unique {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }

    let vocabulary: Vec<String> = doc_freq.keys().map(|t| t.to_string()).collect();
    let positions: HashMap<&str, usize> = doc_freq.keys().enumerate().map(|(i, t)| (*t, i)).collect();

    let n = books.len() as f32;
    let idf: Vec<f32> = doc_freq
        .values()
        .map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0)
        .collect();

    let vectors = books
        .iter()
        .zip(&docs)
        .map(|(book, doc)| {
            let mut counts: BTreeMap<usize, f32> = BTreeMap::new();
            for term in doc {
                *counts.entry(positions[term.as_str()]).or_insert(0.0) += 1.0;
            }
            let raw: SparseVec = counts.into_iter().map(|(i, tf)| (i, tf * idf[i])).collect();
            FeatureVector {
                book_id: book.id,
                weights: l2_norm(&raw),
            }
        })
        .collect();

    (vocabulary, vectors)
}

/// Pairwise cosine similarity of every book in the catalog.
///
/// Scores are stored row-major in one flat array: the row of the book at
/// position `i` is `scores[i * n..(i + 1) * n]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityIndex {
    ids: Vec<BookId>,
    scores: Vec<f32>,
}

impl SimilarityIndex {
    /// Builds the index from a catalog snapshot.
    ///
    /// Books are ordered by id first, so rebuilding from the same catalog
    /// gives the same index. An empty catalog gives an empty index.
    ///
    /// # Examples
    ///
    /// ```
    /// use libcirc::{BookId, NewBook, SimilarityIndex};
    ///
    /// let book = |id, title: &str| NewBook { title: title.to_string(), copies: 1, ..NewBook::default() }
    ///     .into_book(BookId(id));
    /// let index = SimilarityIndex::rebuild(&[book(1, "space opera"), book(2, "space pirates")]);
    ///
    /// assert!(index.similarity(BookId(1), BookId(2)).unwrap() > 0.0);
    /// ```
    pub fn rebuild(books: &[Book]) -> SimilarityIndex {
        let mut books = books.to_vec();
        books.sort_by_key(|b| b.id);

        let (_, vectors) = feature_vectors(&books);
        let n = vectors.len();
        let mut scores = vec![0.0; n * n];

        for i in 0..n {
            for j in i..n {
                let sim = dot_product(&vectors[i].weights, &vectors[j].weights);
                scores[i * n + j] = sim;
                scores[j * n + i] = sim;
            }
        }

        SimilarityIndex {
            ids: books.iter().map(|b| b.id).collect(),
            scores,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Indexed books, in row order.
    pub fn ids(&self) -> &[BookId] {
        &self.ids
    }

    fn position(&self, id: BookId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// Similarity of `id` to every indexed book, in row order.
    pub fn row(&self, id: BookId) -> Option<&[f32]> {
        let n = self.ids.len();
        self.position(id).map(|i| &self.scores[i * n..(i + 1) * n])
    }

    pub fn similarity(&self, a: BookId, b: BookId) -> Option<f32> {
        let j = self.position(b)?;
        self.row(a).map(|row| row[j])
    }

    /// Other books ranked by similarity to `id`, highest first, ties by id.
    /// The book itself is never part of the ranking.
    pub fn ranked(&self, id: BookId) -> Option<Vec<(BookId, f32)>> {
        let row = self.row(id)?;
        let mut ranked: Vec<(BookId, f32)> = self
            .ids
            .iter()
            .copied()
            .zip(row.iter().copied())
            .filter(|(other, _)| *other != id)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Some(ranked)
    }

    /// Saves the index to a file using bincode serialization.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let file = File::create(path.as_ref())?;
        bincode::serialize_into(BufWriter::new(file), self)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Loads an index written by [`save`](SimilarityIndex::save). Files whose
    /// ids are not strictly increasing, or whose matrix is not `n * n`, are
    /// rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = File::open(path.as_ref())?;
        let index: SimilarityIndex = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        index.check_shape()?;
        Ok(index)
    }

    fn check_shape(&self) -> Result<(), StoreError> {
        if !self.ids.windows(2).all(|w| w[0] < w[1]) {
            return Err(StoreError::Serialization("index ids are not sorted".to_string()));
        }
        let n = self.ids.len();
        if n.checked_mul(n) != Some(self.scores.len()) {
            return Err(StoreError::Serialization(format!(
                "index of {} books holds {} scores",
                n,
                self.scores.len()
            )));
        }
        Ok(())
    }
}

/// Holder of the similarity index currently served to readers.
#[derive(Debug, Default)]
pub struct IndexStore {
    current: RwLock<Arc<SimilarityIndex>>,
}

impl IndexStore {
    pub fn new(index: SimilarityIndex) -> Self {
        IndexStore { current: RwLock::new(Arc::new(index)) }
    }

    /// The index as of the last completed rebuild. Holding the returned
    /// handle keeps that index alive across later swaps.
    pub fn current(&self) -> Arc<SimilarityIndex> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, index: SimilarityIndex) {
        let index = Arc::new(index);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = index;
    }

    /// Rebuilds from `books` and swaps the result in. The previous index keeps
    /// being served until the new one is complete.
    pub fn rebuild(&self, books: &[Book]) -> Arc<SimilarityIndex> {
        let index = Arc::new(SimilarityIndex::rebuild(books));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&index);
        tracing::info!(books = index.len(), "catalog index rebuilt");
        index
    }
}
