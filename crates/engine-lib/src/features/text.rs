//! TF-IDF projection of free text onto a frozen vocabulary
//!
//! The vocabulary is learned once per training run from the combined
//! input+output text of every record, reduced to the [`TEXT_FEATURES`] terms
//! carrying the most TF-IDF weight across the corpus, and then frozen inside
//! the bundle.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Number of text-similarity features
pub const TEXT_FEATURES: usize = 20;

const MIN_TOKEN_CHARS: usize = 2;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "do", "does", "for", "from", "had", "has", "have", "he", "her",
    "his", "how", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on",
    "or", "our", "out", "she", "so", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "to", "up", "us", "was", "we", "were", "what",
    "when", "which", "while", "who", "will", "with", "would", "you", "your",
];

/// Frozen vocabulary with inverse document frequencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextVectorizer {
    terms: Vec<String>,
    idf: Vec<f64>,
    document_count: usize,
}

impl TextVectorizer {
    /// Learn the vocabulary from a corpus of documents
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| terms_of(d.as_ref())).collect();
        let n = tokenized.len();

        let mut document_frequency: HashMap<&str, usize> = HashMap::new();
        for terms in &tokenized {
            let unique: HashSet<&str> = terms.iter().map(String::as_str).collect();
            for term in unique {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let idf: HashMap<&str, f64> = document_frequency
            .iter()
            .map(|(term, df)| (*term, smooth_idf(n, *df)))
            .collect();

        // Total l2-normalized weight each term carries across the corpus
        let mut weight: BTreeMap<&str, f64> = BTreeMap::new();
        for terms in &tokenized {
            let counts = count_terms(terms.iter().map(String::as_str));
            let raw: Vec<(&str, f64)> = counts
                .iter()
                .map(|(term, tf)| (*term, *tf as f64 * idf.get(term).copied().unwrap_or(0.0)))
                .collect();
            let norm = raw.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            if norm <= f64::EPSILON {
                continue;
            }
            for (term, w) in raw {
                *weight.entry(term).or_insert(0.0) += w / norm;
            }
        }

        let mut ranked: Vec<(&str, f64)> = weight.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(TEXT_FEATURES);

        let terms: Vec<String> = ranked.iter().map(|(t, _)| t.to_string()).collect();
        let idf = ranked
            .iter()
            .map(|(t, _)| idf.get(t).copied().unwrap_or(0.0))
            .collect();

        Self {
            terms,
            idf,
            document_count: n,
        }
    }

    /// Project text onto the frozen vocabulary; unknown terms are ignored
    pub fn transform(&self, text: &str) -> [f64; TEXT_FEATURES] {
        let mut out = [0.0; TEXT_FEATURES];
        if self.terms.is_empty() {
            return out;
        }

        let tokens = terms_of(text);
        let counts = count_terms(tokens.iter().map(String::as_str));
        for (i, (term, idf)) in self.terms.iter().zip(&self.idf).enumerate() {
            if let Some(tf) = counts.get(term.as_str()) {
                out[i] = *tf as f64 * idf;
            }
        }

        let norm = out.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > f64::EPSILON {
            for v in out.iter_mut() {
                *v /= norm;
            }
        }
        out
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }
}

fn smooth_idf(documents: usize, document_frequency: usize) -> f64 {
    ((1.0 + documents as f64) / (1.0 + document_frequency as f64)).ln() + 1.0
}

fn count_terms<'a>(terms: impl Iterator<Item = &'a str>) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for term in terms {
        *counts.entry(term).or_insert(0) += 1;
    }
    counts
}

/// Lowercased word tokens with stop words removed
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Unigrams followed by adjacent bigrams
fn terms_of(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let bigrams: Vec<String> = tokens.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect();
    let mut terms = tokens;
    terms.extend(bigrams);
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<&'static str> {
        vec![
            "scan target for open ports with nmap",
            "nmap scan report 22/tcp open ssh",
            "dump users table with sqlmap",
            "write the weekly summary",
        ]
    }

    #[test]
    fn test_tokenize_drops_stop_words_and_short_tokens() {
        assert_eq!(tokenize("Scan the target: a 10.0.0.1"), vec!["scan", "target", "10"]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_vocabulary_is_capped_and_deterministic() {
        let first = TextVectorizer::fit(&corpus());
        let second = TextVectorizer::fit(&corpus());
        assert_eq!(first, second);
        assert!(first.terms().len() <= TEXT_FEATURES);
        assert_eq!(first.document_count(), 4);
    }

    #[test]
    fn test_transform_is_unit_length_or_zero() {
        let vectorizer = TextVectorizer::fit(&corpus());
        let v = vectorizer.transform("nmap scan of open ports");
        let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);

        let unknown = vectorizer.transform("completely unrelated words");
        assert!(unknown.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_empty_corpus_yields_zero_features() {
        let vectorizer = TextVectorizer::fit::<&str>(&[]);
        assert!(vectorizer.terms().is_empty());
        assert_eq!(vectorizer.transform("scan"), [0.0; TEXT_FEATURES]);
    }
}
