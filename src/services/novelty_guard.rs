//! Near-duplicate detection for perspective labels and queries.
//!
//! Similarity is a blend of word-set Jaccard and the overlap coefficient
//! over normalized tokens (lowercased, punctuation-split, stop words removed,
//! plural suffixes folded). The overlap term makes the measure high-recall:
//! a candidate whose significant words are all contained in an earlier entry
//! scores high even when it adds qualifiers ("Unit Economics" vs "Unit-level
//! Economics Breakdown"). The cost is that legitimately narrower asks built
//! from the same words can be rejected as duplicates.
//!
//! The measure is total, symmetric and deterministic. Candidates are rejected
//! when their similarity to any single history entry exceeds the threshold
//! (max over history, never an average).

use std::collections::BTreeSet;

use tracing::debug;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "should", "may", "might", "can", "could", "of", "in",
    "to", "for", "with", "on", "at", "from", "by", "and", "or", "but", "not", "this", "that",
    "it", "its", "as", "if", "than", "so", "vs", "versus", "what", "which", "who", "whom",
    "how", "why", "when", "where", "about",
];

/// Normalized representation of one text, computed once per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    text: String,
    normalized: String,
    tokens: BTreeSet<String>,
}

impl Fingerprint {
    pub fn new(text: &str) -> Self {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let normalized = words.join(" ");
        let tokens = words
            .iter()
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
            .map(|w| fold_plural(w))
            .collect();
        Self {
            text: text.to_string(),
            normalized,
            tokens,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Similarity in `[0.0, 1.0]`.
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.normalized == other.normalized {
            return 1.0;
        }
        if self.tokens.is_empty() || other.tokens.is_empty() {
            return 0.0;
        }

        let shared = self.tokens.intersection(&other.tokens).count() as f64;
        let union = self.tokens.union(&other.tokens).count() as f64;
        let smaller = self.tokens.len().min(other.tokens.len()) as f64;

        let jaccard = shared / union;
        let overlap = shared / smaller;
        0.5f64.mul_add(jaccard, 0.5 * overlap).min(1.0)
    }
}

fn fold_plural(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Similarity between two texts in `[0.0, 1.0]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    Fingerprint::new(a).similarity(&Fingerprint::new(b))
}

/// Stateless form of the novelty test.
pub fn is_novel<S: AsRef<str>>(candidate: &str, history: &[S], threshold: f64) -> bool {
    let candidate = Fingerprint::new(candidate);
    history
        .iter()
        .all(|h| candidate.similarity(&Fingerprint::new(h.as_ref())) <= threshold)
}

/// Outcome of checking one candidate against the accepted history.
#[derive(Debug, Clone, PartialEq)]
pub struct NoveltyCheck {
    pub novel: bool,
    /// The most similar accepted entry and its score.
    pub closest: Option<(String, f64)>,
}

/// Incremental novelty checker: history entries are fingerprinted once, on
/// admission.
#[derive(Debug, Clone)]
pub struct NoveltyGuard {
    threshold: f64,
    accepted: Vec<Fingerprint>,
}

impl NoveltyGuard {
    pub const fn new(threshold: f64) -> Self {
        Self {
            threshold,
            accepted: Vec::new(),
        }
    }

    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Accepted entries in admission order.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(Fingerprint::text)
    }

    /// Compare `candidate` against every accepted entry.
    pub fn check(&self, candidate: &str) -> NoveltyCheck {
        let fingerprint = Fingerprint::new(candidate);
        self.check_fingerprint(&fingerprint)
    }

    fn check_fingerprint(&self, fingerprint: &Fingerprint) -> NoveltyCheck {
        let closest = self
            .accepted
            .iter()
            .map(|entry| (entry, fingerprint.similarity(entry)))
            .fold(None::<(&Fingerprint, f64)>, |best, (entry, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((entry, score)),
            })
            .map(|(entry, score)| (entry.text().to_string(), score));

        let novel = closest
            .as_ref()
            .map_or(true, |(_, score)| *score <= self.threshold);
        NoveltyCheck { novel, closest }
    }

    pub fn is_novel(&self, candidate: &str) -> bool {
        self.check(candidate).novel
    }

    /// Add `candidate` to the history without checking it.
    pub fn admit(&mut self, candidate: &str) {
        self.accepted.push(Fingerprint::new(candidate));
    }

    /// Check `candidate` and admit it when novel.
    pub fn try_admit(&mut self, candidate: &str) -> NoveltyCheck {
        let fingerprint = Fingerprint::new(candidate);
        let check = self.check_fingerprint(&fingerprint);
        if check.novel {
            self.accepted.push(fingerprint);
        } else {
            debug!(
                candidate,
                closest = ?check.closest,
                threshold = self.threshold,
                "rejected near-duplicate"
            );
        }
        check
    }
}
