//! BM25+ lexical ranker
//!
//! Indexes `{name, summary, path}` with field boosts (name ×3, summary ×2,
//! path ×1) folded into the term frequencies. Parameters `k1=1.2, b=0.75,
//! δ=0.25`.

use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;
const DELTA: f64 = 0.25;

const NAME_BOOST: f64 = 3.0;
const SUMMARY_BOOST: f64 = 2.0;
const PATH_BOOST: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct LexicalDoc {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub path: String,
}

struct IndexedDoc {
    id: String,
    /// Boost-weighted term frequencies.
    terms: HashMap<String, f64>,
    length: f64,
}

pub struct LexicalIndex {
    docs: Vec<IndexedDoc>,
    document_frequency: HashMap<String, usize>,
    average_length: f64,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Also split camelCase and snake_case identifiers into their words.
fn identifier_tokens(text: &str) -> Vec<String> {
    let mut out = tokenize(text);
    for token in tokenize(text) {
        let mut word = String::new();
        let mut words = Vec::new();
        for ch in token.chars() {
            if ch.is_uppercase() && !word.is_empty() {
                words.push(word.clone());
                word.clear();
            }
            word.push(ch.to_ascii_lowercase());
        }
        if !word.is_empty() {
            words.push(word);
        }
        if words.len() > 1 {
            out.extend(words);
        }
    }
    out
}

impl LexicalIndex {
    pub fn build(docs: &[LexicalDoc]) -> Self {
        let mut indexed = Vec::with_capacity(docs.len());
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for doc in docs {
            let mut terms: HashMap<String, f64> = HashMap::new();
            for (text, boost) in [
                (doc.name.as_str(), NAME_BOOST),
                (doc.summary.as_str(), SUMMARY_BOOST),
                (doc.path.as_str(), PATH_BOOST),
            ] {
                for token in identifier_tokens(text) {
                    *terms.entry(token).or_default() += boost;
                }
            }
            for term in terms.keys() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }
            let length: f64 = terms.values().sum();
            indexed.push(IndexedDoc {
                id: doc.id.clone(),
                terms,
                length,
            });
        }
        let average_length = if indexed.is_empty() {
            0.0
        } else {
            indexed.iter().map(|d| d.length).sum::<f64>() / indexed.len() as f64
        };
        Self {
            docs: indexed,
            document_frequency,
            average_length,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Ranked `(id, score)` pairs, best first. Documents with no matching
    /// term are omitted.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        let query_terms = identifier_tokens(query);
        if query_terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }
        let n = self.docs.len() as f64;
        let mut scored: Vec<(String, f64)> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let mut score = 0.0;
                for term in &query_terms {
                    let Some(tf) = doc.terms.get(term) else { continue };
                    let df = *self.document_frequency.get(term).unwrap_or(&0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let norm = if self.average_length > 0.0 {
                        1.0 - B + B * doc.length / self.average_length
                    } else {
                        1.0
                    };
                    score += idf * (tf * (K1 + 1.0) / (tf + K1 * norm) + DELTA);
                }
                (score > 0.0).then(|| (doc.id.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, name: &str, summary: &str, path: &str) -> LexicalDoc {
        LexicalDoc {
            id: id.into(),
            name: name.into(),
            summary: summary.into(),
            path: path.into(),
        }
    }

    #[test]
    fn name_match_outranks_summary_match() {
        let index = LexicalIndex::build(&[
            doc("by-name", "parseConfig", "reads a file", "src/a.ts"),
            doc("by-summary", "loadThing", "parse config values", "src/b.ts"),
        ]);
        let hits = index.search("parseConfig", 10);
        assert_eq!(hits[0].0, "by-name");
    }

    #[test]
    fn camel_case_splits_into_words() {
        let index = LexicalIndex::build(&[doc("d", "resolveImportPath", "", "src/x.ts")]);
        let hits = index.search("import path", 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn unmatched_query_returns_nothing() {
        let index = LexicalIndex::build(&[doc("d", "alpha", "beta", "gamma.ts")]);
        assert!(index.search("zzz qqq", 10).is_empty());
    }

    #[test]
    fn rare_terms_outweigh_common_ones() {
        let docs: Vec<LexicalDoc> = (0..20)
            .map(|i| doc(&format!("common-{}", i), "handler", "handles requests", "src/h.ts"))
            .chain(std::iter::once(doc("rare", "quorum", "raft quorum check", "src/q.ts")))
            .collect();
        let index = LexicalIndex::build(&docs);
        let hits = index.search("quorum handler", 30);
        assert_eq!(hits[0].0, "rare");
    }
}
