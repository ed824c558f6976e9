//! Full-text search over the cached item snapshot.
//!
//! The index is an inverted map from lowercase alphanumeric tokens to
//! postings over the fields `id`, `Name`, `ShortName`, `Series`,
//! `Category` and `Developer`. Multi-valued fields are space-joined before
//! tokenizing. It serializes to JSON so it can be cached next to the
//! snapshot.
//!
//! Ranking is BM25-style: term frequency saturates, rare terms weigh more,
//! and `Name` matches count more than other fields. A query token also
//! matches longer index terms it is a prefix of, at reduced weight.

use crate::repository::{Item, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

const INDEX_VERSION: u32 = 1;

/// BM25 term-frequency saturation
const K1: f64 = 1.2;

/// Weight of a prefix match relative to an exact match
const PREFIX_WEIGHT: f64 = 0.5;

/// Shortest query token that may match by prefix
const MIN_PREFIX_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Id,
    Name,
    ShortName,
    Series,
    Category,
    Developer,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Id,
        Field::Name,
        Field::ShortName,
        Field::Series,
        Field::Category,
        Field::Developer,
    ];

    fn boost(self) -> f64 {
        match self {
            Field::Name => 2.0,
            Field::ShortName => 1.5,
            _ => 1.0,
        }
    }

    fn text(self, item: &Item) -> Option<String> {
        match self {
            Field::Id => Some(item.id.clone()),
            Field::Name => Some(item.name.clone()),
            Field::ShortName => item.field_text("ShortName"),
            Field::Series => item.field_text("Series"),
            Field::Category => item.field_text("Category"),
            Field::Developer => item.field_text("Developer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Posting {
    doc: u32,
    field: Field,
    tf: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchIndex {
    version: u32,
    docs: Vec<String>,
    terms: BTreeMap<String, Vec<Posting>>,
}

/// Lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl SearchIndex {
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut index = SearchIndex {
            version: INDEX_VERSION,
            ..Default::default()
        };

        for (doc, (id, item)) in snapshot.iter().enumerate() {
            let doc = doc as u32;
            index.docs.push(id.clone());

            for field in Field::ALL {
                let Some(text) = field.text(item) else {
                    continue;
                };
                let mut counts: HashMap<String, u32> = HashMap::new();
                for token in tokenize(&text) {
                    *counts.entry(token).or_default() += 1;
                }
                for (term, tf) in counts {
                    index
                        .terms
                        .entry(term)
                        .or_default()
                        .push(Posting { doc, field, tf });
                }
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Whether this index was written by a compatible build.
    pub fn is_current(&self) -> bool {
        self.version == INDEX_VERSION
    }

    /// Matching items, best first; ties are ordered by id.
    pub fn query(&self, text: &str) -> Vec<SearchHit> {
        let n = self.docs.len() as f64;
        let mut scores: HashMap<u32, f64> = HashMap::new();

        for token in tokenize(text) {
            for (term, postings) in self.matching_terms(&token) {
                let weight = if *term == token { 1.0 } else { PREFIX_WEIGHT };
                let df = postings
                    .iter()
                    .map(|p| p.doc)
                    .collect::<HashSet<_>>()
                    .len() as f64;
                let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

                for posting in postings {
                    let tf = posting.tf as f64;
                    let saturated = tf * (K1 + 1.0) / (tf + K1);
                    *scores.entry(posting.doc).or_default() +=
                        weight * idf * saturated * posting.field.boost();
                }
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(doc, score)| {
                self.docs.get(doc as usize).map(|id| SearchHit {
                    id: id.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits
    }

    /// Ids of [`query`](Self::query) results.
    pub fn query_ids(&self, text: &str) -> Vec<String> {
        self.query(text).into_iter().map(|hit| hit.id).collect()
    }

    /// The exact term, plus longer terms starting with it.
    fn matching_terms<'a>(
        &'a self,
        token: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Vec<Posting>)> + 'a {
        let allow_prefix = token.chars().count() >= MIN_PREFIX_LEN;
        self.terms
            .range::<str, _>((std::ops::Bound::Included(token), std::ops::Bound::Unbounded))
            .take_while(move |(term, _)| {
                term.as_str() == token || (allow_prefix && term.starts_with(token))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str, extra: serde_json::Value) -> (String, Item) {
        let mut value = extra;
        value["Name"] = serde_json::Value::String(name.to_string());
        let mut item: Item = serde_json::from_value(value).unwrap();
        item.id = id.to_string();
        (id.to_string(), item)
    }

    fn snapshot(items: Vec<(String, Item)>) -> Snapshot {
        items.into_iter().collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Super Mario Bros. 3 (USA)"),
            vec!["super", "mario", "bros", "3", "usa"]
        );
        assert!(tokenize("  --  ").is_empty());
    }

    #[test]
    fn test_single_item_scenario() {
        let snap = snapshot(vec![item(
            "f1",
            "X",
            serde_json::json!({ "URL": "http://h/x", "Filename": "x.bin" }),
        )]);
        let index = SearchIndex::build(&snap);
        assert_eq!(index.query_ids("X"), vec!["f1"]);
        assert!(index.query_ids("nothing").is_empty());
        assert!(index.query_ids("").is_empty());
    }

    #[test]
    fn test_name_match_outranks_developer_match() {
        let snap = snapshot(vec![
            item("a", "Quiet Tools", serde_json::json!({ "Developer": "Zelda Soft" })),
            item("b", "Zelda", serde_json::json!({ "Developer": "Nintendo" })),
        ]);
        let index = SearchIndex::build(&snap);
        assert_eq!(index.query_ids("zelda"), vec!["b", "a"]);
    }

    #[test]
    fn test_multi_valued_fields_are_indexed() {
        let snap = snapshot(vec![
            item("m1", "One", serde_json::json!({ "Series": ["Metroid", "Prime"] })),
            item("m2", "Two", serde_json::json!({ "Category": ["Puzzle"] })),
        ]);
        let index = SearchIndex::build(&snap);
        assert_eq!(index.query_ids("prime"), vec!["m1"]);
        assert_eq!(index.query_ids("PUZZLE"), vec!["m2"]);
    }

    #[test]
    fn test_prefix_match_ranks_below_exact() {
        let snap = snapshot(vec![
            item("long", "Metroidvania", serde_json::json!({})),
            item("exact", "Metro", serde_json::json!({})),
        ]);
        let index = SearchIndex::build(&snap);
        assert_eq!(index.query_ids("metro"), vec!["exact", "long"]);
    }

    #[test]
    fn test_ties_break_by_id() {
        let snap = snapshot(vec![
            item("b", "Same", serde_json::json!({})),
            item("a", "Same", serde_json::json!({})),
        ]);
        let index = SearchIndex::build(&snap);
        assert_eq!(index.query_ids("same"), vec!["a", "b"]);
    }

    #[test]
    fn test_survives_json_round_trip() {
        let snap = snapshot(vec![item("f1", "Xenon", serde_json::json!({}))]);
        let index = SearchIndex::build(&snap);
        let json = serde_json::to_string(&index).unwrap();
        let back: SearchIndex = serde_json::from_str(&json).unwrap();
        assert!(back.is_current());
        assert_eq!(back.query_ids("xen"), vec!["f1"]);
    }
}
