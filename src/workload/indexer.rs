//! An inverted index: for every word, the documents it appears in.
//!

use crate::*;
use anyhow::Result;
use itertools::Itertools;

pub fn map(name: &str, contents: &str) -> MapOutput {
    let document = name.to_string();
    let words = contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|s| !s.is_empty())
        .unique()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let iter = words
        .into_iter()
        .map(move |word| -> Result<KeyValue> { Ok(KeyValue::new(word, document.clone())) });
    Ok(Box::new(iter))
}

/// Emits `<count> <doc1>,<doc2>,...` with documents sorted and deduplicated.
pub fn reduce(_key: &str, values: Box<dyn Iterator<Item = String> + '_>) -> Result<String> {
    let documents = values.sorted().dedup().collect::<Vec<_>>();
    Ok(format!("{} {}", documents.len(), documents.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_word_is_emitted_once_per_document() {
        let kvs: Vec<KeyValue> = map("pg-1.txt", "the cat and the hat")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let keys: Vec<&str> = kvs.iter().map(KeyValue::key).collect();
        assert_eq!(keys, vec!["the", "cat", "and", "hat"]);
        assert!(kvs.iter().all(|kv| kv.value() == "pg-1.txt"));
    }

    #[test]
    fn reduce_lists_sorted_documents() {
        let values = vec!["b.txt".to_string(), "a.txt".to_string(), "b.txt".to_string()];
        assert_eq!(
            reduce("the", Box::new(values.into_iter())).unwrap(),
            "2 a.txt,b.txt"
        );
    }
}
