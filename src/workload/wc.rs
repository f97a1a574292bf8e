//! A MapReduce-compatible implementation of word count.
//!

use crate::*;
use anyhow::Result;

pub fn map(_name: &str, contents: &str) -> MapOutput {
    let words = contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();

    let iter = words
        .into_iter()
        .map(|word| -> Result<KeyValue> { Ok(KeyValue::new(word, "1")) });
    Ok(Box::new(iter))
}

pub fn reduce(_key: &str, values: Box<dyn Iterator<Item = String> + '_>) -> Result<String> {
    let mut count: u64 = 0;
    for value in values {
        count += value.parse::<u64>()?;
    }
    Ok(count.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_non_letters_and_keeps_case() {
        let kvs: Vec<KeyValue> = map("doc", "Hello, hello world!\n42 times")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let keys: Vec<&str> = kvs.iter().map(KeyValue::key).collect();
        assert_eq!(keys, vec!["Hello", "hello", "world", "times"]);
        assert!(kvs.iter().all(|kv| kv.value() == "1"));
    }

    #[test]
    fn reduce_sums_counts() {
        let values = vec!["1".to_string(), "1".to_string(), "3".to_string()];
        assert_eq!(reduce("a", Box::new(values.into_iter())).unwrap(), "5");
    }
}
