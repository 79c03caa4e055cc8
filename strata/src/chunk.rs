//! In-memory grouping of records by sanitized key.

use std::collections::HashMap;

use crate::record::Record;

/// Records of one source file waiting to be written, grouped by key.
///
/// Owned by exactly one file worker.
#[derive(Debug)]
pub struct ChunkAccumulator {
    groups: HashMap<String, Vec<Record>>,
    rows: usize,
    threshold: usize,
}

impl ChunkAccumulator {
    /// Create an empty accumulator that asks to be flushed at `threshold` rows.
    pub fn new(threshold: usize) -> Self {
        Self {
            groups: HashMap::new(),
            rows: 0,
            threshold: threshold.max(1),
        }
    }

    /// Append a record under `key`.
    pub fn add(&mut self, key: String, record: Record) {
        self.groups.entry(key).or_default().push(record);
        self.rows += 1;
    }

    /// True once the rows added since the last drain reach the threshold.
    pub fn should_flush(&self) -> bool {
        self.rows >= self.threshold
    }

    /// Take every group, leaving the accumulator empty.
    pub fn drain(&mut self) -> HashMap<String, Vec<Record>> {
        self.rows = 0;
        std::mem::take(&mut self.groups)
    }

    /// Rows held right now.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Distinct keys held right now.
    pub fn key_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordSchema;
    use crate::sanitize::sanitize;

    fn record(category: &str, n: usize) -> Record {
        let line = format!(r#"{{"subreddit":"{}","created_utc":{}}}"#, category, n);
        RecordSchema::default().decode(line.as_bytes()).unwrap()
    }

    #[test]
    fn test_threshold_law() {
        let mut acc = ChunkAccumulator::new(3);
        assert!(!acc.should_flush());
        acc.add("a".into(), record("a", 0));
        assert!(!acc.should_flush());
        acc.add("b".into(), record("b", 1));
        assert!(!acc.should_flush());
        acc.add("a".into(), record("a", 2));
        assert!(acc.should_flush());

        let drained = acc.drain();
        assert_eq!(drained.values().map(Vec::len).sum::<usize>(), 3);
        assert!(acc.is_empty());
        assert!(!acc.should_flush());

        // Counting restarts after a drain.
        acc.add("c".into(), record("c", 3));
        acc.add("c".into(), record("c", 4));
        assert!(!acc.should_flush());
        acc.add("c".into(), record("c", 5));
        assert!(acc.should_flush());
    }

    #[test]
    fn test_zero_threshold_behaves_as_one() {
        let mut acc = ChunkAccumulator::new(0);
        assert!(!acc.should_flush());
        acc.add("a".into(), record("a", 0));
        assert!(acc.should_flush());
    }

    #[test]
    fn test_drain_preserves_every_record_by_key() {
        let categories = ["news", "AskReddit!", "funny", "AskReddit", "news", "", "funny"];
        let mut acc = ChunkAccumulator::new(4);
        let mut drains = Vec::new();

        for (i, category) in categories.iter().enumerate() {
            let rec = record(category, i);
            acc.add(sanitize(&rec.category), rec);
            if acc.should_flush() {
                drains.push(acc.drain());
            }
        }
        drains.push(acc.drain());

        let mut by_key: HashMap<String, Vec<f64>> = HashMap::new();
        for drained in drains {
            for (key, records) in drained {
                for rec in records {
                    assert_eq!(sanitize(&rec.category), key, "record misrouted");
                    by_key.entry(key.clone()).or_default().push(rec.timestamp.unwrap());
                }
            }
        }

        assert_eq!(by_key["news"], vec![0.0, 4.0]);
        assert_eq!(by_key["AskReddit"], vec![1.0, 3.0]);
        assert_eq!(by_key["funny"], vec![2.0, 6.0]);
        assert_eq!(by_key[""], vec![5.0]);
        assert_eq!(by_key.values().map(Vec::len).sum::<usize>(), categories.len());
    }

    #[test]
    fn test_key_count() {
        let mut acc = ChunkAccumulator::new(10);
        acc.add("a".into(), record("a", 0));
        acc.add("a".into(), record("a", 1));
        acc.add("b".into(), record("b", 2));
        assert_eq!(acc.key_count(), 2);
        assert_eq!(acc.len(), 3);
    }
}
