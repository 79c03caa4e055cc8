//! Optional category allowlist.
//!
//! A CSV file with a `name` column, one category per row. Names are matched
//! case-insensitively and an `r/` prefix is ignored. Without a `name` header
//! the first column is used and the first line counts as a name too.

use std::collections::HashSet;
use std::path::Path;

use log::{info, warn};

use crate::{Error, Result};

const NAME_COLUMN: &str = "name";

/// Categories whose records are kept. An empty list keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryAllowlist {
    names: HashSet<String>,
}

impl CategoryAllowlist {
    /// Load the allowlist from a CSV file.
    pub fn load(path: &Path) -> Result<Self> {
        let csv_err = |source: csv::Error| Error::Allowlist {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = reader.headers().map_err(csv_err)?.clone();
        let column = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(NAME_COLUMN));

        let mut list = Self::default();
        if column.is_none() {
            if let Some(first) = headers.get(0) {
                list.insert(first);
            }
        }
        let column = column.unwrap_or(0);
        for row in reader.records() {
            let row = row.map_err(csv_err)?;
            if let Some(name) = row.get(column) {
                list.insert(name);
            }
        }

        if list.is_empty() {
            warn!(
                "Category allowlist {} is empty; every category is kept",
                path.display()
            );
        } else {
            info!(
                "Loaded {} allowed categories from {}",
                list.len(),
                path.display()
            );
        }
        Ok(list)
    }

    /// Build an allowlist from names already in memory.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for name in names {
            list.insert(name.as_ref());
        }
        list
    }

    fn insert(&mut self, name: &str) {
        let name = normalize(name);
        if !name.is_empty() {
            self.names.insert(name);
        }
    }

    /// Whether records of `category` are kept.
    pub fn allows(&self, category: &str) -> bool {
        self.names.is_empty() || self.names.contains(&normalize(category))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn normalize(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_prefix("r/") {
        Some(rest) => rest.to_string(),
        None => name,
    }
}
