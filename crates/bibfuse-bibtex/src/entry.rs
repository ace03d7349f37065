//! BibTeX entry data structures

use std::collections::HashMap;

/// A single BibTeX field (key-value pair)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibField {
    pub key: String,
    pub value: String,
}

/// A parsed BibTeX entry
///
/// The entry type is kept as a free-form lowercase tag ("book", "article",
/// "misc", ...) rather than a closed enum: source files in the wild carry
/// nonstandard types and the merger must pass them through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    pub cite_key: String,
    pub entry_type: String,
    pub fields: Vec<BibField>,
}

impl BibEntry {
    pub fn new(cite_key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            cite_key: cite_key.into(),
            entry_type: entry_type.into().to_lowercase(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the entry. Field names are case-normalized to lowercase.
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push(BibField {
            key: key.into().to_lowercase(),
            value: value.into(),
        });
    }

    /// Get a field value by key (case-insensitive)
    pub fn get_field(&self, key: &str) -> Option<&str> {
        let key_lower = key.to_lowercase();
        self.fields
            .iter()
            .find(|f| f.key == key_lower)
            .map(|f| f.value.as_str())
    }

    /// Set a field value, replacing an existing field of the same name.
    pub fn set_field(&mut self, key: &str, value: impl Into<String>) {
        let key_lower = key.to_lowercase();
        if let Some(f) = self.fields.iter_mut().find(|f| f.key == key_lower) {
            f.value = value.into();
        } else {
            self.fields.push(BibField {
                key: key_lower,
                value: value.into(),
            });
        }
    }

    /// Get all fields as a HashMap for convenient access
    pub fn fields_map(&self) -> HashMap<String, String> {
        self.fields
            .iter()
            .map(|f| (f.key.clone(), f.value.clone()))
            .collect()
    }

    pub fn title(&self) -> Option<&str> {
        self.get_field("title")
    }

    pub fn author(&self) -> Option<&str> {
        self.get_field("author")
    }

    pub fn year(&self) -> Option<&str> {
        self.get_field("year")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_field_access() {
        let mut entry = BibEntry::new("Smith2024", "Article");
        entry.add_field("title", "A Great Paper");
        entry.add_field("Author", "John Smith");
        entry.add_field("YEAR", "2024");

        assert_eq!(entry.entry_type, "article");
        assert_eq!(entry.title(), Some("A Great Paper"));
        assert_eq!(entry.author(), Some("John Smith"));
        assert_eq!(entry.year(), Some("2024"));
        assert_eq!(entry.get_field("doi"), None);
    }

    #[test]
    fn test_set_field_replaces() {
        let mut entry = BibEntry::new("x", "book");
        entry.add_field("glottolog_ref_id", "17");
        entry.set_field("glottolog_ref_id", "300001");
        assert_eq!(entry.get_field("glottolog_ref_id"), Some("300001"));
        assert_eq!(entry.fields.len(), 1);
    }
}
