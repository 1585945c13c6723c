use formula_text_store::{DedupIndex, DuplicatePolicy, MapStore};

use crate::error::Result;

/// Comment authors, interned by exact name.
///
/// Author lists are short, so they always live in memory regardless of the backend the
/// comment bodies use.
#[derive(Debug)]
pub struct AuthorTable {
    names: DedupIndex,
}

impl Default for AuthorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorTable {
    pub fn new() -> Self {
        Self {
            names: DedupIndex::new(Box::new(MapStore::new())),
        }
    }

    /// Index of `name`, adding it if needed.
    ///
    /// Legacy comment parts expect author 0 to be the empty author: when the first author
    /// added to an empty table has a name, an empty author is inserted ahead of it.
    pub fn find_author(&self, name: &str) -> Result<u32> {
        if let Some(index) = self.names.index_of(name)? {
            return Ok(index);
        }
        if self.names.unique_count() == 0 && !name.is_empty() {
            self.names.intern("", DuplicatePolicy::Reuse)?;
        }
        Ok(self.names.intern(name, DuplicatePolicy::Reuse)?)
    }

    /// Append an author read from a part, keeping its position even if the name repeats.
    pub(crate) fn push_loaded(&self, name: &str) -> Result<u32> {
        Ok(self.names.intern(name, DuplicatePolicy::Keep)?)
    }

    pub fn author(&self, index: u32) -> Option<String> {
        self.names.lookup(index).ok()
    }

    pub fn len(&self) -> usize {
        self.names.unique_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All names in index order.
    pub fn names(&self) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(self.len());
        self.names.visit_in_order(&mut |_, name| {
            out.push(name.to_string());
            Ok(())
        })?;
        Ok(out)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        Ok(self.names.close()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_named_author_reserves_index_zero_for_empty() {
        let authors = AuthorTable::new();
        assert_eq!(authors.find_author("Ada").expect("find"), 1);
        assert_eq!(authors.author(0).as_deref(), Some(""));
        assert_eq!(authors.find_author("").expect("find"), 0);
        assert_eq!(authors.find_author("Ada").expect("find"), 1);
        assert_eq!(authors.find_author("Grace").expect("find"), 2);
        assert_eq!(authors.names().expect("names"), vec!["", "Ada", "Grace"]);
    }

    #[test]
    fn empty_author_first_does_not_duplicate() {
        let authors = AuthorTable::new();
        assert_eq!(authors.find_author("").expect("find"), 0);
        assert_eq!(authors.find_author("Ada").expect("find"), 1);
        assert_eq!(authors.len(), 2);
    }

    #[test]
    fn loaded_authors_keep_their_positions() {
        let authors = AuthorTable::new();
        for name in ["Ada", "Ada", "Grace"] {
            authors.push_loaded(name).expect("push");
        }
        assert_eq!(authors.len(), 3);
        assert_eq!(authors.find_author("Ada").expect("find"), 0);
        assert_eq!(authors.author(3), None);
    }
}
