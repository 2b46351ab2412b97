use crate::model::Repository;

/// Case-insensitive prefix match over a repository's namespaced path.
///
/// An empty prefix matches every repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathPrefixFilter {
    prefix: String,
}

impl PathPrefixFilter {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_lowercase() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches_path(&self, path: &str) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        path.to_lowercase().starts_with(&self.prefix)
    }

    pub fn matches(&self, repository: &Repository) -> bool {
        self.matches_path(&repository.path)
    }
}
