//! Template variables substituted into client script arguments.
//!
//! A `ReplacementMapping` maps `%token%` keys to values. Values are escaped
//! when substituted, and paths under a relocated shared directory are
//! rewritten onto the canonical location the workers expect.

use indexmap::IndexMap;

/// Shared directory path as seen by the workers.
pub const CANONICAL_SHARED_DIR: &str = "/var/archivematica/sharedDirectory/";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementMapping {
    items: IndexMap<String, String>,
    /// Local shared directory, rewritten to `CANONICAL_SHARED_DIR` on
    /// substitution when it differs.
    shared_dir: Option<String>,
}

impl ReplacementMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite values under `shared_dir` onto the canonical shared directory.
    pub fn with_shared_dir(mut self, shared_dir: impl Into<String>) -> Self {
        let mut dir: String = shared_dir.into();
        if !dir.ends_with('/') {
            dir.push('/');
        }
        self.shared_dir = (dir != CANONICAL_SHARED_DIR).then_some(dir);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy of this mapping with `other` merged on top.
    pub fn with(&self, other: &ReplacementMapping) -> ReplacementMapping {
        let mut merged = self.clone();
        merged.update(other.iter());
        merged
    }

    /// Overwrite entries with `pairs`, e.g. the chain context.
    pub fn update<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in pairs {
            self.items.insert(k.into(), v.into());
        }
    }

    /// Substitute every known token in `input`.
    pub fn replace_values(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }
        let mut output = input.to_string();
        for (key, value) in &self.items {
            if !output.contains(key.as_str()) {
                continue;
            }
            let value = self.canonicalize(value);
            output = output.replace(key.as_str(), &escape(&value));
        }
        output
    }

    fn canonicalize(&self, value: &str) -> String {
        match &self.shared_dir {
            Some(dir) if value.starts_with(dir.as_str()) => {
                format!("{CANONICAL_SHARED_DIR}{}", &value[dir.len()..])
            }
            _ => value.to_string(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ReplacementMapping {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut mapping = ReplacementMapping::new();
        mapping.update(iter);
        mapping
    }
}

/// Escape backslashes, double quotes and backticks.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' | '`' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
