//! Cache key definitions.
//!
//! A [`RequestSignature`] is the normalized path plus the sorted query
//! parameters of a GET, so `?b=2&a=1` and `?a=1&b=2` share one entry.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestSignature {
    path: String,
    params: Vec<(String, String)>,
}

impl RequestSignature {
    /// Build a signature from a path and extra query parameters.
    ///
    /// A query string embedded in `path` is lifted into the parameter list.
    pub fn new<I, K, V>(path: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (raw_path, inline_query) = match path.split_once('?') {
            Some((raw_path, query)) => (raw_path, Some(query)),
            None => (path, None),
        };

        let mut pairs: Vec<(String, String)> = inline_query
            .map(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        pairs.extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        pairs.sort();

        Self {
            path: normalize_path(raw_path),
            params: pairs,
        }
    }

    pub fn from_path(path: &str) -> Self {
        Self::new(path, std::iter::empty::<(String, String)>())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Query string in canonical (sorted) order, without the leading `?`.
    pub fn query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.params {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    pub fn hash_value(&self) -> u64 {
        hash_value(self)
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}?{}", self.path, self.query_string())
        }
    }
}

/// Leading slash enforced, duplicate slashes collapsed. A trailing slash is
/// kept because the API distinguishes `/api/foods` from `/api/foods/`.
fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    for ch in path.trim().chars() {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }
    normalized
}

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
