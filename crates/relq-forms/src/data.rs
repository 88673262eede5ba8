//! Submitted form data.
//!
//! [`FormData`] is a multi-value dictionary of the key/value pairs posted by
//! a browser. Keys may repeat; [`get`](FormData::get) returns the last value
//! and [`get_list`](FormData::get_list) returns all of them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A multi-value dictionary of submitted form fields.
///
/// # Examples
///
/// ```
/// use relq_forms::FormData;
///
/// let data = FormData::parse("form-TOTAL_FORMS=2&color=red&color=blue&note=a%20b");
/// assert_eq!(data.get("form-TOTAL_FORMS"), Some("2"));
/// assert_eq!(data.get("color"), Some("blue"));
/// assert_eq!(data.get("note"), Some("a b"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormData {
    data: HashMap<String, Vec<String>>,
}

impl FormData {
    /// Creates an empty `FormData`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` body.
    pub fn parse(body: &str) -> Self {
        let mut data = Self::new();
        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            data.append(key.into_owned(), value.into_owned());
        }
        data
    }

    /// Builds form data from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut data = Self::new();
        for (key, value) in pairs {
            data.append(key, value);
        }
        data
    }

    /// Returns the last value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    /// Returns every value submitted for `key`.
    pub fn get_list(&self, key: &str) -> Option<&[String]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Replaces the values of `key` with a single value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), vec![value.into()]);
    }

    /// Adds a value to `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.entry(key.into()).or_default().push(value.into());
    }

    /// Removes `key` and returns its values.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.data.remove(key)
    }

    /// Returns `true` if `key` was submitted.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns an iterator over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing was submitted.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encodes the data as a form body with keys in sorted order.
    pub fn urlencode(&self) -> String {
        let mut keys: Vec<&String> = self.data.keys().collect();
        keys.sort();
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for key in keys {
            for value in &self.data[key] {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decodes_and_keeps_all_values() {
        let data = FormData::parse("a=1&a=2&b=hello+world&c=&d=%26");
        assert_eq!(data.get("a"), Some("2"));
        assert_eq!(
            data.get_list("a"),
            Some(&["1".to_string(), "2".to_string()][..])
        );
        assert_eq!(data.get("b"), Some("hello world"));
        assert_eq!(data.get("c"), Some(""));
        assert_eq!(data.get("d"), Some("&"));
        assert_eq!(data.get("missing"), None);
        assert_eq!(data.len(), 4);
    }

    #[test]
    fn test_parse_empty_body() {
        assert!(FormData::parse("").is_empty());
    }

    #[test]
    fn test_set_replaces_values() {
        let mut data = FormData::from_pairs([("x", "1"), ("x", "2")]);
        data.set("x", "3");
        assert_eq!(data.get_list("x"), Some(&["3".to_string()][..]));
        assert_eq!(data.remove("x"), Some(vec!["3".to_string()]));
        assert!(!data.contains_key("x"));
    }

    #[test]
    fn test_urlencode_is_sorted_and_reparses() {
        let data: FormData = [("b", "x y"), ("a", "1")].into_iter().collect();
        let body = data.urlencode();
        assert_eq!(body, "a=1&b=x+y");
        assert_eq!(FormData::parse(&body), data);
    }
}
