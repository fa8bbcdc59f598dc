//! Ordered lists of header fields
//!
//! Unlike a map, a `HeaderFieldList` keeps every field it is given, in the
//! order it was given. Names compare case-insensitively but are stored as
//! they were written. Duplicates are legal here; whoever cares about a
//! particular header being unique (`Host`, say) has to check for it.

use std::iter::FromIterator;
use std::slice;
use std::vec;

/// A single `name: value` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: String,
    value: String
}

impl HeaderField {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> HeaderField {
        HeaderField { name: name.into(), value: value.into() }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case-insensitive name comparison
    #[inline]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFieldList {
    entries: Vec<HeaderField>
}

impl HeaderFieldList {
    pub fn new() -> HeaderFieldList {
        HeaderFieldList { entries: Vec::new() }
    }

    /// Adds a field, even if one with the same name is already present
    pub fn append<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.entries.push(HeaderField::new(name, value));
    }

    /// Replaces the value of the first field called `name`, or appends one
    pub fn overwrite<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        match self.entries.iter_mut().find(|field| field.is(&name)) {
            Some(field) => field.value = value.into(),
            None => self.entries.push(HeaderField::new(name, value))
        }
    }

    /// Drops every field called `name`
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|field| !field.is(name));
    }

    /// The value of the first field called `name`, or `""`
    ///
    /// An empty header and an absent one look the same here; use
    /// `contains` to tell them apart.
    pub fn get(&self, name: &str) -> &str {
        self.entries.iter()
            .find(|field| field.is(name))
            .map_or("", |field| field.value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|field| field.is(name))
    }

    /// Whether a field called `name` has exactly `value` (case-insensitive)
    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.entries.iter()
            .any(|field| field.is(name) && field.value.eq_ignore_ascii_case(value))
    }

    pub fn count(&self, name: &str) -> usize {
        self.entries.iter().filter(|field| field.is(name)).count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<HeaderField> {
        self.entries.iter()
    }

    /// Completely removes all entries
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderFieldList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> HeaderFieldList {
        let mut list = HeaderFieldList::new();
        for (name, value) in iter {
            list.append(name, value);
        }
        list
    }
}

impl IntoIterator for HeaderFieldList {
    type Item = HeaderField;
    type IntoIter = vec::IntoIter<HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a HeaderFieldList {
    type Item = &'a HeaderField;
    type IntoIter = slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Case-normalizes a header name
///
/// The first word, and any words after a hyphen, are capitalized, with all
/// other letters lowercased.
pub fn canonicalize_header_name(name: &str) -> String {
    let lowercased = name.to_ascii_lowercase();
    let mut lower_chars = lowercased.chars();

    let mut normalized = String::with_capacity(lowercased.len());
    if let Some(ch) = lower_chars.next() {
        normalized.push(ch.to_ascii_uppercase());
    }
    else {
        return normalized;
    }

    let mut after_hyphen = false;
    for ch in lower_chars {
        if ch == '-' {
            after_hyphen = true;
            normalized.push(ch);
        }
        else if after_hyphen {
            normalized.push(ch.to_ascii_uppercase());
            after_hyphen = false;
        }
        else {
            normalized.push(ch);
        }
    }

    normalized
}
