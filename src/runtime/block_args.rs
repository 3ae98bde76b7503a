//! Immutable key/value configuration bag handed to a block at construction

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Block arguments, e.g. parsed from `"spp=256,mode=fast"`
///
/// Bound at construction and never modified afterwards. Keys are kept in
/// sorted order so `Display` output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockArgs {
    entries: BTreeMap<String, String>,
}

impl BlockArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `key=value,key=value` form. Whitespace around keys and
    /// values is trimmed, empty segments are skipped and a bare `key` maps
    /// to an empty value. Later duplicates win.
    pub fn parse(args: &str) -> Self {
        let entries = args
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => (segment.to_string(), String::new()),
            })
            .collect();
        Self { entries }
    }

    /// Builder-style insert, only usable while assembling the bag
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.entries.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Typed lookup. Returns `None` if the key is missing or the value does
    /// not parse as `T`.
    pub fn parse_value<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for BlockArgs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if value.is_empty() {
                write!(f, "{}", key)?;
            } else {
                write!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

impl From<&str> for BlockArgs {
    fn from(args: &str) -> Self {
        Self::parse(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let args = BlockArgs::parse(" spp = 256 , mode=fast,,enable");
        assert_eq!(args.len(), 3);
        assert_eq!(args.get("spp"), Some("256"));
        assert_eq!(args.get("mode"), Some("fast"));
        assert_eq!(args.get("enable"), Some(""));
        assert_eq!(args.parse_value::<u32>("spp"), Some(256));
        assert_eq!(args.parse_value::<u32>("mode"), None);
        assert_eq!(args.get_or("missing", "dflt"), "dflt");
    }

    #[test]
    fn test_display_is_sorted_and_reparses() {
        let args = BlockArgs::new().with("b", 2).with("a", "x").with("flag", "");
        assert_eq!(args.to_string(), "a=x,b=2,flag");
        assert_eq!(BlockArgs::parse(&args.to_string()), args);
    }
}
