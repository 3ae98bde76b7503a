//! Block identifiers of the form `<device>/<BlockName>#<instance>`
//!
//! The framework guarantees a block ID is unique within a session. Partial
//! IDs (`"FFT"`, `"FFT#1"`, `"0/FFT"`) are accepted as match patterns.

use std::fmt;
use std::str::FromStr;

use super::errors::ConstructionError;

/// Fully qualified block ID, e.g. `0/FFT#1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    device_no: usize,
    block_name: String,
    block_count: usize,
}

impl BlockId {
    /// Create a block ID from its parts
    pub fn new(
        device_no: usize,
        block_name: impl Into<String>,
        block_count: usize,
    ) -> Result<Self, ConstructionError> {
        let block_name = block_name.into();
        if !is_valid_name(&block_name) {
            return Err(ConstructionError::InvalidBlockId(block_name));
        }
        Ok(Self {
            device_no,
            block_name,
            block_count,
        })
    }

    /// Index of the device (or crossbar) this block lives on
    pub fn device_no(&self) -> usize {
        self.device_no
    }

    /// Block name, shared by all instances of the same kind
    pub fn block_name(&self) -> &str {
        &self.block_name
    }

    /// Instance number of this block on its device
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Check whether this ID matches a (possibly partial) ID pattern.
    ///
    /// Missing parts in the pattern match anything: `"FFT"` matches every
    /// FFT block, `"0/FFT"` every FFT block on device 0, `"FFT#1"` instance
    /// 1 on every device. Malformed patterns never match.
    pub fn matches(&self, pattern: &str) -> bool {
        match parse_parts(pattern) {
            Some((device, name, count)) => {
                device.is_none_or(|d| d == self.device_no)
                    && name == self.block_name
                    && count.is_none_or(|c| c == self.block_count)
            }
            None => false,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}/{}#{}",
            self.device_no, self.block_name, self.block_count
        )
    }
}

impl FromStr for BlockId {
    type Err = ConstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (device, name, count) =
            parse_parts(s).ok_or_else(|| ConstructionError::InvalidBlockId(s.to_string()))?;
        Ok(Self {
            device_no: device.unwrap_or(0),
            block_name: name.to_string(),
            block_count: count.unwrap_or(0),
        })
    }
}

impl TryFrom<&str> for BlockId {
    type Error = ConstructionError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `[device/]Name[#count]` into its parts
fn parse_parts(s: &str) -> Option<(Option<usize>, &str, Option<usize>)> {
    let (device, rest) = match s.split_once('/') {
        Some((device, rest)) => (Some(device.parse::<usize>().ok()?), rest),
        None => (None, s),
    };
    let (name, count) = match rest.split_once('#') {
        Some((name, count)) => (name, Some(count.parse::<usize>().ok()?)),
        None => (rest, None),
    };
    if !is_valid_name(name) {
        return None;
    }
    Some((device, name, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_id() {
        let id: BlockId = "0/FFT#1".parse().unwrap();
        assert_eq!(id.device_no(), 0);
        assert_eq!(id.block_name(), "FFT");
        assert_eq!(id.block_count(), 1);
        assert_eq!(id.to_string(), "0/FFT#1");
    }

    #[test]
    fn test_parse_partial_ids_fill_defaults() {
        let id: BlockId = "DDC#2".parse().unwrap();
        assert_eq!(id.to_string(), "0/DDC#2");

        let id: BlockId = "1/Radio".parse().unwrap();
        assert_eq!(id.to_string(), "1/Radio#0");
    }

    #[test]
    fn test_malformed_ids_rejected() {
        for bad in ["", "/FFT#1", "x/FFT#1", "0/FFT#", "0/1FFT#0", "0/FF T#0", "FFT#a"] {
            assert!(bad.parse::<BlockId>().is_err(), "'{}' should not parse", bad);
        }
        assert!(BlockId::new(0, "Bad-Name", 0).is_err());
    }

    #[test]
    fn test_matches_partial_patterns() {
        let id: BlockId = "1/FFT#3".parse().unwrap();
        assert!(id.matches("FFT"));
        assert!(id.matches("FFT#3"));
        assert!(id.matches("1/FFT"));
        assert!(id.matches("1/FFT#3"));
        assert!(!id.matches("0/FFT"));
        assert!(!id.matches("FFT#0"));
        assert!(!id.matches("DDC"));
        assert!(!id.matches("not a pattern"));
    }
}
