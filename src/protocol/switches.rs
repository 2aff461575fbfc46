//! Per-request feature switches.
//!
//! Switch lists look like `debug,-images,+lazy_images`. Layers merge with
//! increasing precedence: configured defaults, then the `pw` cookie, then the
//! `pw` query parameter.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Query parameter and cookie name carrying a switch list.
pub const SWITCH_PARAM: &str = "pw";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Switches {
    flags: BTreeMap<String, bool>,
}

impl Switches {
    /// Parse a comma-separated switch list. Unknown characters make an entry
    /// invalid; invalid entries are ignored.
    pub fn parse(list: &str) -> Self {
        let mut switches = Self::default();
        for entry in list.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (value, name) = match entry.as_bytes()[0] {
                b'-' => (false, &entry[1..]),
                b'+' => (true, &entry[1..]),
                _ => (true, entry),
            };
            let name = name.to_ascii_lowercase();
            if !name.is_empty()
                && name
                    .bytes()
                    .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
            {
                switches.flags.insert(name, value);
            }
        }
        switches
    }

    /// Merge the three layers, later ones overriding earlier ones.
    pub fn resolve(defaults: &Switches, cookie: Option<&str>, query: Option<&str>) -> Self {
        let mut merged = defaults.clone();
        for layer in [cookie, query].into_iter().flatten() {
            merged = merged.merge(&Self::parse(layer));
        }
        merged
    }

    pub fn merge(mut self, over: &Switches) -> Self {
        for (name, value) in &over.flags {
            self.flags.insert(name.clone(), *value);
        }
        self
    }

    pub fn set(&mut self, name: &str, value: bool) {
        self.flags.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    pub fn is_on(&self, name: &str, default: bool) -> bool {
        self.get(name).unwrap_or(default)
    }

    /// Master switch; everything is skipped when off.
    pub fn enabled(&self) -> bool {
        self.is_on("enabled", true)
    }

    /// Append the timing comment to documents.
    pub fn debug(&self) -> bool {
        self.is_on("debug", false)
    }

    /// Bypass the service result cache.
    pub fn nocache(&self) -> bool {
        self.is_on("nocache", false)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl fmt::Display for Switches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, value)) in self.flags.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            if !value {
                f.write_str("-")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// Value of cookie `name` in a `Cookie` header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}
