//! Named, typed configuration values shared by the protocol engines
//!
//! Engines keep typed settings structs and expose them through a
//! [`ConfigTable`] so that every protocol gets the same `set`/`show`/help
//! behaviour. A failed `set` never changes the stored value.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Name not found: {0}")]
    UnknownName(String),

    #[error("Multiple matches for \"{name}\". Matches: {matches:?}")]
    Ambiguous { name: String, matches: Vec<String> },

    #[error("Invalid value for \"{name}\": {value}")]
    InvalidValue { name: String, value: String },

    #[error("Cannot set {0}")]
    ReadOnly(String),

    #[error("Wrong value type for \"{0}\"")]
    TypeMismatch(String),
}

impl ConfigError {
    pub fn invalid(name: &str, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Char(u8),
}

impl ConfigValue {
    /// Parse `raw` into a value of the same variant as `self`
    pub fn parse_as(&self, raw: &str) -> Option<ConfigValue> {
        match self {
            ConfigValue::Bool(_) => parse_bool(raw).map(ConfigValue::Bool),
            ConfigValue::Int(_) => raw.parse().ok().map(ConfigValue::Int),
            ConfigValue::Float(_) => raw.parse().ok().map(ConfigValue::Float),
            ConfigValue::Str(_) => Some(ConfigValue::Str(raw.to_string())),
            ConfigValue::Char(_) => match raw.as_bytes() {
                [ch] => Some(ConfigValue::Char(*ch)),
                _ => None,
            },
        }
    }

    fn same_variant(&self, other: &ConfigValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{}", v),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Str(v) => write!(f, "{}", v),
            ConfigValue::Char(v) => write!(f, "{}", *v as char),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// Named alternatives for an integer entry, e.g. `("odd", 1)`
pub type Choices = &'static [(&'static str, i64)];

#[derive(Debug, Clone, Serialize)]
pub struct ConfigEntry {
    pub value: ConfigValue,
    pub help: &'static str,
    #[serde(skip)]
    pub choices: Choices,
}

impl ConfigEntry {
    fn display_value(&self) -> String {
        if let ConfigValue::Int(v) = self.value {
            if let Some((name, _)) = self.choices.iter().find(|(_, c)| *c == v) {
                return name.to_string();
            }
        }
        self.value.to_string()
    }

    fn parse(&self, name: &str, raw: &str) -> Result<ConfigValue, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.to_string(),
        };
        if !self.choices.is_empty() {
            return self
                .choices
                .iter()
                .find(|(choice, _)| *choice == raw)
                .map(|(_, v)| ConfigValue::Int(*v))
                .ok_or_else(invalid);
        }
        self.value.parse_as(raw).ok_or_else(invalid)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ConfigNode {
    Entry(ConfigEntry),
    Group {
        table: ConfigTable,
        #[serde(skip)]
        read_only: bool,
    },
}

/// Ordered, nested table of configuration entries
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ConfigTable {
    nodes: BTreeMap<String, ConfigNode>,
}

impl ConfigTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(self, name: &str, value: ConfigValue, help: &'static str) -> Self {
        self.choice_entry(name, value, &[], help)
    }

    pub fn choice_entry(
        mut self,
        name: &str,
        value: ConfigValue,
        choices: Choices,
        help: &'static str,
    ) -> Self {
        self.nodes.insert(
            name.to_string(),
            ConfigNode::Entry(ConfigEntry { value, help, choices }),
        );
        self
    }

    pub fn group(mut self, name: &str, table: ConfigTable) -> Self {
        self.nodes
            .insert(name.to_string(), ConfigNode::Group { table, read_only: false });
        self
    }

    /// A group that `set` refuses to modify
    pub fn read_only_group(mut self, name: &str, table: ConfigTable) -> Self {
        self.nodes
            .insert(name.to_string(), ConfigNode::Group { table, read_only: true });
        self
    }

    /// Look up a value by dotted path, e.g. `send.block-check`
    pub fn get(&self, path: &str) -> Option<&ConfigValue> {
        let mut table = self;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            match table.nodes.get(part)? {
                ConfigNode::Entry(entry) if parts.peek().is_none() => return Some(&entry.value),
                ConfigNode::Group { table: inner, .. } => table = inner,
                ConfigNode::Entry(_) => return None,
            }
        }
        None
    }

    /// Replace a value by dotted path. The variant must not change.
    pub fn put(&mut self, path: &str, value: ConfigValue) -> Result<(), ConfigError> {
        let mut table = self;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let node = table
                .nodes
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownName(path.to_string()))?;
            match node {
                ConfigNode::Entry(entry) if parts.peek().is_none() => {
                    if !entry.value.same_variant(&value) {
                        return Err(ConfigError::TypeMismatch(path.to_string()));
                    }
                    entry.value = value;
                    return Ok(());
                }
                ConfigNode::Group { table: inner, .. } => table = inner,
                ConfigNode::Entry(_) => break,
            }
        }
        Err(ConfigError::UnknownName(path.to_string()))
    }

    pub fn int(&self, path: &str) -> Result<i64, ConfigError> {
        match self.lookup(path)? {
            ConfigValue::Int(v) => Ok(*v),
            _ => Err(ConfigError::TypeMismatch(path.to_string())),
        }
    }

    pub fn float(&self, path: &str) -> Result<f64, ConfigError> {
        match self.lookup(path)? {
            ConfigValue::Float(v) => Ok(*v),
            _ => Err(ConfigError::TypeMismatch(path.to_string())),
        }
    }

    pub fn boolean(&self, path: &str) -> Result<bool, ConfigError> {
        match self.lookup(path)? {
            ConfigValue::Bool(v) => Ok(*v),
            _ => Err(ConfigError::TypeMismatch(path.to_string())),
        }
    }

    pub fn string(&self, path: &str) -> Result<String, ConfigError> {
        match self.lookup(path)? {
            ConfigValue::Str(v) => Ok(v.clone()),
            _ => Err(ConfigError::TypeMismatch(path.to_string())),
        }
    }

    pub fn char(&self, path: &str) -> Result<u8, ConfigError> {
        match self.lookup(path)? {
            ConfigValue::Char(v) => Ok(*v),
            _ => Err(ConfigError::TypeMismatch(path.to_string())),
        }
    }

    /// Integer entry that must fit a `u8`
    pub fn byte(&self, path: &str) -> Result<u8, ConfigError> {
        let n = self.int(path)?;
        u8::try_from(n).map_err(|_| ConfigError::invalid(path, n))
    }

    /// Integer entry that must be at least 1
    pub fn count(&self, path: &str) -> Result<u32, ConfigError> {
        let n = self.int(path)?;
        u32::try_from(n)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| ConfigError::invalid(path, n))
    }

    /// Float entry holding a non-negative number of seconds
    pub fn seconds(&self, path: &str) -> Result<f64, ConfigError> {
        let v = self.float(path)?;
        if v.is_finite() && v >= 0.0 {
            Ok(v)
        } else {
            Err(ConfigError::invalid(path, v))
        }
    }

    fn lookup(&self, path: &str) -> Result<&ConfigValue, ConfigError> {
        self.get(path)
            .ok_or_else(|| ConfigError::UnknownName(path.to_string()))
    }

    /// Apply a `NAME [SUBNAME...] VALUE` line. Names may be abbreviated to
    /// any unique prefix. Returns the dotted path that was changed.
    pub fn set(&mut self, line: &str) -> Result<String, ConfigError> {
        let (word, tail) = split_first_word(line);
        if word.is_empty() {
            return Err(ConfigError::UnknownName(line.trim().to_string()));
        }
        let key = self.resolve(word)?;
        let node = self
            .nodes
            .get_mut(&key)
            .ok_or_else(|| ConfigError::UnknownName(word.to_string()))?;
        match node {
            ConfigNode::Group { read_only: true, .. } => Err(ConfigError::ReadOnly(key)),
            ConfigNode::Group { table, .. } => {
                let sub = table.set(tail)?;
                Ok(format!("{}.{}", key, sub))
            }
            ConfigNode::Entry(entry) => {
                let value = entry.parse(&key, tail)?;
                entry.value = value;
                Ok(key)
            }
        }
    }

    /// Lines of `name: value`, optionally narrowed by a name prefix
    pub fn show(&self, filter: &str) -> Vec<String> {
        let mut lines = Vec::new();
        self.render(filter, "", &mut lines, &|entry| entry.display_value());
        lines
    }

    /// Lines of `name: help`, listing named choices where present
    pub fn describe(&self, filter: &str) -> Vec<String> {
        let mut lines = Vec::new();
        self.render(filter, "", &mut lines, &|entry| {
            if entry.choices.is_empty() {
                entry.help.to_string()
            } else {
                let names: Vec<&str> = entry.choices.iter().map(|(n, _)| *n).collect();
                format!("{} {{{}}}", entry.help, names.join(", "))
            }
        });
        lines
    }

    fn render(
        &self,
        filter: &str,
        pad: &str,
        lines: &mut Vec<String>,
        text: &dyn Fn(&ConfigEntry) -> String,
    ) {
        let (word, tail) = split_first_word(filter);
        let keys: Vec<&String> = self
            .nodes
            .keys()
            .filter(|k| word.is_empty() || k.starts_with(word))
            .collect();
        let width = keys.iter().map(|k| k.len()).max().unwrap_or(0);
        for key in keys {
            match &self.nodes[key] {
                ConfigNode::Entry(entry) => {
                    lines.push(format!("  {}{:width$}: {}", pad, key, text(entry), width = width));
                }
                ConfigNode::Group { table, .. } => {
                    lines.push(format!("  {}{:width$}: ", pad, key, width = width));
                    table.render(tail, &format!("{}    ", pad), lines, text);
                }
            }
        }
    }

    fn resolve(&self, word: &str) -> Result<String, ConfigError> {
        if self.nodes.contains_key(word) {
            return Ok(word.to_string());
        }
        let matches: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| k.starts_with(word))
            .cloned()
            .collect();
        match matches.len() {
            0 => Err(ConfigError::UnknownName(word.to_string())),
            1 => Ok(matches[0].clone()),
            _ => Err(ConfigError::Ambiguous {
                name: word.to_string(),
                matches,
            }),
        }
    }
}

fn split_first_word(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (line, ""),
    }
}

/// Typed settings that can be viewed and edited as a [`ConfigTable`]
pub trait Configurable {
    fn to_table(&self) -> ConfigTable;

    fn load_table(&mut self, table: &ConfigTable) -> Result<(), ConfigError>;

    /// Parse and apply a `NAME VALUE` line; the settings are untouched on error
    fn set_config(&mut self, line: &str) -> Result<String, ConfigError> {
        let mut table = self.to_table();
        let name = table.set(line)?;
        self.load_table(&table)?;
        Ok(name)
    }

    fn show_config(&self, filter: &str) -> Vec<String> {
        self.to_table().show(filter)
    }

    fn describe_config(&self, filter: &str) -> Vec<String> {
        self.to_table().describe(filter)
    }
}
