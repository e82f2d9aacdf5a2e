// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dynamic values rendered by the template engine.
//!
//! `DataValue` is a tagged sum; maps keep insertion order and chain to a
//! parent scope on lookup, so loop bodies and subtemplates see enclosing
//! data. Dotted paths (`a.b.c`) address nested maps; assignment can create
//! the intermediate maps on demand.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

/// Parsed subtemplate stored in a data map (`{% def %}` or registered by
/// the emitter), callable with positional parameters.
#[derive(Clone)]
pub struct TemplateDef {
    pub nodes: Rc<Vec<super::Node>>,
    pub params: Vec<String>,
}

impl std::fmt::Debug for TemplateDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TemplateDef(params: {:?})", self.params)
    }
}

/// One dynamically-typed template value.
#[derive(Debug, Clone)]
pub enum DataValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<DataValue>),
    Map(DataMap),
    Template(TemplateDef),
}

impl DataValue {
    /// Condition truthiness: the inverse of cpptempl-style emptiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            DataValue::Bool(value) => *value,
            DataValue::Int(value) => *value != 0,
            DataValue::Str(value) => !value.is_empty(),
            DataValue::List(items) => !items.is_empty(),
            DataValue::Map(map) => !map.is_empty(),
            DataValue::Template(_) => true,
        }
    }

    /// String form used for interpolation and `str()`.
    pub fn render(&self) -> String {
        match self {
            DataValue::Bool(value) => if *value { "true" } else { "false" }.to_string(),
            DataValue::Int(value) => value.to_string(),
            DataValue::Str(value) => value.clone(),
            DataValue::List(_) | DataValue::Map(_) | DataValue::Template(_) => String::new(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Int(value) => Some(*value),
            DataValue::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// `count()` semantics.
    pub fn count(&self) -> i64 {
        match self {
            DataValue::List(items) => items.len() as i64,
            DataValue::Map(map) => map.len() as i64,
            DataValue::Str(value) => value.chars().count() as i64,
            _ => 0,
        }
    }

    /// `dump()` diagnostic form.
    pub fn dump(&self, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        match self {
            DataValue::List(items) => {
                let mut out = format!("{}list ({} items)\n", pad, items.len());
                for item in items {
                    let _ = write!(out, "{}", item.dump(indent + 1));
                }
                out
            }
            DataValue::Map(map) => {
                let mut out = format!("{}map ({} entries)\n", pad, map.len());
                for (key, value) in map.iter() {
                    let _ = writeln!(out, "{}  {} =", pad, key);
                    let _ = write!(out, "{}", value.dump(indent + 2));
                }
                out
            }
            DataValue::Template(def) => format!("{}template{:?}\n", pad, def.params),
            other => format!("{}{}\n", pad, other.render()),
        }
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Int(value)
    }
}

impl From<u32> for DataValue {
    fn from(value: u32) -> Self {
        DataValue::Int(value as i64)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Str(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::Str(value)
    }
}

impl From<Vec<DataValue>> for DataValue {
    fn from(value: Vec<DataValue>) -> Self {
        DataValue::List(value)
    }
}

impl From<DataMap> for DataValue {
    fn from(value: DataMap) -> Self {
        DataValue::Map(value)
    }
}

/// Insertion-ordered string map.
#[derive(Debug, Clone, Default)]
pub struct DataMap {
    keys: Vec<String>,
    entries: BTreeMap<String, DataValue>,
}

impl DataMap {
    pub fn new() -> Self {
        DataMap::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        let key = key.into();
        if !self.entries.contains_key(&key) {
            self.keys.push(key.clone());
        }
        self.entries.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut DataValue> {
        self.entries.get_mut(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.keys
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.as_str(), v)))
    }

    /// Dotted-path lookup within this map only (no parent chaining; the
    /// renderer's scope stack provides that).
    pub fn get_path(&self, path: &str) -> Option<&DataValue> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            match current {
                DataValue::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Dotted-path assignment; creates intermediate maps on demand when
    /// `create` is set, and fails silently otherwise (matching the engine's
    /// lenient lookup rules).
    pub fn set_path(&mut self, path: &str, value: DataValue, create: bool) -> bool {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = match segments.pop() {
            Some(last) => last,
            None => return false,
        };
        let mut current = self;
        for segment in segments {
            if !current.has(segment) {
                if !create {
                    return false;
                }
                current.set(segment, DataMap::new());
            }
            current = match current.get_mut(segment) {
                Some(DataValue::Map(map)) => map,
                _ => return false,
            };
        }
        current.set(last, value);
        true
    }
}
