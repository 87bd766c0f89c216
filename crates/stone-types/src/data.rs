//! # Data Paths and Deep Merge
//!
//! Helpers over `serde_json::Value` trees addressed by dotted paths
//! (`stone.kernel.middleware.incoming`). Numeric segments index arrays.
//!
//! ## Merge Semantics
//!
//! ```text
//!   object + object  -> recursive, key by key
//!   array  + array   -> concatenation (target items first)
//!   null   on either -> the other side (null means unset)
//!   scalar conflict  -> decided by MergeStrategy
//! ```

use serde_json::{Map, Value};

/// Which side wins a scalar conflict during a deep merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Incoming values override existing ones (layer composition).
    SourceWins,
    /// Existing values are kept (`ConfigStore::add`).
    TargetWins,
}

/// Split a dotted path into its non-empty segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Read the value at `path`. An empty path addresses the root.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    split_path(path)
        .into_iter()
        .try_fold(root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// A path is present when it resolves to a non-null value.
pub fn has_path(root: &Value, path: &str) -> bool {
    get_path(root, path).is_some_and(|v| !v.is_null())
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Intermediate scalars are replaced by objects. A numeric segment on an
/// existing array writes in place, padding with nulls when slightly out of
/// range. An index more than `MAX_INDEX_GAP` past the end appends instead.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for segment in parents {
        node = child_mut(node, segment);
    }
    *child_mut(node, last) = value;
}

/// Largest number of nulls `set_path` pads an array with.
pub const MAX_INDEX_GAP: usize = 1024;

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> &'a mut Value {
    match (node, segment.parse::<usize>()) {
        (Value::Array(items), Ok(index)) => match index.checked_sub(items.len()) {
            None => &mut items[index],
            Some(gap) if gap <= MAX_INDEX_GAP => {
                items.resize(items.len() + gap + 1, Value::Null);
                &mut items[index]
            }
            Some(_) => {
                items.push(Value::Null);
                let end = items.len() - 1;
                &mut items[end]
            }
        },
        (node, _) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            &mut node[segment]
        }
    }
}

/// Deep-merge `source` into `target`.
pub fn deep_merge(target: &mut Value, source: Value, strategy: MergeStrategy) {
    if source.is_null() {
        return;
    }
    if target.is_null() {
        *target = source;
        return;
    }

    match (target, source) {
        (Value::Object(left), Value::Object(right)) => {
            for (key, value) in right {
                match left.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value, strategy),
                    None => {
                        left.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(left), Value::Array(right)) => left.extend(right),
        (target, source) => {
            if strategy == MergeStrategy::SourceWins {
                *target = source;
            }
        }
    }
}

/// Merge a sequence of layers left to right, later layers winning.
pub fn merge_all<I>(layers: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    layers.into_iter().fold(Value::Object(Map::new()), |mut acc, layer| {
        deep_merge(&mut acc, layer, MergeStrategy::SourceWins);
        acc
    })
}
