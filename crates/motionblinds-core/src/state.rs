use serde_json::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Raw state of a bridge or device: the `data` object of a read response or
/// report, kept field-for-field.
pub type StateMap = BTreeMap<String, Value>;

/// Old and new value of one field. `None` means the field was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Fields whose value differs between two successive states.
///
/// A field missing from the set is unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<String, Change>,
}

impl ChangeSet {
    /// Compares `old` and `new` over the union of their keys.
    pub fn diff(old: &StateMap, new: &StateMap) -> Self {
        let mut changes = BTreeMap::new();
        for (key, new_value) in new {
            let old_value = old.get(key);
            if old_value != Some(new_value) {
                changes.insert(
                    key.clone(),
                    Change {
                        old: old_value.cloned(),
                        new: Some(new_value.clone()),
                    },
                );
            }
        }
        for (key, old_value) in old {
            if !new.contains_key(key) {
                changes.insert(
                    key.clone(),
                    Change {
                        old: Some(old_value.clone()),
                        new: None,
                    },
                );
            }
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Change> {
        self.changes.get(field)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Change> {
        self.changes.iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = (&'a String, &'a Change);
    type IntoIter = btree_map::Iter<'a, String, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Reads an unsigned integer field that fits in a `u8`.
pub fn field_u8(state: &StateMap, field: &str) -> Option<u8> {
    state
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| u8::try_from(v).ok())
}
