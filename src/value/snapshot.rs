/// Deep, structure-preserving copies of values
///
/// Containers are copied through an identity-keyed memo, so aliasing between
/// copied values and reference cycles are reproduced in the copy. Opaque values
/// are shared with the copy and can only be checked by identity afterwards.
use super::model::{address, read, Record, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Deep copier; one instance per snapshot so aliasing across the copied values survives
#[derive(Default)]
pub struct Snapshotter {
    memo: HashMap<usize, Value>,
    opaque_count: usize,
}

impl Snapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of opaque values shared (not copied) so far
    pub fn opaque_count(&self) -> usize {
        self.opaque_count
    }

    pub fn copy(&mut self, value: &Value) -> Value {
        if let Some(id) = value.identity() {
            if let Some(copied) = self.memo.get(&id) {
                return copied.clone();
            }
        }

        match value {
            Value::None => Value::None,
            Value::Bool(b) => Value::Bool(*b),
            Value::Int(i) => Value::Int(*i),
            Value::Float(x) => Value::Float(*x),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Bytes(b) => Value::Bytes(b.clone()),
            Value::Tuple(items) => Value::Tuple(items.iter().map(|item| self.copy(item)).collect()),
            Value::List(rc) => {
                let fresh = Rc::new(RefCell::new(Vec::new()));
                self.memo.insert(address(rc), Value::List(Rc::clone(&fresh)));
                let items = match read(rc) {
                    Ok(items) => items.clone(),
                    Err(_) => return self.share_busy(value),
                };
                let copied: Vec<Value> = items.iter().map(|item| self.copy(item)).collect();
                *fresh.borrow_mut() = copied;
                Value::List(fresh)
            }
            Value::Map(rc) => {
                let fresh = Rc::new(RefCell::new(Default::default()));
                self.memo.insert(address(rc), Value::Map(Rc::clone(&fresh)));
                let entries = match read(rc) {
                    Ok(entries) => entries.clone(),
                    Err(_) => return self.share_busy(value),
                };
                let copied = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.copy(v)))
                    .collect();
                *fresh.borrow_mut() = copied;
                Value::Map(fresh)
            }
            Value::Set(rc) => {
                let members = match read(rc) {
                    Ok(members) => members.clone(),
                    Err(_) => return self.share_busy(value),
                };
                let fresh = Value::Set(Rc::new(RefCell::new(members)));
                self.memo.insert(address(rc), fresh.clone());
                fresh
            }
            Value::Record(rc) => {
                let (type_name, fields) = match read(rc) {
                    Ok(record) => (record.type_name.clone(), record.fields.clone()),
                    Err(_) => return self.share_busy(value),
                };
                let fresh = Rc::new(RefCell::new(Record {
                    type_name,
                    fields: Default::default(),
                }));
                self.memo.insert(address(rc), Value::Record(Rc::clone(&fresh)));
                let copied = fields
                    .iter()
                    .map(|(name, v)| (name.clone(), self.copy(v)))
                    .collect();
                fresh.borrow_mut().fields = copied;
                Value::Record(fresh)
            }
            Value::Opaque(_) => {
                self.opaque_count += 1;
                log::debug!("Sharing opaque {} value with snapshot", value.type_name());
                value.clone()
            }
        }
    }

    // A container borrowed mutably elsewhere cannot be read; keep the live handle.
    fn share_busy(&mut self, value: &Value) -> Value {
        log::warn!(
            "Container of type {} is mutably borrowed; snapshot falls back to identity",
            value.type_name()
        );
        if let Some(id) = value.identity() {
            self.memo.insert(id, value.clone());
        }
        value.clone()
    }
}

/// Deep copy a single value
pub fn deep_copy(value: &Value) -> Value {
    Snapshotter::new().copy(value)
}

/// Identities of every shared container reachable from `value`
pub fn reachable_identities(value: &Value, out: &mut HashSet<usize>) {
    if let Some(id) = value.identity() {
        if !out.insert(id) {
            return;
        }
    }
    for child in children(value) {
        reachable_identities(&child, out);
    }
}

/// Path to the first container reachable from `value` whose identity is in `ids`
pub fn find_shared(value: &Value, ids: &HashSet<usize>, path: &str) -> Option<String> {
    let mut visited = HashSet::new();
    find_shared_inner(value, ids, path.to_string(), &mut visited)
}

fn find_shared_inner(
    value: &Value,
    ids: &HashSet<usize>,
    path: String,
    visited: &mut HashSet<usize>,
) -> Option<String> {
    if let Some(id) = value.identity() {
        if ids.contains(&id) {
            return Some(path);
        }
        if !visited.insert(id) {
            return None;
        }
    }
    match value {
        Value::Tuple(items) => items.iter().enumerate().find_map(|(i, item)| {
            find_shared_inner(item, ids, format!("{}/[{}]", path, i), visited)
        }),
        Value::List(rc) => {
            let items = read(rc).ok()?.clone();
            items.iter().enumerate().find_map(|(i, item)| {
                find_shared_inner(item, ids, format!("{}/[{}]", path, i), visited)
            })
        }
        Value::Map(rc) => {
            let entries = read(rc).ok()?.clone();
            entries.iter().find_map(|(k, v)| {
                find_shared_inner(v, ids, format!("{}/[{}]", path, k), visited)
            })
        }
        Value::Record(rc) => {
            let fields = read(rc).ok()?.fields.clone();
            fields.iter().find_map(|(name, v)| {
                find_shared_inner(v, ids, format!("{}/.{}", path, name), visited)
            })
        }
        _ => None,
    }
}

fn children(value: &Value) -> Vec<Value> {
    match value {
        Value::Tuple(items) => items.clone(),
        Value::List(rc) => read(rc).map(|items| items.clone()).unwrap_or_default(),
        Value::Map(rc) => read(rc)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default(),
        Value::Record(rc) => read(rc)
            .map(|record| record.fields.values().cloned().collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_is_unaffected_by_later_mutation() {
        let original = Value::map([("items", Value::list([Value::from(1)]))]);
        let copy = deep_copy(&original);
        original
            .get_key(&"items".into())
            .unwrap()
            .unwrap()
            .push(Value::from(2))
            .unwrap();
        assert_eq!(copy.to_string(), "{'items': [1]}");
        assert_ne!(copy, original);
    }

    #[test]
    fn test_copy_preserves_aliasing_within_one_snapshot() {
        let shared = Value::list([Value::from(1)]);
        let pair = Value::tuple([shared.clone(), shared]);
        let copy = deep_copy(&pair);
        let first = copy.get_index(0).unwrap();
        let second = copy.get_index(1).unwrap();
        assert!(first.same_identity(&second));
        assert!(!first.same_identity(&pair.get_index(0).unwrap()));
    }

    #[test]
    fn test_copy_of_cycle() {
        let list = Value::list([Value::from(1)]);
        list.push(list.clone()).unwrap();
        let copy = deep_copy(&list);
        let inner = copy.get_index(1).unwrap();
        assert!(inner.same_identity(&copy));
        assert!(!copy.same_identity(&list));
        assert_eq!(copy, list);
    }

    #[test]
    fn test_opaque_values_are_shared() {
        let handle = Value::opaque("Socket", ());
        let mut snapshotter = Snapshotter::new();
        let copy = snapshotter.copy(&Value::list([handle.clone()]));
        assert!(copy.get_index(0).unwrap().same_identity(&handle));
        assert_eq!(snapshotter.opaque_count(), 1);
    }

    #[test]
    fn test_find_shared_reports_path() {
        let inner = Value::list([]);
        let arg = Value::map([("k", inner.clone())]);
        let mut ids = HashSet::new();
        reachable_identities(&arg, &mut ids);

        let result = Value::tuple([Value::from(1), inner]);
        assert_eq!(find_shared(&result, &ids, "return").as_deref(), Some("return/[1]"));
        assert_eq!(find_shared(&Value::list([]), &ids, "return"), None);
    }
}
