/// Structural comparison of values
///
/// Reports the first difference between a value and its snapshot as a path plus
/// a short message. Cycles are handled with a visited set of container pairs.
use super::model::{read, Key, Value};
use std::collections::{BTreeSet, HashSet};

const MAX_REPR: usize = 200;

/// First difference found between two values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub path: Vec<String>,
    pub message: String,
}

impl Difference {
    /// Slash-joined path, e.g. `arg[0]/[2]`
    pub fn location(&self) -> String {
        self.path.join("/")
    }
}

/// Compare `before` against `after`; `root` names the compared value in the path
pub fn first_diff(before: &Value, after: &Value, root: &str) -> Option<Difference> {
    let mut walker = DiffWalker::default();
    let mut path = Vec::new();
    if !root.is_empty() {
        path.push(root.to_string());
    }
    walker.diff(before, after, &mut path)
}

pub fn deep_equal(a: &Value, b: &Value) -> bool {
    first_diff(a, b, "").is_none()
}

#[derive(Default)]
struct DiffWalker {
    visited: HashSet<(usize, usize)>,
}

impl DiffWalker {
    fn diff(&mut self, a: &Value, b: &Value, path: &mut Vec<String>) -> Option<Difference> {
        if !same_type(a, b) {
            return Some(found(
                path,
                None,
                format!("type {} -> {}", a.type_name(), b.type_name()),
            ));
        }

        if let (Some(ia), Some(ib)) = (a.identity(), b.identity()) {
            if ia == ib {
                return None;
            }
            if let Value::Opaque(_) = a {
                return Some(found(
                    path,
                    Some("<identity>"),
                    format!("{} -> {}", truncate(a.to_string()), truncate(b.to_string())),
                ));
            }
            // Already being compared further up: assume equal
            if !self.visited.insert((ia, ib)) {
                return None;
            }
        }

        match (a, b) {
            (Value::Tuple(xs), Value::Tuple(ys)) => self.diff_sequence(xs, ys, path),
            (Value::List(xs), Value::List(ys)) => {
                let (Ok(xs), Ok(ys)) = (read(xs), read(ys)) else {
                    return busy(path, a);
                };
                let (xs, ys) = (xs.clone(), ys.clone());
                self.diff_sequence(&xs, &ys, path)
            }
            (Value::Map(xs), Value::Map(ys)) => {
                let (Ok(xs), Ok(ys)) = (read(xs), read(ys)) else {
                    return busy(path, a);
                };
                let (xs, ys) = (xs.clone(), ys.clone());
                let before: BTreeSet<&Key> = xs.keys().collect();
                let after: BTreeSet<&Key> = ys.keys().collect();
                if before != after {
                    let missing: Vec<&Key> = before.difference(&after).copied().collect();
                    if !missing.is_empty() {
                        return Some(found(
                            path,
                            Some("<dict-keys>"),
                            format!("missing keys {}", describe(&missing)),
                        ));
                    }
                    let added: Vec<&Key> = after.difference(&before).copied().collect();
                    return Some(found(
                        path,
                        Some("<dict-keys>"),
                        format!("added keys {}", describe(&added)),
                    ));
                }
                for (key, x) in &xs {
                    let y = ys.get(key)?;
                    path.push(format!("[{}]", key));
                    let diff = self.diff(x, y, path);
                    path.pop();
                    if diff.is_some() {
                        return diff;
                    }
                }
                None
            }
            (Value::Set(xs), Value::Set(ys)) => {
                let (Ok(xs), Ok(ys)) = (read(xs), read(ys)) else {
                    return busy(path, a);
                };
                if *xs == *ys {
                    return None;
                }
                let removed: Vec<&Key> = xs.difference(&ys).collect();
                let added: Vec<&Key> = ys.difference(&xs).collect();
                Some(found(
                    path,
                    None,
                    format!("set changed; -{} +{}", describe(&removed), describe(&added)),
                ))
            }
            (Value::Record(xs), Value::Record(ys)) => {
                let (Ok(xs), Ok(ys)) = (read(xs), read(ys)) else {
                    return busy(path, a);
                };
                let (xs, ys) = (xs.fields.clone(), ys.fields.clone());
                let before: BTreeSet<&String> = xs.keys().collect();
                let after: BTreeSet<&String> = ys.keys().collect();
                if let Some(name) = before.difference(&after).next() {
                    return Some(found(path, Some("<attrs>"), format!("missing attribute '{}'", name)));
                }
                if let Some(name) = after.difference(&before).next() {
                    return Some(found(path, Some("<attrs>"), format!("added attribute '{}'", name)));
                }
                for (name, x) in &xs {
                    let y = ys.get(name)?;
                    path.push(format!(".{}", name));
                    let diff = self.diff(x, y, path);
                    path.pop();
                    if diff.is_some() {
                        return diff;
                    }
                }
                None
            }
            (Value::Float(x), Value::Float(y)) => {
                if x.to_bits() == y.to_bits() || x == y {
                    None
                } else {
                    Some(value_changed(path, a, b))
                }
            }
            (Value::None, Value::None) => None,
            (Value::Bool(x), Value::Bool(y)) if x == y => None,
            (Value::Int(x), Value::Int(y)) if x == y => None,
            (Value::Str(x), Value::Str(y)) if x == y => None,
            (Value::Bytes(x), Value::Bytes(y)) if x == y => None,
            _ => Some(value_changed(path, a, b)),
        }
    }

    fn diff_sequence(&mut self, xs: &[Value], ys: &[Value], path: &mut Vec<String>) -> Option<Difference> {
        if xs.len() != ys.len() {
            return Some(found(path, Some("<len>"), format!("{} -> {}", xs.len(), ys.len())));
        }
        for (index, (x, y)) in xs.iter().zip(ys.iter()).enumerate() {
            path.push(format!("[{}]", index));
            let diff = self.diff(x, y, path);
            path.pop();
            if diff.is_some() {
                return diff;
            }
        }
        None
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    if std::mem::discriminant(a) != std::mem::discriminant(b) {
        return false;
    }
    match (a, b) {
        (Value::Record(_), Value::Record(_)) | (Value::Opaque(_), Value::Opaque(_)) => {
            a.type_name() == b.type_name()
        }
        _ => true,
    }
}

fn found(path: &[String], leaf: Option<&str>, message: String) -> Difference {
    let mut path = path.to_vec();
    if let Some(leaf) = leaf {
        path.push(leaf.to_string());
    }
    Difference { path, message }
}

fn value_changed(path: &[String], a: &Value, b: &Value) -> Difference {
    found(
        path,
        None,
        format!("value {} -> {}", truncate(a.to_string()), truncate(b.to_string())),
    )
}

fn busy(path: &[String], value: &Value) -> Option<Difference> {
    log::warn!(
        "Skipping comparison of mutably borrowed {} at {}",
        value.type_name(),
        path.join("/")
    );
    None
}

fn describe(keys: &[&Key]) -> String {
    let mut rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    rendered.sort();
    format!("[{}]", rendered.join(", "))
}

fn truncate(repr: String) -> String {
    if repr.chars().count() > MAX_REPR {
        let head: String = repr.chars().take(MAX_REPR - 3).collect();
        format!("{}...", head)
    } else {
        repr
    }
}
