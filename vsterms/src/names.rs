//! Symbol tables with stack-like rebinding.
//!
//! Giving a name to a value hides the previous binding of that name until the new one is
//! removed. Each value also remembers its *base name*, the first name it received.

use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct SymbolTable<T> {
    bindings: FxHashMap<String, Vec<T>>,
    base_names: FxHashMap<T, String>,
}

impl<T> Default for SymbolTable<T> {
    fn default() -> Self {
        Self {
            bindings: FxHashMap::default(),
            base_names: FxHashMap::default(),
        }
    }
}

impl<T: Copy + Eq + Hash> SymbolTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`, shadowing the current binding of `name`.
    pub fn set_name(&mut self, name: &str, value: T) {
        self.bindings.entry(name.to_owned()).or_default().push(value);
        self.base_names
            .entry(value)
            .or_insert_with(|| name.to_owned());
    }

    /// Remove the current binding of `name`, restoring the one it shadowed.
    pub fn remove_name(&mut self, name: &str) -> Option<T> {
        let stack = self.bindings.get_mut(name)?;
        let value = stack.pop();
        if stack.is_empty() {
            self.bindings.remove(name);
        }
        if let Some(v) = value {
            if self.base_names.get(&v).is_some_and(|n| n == name) {
                self.base_names.remove(&v);
            }
        }
        value
    }

    pub fn get_by_name(&self, name: &str) -> Option<T> {
        self.bindings.get(name).and_then(|s| s.last().copied())
    }

    pub fn get_name(&self, value: T) -> Option<&str> {
        self.base_names.get(&value).map(String::as_str)
    }

    /// Remove the base name of `value`, and the binding of that name if it is the
    /// current one.
    pub fn clear_name(&mut self, value: T) {
        let Some(name) = self.base_names.remove(&value) else {
            return;
        };
        if let Some(stack) = self.bindings.get_mut(&name) {
            if stack.last() == Some(&value) {
                stack.pop();
                if stack.is_empty() {
                    self.bindings.remove(&name);
                }
            }
        }
    }

    /// Forget every binding that refers to `value`.
    pub fn forget(&mut self, value: T) {
        self.base_names.remove(&value);
        self.bindings.retain(|_, stack| {
            stack.retain(|v| *v != value);
            !stack.is_empty()
        });
    }

    /// Every value currently reachable through a name.
    pub fn values(&self) -> impl Iterator<Item = T> + '_ {
        self.bindings
            .values()
            .flat_map(|s| s.iter().copied())
            .chain(self.base_names.keys().copied())
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.base_names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_and_restore() {
        let mut names = SymbolTable::new();
        names.set_name("x", 1u32);
        names.set_name("x", 2u32);
        assert_eq!(names.get_by_name("x"), Some(2));
        assert_eq!(names.remove_name("x"), Some(2));
        assert_eq!(names.get_by_name("x"), Some(1));
        assert_eq!(names.remove_name("x"), Some(1));
        assert_eq!(names.get_by_name("x"), None);
        assert_eq!(names.remove_name("x"), None);
    }

    #[test]
    fn base_name_is_the_first_name() {
        let mut names = SymbolTable::new();
        names.set_name("a", 7u32);
        names.set_name("b", 7u32);
        assert_eq!(names.get_name(7), Some("a"));
        assert_eq!(names.get_by_name("b"), Some(7));

        names.clear_name(7);
        assert_eq!(names.get_name(7), None);
        assert_eq!(names.get_by_name("a"), None);
        assert_eq!(names.get_by_name("b"), Some(7));
    }

    #[test]
    fn forget_drops_every_binding() {
        let mut names = SymbolTable::new();
        names.set_name("a", 1u32);
        names.set_name("b", 1u32);
        names.set_name("a", 2u32);
        names.forget(1);
        assert_eq!(names.get_by_name("b"), None);
        assert_eq!(names.get_by_name("a"), Some(2));
        assert_eq!(names.remove_name("a"), Some(2));
        assert_eq!(names.get_by_name("a"), None);
    }
}
