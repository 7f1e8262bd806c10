/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Only types that can be compared are stored, so two attribute sets compare
/// by the values they hold rather than by pointer.
trait AttributeTrait: Any + Send + Sync + Debug {
    fn any_ref(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn AttributeTrait) -> bool;
    fn dyn_cmp(&self, other: &dyn AttributeTrait) -> Ordering;
}

impl<T: Any + Send + Sync + Eq + Ord + Debug> AttributeTrait for T {
    fn any_ref(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn AttributeTrait) -> bool {
        other
            .any_ref()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn dyn_cmp(&self, other: &dyn AttributeTrait) -> Ordering {
        match other.any_ref().downcast_ref::<T>() {
            Some(other) => self.cmp(other),
            // Entries are keyed by TypeId, so this only happens if the map is
            // corrupted.
            None => TypeId::of::<T>().cmp(&other.any_ref().type_id()),
        }
    }
}

#[derive(Clone, Debug)]
struct AttributeValue(Arc<dyn AttributeTrait>);

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for AttributeValue {}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.dyn_cmp(other.0.as_ref())
    }
}

/// A set of opaque per-address values indexed by their type.
///
/// A key is the identity of a Rust type: two attributes are distinct keys
/// when their types differ, even if the values look alike. Values are
/// compared structurally, so two `Attributes` are equal when they hold equal
/// values for the same set of types.
///
/// `Attributes` is immutable; `add` and `remove` return a modified copy.
#[derive(Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attributes {
    map: BTreeMap<TypeId, AttributeValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `value` added, replacing any value of the same
    /// type.
    pub fn add<T: Send + Sync + Eq + Ord + Debug + 'static>(&self, value: T) -> Self {
        let mut map = self.map.clone();
        map.insert(TypeId::of::<T>(), AttributeValue(Arc::new(value)));
        Attributes { map }
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|v| v.0.any_ref().downcast_ref())
    }

    /// Returns a copy without the value of type `T`.
    pub fn remove<T: 'static>(&self) -> Self {
        let mut map = self.map.clone();
        map.remove(&TypeId::of::<T>());
        Attributes { map }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct Token(String);

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct OtherToken(String);

    #[test]
    fn equal_values_compare_equal() {
        let a1 = Attributes::new().add(Token("abc".to_string()));
        let a2 = Attributes::new().add(Token("abc".to_string()));
        assert_eq!(a1, a2);
        assert_eq!(a1.cmp(&a2), Ordering::Equal);

        let a3 = Attributes::new().add(Token("abd".to_string()));
        assert_ne!(a1, a3);
        assert!(a1 < a3);
    }

    #[test]
    fn keys_are_type_identity() {
        let a1 = Attributes::new().add(Token("abc".to_string()));
        let a2 = Attributes::new().add(OtherToken("abc".to_string()));
        assert_ne!(a1, a2);
        assert_eq!(a2.get::<Token>(), None);
        assert_eq!(a2.get::<OtherToken>(), Some(&OtherToken("abc".to_string())));
    }

    #[test]
    fn add_replaces_and_remove_copies() {
        let a1 = Attributes::new().add(Token("one".to_string()));
        let a2 = a1.add(Token("two".to_string()));
        assert_eq!(a1.get::<Token>(), Some(&Token("one".to_string())));
        assert_eq!(a2.get::<Token>(), Some(&Token("two".to_string())));

        let a3 = a2.remove::<Token>();
        assert!(a3.is_empty());
        assert!(!a2.is_empty());
    }
}
