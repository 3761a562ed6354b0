use extension_trait::extension_trait;
use std::{
    collections::HashMap,
    hash::{BuildHasher, Hash},
};

#[extension_trait]
pub impl<K, V, S> HashMapExtension<K, V, S> for HashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn force_insert(&mut self, k: K, v: V) {
        assert!(self.insert(k, v).is_none());
    }
    fn force_remove(&mut self, k: &K) -> V {
        self.remove(k).unwrap()
    }
}

#[extension_trait]
pub impl<T: PartialEq> VecExtension<T> for Vec<T> {
    /// Removes the first occurrence of `value` and keeps the order of the rest.
    fn force_remove_item(&mut self, value: &T) {
        let index = self.iter().position(|it| it == value).unwrap();
        self.remove(index);
    }
}
