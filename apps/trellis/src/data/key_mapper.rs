use std::collections::HashMap;
use std::hash::Hash;

/// Maps item identities to short opaque keys sent to the client.
///
/// Keys come from a counter and are never handed out twice, so a key the
/// client still holds after its item was released can only miss.
#[derive(Debug)]
pub struct KeyMapper<T> {
    next: u64,
    by_item: HashMap<T, String>,
    by_key: HashMap<String, T>,
}

impl<T> Default for KeyMapper<T> {
    fn default() -> Self {
        Self {
            next: 0,
            by_item: HashMap::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> KeyMapper<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `item`, assigning a new one if it has none.
    pub fn key(&mut self, item: &T) -> String {
        if let Some(key) = self.by_item.get(item) {
            return key.clone();
        }
        self.next += 1;
        let key = self.next.to_string();
        self.by_item.insert(item.clone(), key.clone());
        self.by_key.insert(key.clone(), item.clone());
        key
    }

    pub fn key_of(&self, item: &T) -> Option<&str> {
        self.by_item.get(item).map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.by_key.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Releases the key of `item`. The key is not reused.
    pub fn remove(&mut self, item: &T) -> Option<String> {
        let key = self.by_item.remove(item)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn remove_key(&mut self, key: &str) -> Option<T> {
        let item = self.by_key.remove(key)?;
        self.by_item.remove(&item);
        Some(item)
    }

    pub fn clear(&mut self) {
        self.by_item.clear();
        self.by_key.clear();
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
