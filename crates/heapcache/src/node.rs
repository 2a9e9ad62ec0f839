//! Heap element

/// Entry owned by the cache arena.
///
/// `heap_index` must always equal the node's position in the heap array.
#[derive(Debug, Clone)]
pub(crate) struct Node<K, V> {
    pub(crate) priority: u32,
    pub(crate) heap_index: u32,
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V, priority: u32, heap_index: u32) -> Self {
        Self {
            priority,
            heap_index,
            key,
            value,
        }
    }

    /// Recycle the node for a new entry, handing back the old one
    pub(crate) fn replace(&mut self, key: K, value: V) -> (K, V) {
        let old_key = std::mem::replace(&mut self.key, key);
        let old_value = std::mem::replace(&mut self.value, value);
        (old_key, old_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_replace() {
        let mut node = Node::new("a", 1, 7, 0);
        let old = node.replace("b", 2);

        assert_eq!(old, ("a", 1));
        assert_eq!(node.key, "b");
        assert_eq!(node.value, 2);
        assert_eq!(node.priority, 7);
    }
}
