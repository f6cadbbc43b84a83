//! Old-index to new-index mapping for deletions from dense index spaces

/// Mapping produced by deleting a set of indices and shifting the survivors
/// down so the space stays contiguous.
#[derive(Debug, Clone, Default)]
pub struct IndexRemap {
    /// Sorted, deduplicated
    removed: Vec<u32>,
}

impl IndexRemap {
    pub fn removing(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut removed: Vec<u32> = indices.into_iter().collect();
        removed.sort_unstable();
        removed.dedup();
        Self { removed }
    }

    pub fn is_identity(&self) -> bool {
        self.removed.is_empty()
    }

    /// New index of `old`, or `None` if it was removed
    pub fn get(&self, old: u32) -> Option<u32> {
        match self.removed.binary_search(&old) {
            Ok(_) => None,
            Err(below) => Some(old - below as u32),
        }
    }

    /// Rewrite `index` in place. Removed indices are left untouched; callers
    /// only remap indices known to survive.
    pub fn apply(&self, index: &mut u32) {
        if let Some(new) = self.get(*index) {
            *index = new;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_removal() {
        let remap = IndexRemap::removing([2]);
        assert_eq!(remap.get(0), Some(0));
        assert_eq!(remap.get(1), Some(1));
        assert_eq!(remap.get(2), None);
        assert_eq!(remap.get(3), Some(2));
        assert_eq!(remap.get(10), Some(9));
    }

    #[test]
    fn test_multiple_removals() {
        let remap = IndexRemap::removing([5, 1, 3, 3]);
        assert_eq!(remap.get(0), Some(0));
        assert_eq!(remap.get(2), Some(1));
        assert_eq!(remap.get(4), Some(2));
        assert_eq!(remap.get(6), Some(3));
        assert!(!remap.is_identity());
        assert!(IndexRemap::removing([]).is_identity());
    }
}
