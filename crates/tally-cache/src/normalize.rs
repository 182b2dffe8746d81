//! Normalization of list-shaped remote payloads.
//!
//! Remote endpoints return flat lists (category groups, unmapped
//! categories, stash items). Consumers want O(1) lookups and cheap partial
//! edits, so lists are normalized into an id-indexed map plus an explicit
//! order array. Editing one item mutates `by_id` and splices `order`
//! without reprocessing the whole payload.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// A value with a stable identifier.
pub trait Keyed {
    type Id: Eq + Hash + Clone + Debug;

    fn id(&self) -> Self::Id;
}

/// An id-indexed view of a list, preserving order.
///
/// `order` may reference ids missing from `by_id` after a partial delete
/// performed elsewhere; every consumer filters such dangling entries
/// instead of panicking.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T: Keyed> {
    by_id: HashMap<T::Id, T>,
    order: Vec<T::Id>,
}

impl<T: Keyed> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Keyed> Normalized<T> {
    /// Normalize a list, preserving input order.
    ///
    /// A duplicate id keeps its first order position; the later value wins.
    pub fn from_list(items: Vec<T>) -> Self {
        let mut by_id = HashMap::with_capacity(items.len());
        let mut order = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id();
            if by_id.insert(id.clone(), item).is_none() {
                order.push(id);
            }
        }
        Self { by_id, order }
    }

    /// Normalize a list, resorting by a composite sort key ascending.
    ///
    /// The sort is stable: ties keep their original input order.
    pub fn from_list_sorted_by<S: Ord>(mut items: Vec<T>, sort_key: impl Fn(&T) -> S) -> Self {
        items.sort_by_key(|item| sort_key(item));
        Self::from_list(items)
    }

    /// Look up an item by id.
    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.by_id.get(id)
    }

    /// Apply an edit to one item in place.
    ///
    /// Returns `false` if the id is unknown.
    pub fn update(&mut self, id: &T::Id, edit: impl FnOnce(&mut T)) -> bool {
        match self.by_id.get_mut(id) {
            Some(item) => {
                edit(item);
                true
            }
            None => false,
        }
    }

    /// Insert or replace an item.
    ///
    /// A new id is appended to the order; a replaced id keeps its position.
    pub fn insert(&mut self, item: T) {
        let id = item.id();
        if self.by_id.insert(id.clone(), item).is_none() {
            self.order.push(id);
        }
    }

    /// Remove one item, splicing it out of the order.
    pub fn remove(&mut self, id: &T::Id) -> Option<T> {
        let removed = self.by_id.remove(id);
        if removed.is_some() {
            self.order.retain(|o| o != id);
        }
        removed
    }

    /// Iterate items in order, skipping dangling order entries.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Collect the ordered items.
    pub fn to_ordered_vec(&self) -> Vec<&T> {
        self.iter_ordered().collect()
    }

    /// The order array, including any dangling ids.
    pub fn order(&self) -> &[T::Id] {
        &self.order
    }

    /// Number of resident items.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no items are resident.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Whether an id is resident.
    pub fn contains(&self, id: &T::Id) -> bool {
        self.by_id.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        group_order: i32,
        item_order: i32,
        name: String,
    }

    impl Keyed for Item {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    fn item(id: u32, group_order: i32, item_order: i32, name: &str) -> Item {
        Item {
            id,
            group_order,
            item_order,
            name: name.to_string(),
        }
    }

    #[test]
    fn preserves_input_order() {
        let n = Normalized::from_list(vec![item(3, 0, 0, "c"), item(1, 0, 0, "a"), item(2, 0, 0, "b")]);
        assert_eq!(n.order(), &[3, 1, 2]);
        assert_eq!(n.get(&1).unwrap().name, "a");
    }

    #[test]
    fn composite_sort_is_stable() {
        // Two items share (group_order, item_order); input order breaks the tie.
        let n = Normalized::from_list_sorted_by(
            vec![
                item(1, 2, 0, "late group"),
                item(2, 1, 5, "tie first"),
                item(3, 1, 5, "tie second"),
                item(4, 1, 0, "early item"),
            ],
            |i| (i.group_order, i.item_order),
        );
        assert_eq!(n.order(), &[4, 2, 3, 1]);
    }

    #[test]
    fn remove_splices_order() {
        let mut n = Normalized::from_list(vec![item(1, 0, 0, "a"), item(2, 0, 0, "b"), item(3, 0, 0, "c")]);
        assert!(n.remove(&2).is_some());
        assert_eq!(n.order(), &[1, 3]);
        assert!(n.remove(&2).is_none());
    }

    #[test]
    fn update_edits_in_place() {
        let mut n = Normalized::from_list(vec![item(1, 0, 0, "old")]);
        assert!(n.update(&1, |i| i.name = "new".to_string()));
        assert_eq!(n.get(&1).unwrap().name, "new");
        assert!(!n.update(&9, |_| {}));
    }

    #[test]
    fn dangling_order_ids_are_filtered() {
        let mut n = Normalized::from_list(vec![item(1, 0, 0, "a"), item(2, 0, 0, "b")]);
        // Simulate a partial delete that bypassed `remove`.
        n.by_id.remove(&1);
        assert_eq!(n.order(), &[1, 2]);

        let visible: Vec<u32> = n.iter_ordered().map(|i| i.id).collect();
        assert_eq!(visible, vec![2]);
        assert_eq!(n.to_ordered_vec().len(), 1);
    }

    #[test]
    fn duplicate_id_keeps_first_position_last_value() {
        let n = Normalized::from_list(vec![item(1, 0, 0, "first"), item(2, 0, 0, "b"), item(1, 0, 0, "second")]);
        assert_eq!(n.order(), &[1, 2]);
        assert_eq!(n.get(&1).unwrap().name, "second");
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(ids in prop::collection::vec(0u32..50, 0..40)) {
            let items: Vec<Item> = ids
                .iter()
                .map(|&id| item(id, (id % 3) as i32, (id % 7) as i32, "x"))
                .collect();

            let once = Normalized::from_list(items.clone());
            let again = Normalized::from_list(once.to_ordered_vec().into_iter().cloned().collect());
            prop_assert_eq!(&once, &again);
        }

        #[test]
        fn sorted_normalization_is_idempotent(ids in prop::collection::vec(0u32..50, 0..40)) {
            let items: Vec<Item> = ids
                .iter()
                .map(|&id| item(id, (id % 3) as i32, (id % 7) as i32, "x"))
                .collect();

            let once = Normalized::from_list_sorted_by(items, |i| (i.group_order, i.item_order));
            let again = Normalized::from_list_sorted_by(
                once.to_ordered_vec().into_iter().cloned().collect(),
                |i| (i.group_order, i.item_order),
            );
            prop_assert_eq!(&once, &again);
        }
    }
}
