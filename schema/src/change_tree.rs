//! Per-instance diff and identity bookkeeping.
//!
//! Every record, list, and map owns one [`ChangeTree`] node; the nodes link
//! upward so a leaf mutation dirties the whole path to the root, and a
//! single encode pass starting at the root reaches every dirty subtree.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::cell::RefCell;

use crate::types::ElementId;

/// Key of one mutated slot: a field order / list index, or a map key.
///
/// `Ord` puts indices in ascending numeric order, which is what makes encode
/// output deterministic for a fixed mutation sequence. Map keys sort after
/// indices; the map codec re-orders them by durable identity before emission.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirtyKey {
    Index(u64),
    Key(String),
}

impl DirtyKey {
    pub fn as_index(&self) -> Option<u64> {
        match self {
            DirtyKey::Index(index) => Some(*index),
            DirtyKey::Key(_) => None,
        }
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            DirtyKey::Index(_) => None,
            DirtyKey::Key(key) => Some(key),
        }
    }
}

pub type ChangeTreeRef = Rc<RefCell<ChangeTree>>;

pub struct ChangeTree {
    /// Owning parent node and this instance's key under it. Tree-shaped:
    /// re-parenting overwrites the previous link.
    parent: Option<(Weak<RefCell<ChangeTree>>, DirtyKey)>,
    /// Keys mutated since the last committed encode.
    changed: BTreeSet<DirtyKey>,
    /// Every key ever mutated; consumed by full-resync passes. Never shrinks.
    all: BTreeSet<DirtyKey>,
    /// Durable map from contained element to its current key/index.
    identity: HashMap<ElementId, DirtyKey>,
    /// Element's previous key, valid for exactly one encode cycle.
    pending_moves: HashMap<ElementId, DirtyKey>,
    /// Elements that survived at least one committed encode. Only these can
    /// produce move records; a brand-new element has no previous key the
    /// other side could resolve.
    committed: HashSet<ElementId>,
    /// Elements replaced out of their slot this cycle. They keep their
    /// identity until commit (a same-cycle re-insert is still a move), then
    /// all tracking is dropped so a reused allocation cannot inherit it.
    stale: HashSet<ElementId>,
    /// Map keys deleted since the last committed encode.
    deleted: BTreeSet<DirtyKey>,
}

pub fn new_change_tree() -> ChangeTreeRef {
    Rc::new(RefCell::new(ChangeTree {
        parent: None,
        changed: BTreeSet::new(),
        all: BTreeSet::new(),
        identity: HashMap::new(),
        pending_moves: HashMap::new(),
        committed: HashSet::new(),
        stale: HashSet::new(),
        deleted: BTreeSet::new(),
    }))
}

impl ChangeTree {
    pub fn mark_changed(&mut self, key: DirtyKey) {
        self.changed.insert(key.clone());
        self.all.insert(key);
        self.touch_parent();
    }

    /// Union every currently-valid key of the owner into the changed set.
    pub fn mark_all_changed<I: IntoIterator<Item = DirtyKey>>(&mut self, keys: I) {
        for key in keys {
            self.changed.insert(key.clone());
            self.all.insert(key);
        }
        self.touch_parent();
    }

    /// Dirty the parent chain without adding a local key. Used for
    /// length-only container changes (e.g. popping the last element).
    pub fn touch(&mut self) {
        self.touch_parent();
    }

    fn touch_parent(&mut self) {
        if let Some((parent, key)) = &self.parent {
            if let Some(parent) = parent.upgrade() {
                parent.borrow_mut().mark_changed(key.clone());
            }
        }
    }

    /// Record that `element`'s key changed, keeping the earliest origin if
    /// the element moves more than once within a cycle. Ignored for elements
    /// never yet committed.
    pub fn record_move(&mut self, element: ElementId, from: DirtyKey) {
        if self.committed.contains(&element) {
            self.pending_moves.entry(element).or_insert(from);
        }
    }

    pub fn pending_move(&self, element: ElementId) -> Option<&DirtyKey> {
        self.pending_moves.get(&element)
    }

    pub fn assign_identity(&mut self, element: ElementId, key: DirtyKey) {
        self.stale.remove(&element);
        self.identity.insert(element, key);
    }

    pub fn identity_of(&self, element: ElementId) -> Option<&DirtyKey> {
        self.identity.get(&element)
    }

    /// Drop the element's identity and any pending move. Called when an
    /// element leaves its container; if it reappears later it is brand-new.
    pub fn forget(&mut self, element: ElementId) {
        self.identity.remove(&element);
        self.pending_moves.remove(&element);
        self.committed.remove(&element);
        self.stale.remove(&element);
    }

    /// Flag an element that was overwritten out of its slot. Its tracking
    /// survives the rest of the cycle, then [`discard`](Self::discard)
    /// forgets it unless a later mutation put it back.
    pub fn retire(&mut self, element: ElementId) {
        self.stale.insert(element);
    }

    pub fn mark_deleted(&mut self, key: DirtyKey) {
        self.deleted.insert(key.clone());
        self.mark_changed(key);
    }

    pub fn unmark_deleted(&mut self, key: &DirtyKey) {
        self.deleted.remove(key);
    }

    pub fn is_deleted(&self, key: &DirtyKey) -> bool {
        self.deleted.contains(key)
    }

    /// Clear the per-cycle state after a committed encode. Identity and the
    /// full-resync key set persist for the instance's life.
    pub fn discard(&mut self) {
        self.changed.clear();
        self.pending_moves.clear();
        self.deleted.clear();
        for element in std::mem::take(&mut self.stale) {
            self.identity.remove(&element);
            self.committed.remove(&element);
        }
        self.committed.extend(self.identity.keys().copied());
    }

    /// Mark an element as seen by the other side (used when applying an
    /// incoming patch, where there is no encode cycle to commit).
    pub fn mark_committed(&mut self, element: ElementId) {
        self.committed.insert(element);
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn changed_keys(&self) -> impl Iterator<Item = &DirtyKey> {
        self.changed.iter()
    }

    pub fn all_keys(&self) -> impl Iterator<Item = &DirtyKey> {
        self.all.iter()
    }

    pub fn set_parent(&mut self, parent: &ChangeTreeRef, key: DirtyKey) {
        self.parent = Some((Rc::downgrade(parent), key));
    }

    pub fn clear_parent(&mut self) {
        self.parent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_keys_iterate_in_ascending_order() {
        let tree = new_change_tree();
        let mut tree = tree.borrow_mut();

        tree.mark_changed(DirtyKey::Index(7));
        tree.mark_changed(DirtyKey::Index(2));
        tree.mark_changed(DirtyKey::Index(5));

        let keys: Vec<u64> = tree.changed_keys().filter_map(DirtyKey::as_index).collect();
        assert_eq!(keys, vec![2, 5, 7]);
    }

    #[test]
    fn discard_keeps_identity_and_all_keys() {
        let tree = new_change_tree();
        let mut tree = tree.borrow_mut();
        let element = ElementId(0xDEAD);

        tree.mark_changed(DirtyKey::Index(1));
        tree.assign_identity(element, DirtyKey::Index(1));
        tree.mark_committed(element);
        tree.record_move(element, DirtyKey::Index(0));
        tree.mark_deleted(DirtyKey::Key("gone".into()));

        tree.discard();

        assert!(!tree.has_changes());
        assert!(tree.pending_move(element).is_none());
        assert!(!tree.is_deleted(&DirtyKey::Key("gone".into())));
        assert_eq!(tree.identity_of(element), Some(&DirtyKey::Index(1)));
        assert_eq!(tree.all_keys().count(), 2);
    }

    #[test]
    fn moves_keep_the_earliest_origin() {
        let tree = new_change_tree();
        let mut tree = tree.borrow_mut();
        let element = ElementId(1);

        tree.mark_committed(element);
        tree.record_move(element, DirtyKey::Index(0));
        tree.record_move(element, DirtyKey::Index(5));

        assert_eq!(tree.pending_move(element), Some(&DirtyKey::Index(0)));
    }

    #[test]
    fn uncommitted_elements_never_move() {
        let tree = new_change_tree();
        let mut tree = tree.borrow_mut();
        let element = ElementId(2);

        tree.assign_identity(element, DirtyKey::Index(0));
        tree.record_move(element, DirtyKey::Index(0));

        assert!(tree.pending_move(element).is_none());
    }

    #[test]
    fn forget_drops_identity_and_pending_move() {
        let tree = new_change_tree();
        let mut tree = tree.borrow_mut();
        let element = ElementId(9);

        tree.assign_identity(element, DirtyKey::Index(3));
        tree.mark_committed(element);
        tree.record_move(element, DirtyKey::Index(1));
        tree.forget(element);

        assert!(tree.identity_of(element).is_none());
        assert!(tree.pending_move(element).is_none());
    }

    #[test]
    fn retired_elements_are_forgotten_at_commit() {
        let tree = new_change_tree();
        let mut tree = tree.borrow_mut();
        let element = ElementId(4);

        tree.assign_identity(element, DirtyKey::Index(0));
        tree.mark_committed(element);
        tree.retire(element);
        tree.discard();

        assert!(tree.identity_of(element).is_none());
        tree.record_move(element, DirtyKey::Index(0));
        assert!(tree.pending_move(element).is_none());
    }

    #[test]
    fn reassignment_cancels_retirement() {
        let tree = new_change_tree();
        let mut tree = tree.borrow_mut();
        let element = ElementId(4);

        tree.assign_identity(element, DirtyKey::Index(0));
        tree.mark_committed(element);
        tree.retire(element);
        // Same cycle: the element came back at another slot.
        tree.assign_identity(element, DirtyKey::Index(2));
        tree.discard();

        assert_eq!(tree.identity_of(element), Some(&DirtyKey::Index(2)));
    }

    #[test]
    fn mutations_dirty_the_parent_chain() {
        let root = new_change_tree();
        let middle = new_change_tree();
        let leaf = new_change_tree();

        middle.borrow_mut().set_parent(&root, DirtyKey::Index(2));
        leaf.borrow_mut().set_parent(&middle, DirtyKey::Key("k".into()));

        leaf.borrow_mut().mark_changed(DirtyKey::Index(0));

        assert!(middle.borrow().has_changes());
        let root_keys: Vec<_> = root.borrow().changed_keys().cloned().collect();
        assert_eq!(root_keys, vec![DirtyKey::Index(2)]);
    }
}
