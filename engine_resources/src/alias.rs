//! Alias chains: shared ownership without a reference count.
//!
//! Every [`Handle`] owns one node in an [`AliasArena`]. Handles that alias the
//! same value are linked into a doubly-linked chain of nodes; copying a handle
//! splices a node in right after its source, dropping one bridges its
//! neighbours. When the last node of a chain goes away the value is taken out
//! of its slot and handed to the [`Destroy`] strategy it was adopted with.
//!
//! Nodes live in index-addressed slots with free lists, so a copy never
//! allocates and the whole module stays free of `unsafe`. Debug builds walk
//! the affected chain after every splice.
//!
//! The links are `Rc<RefCell<..>>` underneath and handles are `!Send`. Each
//! value sits in its own cell next to the links, so reading a value never
//! blocks copying, fetching or dropping handles of the same arena.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::error::{integration_fault, ResourceError};

/// Reclaims a value once its last alias is gone.
pub trait Destroy<T> {
    fn destroy(&self, value: T);
}

impl<T, F: Fn(T)> Destroy<T> for F {
    fn destroy(&self, value: T) {
        self(value)
    }
}

/// Default strategy: the value is simply dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropValue;

impl<T> Destroy<T> for DropValue {
    fn destroy(&self, value: T) {
        drop(value);
    }
}

/// Identity of a live value inside an arena.
///
/// Slots are reused, so the generation tells a value apart from whatever
/// previously lived at the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId {
    index: u32,
    generation: u32,
}

impl ValueId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy)]
struct AliasNode {
    pointee: ValueId,
    prev: Option<usize>,
    post: Option<usize>,
}

struct Pointee<T> {
    // Shared with every handle of the chain; the chain alone decides when it
    // is taken out and destroyed.
    value: Rc<RefCell<T>>,
    destroy: Rc<dyn Destroy<T>>,
    // Some member of the chain, so new aliases can be made without a handle.
    anchor: usize,
}

struct ValueSlot<T> {
    generation: u32,
    pointee: Option<Pointee<T>>,
}

struct ArenaState<T> {
    nodes: Vec<Option<AliasNode>>,
    free_nodes: Vec<usize>,
    values: Vec<ValueSlot<T>>,
    free_values: Vec<usize>,
    validate: bool,
}

impl<T> ArenaState<T> {
    fn node(&self, index: usize) -> &AliasNode {
        self.nodes[index].as_ref().expect("alias node slot is vacant")
    }

    fn node_mut(&mut self, index: usize) -> &mut AliasNode {
        self.nodes[index].as_mut().expect("alias node slot is vacant")
    }

    fn try_node(&self, index: usize) -> Result<&AliasNode, String> {
        self.nodes
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| format!("chain links to vacant node {index}"))
    }

    fn insert_node(&mut self, node: AliasNode) -> usize {
        match self.free_nodes.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn insert_value(&mut self, pointee: Pointee<T>) -> ValueId {
        let index = match self.free_values.pop() {
            Some(index) => index,
            None => {
                self.values.push(ValueSlot {
                    generation: 0,
                    pointee: None,
                });
                self.values.len() - 1
            }
        };
        let slot = &mut self.values[index];
        slot.pointee = Some(pointee);
        ValueId {
            index: index as u32,
            generation: slot.generation,
        }
    }

    fn remove_value(&mut self, id: ValueId) -> Option<Pointee<T>> {
        let slot = self.values.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let pointee = slot.pointee.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_values.push(id.index as usize);
        Some(pointee)
    }

    fn pointee(&self, id: ValueId) -> Option<&Pointee<T>> {
        self.values
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.pointee.as_ref())
    }

    fn pointee_mut(&mut self, id: ValueId) -> Option<&mut Pointee<T>> {
        self.values
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.pointee.as_mut())
    }

    fn anchor(&self, id: ValueId) -> Option<usize> {
        self.pointee(id).map(|pointee| pointee.anchor)
    }

    /// Links a new node right after `src`: `src -> new -> old src.post`.
    fn splice_after(&mut self, src: usize) -> usize {
        let AliasNode { pointee, post, .. } = *self.node(src);
        let node = self.insert_node(AliasNode {
            pointee,
            prev: Some(src),
            post,
        });
        self.node_mut(src).post = Some(node);
        if let Some(post) = post {
            self.node_mut(post).prev = Some(node);
        }
        self.check_chain(node);
        node
    }

    /// Unlinks `index`. Returns the pointee when `index` was its last alias.
    fn excise(&mut self, index: usize) -> Option<Pointee<T>> {
        let node = self.nodes[index].take().expect("alias node slot is vacant");
        self.free_nodes.push(index);

        if let Some(prev) = node.prev {
            self.node_mut(prev).post = node.post;
        }
        if let Some(post) = node.post {
            self.node_mut(post).prev = node.prev;
        }

        match node.post.or(node.prev) {
            Some(survivor) => {
                if let Some(pointee) = self.pointee_mut(node.pointee) {
                    if pointee.anchor == index {
                        pointee.anchor = survivor;
                    }
                }
                self.check_chain(survivor);
                None
            }
            None => {
                let pointee = self.remove_value(node.pointee);
                if pointee.is_none() {
                    integration_fault(&ResourceError::ConsistencyViolation(format!(
                        "last alias of {} found no live value",
                        node.pointee
                    )));
                }
                pointee
            }
        }
    }

    fn check_chain(&self, start: usize) {
        if !self.validate {
            return;
        }
        if let Err(reason) = self.validate_chain(start) {
            integration_fault(&ResourceError::ConsistencyViolation(reason));
        }
    }

    fn head_of(&self, start: usize) -> Result<usize, String> {
        let mut head = start;
        let mut steps = 0;
        while let Some(prev) = self.try_node(head)?.prev {
            steps += 1;
            if steps > self.nodes.len() {
                return Err(format!("chain through node {start} loops backwards"));
            }
            if self.try_node(prev)?.post != Some(head) {
                return Err(format!("node {prev} does not link forward to node {head}"));
            }
            head = prev;
        }
        Ok(head)
    }

    fn validate_chain(&self, start: usize) -> Result<usize, String> {
        let pointee = self.try_node(start)?.pointee;
        let mut cursor = Some(self.head_of(start)?);
        let mut len = 0;
        while let Some(current) = cursor {
            len += 1;
            if len > self.nodes.len() {
                return Err(format!("chain through node {start} loops forwards"));
            }
            let node = self.try_node(current)?;
            if node.pointee != pointee {
                return Err(format!(
                    "node {current} aliases {} inside the chain of {pointee}",
                    node.pointee
                ));
            }
            if let Some(post) = node.post {
                if self.try_node(post)?.prev != Some(current) {
                    return Err(format!("node {post} does not link back to node {current}"));
                }
            }
            cursor = node.post;
        }
        if self.pointee(pointee).is_none() {
            return Err(format!("chain through node {start} aliases dead value {pointee}"));
        }
        Ok(len)
    }
}

/// Shared storage for alias nodes and the values they point at.
pub struct AliasArena<T> {
    state: Rc<RefCell<ArenaState<T>>>,
}

impl<T> Clone for AliasArena<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> Default for AliasArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AliasArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliasArena")
            .field("live_values", &self.live_values())
            .field("live_aliases", &self.live_aliases())
            .finish()
    }
}

impl<T> AliasArena<T> {
    /// Empty arena; chain validation follows `debug_assertions`.
    pub fn new() -> Self {
        Self::with_capacity(0, cfg!(debug_assertions))
    }

    pub fn with_capacity(capacity: usize, validate: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(ArenaState {
                nodes: Vec::with_capacity(capacity),
                free_nodes: Vec::new(),
                values: Vec::with_capacity(capacity),
                free_values: Vec::new(),
                validate,
            })),
        }
    }

    /// Number of values with at least one alias.
    pub fn live_values(&self) -> usize {
        self.state
            .borrow()
            .values
            .iter()
            .filter(|slot| slot.pointee.is_some())
            .count()
    }

    /// Number of live handles across all chains.
    pub fn live_aliases(&self) -> usize {
        self.state.borrow().nodes.iter().flatten().count()
    }

    /// Whether `id` names a value that is still alive.
    pub fn contains(&self, id: ValueId) -> bool {
        self.state.borrow().anchor(id).is_some()
    }

    pub fn same_arena(&self, other: &AliasArena<T>) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Walks every chain: exactly one acyclic chain per live value, and no
    /// live value without a chain.
    pub fn check_invariants(&self) -> Result<(), ResourceError> {
        let state = self.state.borrow();
        let mut heads = vec![0usize; state.values.len()];
        for (index, node) in state.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            state
                .validate_chain(index)
                .map_err(ResourceError::ConsistencyViolation)?;
            if node.prev.is_none() {
                heads[node.pointee.index as usize] += 1;
            }
            if state.anchor(node.pointee).is_none() {
                return Err(ResourceError::ConsistencyViolation(format!(
                    "node {index} aliases dead value {}",
                    node.pointee
                )));
            }
        }
        for (index, slot) in state.values.iter().enumerate() {
            if let Some(pointee) = &slot.pointee {
                let anchored = state.nodes.get(pointee.anchor).and_then(Option::as_ref);
                if anchored.map(|node| node.pointee.index as usize) != Some(index) {
                    return Err(ResourceError::ConsistencyViolation(format!(
                        "value slot {index} is anchored outside its chain"
                    )));
                }
            }
            let expected = usize::from(slot.pointee.is_some());
            if heads[index] != expected {
                return Err(ResourceError::ConsistencyViolation(format!(
                    "value slot {index} has {} chains, expected {expected}",
                    heads[index]
                )));
            }
        }
        Ok(())
    }
}

impl<T: 'static> AliasArena<T> {
    /// Takes ownership of `value` and returns its sole alias. The value is
    /// dropped when the chain empties.
    pub fn adopt(&self, value: T) -> Handle<T> {
        self.adopt_with(value, DropValue)
    }

    /// Like [`adopt`](Self::adopt) with a custom destruction strategy.
    pub fn adopt_with(&self, value: T, destroy: impl Destroy<T> + 'static) -> Handle<T> {
        self.adopt_shared(value, Rc::new(destroy))
    }

    pub(crate) fn adopt_shared(&self, value: T, destroy: Rc<dyn Destroy<T>>) -> Handle<T> {
        let value = Rc::new(RefCell::new(value));
        let (node, pointee) = {
            let mut state = self.state.borrow_mut();
            let node = state.free_nodes.pop().unwrap_or_else(|| {
                state.nodes.push(None);
                state.nodes.len() - 1
            });
            let pointee = state.insert_value(Pointee {
                value: Rc::clone(&value),
                destroy,
                anchor: node,
            });
            state.nodes[node] = Some(AliasNode {
                pointee,
                prev: None,
                post: None,
            });
            (node, pointee)
        };
        Handle {
            link: Some(Link {
                arena: self.clone(),
                node,
                pointee,
                value,
            }),
        }
    }
}

impl<T> AliasArena<T> {
    /// New alias of a live value, spliced into its chain. `None` once the
    /// value has been destroyed.
    pub fn alias(&self, id: ValueId) -> Option<Handle<T>> {
        let (node, value) = {
            let mut state = self.state.borrow_mut();
            let pointee = state.pointee(id)?;
            let (anchor, value) = (pointee.anchor, Rc::clone(&pointee.value));
            (state.splice_after(anchor), value)
        };
        Some(Handle {
            link: Some(Link {
                arena: self.clone(),
                node,
                pointee: id,
                value,
            }),
        })
    }
}

struct Link<T> {
    arena: AliasArena<T>,
    node: usize,
    pointee: ValueId,
    value: Rc<RefCell<T>>,
}

/// One alias of a shared value, or nothing at all.
///
/// Cloning splices a new alias into the chain; dropping the last alias of a
/// chain destroys the value. Moves are plain Rust moves: the node index
/// travels with the handle and the chain is untouched.
pub struct Handle<T> {
    link: Option<Link<T>>,
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self { link: None }
    }
}

impl<T: 'static> Handle<T> {
    /// Sole owner of `value` in a private arena.
    pub fn from_raw(value: T) -> Self {
        AliasArena::with_capacity(1, cfg!(debug_assertions)).adopt(value)
    }
}

impl<T> Handle<T> {
    pub fn is_empty(&self) -> bool {
        self.link.is_none()
    }

    pub fn value_id(&self) -> Option<ValueId> {
        self.link.as_ref().map(|link| link.pointee)
    }

    /// Whether both handles alias the same value. Two empty handles do.
    pub fn same_value(&self, other: &Handle<T>) -> bool {
        match (&self.link, &other.link) {
            (None, None) => true,
            (Some(a), Some(b)) => a.arena.same_arena(&b.arena) && a.pointee == b.pointee,
            _ => false,
        }
    }

    /// Number of handles in this handle's chain, itself included.
    pub fn alias_count(&self) -> usize {
        let Some(link) = &self.link else { return 0 };
        let state = link.arena.state.borrow();
        let mut count = 0;
        let mut cursor = state.head_of(link.node).ok();
        while let Some(current) = cursor {
            count += 1;
            cursor = state.node(current).post;
        }
        count
    }

    /// Borrows the value. `None` for an empty handle, or while some alias
    /// holds the value through [`get_mut`](Self::get_mut).
    pub fn get(&self) -> Option<Ref<'_, T>> {
        self.link.as_ref()?.value.try_borrow().ok()
    }

    /// Mutably borrows the value. `None` for an empty handle, or while any
    /// alias of the same value is borrowed.
    pub fn get_mut(&self) -> Option<RefMut<'_, T>> {
        self.link.as_ref()?.value.try_borrow_mut().ok()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.get().map(|value| f(&value))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.get_mut().map(|mut value| f(&mut value))
    }

    /// Moves the alias out, leaving `self` empty.
    pub fn take(&mut self) -> Handle<T> {
        std::mem::take(self)
    }

    /// Makes `self` another alias of `src`'s value.
    pub fn assign(&mut self, src: &Handle<T>) {
        if self.same_value(src) {
            return;
        }
        drop(self.take());
        *self = src.clone();
    }

    /// Move-assignment counterpart of [`assign`](Self::assign).
    pub fn assign_from(&mut self, src: Handle<T>) {
        if self.same_value(&src) {
            return;
        }
        drop(self.take());
        *self = src;
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        let Some(link) = &self.link else {
            return Handle::default();
        };
        let node = link.arena.state.borrow_mut().splice_after(link.node);
        Handle {
            link: Some(Link {
                arena: link.arena.clone(),
                node,
                pointee: link.pointee,
                value: Rc::clone(&link.value),
            }),
        }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        let Some(Link {
            arena,
            node,
            pointee,
            value,
        }) = self.link.take()
        else {
            return;
        };
        let released = arena.state.borrow_mut().excise(node);
        drop(value);
        let Some(Pointee { value, destroy, .. }) = released else {
            return;
        };
        // The last alias is gone, so the slot holds the only reference.
        match Rc::try_unwrap(value) {
            Ok(cell) => {
                tracing::trace!(value = %pointee, "last alias dropped");
                destroy.destroy(cell.into_inner());
            }
            Err(_) => integration_fault(&ResourceError::ConsistencyViolation(format!(
                "value {pointee} is still referenced after its last alias"
            ))),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link {
            None => f.write_str("Handle(empty)"),
            Some(link) => write!(f, "Handle({} @ node {})", link.pointee, link.node),
        }
    }
}
