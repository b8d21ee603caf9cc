//! Ordered connection membership
//!
//! A doubly linked list threaded through a [`Slab`], with an id index for
//! O(1) removal of arbitrary members and a single traversal cursor that
//! survives removal of the member it points at.

use std::collections::HashMap;

use super::id::ConnectionId;
use super::managed::ConnRef;
use crate::pool::{Slab, SlabHandle};

struct Node {
    conn: ConnRef,
    prev: Option<SlabHandle>,
    next: Option<SlabHandle>,
}

/// Insertion-ordered set of connections with an erase-safe cursor.
///
/// The cursor is either a live member or `None`, the end sentinel. Removing
/// the member under the cursor moves the cursor to the following member
/// before the node is unlinked, so the cursor never refers to a removed
/// connection.
pub struct ConnectionSet {
    nodes: Slab<Node>,
    /// Lookup by connection ID
    id_to_handle: HashMap<ConnectionId, SlabHandle>,
    head: Option<SlabHandle>,
    tail: Option<SlabHandle>,
    cursor: Option<SlabHandle>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self {
            nodes: Slab::new(),
            id_to_handle: HashMap::new(),
            head: None,
            tail: None,
            cursor: None,
        }
    }

    /// Append a connection. Returns `false` if it is already a member.
    pub fn push_back(&mut self, conn: ConnRef) -> bool {
        let id = conn.id();
        if self.id_to_handle.contains_key(&id) {
            return false;
        }

        let handle = self.nodes.insert(Node {
            conn,
            prev: self.tail,
            next: None,
        });

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.id_to_handle.insert(id, handle);

        true
    }

    /// Unlink a connection, advancing the cursor first if it points at it
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnRef> {
        let handle = self.id_to_handle.remove(&id)?;

        if self.cursor == Some(handle) {
            self.cursor = self.next_of(handle);
        }

        let node = self.nodes.remove(handle)?;
        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }

        Some(node.conn)
    }

    /// Unlink and return the first member
    pub fn pop_front(&mut self) -> Option<ConnRef> {
        let head = self.head?;
        let id = self.nodes.get(head)?.conn.id();
        self.remove(id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.id_to_handle.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of the first member
    pub fn front(&self) -> Option<SlabHandle> {
        self.head
    }

    /// Member at a position
    pub fn get(&self, handle: SlabHandle) -> Option<&ConnRef> {
        self.nodes.get(handle).map(|node| &node.conn)
    }

    /// Position following `handle`, or `None` at the end
    pub fn next_of(&self, handle: SlabHandle) -> Option<SlabHandle> {
        self.nodes.get(handle).and_then(|node| node.next)
    }

    /// Current cursor position; `None` is the end sentinel
    pub fn cursor(&self) -> Option<SlabHandle> {
        self.cursor
    }

    /// Place the cursor. Positions that are not live members collapse to
    /// the end sentinel.
    pub fn set_cursor(&mut self, position: Option<SlabHandle>) {
        self.cursor = position.filter(|handle| self.nodes.contains(*handle));
    }

    /// Reset the cursor to the end sentinel
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// Connection under the cursor, if any
    pub fn cursor_id(&self) -> Option<ConnectionId> {
        self.cursor
            .and_then(|handle| self.get(handle))
            .map(|conn| conn.id())
    }

    /// Iterate members in insertion order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            next: self.head,
        }
    }

    fn node_mut(&mut self, handle: SlabHandle) -> &mut Node {
        match self.nodes.get_mut(handle) {
            Some(node) => node,
            None => unreachable!("connection list links a vacant slot"),
        }
    }
}

impl Default for ConnectionSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over set members
pub struct Iter<'a> {
    set: &'a ConnectionSet,
    next: Option<SlabHandle>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ConnRef;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.next?;
        let node = self.set.nodes.get(handle)?;
        self.next = node.next;
        Some(&node.conn)
    }
}
