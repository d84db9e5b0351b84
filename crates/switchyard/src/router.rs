//! Compressed-prefix trie mapping [`TypeKey`](crate::TypeKey) bytes to handlers.
//!
//! Type names share long module-path prefixes, so edges carry whole
//! substrings instead of single bytes. Every node keeps its children sorted
//! by the first byte of their prefix (the edge label) and unique by label,
//! which lets both insertion and lookup pick the next edge with a binary
//! search. A node stores at most one value per operation kind.

use crate::key::OpKind;
use std::mem;

#[derive(Debug)]
struct Node<T> {
    /// Bytes consumed when descending into this node.
    prefix: Box<[u8]>,
    /// First byte of `prefix`.
    label: u8,
    /// Sorted by `label`.
    children: Vec<Node<T>>,
    /// Indexed by [`OpKind::slot`].
    handlers: [Option<T>; 2],
}

impl<T> Node<T> {
    fn root() -> Self {
        Self {
            prefix: Box::default(),
            label: 0,
            children: Vec::new(),
            handlers: [None, None],
        }
    }

    fn with_prefix(prefix: &[u8]) -> Self {
        Self {
            prefix: prefix.into(),
            label: prefix[0],
            children: Vec::new(),
            handlers: [None, None],
        }
    }

    fn find_edge(&self, label: u8) -> Result<usize, usize> {
        self.children.binary_search_by_key(&label, |child| child.label)
    }

    fn add_child(&mut self, child: Node<T>) -> &mut Node<T> {
        let pos = match self.find_edge(child.label) {
            Ok(_) => unreachable!("edge label {:#04x} already present", child.label),
            Err(pos) => pos,
        };
        self.children.insert(pos, child);
        &mut self.children[pos]
    }

    fn set_handler(&mut self, slot: usize, value: T, kind: OpKind, key: &[u8]) {
        if self.handlers[slot].is_some() {
            let key = String::from_utf8_lossy(key);
            tracing::error!(%kind, %key, "duplicate handler registration");
            panic!("multiple {kind} handlers registered for `{key}`");
        }
        self.handlers[slot] = Some(value);
    }

    /// Keep the first `at` bytes of the prefix here and push everything else
    /// one level down into a new child.
    fn split(&mut self, at: usize) {
        let head = Node::with_prefix(&self.prefix[..at]);
        let mut demoted = mem::replace(self, head);
        demoted.prefix = demoted.prefix[at..].into();
        demoted.label = demoted.prefix[0];
        self.add_child(demoted);
    }
}

/// The routing table shared by every scope of a bus.
#[derive(Debug)]
pub struct Router<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            len: 0,
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value` under `(kind, key)`.
    ///
    /// # Panics
    ///
    /// If a value is already stored for the same kind and key, or if `kind`
    /// is not exactly one of [`OpKind::ACTION`] and [`OpKind::QUERY`]. Both
    /// are setup bugs.
    pub fn insert(&mut self, kind: OpKind, key: &[u8], value: T) {
        let slot = kind
            .slot()
            .unwrap_or_else(|| panic!("handlers are routed under a single kind, got {kind}"));
        let mut node = &mut self.root;
        let mut search = key;

        loop {
            if search.is_empty() {
                node.set_handler(slot, value, kind, key);
                break;
            }

            let idx = match node.find_edge(search[0]) {
                Ok(idx) => idx,
                Err(_) => {
                    node.add_child(Node::with_prefix(search))
                        .set_handler(slot, value, kind, key);
                    break;
                }
            };

            let common = longest_prefix(search, &node.children[idx].prefix);
            if common == node.children[idx].prefix.len() {
                search = &search[common..];
                node = &mut node.children[idx];
                continue;
            }

            let branch = &mut node.children[idx];
            branch.split(common);
            search = &search[common..];
            if search.is_empty() {
                branch.set_handler(slot, value, kind, key);
            } else {
                branch
                    .add_child(Node::with_prefix(search))
                    .set_handler(slot, value, kind, key);
            }
            break;
        }

        self.len += 1;
    }

    /// Look up the value stored under `(kind, key)`.
    ///
    /// A key only matches when it is consumed exactly at a node holding a
    /// value for `kind`; a value stored for the other kind does not count.
    pub fn find_route(&self, kind: OpKind, key: &[u8]) -> Option<&T> {
        let slot = kind.slot()?;
        let mut node = &self.root;
        let mut search = key;

        while !search.is_empty() {
            let child = &node.children[node.find_edge(search[0]).ok()?];
            search = search.strip_prefix(&*child.prefix)?;
            node = child;
        }

        node.handlers[slot].as_ref()
    }
}

fn longest_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
