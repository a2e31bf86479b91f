//! Ordered traversal.

use super::node::{CellValue, Node};
use super::{child_index, load_value, read_node, MAX_DEPTH};
use crate::error::{DbError, DbResult};
use crate::pager::PageRead;

struct Frame {
    node: Node,
    idx: usize,
}

/// Forward cursor over a tree.
///
/// The cursor keeps the decoded path from the root to the current leaf, so
/// the tree must not change while a cursor is in use.
pub struct Cursor<'a, P: PageRead + ?Sized> {
    view: &'a P,
    root: u32,
    stack: Vec<Frame>,
}

impl<'a, P: PageRead + ?Sized> Cursor<'a, P> {
    /// Creates an unpositioned cursor.
    pub fn new(view: &'a P, root: u32) -> Self {
        Self {
            view,
            root,
            stack: Vec::new(),
        }
    }

    /// Positions on the smallest key.
    pub fn first(&mut self) -> DbResult<()> {
        self.stack.clear();
        self.descend_leftmost(self.root)?;
        self.settle()
    }

    /// Positions on the smallest key `>= key`.
    pub fn seek(&mut self, key: &[u8]) -> DbResult<()> {
        self.stack.clear();
        let mut page = self.root;
        loop {
            let node = read_node(self.view, page)?;
            match &node {
                Node::Interior { keys, children } => {
                    let idx = child_index(keys, key);
                    page = children[idx];
                    self.push(Frame { node, idx })?;
                }
                Node::Leaf { cells } => {
                    let idx = cells.partition_point(|c| c.key.as_slice() < key);
                    self.push(Frame { node, idx })?;
                    break;
                }
            }
        }
        self.settle()
    }

    /// Returns true while positioned on an entry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self.stack.last(), Some(Frame { node: Node::Leaf { cells }, idx }) if *idx < cells.len())
    }

    /// Key at the current position.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        match self.stack.last() {
            Some(Frame {
                node: Node::Leaf { cells },
                idx,
            }) => cells.get(*idx).map(|c| c.key.as_slice()),
            _ => None,
        }
    }

    /// Value at the current position.
    pub fn value(&self) -> DbResult<Vec<u8>> {
        let value: Option<&CellValue> = match self.stack.last() {
            Some(Frame {
                node: Node::Leaf { cells },
                idx,
            }) => cells.get(*idx).map(|c| &c.value),
            _ => None,
        };
        let value = value.ok_or_else(|| DbError::misuse("cursor is not positioned on an entry"))?;
        load_value(self.view, value)
    }

    /// Advances to the next entry.
    pub fn next(&mut self) -> DbResult<()> {
        if let Some(frame) = self.stack.last_mut() {
            frame.idx += 1;
        }
        self.settle()
    }

    fn push(&mut self, frame: Frame) -> DbResult<()> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(DbError::malformed("b-tree too deep"));
        }
        self.stack.push(frame);
        Ok(())
    }

    fn descend_leftmost(&mut self, mut page: u32) -> DbResult<()> {
        loop {
            let node = read_node(self.view, page)?;
            let next = match &node {
                Node::Interior { children, .. } => Some(children[0]),
                Node::Leaf { .. } => None,
            };
            self.push(Frame { node, idx: 0 })?;
            match next {
                Some(child) => page = child,
                None => return Ok(()),
            }
        }
    }

    /// Moves off an exhausted leaf onto the next non-empty one.
    fn settle(&mut self) -> DbResult<()> {
        while !self.stack.is_empty() && !self.is_valid() {
            self.stack.pop();
            loop {
                let Some(top) = self.stack.last_mut() else {
                    return Ok(());
                };
                let next_child = match &top.node {
                    Node::Interior { children, .. } if top.idx + 1 < children.len() => {
                        top.idx += 1;
                        Some(children[top.idx])
                    }
                    _ => None,
                };
                match next_child {
                    Some(child) => {
                        self.descend_leftmost(child)?;
                        break;
                    }
                    None => {
                        self.stack.pop();
                    }
                }
            }
        }
        Ok(())
    }
}
