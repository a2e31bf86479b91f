//! B+tree over pages.
//!
//! Every table, FTS shadow structure, and the schema itself is a tree of
//! byte-string keys compared with `memcmp`. Entries live in leaves; interior
//! nodes hold separator keys. A tree is identified by its root page, which
//! never moves: when the root splits, its content moves to a fresh page and
//! the root becomes the new interior node.
//!
//! Values longer than [`MAX_INLINE_VALUE`] are stored on overflow chains.
//! After a delete, a node smaller than [`MIN_FILL`] merges with a sibling
//! when the merged node fits on one page.

mod cursor;
mod node;
mod overflow;

pub use cursor::Cursor;
pub use node::{CellValue, LeafCell, Node, MAX_INLINE_VALUE, MAX_KEY_LEN, MIN_FILL};

use crate::error::{DbError, DbResult};
use crate::pager::{PageRead, PageWrite};
use crate::types::{rowid_from_key, RowId};
use overflow::{chain_pages, free_chain, read_chain, write_chain};

const MAX_DEPTH: usize = 32;

/// Index of the child that may contain `key`.
fn child_index(keys: &[Vec<u8>], key: &[u8]) -> usize {
    keys.partition_point(|k| k.as_slice() <= key)
}

fn read_node<P: PageRead + ?Sized>(view: &P, page: u32) -> DbResult<Node> {
    Node::decode(&view.page(page)?)
}

fn write_node<W: PageWrite + ?Sized>(tx: &mut W, page: u32, node: &Node) -> DbResult<()> {
    node.encode_into(tx.page_mut(page)?)
}

fn load_value<P: PageRead + ?Sized>(view: &P, value: &CellValue) -> DbResult<Vec<u8>> {
    match value {
        CellValue::Inline(v) => Ok(v.clone()),
        CellValue::Overflow { len, first } => read_chain(view, *first, *len as usize),
    }
}

fn check_depth(depth: usize) -> DbResult<()> {
    if depth > MAX_DEPTH {
        return Err(DbError::malformed("b-tree too deep"));
    }
    Ok(())
}

/// Creates an empty tree and returns its root page.
pub fn create<W: PageWrite + ?Sized>(tx: &mut W) -> DbResult<u32> {
    let root = tx.allocate()?;
    write_node(tx, root, &Node::empty_leaf())?;
    Ok(root)
}

/// Looks up `key`.
pub fn get<P: PageRead + ?Sized>(view: &P, root: u32, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
    let mut page = root;
    for _ in 0..=MAX_DEPTH {
        match read_node(view, page)? {
            Node::Interior { keys, children } => page = children[child_index(&keys, key)],
            Node::Leaf { cells } => {
                return match cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
                    Ok(i) => load_value(view, &cells[i].value).map(Some),
                    Err(_) => Ok(None),
                };
            }
        }
    }
    Err(DbError::malformed("b-tree too deep"))
}

/// Inserts `key`, replacing any existing value.
pub fn insert<W: PageWrite + ?Sized>(tx: &mut W, root: u32, key: &[u8], value: &[u8]) -> DbResult<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(DbError::runtime(format!(
            "key of {} bytes exceeds the {MAX_KEY_LEN}-byte limit",
            key.len()
        )));
    }
    let value = if value.len() > MAX_INLINE_VALUE {
        CellValue::Overflow {
            len: u32::try_from(value.len()).map_err(|_| DbError::runtime("value too large"))?,
            first: write_chain(tx, value)?,
        }
    } else {
        CellValue::Inline(value.to_vec())
    };

    if let Some((separator, right)) = insert_rec(tx, root, key, value, 0)? {
        let left = tx.allocate()?;
        let old_root = read_node(tx, root)?;
        write_node(tx, left, &old_root)?;
        write_node(
            tx,
            root,
            &Node::Interior {
                keys: vec![separator],
                children: vec![left, right],
            },
        )?;
    }
    Ok(())
}

type Split = Option<(Vec<u8>, u32)>;

fn insert_rec<W: PageWrite + ?Sized>(
    tx: &mut W,
    page: u32,
    key: &[u8],
    value: CellValue,
    depth: usize,
) -> DbResult<Split> {
    check_depth(depth)?;
    let mut node = read_node(tx, page)?;
    match &mut node {
        Node::Leaf { cells } => match cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
            Ok(i) => {
                let old = std::mem::replace(&mut cells[i].value, value);
                if let CellValue::Overflow { len, first } = old {
                    free_chain(tx, first, len as usize)?;
                }
            }
            Err(i) => cells.insert(
                i,
                LeafCell {
                    key: key.to_vec(),
                    value,
                },
            ),
        },
        Node::Interior { keys, children } => {
            let idx = child_index(keys, key);
            if let Some((separator, right)) = insert_rec(tx, children[idx], key, value, depth + 1)? {
                keys.insert(idx, separator);
                children.insert(idx + 1, right);
            }
        }
    }

    if node.fits() {
        write_node(tx, page, &node)?;
        return Ok(None);
    }
    let (separator, right) = node.split();
    let right_page = tx.allocate()?;
    write_node(tx, page, &node)?;
    write_node(tx, right_page, &right)?;
    Ok(Some((separator, right_page)))
}

/// Removes `key`, returning whether it was present.
pub fn delete<W: PageWrite + ?Sized>(tx: &mut W, root: u32, key: &[u8]) -> DbResult<bool> {
    let (found, _) = delete_rec(tx, root, key, 0)?;
    if found {
        collapse_root(tx, root)?;
    }
    Ok(found)
}

fn delete_rec<W: PageWrite + ?Sized>(
    tx: &mut W,
    page: u32,
    key: &[u8],
    depth: usize,
) -> DbResult<(bool, bool)> {
    check_depth(depth)?;
    let mut node = read_node(tx, page)?;
    match &mut node {
        Node::Leaf { cells } => match cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
            Ok(i) => {
                let cell = cells.remove(i);
                if let CellValue::Overflow { len, first } = cell.value {
                    free_chain(tx, first, len as usize)?;
                }
            }
            Err(_) => return Ok((false, false)),
        },
        Node::Interior { keys, children } => {
            let idx = child_index(keys, key);
            let (found, underflow) = delete_rec(tx, children[idx], key, depth + 1)?;
            if !found {
                return Ok((false, false));
            }
            if underflow {
                merge_children(tx, keys, children, idx)?;
            }
        }
    }
    write_node(tx, page, &node)?;
    Ok((true, node.encoded_len() < MIN_FILL))
}

/// Merges `children[idx]` with a neighbour if the result fits on one page.
fn merge_children<W: PageWrite + ?Sized>(
    tx: &mut W,
    keys: &mut Vec<Vec<u8>>,
    children: &mut Vec<u32>,
    idx: usize,
) -> DbResult<()> {
    if children.len() < 2 {
        return Ok(());
    }
    let left_idx = idx.saturating_sub(1).min(children.len() - 2);
    let (left_page, right_page) = (children[left_idx], children[left_idx + 1]);
    let merged = match (read_node(tx, left_page)?, read_node(tx, right_page)?) {
        (Node::Leaf { cells: mut left }, Node::Leaf { cells: right }) => {
            left.extend(right);
            Node::Leaf { cells: left }
        }
        (
            Node::Interior {
                keys: mut left_keys,
                children: mut left_children,
            },
            Node::Interior {
                keys: right_keys,
                children: right_children,
            },
        ) => {
            left_keys.push(keys[left_idx].clone());
            left_keys.extend(right_keys);
            left_children.extend(right_children);
            Node::Interior {
                keys: left_keys,
                children: left_children,
            }
        }
        _ => return Err(DbError::malformed("sibling nodes of different kinds")),
    };
    if !merged.fits() {
        return Ok(());
    }
    write_node(tx, left_page, &merged)?;
    tx.free(right_page)?;
    keys.remove(left_idx);
    children.remove(left_idx + 1);
    Ok(())
}

/// Pulls the only child of a key-less interior root up into the root page.
fn collapse_root<W: PageWrite + ?Sized>(tx: &mut W, root: u32) -> DbResult<()> {
    for _ in 0..=MAX_DEPTH {
        match read_node(tx, root)? {
            Node::Interior { keys, children } if keys.is_empty() => {
                let child = children[0];
                let child_node = read_node(tx, child)?;
                write_node(tx, root, &child_node)?;
                tx.free(child)?;
            }
            _ => return Ok(()),
        }
    }
    Err(DbError::malformed("b-tree too deep"))
}

/// Largest key in the tree.
pub fn max_key<P: PageRead + ?Sized>(view: &P, root: u32) -> DbResult<Option<Vec<u8>>> {
    max_rec(view, root, 0)
}

fn max_rec<P: PageRead + ?Sized>(view: &P, page: u32, depth: usize) -> DbResult<Option<Vec<u8>>> {
    check_depth(depth)?;
    match read_node(view, page)? {
        Node::Leaf { cells } => Ok(cells.last().map(|c| c.key.clone())),
        Node::Interior { children, .. } => {
            for child in children.iter().rev() {
                if let Some(key) = max_rec(view, *child, depth + 1)? {
                    return Ok(Some(key));
                }
            }
            Ok(None)
        }
    }
}

/// Row id for a new row of a table tree: one past the largest, or 1 for an
/// empty table.
pub fn next_rowid<P: PageRead + ?Sized>(view: &P, root: u32) -> DbResult<RowId> {
    match max_key(view, root)? {
        None => Ok(1),
        Some(key) => {
            let max = rowid_from_key(&key).ok_or_else(|| DbError::malformed("row key is not 8 bytes"))?;
            max.checked_add(1)
                .ok_or_else(|| DbError::runtime("database or table is full"))
        }
    }
}

/// Number of entries.
pub fn count<P: PageRead + ?Sized>(view: &P, root: u32) -> DbResult<u64> {
    count_rec(view, root, 0)
}

fn count_rec<P: PageRead + ?Sized>(view: &P, page: u32, depth: usize) -> DbResult<u64> {
    check_depth(depth)?;
    match read_node(view, page)? {
        Node::Leaf { cells } => Ok(cells.len() as u64),
        Node::Interior { children, .. } => {
            let mut total = 0;
            for child in children {
                total += count_rec(view, child, depth + 1)?;
            }
            Ok(total)
        }
    }
}

/// Every page the tree occupies: nodes and overflow chains, root first.
pub fn pages<P: PageRead + ?Sized>(view: &P, root: u32) -> DbResult<Vec<u32>> {
    let mut out = Vec::new();
    pages_rec(view, root, 0, &mut out)?;
    Ok(out)
}

fn pages_rec<P: PageRead + ?Sized>(view: &P, page: u32, depth: usize, out: &mut Vec<u32>) -> DbResult<()> {
    check_depth(depth)?;
    out.push(page);
    match read_node(view, page)? {
        Node::Leaf { cells } => {
            for cell in cells {
                if let CellValue::Overflow { len, first } = cell.value {
                    out.extend(chain_pages(view, first, len as usize)?);
                }
            }
        }
        Node::Interior { children, .. } => {
            for child in children {
                pages_rec(view, child, depth + 1, out)?;
            }
        }
    }
    Ok(())
}

/// Frees every page of the tree, including the root and overflow chains.
pub fn destroy<W: PageWrite + ?Sized>(tx: &mut W, root: u32) -> DbResult<()> {
    destroy_rec(tx, root, 0)
}

fn destroy_rec<W: PageWrite + ?Sized>(tx: &mut W, page: u32, depth: usize) -> DbResult<()> {
    check_depth(depth)?;
    match read_node(tx, page)? {
        Node::Leaf { cells } => {
            for cell in cells {
                if let CellValue::Overflow { len, first } = cell.value {
                    free_chain(tx, first, len as usize)?;
                }
            }
        }
        Node::Interior { children, .. } => {
            for child in children {
                destroy_rec(tx, child, depth + 1)?;
            }
        }
    }
    tx.free(page)
}

/// Removes every entry, keeping the root.
pub fn clear<W: PageWrite + ?Sized>(tx: &mut W, root: u32) -> DbResult<()> {
    match read_node(tx, root)? {
        Node::Leaf { cells } => {
            for cell in cells {
                if let CellValue::Overflow { len, first } = cell.value {
                    free_chain(tx, first, len as usize)?;
                }
            }
        }
        Node::Interior { children, .. } => {
            for child in children {
                destroy_rec(tx, child, 1)?;
            }
        }
    }
    write_node(tx, root, &Node::empty_leaf())
}
