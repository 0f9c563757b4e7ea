//! Least Recently Used queue of file identifiers
//!
//! The queue is bounded: once `max_queue_size` entries are reached, newly
//! seen files are silently dropped and the `exceeded` flag is raised.
//! Missing an insert is recoverable (the file is reconsidered on its next
//! access); unbounded growth is not.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt::Write as _;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    fid: u64,
    prev: usize,
    next: usize,
}

/// Bounded LRU queue of file identifiers.
///
/// Most recently used at the head, least recently used at the tail.
/// All operations are O(1) except [`Lru::to_json`].
#[derive(Debug)]
pub struct Lru {
    max_queue_size: usize,
    max_queue_size_exceeded: bool,
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    fid_to_node: HashMap<u64, usize>,
}

impl Lru {
    /// Create a queue holding at most `max_queue_size` entries
    pub fn new(max_queue_size: usize) -> Result<Self> {
        if max_queue_size == 0 {
            return Err(Error::MaxQueueSizeIsZero);
        }
        Ok(Self {
            max_queue_size,
            max_queue_size_exceeded: false,
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            fid_to_node: HashMap::new(),
        })
    }

    /// Notify the queue a file has been accessed
    pub fn touch(&mut self, fid: u64) {
        match self.fid_to_node.get(&fid).copied() {
            Some(idx) => {
                self.unlink(idx);
                self.link_front(idx);
            }
            None => {
                if self.fid_to_node.len() == self.max_queue_size {
                    self.max_queue_size_exceeded = true;
                    return;
                }
                let idx = self.alloc(fid);
                self.link_front(idx);
                self.fid_to_node.insert(fid, idx);
            }
        }
    }

    /// Notify the queue a file has been deleted from the namespace
    pub fn forget(&mut self, fid: u64) {
        if let Some(idx) = self.fid_to_node.remove(&fid) {
            self.unlink(idx);
            self.free.push(idx);
        }
    }

    /// Pop and return the identifier of the least recently used file
    pub fn pop_least(&mut self) -> Result<u64> {
        if self.tail == NIL {
            return Err(Error::QueueIsEmpty);
        }
        self.max_queue_size_exceeded = false;

        let idx = self.tail;
        let fid = self.nodes[idx].fid;
        self.unlink(idx);
        self.free.push(idx);
        self.fid_to_node.remove(&fid);
        Ok(fid)
    }

    /// Return true if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Return the queue size
    pub fn size(&self) -> usize {
        self.fid_to_node.len()
    }

    /// Return true if the maximum queue size has been exceeded
    pub fn exceeded(&self) -> bool {
        self.max_queue_size_exceeded
    }

    /// Append the JSON representation of this queue to `out`.
    ///
    /// `max_len` bounds the length of `out`; a value of 0 means unbounded.
    /// The method may overrun the bound but must report it by failing with
    /// [`Error::MaxLenExceeded`] as soon as it does.
    pub fn to_json(&self, out: &mut String, max_len: u64) -> Result<()> {
        write!(
            out,
            "{{\"size\":\"{}\",\"fids_from_MRU_to_LRU\":[",
            self.size()
        )
        .map_err(|e| Error::Internal(e.to_string()))?;

        let mut idx = self.head;
        let mut is_first = true;
        while idx != NIL {
            if is_first {
                is_first = false;
            } else {
                out.push(',');
            }
            write!(out, "\"{:#018x}\"", self.nodes[idx].fid)
                .map_err(|e| Error::Internal(e.to_string()))?;
            check_max_len(out, max_len)?;
            idx = self.nodes[idx].next;
        }

        out.push_str("]}");
        check_max_len(out, max_len)
    }

    fn alloc(&mut self, fid: u64) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Node {
                    fid,
                    prev: NIL,
                    next: NIL,
                };
                idx
            }
            None => {
                self.nodes.push(Node {
                    fid,
                    prev: NIL,
                    next: NIL,
                });
                self.nodes.len() - 1
            }
        }
    }

    fn link_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let Node { prev, next, .. } = self.nodes[idx];
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    #[cfg(test)]
    fn fids_mru_to_lru(&self) -> Vec<u64> {
        let mut fids = Vec::with_capacity(self.size());
        let mut idx = self.head;
        while idx != NIL {
            fids.push(self.nodes[idx].fid);
            idx = self.nodes[idx].next;
        }
        fids
    }
}

fn check_max_len(out: &str, max_len: u64) -> Result<()> {
    if max_len != 0 && (out.len() as u64) > max_len {
        return Err(Error::MaxLenExceeded(max_len));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
