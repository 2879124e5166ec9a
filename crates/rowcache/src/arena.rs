// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A generational slot arena whose entries can be threaded onto intrusive doubly-linked lists.
//!
//! Every entry is addressed by a `Handle` (slot index + generation), so a handle to a freed slot
//! is detected rather than silently aliasing whatever reuses the slot. Each entry sits on at most
//! one list at a time; the lists are named by a small `ListKey` enum and their heads live inside
//! the arena. Pushing at either end, unlinking, and moving an entry between lists are all O(1).

/// Names one of the lists an arena maintains.
pub trait ListKey: Copy + Eq {
    /// Number of distinct lists.
    const COUNT: usize;

    /// Dense index of this list, in `0..COUNT`.
    fn ordinal(self) -> usize;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default, Copy, Clone)]
struct Head {
    first: Option<u32>,
    last: Option<u32>,
    len: usize,
}

struct Node<T, L> {
    value: T,
    list: Option<L>,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot<T, L> {
    generation: u32,
    node: Option<Node<T, L>>,
}

pub struct LinkedArena<T, L: ListKey> {
    slots: Vec<Slot<T, L>>,
    free: Vec<u32>,
    heads: Vec<Head>,
    len: usize,
}

impl<T, L: ListKey> Default for LinkedArena<T, L> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T, L: ListKey> LinkedArena<T, L> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: vec![],
            heads: vec![Head::default(); L::COUNT],
            len: 0,
        }
    }

    /// Number of occupied slots, linked or not.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value` in a fresh slot. The entry starts out on no list.
    pub fn insert(&mut self, value: T) -> Handle {
        let node = Node {
            value,
            list: None,
            prev: None,
            next: None,
        };
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    /// Unlink and free the entry, returning its value. The slot's generation is bumped so stale
    /// handles stop resolving.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.node(handle)?;
        self.unlink(handle);
        let slot = &mut self.slots[handle.index as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(node.value)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.node(handle).is_some()
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.node(handle).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.node_mut(handle).map(|n| &mut n.value)
    }

    /// The list the entry is currently on, if any.
    pub fn list_of(&self, handle: Handle) -> Option<L> {
        self.node(handle).and_then(|n| n.list)
    }

    pub fn list_len(&self, list: L) -> usize {
        self.heads[list.ordinal()].len
    }

    pub fn first(&self, list: L) -> Option<Handle> {
        self.heads[list.ordinal()].first.map(|i| self.handle_at(i))
    }

    pub fn last(&self, list: L) -> Option<Handle> {
        self.heads[list.ordinal()].last.map(|i| self.handle_at(i))
    }

    pub fn next(&self, handle: Handle) -> Option<Handle> {
        self.node(handle)?.next.map(|i| self.handle_at(i))
    }

    pub fn prev(&self, handle: Handle) -> Option<Handle> {
        self.node(handle)?.prev.map(|i| self.handle_at(i))
    }

    /// Handles on `list`, front to back.
    pub fn handles(&self, list: L) -> Vec<Handle> {
        self.iter(list).map(|(h, _)| h).collect()
    }

    pub fn iter(&self, list: L) -> ListIter<'_, T, L> {
        ListIter {
            arena: self,
            cursor: self.heads[list.ordinal()].first,
        }
    }

    /// Move the entry to the back of `list`, unlinking it from wherever it was.
    pub fn push_back(&mut self, handle: Handle, list: L) -> bool {
        if !self.contains(handle) {
            return false;
        }
        self.unlink(handle);
        let head = self.heads[list.ordinal()];
        {
            let node = self.linked(handle.index);
            node.list = Some(list);
            node.prev = head.last;
            node.next = None;
        }
        match head.last {
            Some(last) => self.linked(last).next = Some(handle.index),
            None => self.heads[list.ordinal()].first = Some(handle.index),
        }
        let head = &mut self.heads[list.ordinal()];
        head.last = Some(handle.index);
        head.len += 1;
        true
    }

    /// Move the entry to the front of `list`, unlinking it from wherever it was.
    pub fn push_front(&mut self, handle: Handle, list: L) -> bool {
        if !self.contains(handle) {
            return false;
        }
        self.unlink(handle);
        let head = self.heads[list.ordinal()];
        {
            let node = self.linked(handle.index);
            node.list = Some(list);
            node.prev = None;
            node.next = head.first;
        }
        match head.first {
            Some(first) => self.linked(first).prev = Some(handle.index),
            None => self.heads[list.ordinal()].last = Some(handle.index),
        }
        let head = &mut self.heads[list.ordinal()];
        head.first = Some(handle.index);
        head.len += 1;
        true
    }

    /// Take the entry off its list, leaving it in the arena. Returns false if it was not linked.
    pub fn unlink(&mut self, handle: Handle) -> bool {
        let Some(node) = self.node(handle) else {
            return false;
        };
        let Some(list) = node.list else {
            return false;
        };
        let (prev, next) = (node.prev, node.next);
        match prev {
            Some(p) => self.linked(p).next = next,
            None => self.heads[list.ordinal()].first = next,
        }
        match next {
            Some(n) => self.linked(n).prev = prev,
            None => self.heads[list.ordinal()].last = prev,
        }
        self.heads[list.ordinal()].len -= 1;
        let node = self.linked(handle.index);
        node.list = None;
        node.prev = None;
        node.next = None;
        true
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.heads = vec![Head::default(); L::COUNT];
        self.len = 0;
    }

    fn handle_at(&self, index: u32) -> Handle {
        Handle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn node(&self, handle: Handle) -> Option<&Node<T, L>> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, handle: Handle) -> Option<&mut Node<T, L>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_mut()
    }

    // Link fields only ever point at occupied slots.
    fn linked(&mut self, index: u32) -> &mut Node<T, L> {
        self.slots[index as usize]
            .node
            .as_mut()
            .expect("intrusive link points at a vacant slot")
    }
}

pub struct ListIter<'a, T, L: ListKey> {
    arena: &'a LinkedArena<T, L>,
    cursor: Option<u32>,
}

impl<'a, T, L: ListKey> Iterator for ListIter<'a, T, L> {
    type Item = (Handle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.arena.slots[index as usize];
        let node = slot.node.as_ref()?;
        self.cursor = node.next;
        Some((
            Handle {
                index,
                generation: slot.generation,
            },
            &node.value,
        ))
    }
}
