//! Indexed binary heap ordered by an explicit 64-bit priority.
//!
//! The heap array is 1-indexed (slot 0 is never used), so for a node at
//! index `i` its children live at `2i` and `2i + 1` and its parent at `i / 2`.
//! Elements are owned by the queue and addressed through generational
//! [`Handle`]s; each element's current heap index is tracked alongside it so
//! arbitrary removal and reprioritization stay O(log n).
//!
//! The queue is ordering-agnostic. A [`PriorityOrder`] decides whether the
//! smallest or the largest priority surfaces first.

use crate::error::QueueError;

/// Priority value. An integer rather than a float so comparisons are total and cheap.
pub type Priority = u64;

/// Ordering relation between two priorities.
pub trait PriorityOrder {
    /// Returns true when an element with priority `next` must sit deeper in
    /// the heap than one with priority `curr`.
    fn sinks(&self, next: Priority, curr: Priority) -> bool;
}

/// Smallest priority surfaces first (the scheduler's "soonest wins").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinFirst;

impl PriorityOrder for MinFirst {
    #[inline]
    fn sinks(&self, next: Priority, curr: Priority) -> bool {
        next > curr
    }
}

/// Largest priority surfaces first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxFirst;

impl PriorityOrder for MaxFirst {
    #[inline]
    fn sinks(&self, next: Priority, curr: Priority) -> bool {
        next < curr
    }
}

impl<F> PriorityOrder for F
where
    F: Fn(Priority, Priority) -> bool,
{
    #[inline]
    fn sinks(&self, next: Priority, curr: Priority) -> bool {
        self(next, curr)
    }
}

/// Stable reference to an element stored in a [`PriorityQueue`].
///
/// A handle stops resolving as soon as its element leaves the queue, even if
/// the underlying slot is later reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    fn not_found(self) -> QueueError {
        QueueError::NotFound {
            index: self.index,
            generation: self.generation,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    priority: Priority,
    // 0 while the slot is vacant.
    position: usize,
    value: Option<T>,
}

/// Indexed binary heap.
#[derive(Debug)]
pub struct PriorityQueue<T, O = MinFirst> {
    heap: Vec<u32>,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    avail: usize,
    step: usize,
    order: O,
}

impl<T> PriorityQueue<T, MinFirst> {
    /// Creates a min-first queue with room for `n` elements.
    pub fn min_first(n: usize) -> Result<Self, QueueError> {
        Self::new(n, MinFirst)
    }
}

impl<T> PriorityQueue<T, MaxFirst> {
    /// Creates a max-first queue with room for `n` elements.
    pub fn max_first(n: usize) -> Result<Self, QueueError> {
        Self::new(n, MaxFirst)
    }
}

impl<T, O: PriorityOrder> PriorityQueue<T, O> {
    /// Creates a queue preallocating `n` element slots.
    ///
    /// `n == 0` is legal. Later growth happens in steps of `n + 1` slots.
    pub fn new(n: usize, order: O) -> Result<Self, QueueError> {
        let step = n + 1;
        let mut heap = Vec::new();
        heap.try_reserve_exact(step)
            .map_err(|_| QueueError::AllocationFailed { requested: step })?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(step)
            .map_err(|_| QueueError::AllocationFailed { requested: step })?;
        let mut free = Vec::new();
        free.try_reserve_exact(slots.capacity())
            .map_err(|_| QueueError::AllocationFailed { requested: step })?;

        // Index 0 is never a live element.
        heap.push(u32::MAX);

        Ok(Self {
            heap,
            slots,
            free,
            avail: step,
            step,
            order,
        })
    }

    /// Number of queued elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len() - 1
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.len() == 1
    }

    /// Element slots available before the next growth step.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.avail - 1
    }

    /// Growth increment, fixed at construction.
    #[must_use]
    pub const fn step(&self) -> usize {
        self.step
    }

    /// Inserts `value` with `priority` and returns its handle.
    ///
    /// On allocation failure nothing is mutated and the queue stays usable.
    pub fn insert(&mut self, value: T, priority: Priority) -> Result<Handle, QueueError> {
        self.reserve_one()?;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| QueueError::AllocationFailed { requested: 1 })?;
                self.slots.push(Slot {
                    generation: 0,
                    priority,
                    position: 0,
                    value: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.priority = priority;
        slot.value = Some(value);
        let generation = slot.generation;

        let pos = self.heap.len();
        self.heap.push(index);
        self.bubble_up(pos);

        Ok(Handle { index, generation })
    }

    /// Sets a new priority for a queued element and restores heap order.
    ///
    /// Returns the previous priority.
    pub fn change_priority(&mut self, handle: Handle, priority: Priority) -> Result<Priority, QueueError> {
        let index = self.resolve(handle)?;
        let slot = &mut self.slots[index];
        let old = slot.priority;
        slot.priority = priority;
        let pos = slot.position;

        if self.order.sinks(old, priority) {
            self.bubble_up(pos);
        } else {
            self.percolate_down(pos);
        }
        Ok(old)
    }

    /// Removes a queued element and hands it back to the caller.
    pub fn remove(&mut self, handle: Handle) -> Result<T, QueueError> {
        let index = self.resolve(handle)?;
        let pos = self.slots[index].position;
        let removed_pri = self.slots[index].priority;

        if let Some(last) = self.heap.pop() {
            if pos < self.heap.len() {
                self.heap[pos] = last;
                self.slots[last as usize].position = pos;
                let replacement_pri = self.slots[last as usize].priority;
                if self.order.sinks(removed_pri, replacement_pri) {
                    self.bubble_up(pos);
                } else {
                    self.percolate_down(pos);
                }
            }
        }

        self.vacate(index).ok_or_else(|| handle.not_found())
    }

    /// Removes and returns the top element, or `None` when empty.
    pub fn pop(&mut self) -> Option<T> {
        self.pop_entry().map(|(_, _, value)| value)
    }

    /// Removes the top element and returns it with its handle and priority.
    pub fn pop_entry(&mut self) -> Option<(Handle, Priority, T)> {
        if self.is_empty() {
            return None;
        }

        let root = self.heap[1];
        let last = self.heap.pop()?;
        if self.heap.len() > 1 {
            self.heap[1] = last;
            self.slots[last as usize].position = 1;
            self.percolate_down(1);
        }

        let slot = &self.slots[root as usize];
        let handle = Handle {
            index: root,
            generation: slot.generation,
        };
        let priority = slot.priority;
        self.vacate(root as usize).map(|value| (handle, priority, value))
    }

    /// The top element without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        let root = *self.heap.get(1)?;
        self.slots[root as usize].value.as_ref()
    }

    /// Handle of the top element.
    #[must_use]
    pub fn peek_handle(&self) -> Option<Handle> {
        let root = *self.heap.get(1)?;
        Some(Handle {
            index: root,
            generation: self.slots[root as usize].generation,
        })
    }

    /// Priority of the top element.
    #[must_use]
    pub fn peek_priority(&self) -> Option<Priority> {
        let root = *self.heap.get(1)?;
        Some(self.slots[root as usize].priority)
    }

    /// Returns true if `handle` refers to a queued element.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.resolve(handle).is_ok()
    }

    /// Borrow a queued element.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let index = self.resolve(handle).ok()?;
        self.slots[index].value.as_ref()
    }

    /// Mutably borrow a queued element. Its priority cannot change through this.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let index = self.resolve(handle).ok()?;
        self.slots[index].value.as_mut()
    }

    /// Current priority of a queued element.
    #[must_use]
    pub fn priority(&self, handle: Handle) -> Option<Priority> {
        let index = self.resolve(handle).ok()?;
        Some(self.slots[index].priority)
    }

    /// Current 1-based heap index of a queued element.
    #[must_use]
    pub fn position(&self, handle: Handle) -> Option<usize> {
        let index = self.resolve(handle).ok()?;
        Some(self.slots[index].position)
    }

    /// Handle of the element stored at heap index `pos`.
    #[must_use]
    pub fn handle_at(&self, pos: usize) -> Option<Handle> {
        if pos == 0 {
            return None;
        }
        let index = *self.heap.get(pos)?;
        Some(Handle {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    /// Every queued element in heap-array order (not priority order).
    pub fn iter(&self) -> impl Iterator<Item = (Handle, Priority, &T)> + '_ {
        self.heap[1..].iter().filter_map(move |&index| {
            let slot = &self.slots[index as usize];
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index,
                        generation: slot.generation,
                    },
                    slot.priority,
                    value,
                )
            })
        })
    }

    /// Walks every queued element in the order successive pops would yield,
    /// without disturbing the queue.
    #[must_use]
    pub fn iter_in_order(&self) -> InOrder<'_, T, O> {
        let slots = self
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| Slot {
                generation: 0,
                priority: slot.priority,
                position: slot.position,
                value: slot.value.as_ref().map(|_| index as u32),
            })
            .collect();

        InOrder {
            source: self,
            shadow: PriorityQueue {
                heap: self.heap.clone(),
                slots,
                free: Vec::new(),
                avail: self.heap.len(),
                step: self.step,
                order: Borrowed(&self.order),
            },
        }
    }

    /// Checks the heap property over the whole live range.
    ///
    /// O(n); intended for tests and debug assertions.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.subtree_is_valid(1)
    }

    fn subtree_is_valid(&self, pos: usize) -> bool {
        for child in [pos << 1, (pos << 1) + 1] {
            if child < self.heap.len() {
                if self.order.sinks(self.pri_at(pos), self.pri_at(child)) {
                    return false;
                }
                if !self.subtree_is_valid(child) {
                    return false;
                }
            }
        }
        true
    }

    fn reserve_one(&mut self) -> Result<(), QueueError> {
        if self.heap.len() >= self.avail {
            self.heap
                .try_reserve_exact(self.step)
                .map_err(|_| QueueError::AllocationFailed { requested: self.step })?;
            self.avail += self.step;
        }
        if self.free.is_empty() && self.slots.len() == self.slots.capacity() {
            self.slots
                .try_reserve_exact(self.step)
                .map_err(|_| QueueError::AllocationFailed { requested: self.step })?;
            // Keep the free list able to hold every slot, so vacating never allocates.
            let want = self.slots.capacity().saturating_sub(self.free.len());
            self.free
                .try_reserve_exact(want)
                .map_err(|_| QueueError::AllocationFailed { requested: want })?;
        }
        Ok(())
    }

    fn resolve(&self, handle: Handle) -> Result<usize, QueueError> {
        let index = handle.index as usize;
        match self.slots.get(index) {
            Some(slot) if slot.generation == handle.generation && slot.position != 0 => Ok(index),
            _ => Err(handle.not_found()),
        }
    }

    fn vacate(&mut self, index: usize) -> Option<T> {
        let slot = &mut self.slots[index];
        slot.position = 0;
        slot.generation = slot.generation.wrapping_add(1);
        let value = slot.value.take();
        self.free.push(index as u32);
        value
    }

    #[inline]
    fn pri_at(&self, pos: usize) -> Priority {
        self.slots[self.heap[pos] as usize].priority
    }

    fn bubble_up(&mut self, mut pos: usize) {
        let moving = self.heap[pos];
        let moving_pri = self.slots[moving as usize].priority;

        while pos > 1 {
            let parent = pos >> 1;
            let parent_slot = self.heap[parent];
            if !self.order.sinks(self.slots[parent_slot as usize].priority, moving_pri) {
                break;
            }
            self.heap[pos] = parent_slot;
            self.slots[parent_slot as usize].position = pos;
            pos = parent;
        }

        self.heap[pos] = moving;
        self.slots[moving as usize].position = pos;
    }

    fn max_child(&self, pos: usize) -> Option<usize> {
        let child = pos << 1;
        if child >= self.heap.len() {
            return None;
        }
        if child + 1 < self.heap.len() && self.order.sinks(self.pri_at(child), self.pri_at(child + 1)) {
            return Some(child + 1);
        }
        Some(child)
    }

    fn percolate_down(&mut self, mut pos: usize) {
        let moving = self.heap[pos];
        let moving_pri = self.slots[moving as usize].priority;

        while let Some(child) = self.max_child(pos) {
            if !self.order.sinks(moving_pri, self.pri_at(child)) {
                break;
            }
            let child_slot = self.heap[child];
            self.heap[pos] = child_slot;
            self.slots[child_slot as usize].position = pos;
            pos = child;
        }

        self.heap[pos] = moving;
        self.slots[moving as usize].position = pos;
    }
}

struct Borrowed<'a, O>(&'a O);

impl<O: PriorityOrder> PriorityOrder for Borrowed<'_, O> {
    #[inline]
    fn sinks(&self, next: Priority, curr: Priority) -> bool {
        self.0.sinks(next, curr)
    }
}

/// Ordered, non-destructive walk over a [`PriorityQueue`].
pub struct InOrder<'a, T, O> {
    source: &'a PriorityQueue<T, O>,
    shadow: PriorityQueue<u32, Borrowed<'a, O>>,
}

impl<'a, T, O: PriorityOrder> Iterator for InOrder<'a, T, O> {
    type Item = (Handle, Priority, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.shadow.pop()?;
        let slot = &self.source.slots[index as usize];
        let value = slot.value.as_ref()?;
        Some((
            Handle {
                index,
                generation: slot.generation,
            },
            slot.priority,
            value,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.shadow.len();
        (n, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_positions<T, O: PriorityOrder>(q: &PriorityQueue<T, O>) {
        for (handle, _, _) in q.iter() {
            let pos = q.position(handle).unwrap();
            assert_eq!(q.handle_at(pos), Some(handle));
        }
    }

    #[test]
    fn test_pop_order_with_growth() {
        let mut q = PriorityQueue::min_first(4).unwrap();
        for p in [50u64, 10, 40, 20, 30] {
            q.insert(p, p).unwrap();
            assert!(q.is_valid());
        }
        assert_eq!(q.len(), 5);

        let mut popped = Vec::new();
        let mut sizes = Vec::new();
        while let Some(v) = q.pop() {
            popped.push(v);
            sizes.push(q.len());
            assert!(q.is_valid());
        }
        assert_eq!(popped, vec![10, 20, 30, 40, 50]);
        assert_eq!(sizes, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_zero_capacity_is_usable() {
        let mut q: PriorityQueue<&str> = PriorityQueue::min_first(0).unwrap();
        assert_eq!(q.capacity(), 0);
        assert!(q.pop().is_none());
        assert!(q.peek().is_none());
        q.insert("a", 2).unwrap();
        q.insert("b", 1).unwrap();
        assert_eq!(q.peek(), Some(&"b"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), Some("a"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_growth_steps_by_initial_capacity() {
        let mut q = PriorityQueue::min_first(3).unwrap();
        assert_eq!(q.step(), 4);
        for i in 0..10u64 {
            q.insert(i, 100 - i).unwrap();
        }
        assert!(q.capacity() >= 10);
        assert_eq!(q.len(), 10);
        assert_eq!(q.peek(), Some(&9));
    }

    #[test]
    fn test_max_first_order() {
        let mut q = PriorityQueue::max_first(2).unwrap();
        for p in [3u64, 9, 1, 7] {
            q.insert(p, p).unwrap();
        }
        let out: Vec<u64> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(out, vec![9, 7, 3, 1]);
    }

    #[test]
    fn test_closure_order() {
        // Even priorities first, then ascending.
        let order = |next: u64, curr: u64| (next % 2, next) > (curr % 2, curr);
        let mut q = PriorityQueue::new(4, order).unwrap();
        for p in [5u64, 2, 3, 8, 4] {
            q.insert(p, p).unwrap();
        }
        let out: Vec<u64> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(out, vec![2, 4, 8, 3, 5]);
    }

    #[test]
    fn test_remove_middle_and_last() {
        let mut q = PriorityQueue::min_first(8).unwrap();
        let handles: Vec<Handle> = [7u64, 3, 9, 1, 5, 8]
            .iter()
            .map(|&p| q.insert(p, p).unwrap())
            .collect();

        assert_eq!(q.remove(handles[0]).unwrap(), 7);
        assert!(q.is_valid());
        assert_positions(&q);

        // Whatever sits last in the array is removed without a repair step.
        let last = q.handle_at(q.len()).unwrap();
        q.remove(last).unwrap();
        assert!(q.is_valid());
        assert_positions(&q);
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn test_change_priority_both_directions() {
        let mut q = PriorityQueue::min_first(4).unwrap();
        let a = q.insert('a', 10).unwrap();
        let b = q.insert('b', 20).unwrap();
        let c = q.insert('c', 30).unwrap();

        assert_eq!(q.change_priority(c, 5).unwrap(), 30);
        assert_eq!(q.peek(), Some(&'c'));
        assert!(q.is_valid());

        q.change_priority(c, 50).unwrap();
        assert_eq!(q.peek(), Some(&'a'));
        q.change_priority(a, 40).unwrap();
        assert_eq!(q.peek(), Some(&'b'));
        assert!(q.is_valid());
        assert_positions(&q);
        assert_eq!(q.priority(b), Some(20));
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut q = PriorityQueue::min_first(2).unwrap();
        let h = q.insert("x", 1).unwrap();
        assert_eq!(q.pop(), Some("x"));
        assert!(!q.contains(h));
        assert!(matches!(q.remove(h), Err(QueueError::NotFound { .. })));
        assert!(matches!(q.change_priority(h, 3), Err(QueueError::NotFound { .. })));

        // The slot gets reused but the old handle still does not resolve.
        let h2 = q.insert("y", 2).unwrap();
        assert_ne!(h, h2);
        assert!(q.get(h).is_none());
        assert_eq!(q.get(h2), Some(&"y"));
    }

    #[test]
    fn test_iter_in_order_leaves_queue_intact() {
        let mut q = PriorityQueue::min_first(4).unwrap();
        for p in [4u64, 2, 6, 1, 3] {
            q.insert(p * 10, p).unwrap();
        }
        let walked: Vec<u64> = q.iter_in_order().map(|(_, p, _)| p).collect();
        assert_eq!(walked, vec![1, 2, 3, 4, 6]);
        assert_eq!(q.len(), 5);
        assert_eq!(q.peek(), Some(&10));
    }

    #[test]
    fn test_pop_entry_reports_priority() {
        let mut q = PriorityQueue::min_first(1).unwrap();
        let h = q.insert("only", 77).unwrap();
        let (popped, pri, value) = q.pop_entry().unwrap();
        assert_eq!(popped, h);
        assert_eq!(pri, 77);
        assert_eq!(value, "only");
    }
}
