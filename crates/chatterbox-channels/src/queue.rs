//! FIFO queue with enqueue/dequeue hooks.

use std::collections::VecDeque;
use std::fmt;

/// Hook invoked with the item and the queue length.
///
/// `before_enqueue` sees the length before the push, `after_dequeue` the
/// length after the pop, so `len == 0` marks the empty/non-empty edge in both.
pub type Hook<T> = Box<dyn FnMut(&T, usize) + Send>;

pub struct Queue<T> {
    items: VecDeque<T>,
    before_enqueue: Option<Hook<T>>,
    after_dequeue: Option<Hook<T>>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            before_enqueue: None,
            after_dequeue: None,
        }
    }

    pub fn on_enqueue(mut self, hook: Hook<T>) -> Self {
        self.before_enqueue = Some(hook);
        self
    }

    pub fn on_dequeue(mut self, hook: Hook<T>) -> Self {
        self.after_dequeue = Some(hook);
        self
    }

    pub fn enqueue(&mut self, item: T) {
        if let Some(hook) = self.before_enqueue.as_mut() {
            hook(&item, self.items.len());
        }
        self.items.push_back(item);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        if let Some(hook) = self.after_dequeue.as_mut() {
            hook(&item, self.items.len());
        }
        Some(item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("items", &self.items)
            .field("before_enqueue", &self.before_enqueue.is_some())
            .field("after_dequeue", &self.after_dequeue.is_some())
            .finish()
    }
}
