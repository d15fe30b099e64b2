use std::collections::VecDeque;

/// Bounded FIFO of submissions waiting for the session to become idle.
pub struct MessageQueue<M> {
    queue: VecDeque<M>,
    capacity: usize,
}

impl<M> MessageQueue<M> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            // The bound is only checked on push; nothing is reserved here
            queue: VecDeque::new(),
            capacity: n,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Hands the message back when the queue is already full.
    pub fn push(&mut self, message: M) -> Result<(), M> {
        if self.is_full() {
            return Err(message);
        }
        self.queue.push_back(message);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<M> {
        self.queue.pop_front()
    }

    /// Takes out the first message matching `predicate`, keeping the order
    /// of the rest.
    pub fn remove_first(&mut self, predicate: impl Fn(&M) -> bool) -> Option<M> {
        let index = self.queue.iter().position(predicate)?;
        self.queue.remove(index)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = M> + '_ {
        self.queue.drain(..)
    }
}
