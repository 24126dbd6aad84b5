use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// Результат попытки извлечь элемент из очереди.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Pop<T> {
    Item(T),
    TimedOut,
    Closed,
}

/// Результат помещения элемента в очередь.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    /// Очередь была полна: самый старый элемент вытеснен.
    DroppedOldest,
    /// Очередь закрыта, элемент отброшен.
    Rejected,
}

/// Ограниченная FIFO-очередь с вытеснением самого старого элемента.
///
/// Запись никогда не блокируется: при переполнении удаляется ровно один
/// самый старый элемент, и только затем добавляется новый — под одной
/// блокировкой. Читатели ждут на `Condvar`; закрытие будит всех.
pub(crate) struct DropOldestQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

impl<T> DropOldestQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    pub(crate) fn push(
        &self,
        item: T,
    ) -> PushOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return PushOutcome::Rejected;
        }

        let outcome = if state.items.len() >= self.capacity {
            state.items.pop_front();
            state.dropped += 1;
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Queued
        };
        state.items.push_back(item);
        drop(state);

        self.ready.notify_one();
        outcome
    }

    /// Ждёт элемент не дольше `timeout`; `None` — ждать бесконечно.
    pub(crate) fn pop(
        &self,
        timeout: Option<Duration>,
    ) -> Pop<T> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Pop::Closed;
            }
            if let Some(item) = state.items.pop_front() {
                return Pop::Item(item);
            }
            match (timeout, deadline) {
                (Some(_), Some(deadline)) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        if state.closed {
                            return Pop::Closed;
                        }
                        return state.items.pop_front().map_or(Pop::TimedOut, Pop::Item);
                    }
                }
                // Таймаут настолько велик, что переполняет `Instant`.
                _ => self.ready.wait(&mut state),
            }
        }
    }

    /// Закрывает очередь, освобождает элементы и будит ожидающих.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.items.clear();
        state.items.shrink_to_fit();
        drop(state);
        self.ready.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
