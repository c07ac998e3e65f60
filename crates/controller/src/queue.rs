use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;

use colod_types::Event;

/// Two-priority FIFO of events feeding the main state machine. Producers
/// push from any task; the machine is the single consumer. Critical events
/// drain before normal ones, and a push equal to the tail of its FIFO is
/// dropped as a duplicate.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<Inner>,
    /// Signals the consumer when the queue went from empty to non-empty.
    wake: Notify,
    /// Signals waiters that a critical event arrived; drives the
    /// interruptible hypervisor wait.
    critical_wake: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    critical: VecDeque<Event>,
    normal: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event with its originating reason (tracing only).
    pub fn push(&self, event: Event, reason: &str) {
        debug_assert!(event != Event::None);
        trace!(%event, reason, "queued");

        let mut inner = self.inner.lock().expect("event queue lock poisoned");
        let was_idle = inner.critical.is_empty() && inner.normal.is_empty();

        let fifo = if event.is_critical() {
            &mut inner.critical
        } else {
            &mut inner.normal
        };

        if fifo.back() == Some(&event) {
            trace!(%event, "ratelimiting duplicate event");
            return;
        }

        let first_critical = event.is_critical() && fifo.is_empty();
        fifo.push_back(event);
        drop(inner);

        if was_idle {
            self.wake.notify_one();
        }
        if first_critical {
            self.critical_wake.notify_one();
        }
    }

    /// Next event: critical first, else normal.
    pub fn pop(&self) -> Option<Event> {
        let mut inner = self.inner.lock().expect("event queue lock poisoned");
        inner
            .critical
            .pop_front()
            .or_else(|| inner.normal.pop_front())
    }

    pub fn peek(&self) -> Option<Event> {
        let inner = self.inner.lock().expect("event queue lock poisoned");
        inner
            .critical
            .front()
            .or_else(|| inner.normal.front())
            .copied()
    }

    pub fn pending(&self) -> bool {
        let inner = self.inner.lock().expect("event queue lock poisoned");
        !inner.critical.is_empty() || !inner.normal.is_empty()
    }

    pub fn critical_pending(&self) -> bool {
        let inner = self.inner.lock().expect("event queue lock poisoned");
        !inner.critical.is_empty()
    }

    /// Await the next event.
    pub async fn wait(&self) -> Event {
        loop {
            let wake = self.wake.notified();
            if let Some(event) = self.pop() {
                trace!(%event, "got event");
                return event;
            }
            wake.await;
        }
    }

    /// Completes once a critical event is pending. Used to interrupt
    /// hypervisor waits.
    pub async fn critical_arrival(&self) {
        loop {
            let wake = self.critical_wake.notified();
            if self.critical_pending() {
                return;
            }
            wake.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &EventQueue) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = queue.pop() {
            out.push(event);
        }
        out
    }

    #[test]
    fn critical_events_drain_first() {
        let queue = EventQueue::new();
        queue.push(Event::Yellow, "test");
        queue.push(Event::StartMigration, "test");
        queue.push(Event::Failed, "test");
        queue.push(Event::Quit, "test");

        assert_eq!(
            drain(&queue),
            vec![
                Event::Failed,
                Event::Quit,
                Event::Yellow,
                Event::StartMigration
            ]
        );
    }

    #[test]
    fn back_to_back_duplicates_collapse() {
        let queue = EventQueue::new();
        queue.push(Event::Failed, "test");
        queue.push(Event::Failed, "test");
        queue.push(Event::Quit, "test");
        queue.push(Event::Failed, "test");

        assert_eq!(drain(&queue), vec![Event::Failed, Event::Quit, Event::Failed]);
    }

    #[test]
    fn duplicate_collapse_is_per_fifo_tail() {
        let queue = EventQueue::new();
        // A normal event in between does not break the critical tail check.
        queue.push(Event::Failed, "test");
        queue.push(Event::Yellow, "test");
        queue.push(Event::Failed, "test");

        assert_eq!(drain(&queue), vec![Event::Failed, Event::Yellow]);
    }

    #[test]
    fn peek_matches_pop_order() {
        let queue = EventQueue::new();
        queue.push(Event::Yellow, "test");
        queue.push(Event::Quit, "test");

        assert_eq!(queue.peek(), Some(Event::Quit));
        assert_eq!(queue.pop(), Some(Event::Quit));
        assert_eq!(queue.peek(), Some(Event::Yellow));
    }

    #[tokio::test]
    async fn wait_wakes_on_push() {
        use std::sync::Arc;

        let queue = Arc::new(EventQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait().await })
        };

        tokio::task::yield_now().await;
        queue.push(Event::Quit, "test");

        assert_eq!(waiter.await.unwrap(), Event::Quit);
    }

    #[tokio::test]
    async fn critical_arrival_ignores_normal_events() {
        use std::sync::Arc;
        use std::time::Duration;

        let queue = Arc::new(EventQueue::new());
        queue.push(Event::Yellow, "test");

        let arrival = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.critical_arrival().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!arrival.is_finished());

        queue.push(Event::Failed, "test");
        tokio::time::timeout(Duration::from_secs(1), arrival)
            .await
            .expect("critical arrival must fire")
            .unwrap();
    }
}
