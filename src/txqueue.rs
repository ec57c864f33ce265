/*! Transmit queue.

Two priority FIFOs of outbound items, shared between the link layer
(producer) and the transmit thread (consumer), with a condition
variable to wake the transmitter when something arrives.

Besides frames, the queue carries seize request markers: the link
layer's way of asking the transmitter to key up so pending
acknowledgments can ride along with whatever else is going out.
 */
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::warn;

use crate::packet::Packet;

/// Number of priority levels.
pub const NUM_PRIO: usize = 2;

// A queue longer than this means the channel never clears.
const QUEUE_WARN_LEN: usize = 250;

/// Queue priority. High priority drains first at the start of each
/// PTT cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// Expedited traffic.
    High,
    /// Normal traffic.
    Low,
}

impl Priority {
    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }
}

/// One queued item.
#[derive(Debug)]
pub enum TxItem {
    /// A frame to send.
    Frame(Packet),
    /// Ask the transmitter to confirm channel seizure.
    SeizeRequest,
}

/// The shared transmit queue.
pub struct TransmitQueue {
    queues: Mutex<[VecDeque<TxItem>; NUM_PRIO]>,
    wake: Condvar,
}

impl TransmitQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new([VecDeque::new(), VecDeque::new()]),
            wake: Condvar::new(),
        }
    }

    /// Append an item and wake the transmitter.
    pub fn append(&self, prio: Priority, item: TxItem) {
        let mut qs = self.queues.lock().unwrap();
        let q = &mut qs[prio.index()];
        q.push_back(item);
        if q.len() > QUEUE_WARN_LEN {
            warn!(
                "transmit queue is extremely long ({} items); perhaps the channel \
                 is so busy there is no opportunity to send",
                q.len()
            );
        }
        drop(qs);
        self.wake.notify_one();
    }

    /// Queue an outbound frame. This is the link multiplexor's data
    /// request entry.
    pub fn data_request(&self, prio: Priority, pp: Packet) {
        self.append(prio, TxItem::Frame(pp));
    }

    /// Queue a seize request marker.
    pub fn seize_request(&self) {
        self.append(Priority::Low, TxItem::SeizeRequest);
    }

    /// Remove the next item of the given priority, if any.
    pub fn remove(&self, prio: Priority) -> Option<TxItem> {
        self.queues.lock().unwrap()[prio.index()].pop_front()
    }

    /// Whether anything is queued at the given priority.
    pub fn has_item(&self, prio: Priority) -> bool {
        !self.queues.lock().unwrap()[prio.index()].is_empty()
    }

    /// Whether both priorities are empty.
    pub fn is_empty(&self) -> bool {
        self.queues.lock().unwrap().iter().all(|q| q.is_empty())
    }

    /// Block until the queue is (probably) non-empty, or the
    /// timeout passes. Spurious wakeups are fine; the caller loops.
    pub fn wait_while_empty(&self, timeout: Duration) {
        let qs = self.queues.lock().unwrap();
        if qs.iter().all(|q| q.is_empty()) {
            let _unused = self.wake.wait_timeout(qs, timeout).unwrap();
        }
    }
}

impl Default for TransmitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Address, CmdRes, FrameType};
    use std::sync::Arc;

    fn frame() -> Packet {
        Packet::new_u(
            &Address::new("AA1A", 0).unwrap(),
            &Address::new("BB2B", 0).unwrap(),
            CmdRes::Cmd,
            FrameType::Sabm,
            true,
            0,
            &[],
        )
        .unwrap()
    }

    #[test]
    fn fifo_per_priority() {
        let q = TransmitQueue::new();
        q.data_request(Priority::Low, frame());
        q.seize_request();
        q.data_request(Priority::High, frame());

        assert!(q.has_item(Priority::High));
        assert!(q.has_item(Priority::Low));

        assert!(matches!(q.remove(Priority::High), Some(TxItem::Frame(_))));
        assert!(q.remove(Priority::High).is_none());

        assert!(matches!(q.remove(Priority::Low), Some(TxItem::Frame(_))));
        assert!(matches!(q.remove(Priority::Low), Some(TxItem::SeizeRequest)));
        assert!(q.remove(Priority::Low).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn wait_wakes_on_append() {
        let q = Arc::new(TransmitQueue::new());
        let q2 = q.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q2.data_request(Priority::Low, frame());
        });
        // Generous timeout; the wakeup should come much sooner.
        q.wait_while_empty(Duration::from_secs(10));
        t.join().unwrap();
        assert!(!q.is_empty());
    }

    #[test]
    fn wait_times_out_when_empty() {
        let q = TransmitQueue::new();
        let start = std::time::Instant::now();
        q.wait_while_empty(Duration::from_millis(10));
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert!(q.is_empty());
    }
}
