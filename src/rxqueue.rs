/*! Receive side event queue.

Everything that drives the link state machines funnels through
here: decoded frames from the demodulator, channel busy changes
from the PTT/DCD plumbing, and seize confirmations from the
transmitter. The main thread drains it, waiting with an absolute
deadline so link layer timers fire on time.
 */
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use log::warn;

use crate::packet::Packet;

// More than this queued means the main thread has stalled.
const QUEUE_WARN_LEN: usize = 15;

/// Which channel activity line changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusyLine {
    /// Our own push to talk.
    Ptt,
    /// Data carrier detect from the demodulator.
    Dcd,
}

/// One queued event.
#[derive(Debug)]
pub enum Event {
    /// A frame arrived off the air.
    ReceivedFrame(Packet),
    /// PTT or DCD changed state.
    ChannelBusy {
        /// Which line.
        line: BusyLine,
        /// Asserted or released.
        busy: bool,
    },
    /// The transmitter keyed up after a seize request.
    SeizeConfirm,
}

/// The shared receive queue.
pub struct ReceiveQueue {
    queue: Mutex<VecDeque<Event>>,
    wake: Condvar,
}

impl ReceiveQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
        }
    }

    /// Append an event and wake the main thread.
    pub fn push(&self, event: Event) {
        let mut q = self.queue.lock().unwrap();
        q.push_back(event);
        if q.len() > QUEUE_WARN_LEN {
            warn!("receive queue is out of control, length {}", q.len());
        }
        drop(q);
        self.wake.notify_one();
    }

    /// Queue a received frame.
    pub fn rec_frame(&self, pp: Packet) {
        self.push(Event::ReceivedFrame(pp));
    }

    /// Queue a channel busy change.
    pub fn channel_busy(&self, line: BusyLine, busy: bool) {
        self.push(Event::ChannelBusy { line, busy });
    }

    /// Queue a seize confirmation.
    pub fn seize_confirm(&self) {
        self.push(Event::SeizeConfirm);
    }

    /// Remove the next event, if any.
    pub fn remove(&self) -> Option<Event> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Wait until an event is queued or `deadline` passes.
    ///
    /// Returns true on timeout. With no deadline, waits until an
    /// event arrives.
    pub fn wait_while_empty(&self, deadline: Option<Instant>) -> bool {
        let mut q = self.queue.lock().unwrap();
        loop {
            if !q.is_empty() {
                return false;
            }
            match deadline {
                None => {
                    q = self.wake.wait(q).unwrap();
                }
                Some(d) => {
                    let now = Instant::now();
                    if d <= now {
                        return true;
                    }
                    let (guard, res) = self.wake.wait_timeout(q, d - now).unwrap();
                    q = guard;
                    if res.timed_out() && q.is_empty() {
                        return true;
                    }
                }
            }
        }
    }
}

impl Default for ReceiveQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = ReceiveQueue::new();
        q.channel_busy(BusyLine::Dcd, true);
        q.seize_confirm();
        q.channel_busy(BusyLine::Dcd, false);

        assert!(matches!(
            q.remove(),
            Some(Event::ChannelBusy { line: BusyLine::Dcd, busy: true })
        ));
        assert!(matches!(q.remove(), Some(Event::SeizeConfirm)));
        assert!(matches!(
            q.remove(),
            Some(Event::ChannelBusy { line: BusyLine::Dcd, busy: false })
        ));
        assert!(q.remove().is_none());
    }

    #[test]
    fn deadline_timeout() {
        let q = ReceiveQueue::new();
        let start = Instant::now();
        let timed_out = q.wait_while_empty(Some(Instant::now() + Duration::from_millis(15)));
        assert!(timed_out);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn wakes_on_push() {
        let q = Arc::new(ReceiveQueue::new());
        let q2 = q.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q2.seize_confirm();
        });
        let timed_out = q.wait_while_empty(Some(Instant::now() + Duration::from_secs(10)));
        assert!(!timed_out);
        t.join().unwrap();
        assert!(matches!(q.remove(), Some(Event::SeizeConfirm)));
    }

    #[test]
    fn expired_deadline_returns_immediately() {
        let q = ReceiveQueue::new();
        assert!(q.wait_while_empty(Some(Instant::now() - Duration::from_secs(1))));
    }
}
