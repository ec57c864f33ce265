/*! CSMA channel access.

Before keying up, a half duplex station waits for the channel to
clear and then applies p-persistence: sleep one slot, draw a random
number, and transmit only if the draw does not exceed the persist
setting. High priority traffic skips the persistence lottery.

Full duplex stations skip carrier sensing entirely and only
serialize on the audio output device.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::debug;
use rand::Rng;

use crate::{Error, Result};

const WAIT_TIMEOUT_MS: u64 = 60 * 1000;
const WAIT_CHECK_EVERY_MS: u64 = 10;

/// Channel access parameters, all straight from the configuration.
#[derive(Clone, Copy, Debug)]
pub struct CsmaParams {
    /// Extra delay after DCD release, 10 ms units.
    pub dwait: u8,
    /// Slot time, 10 ms units.
    pub slottime: u8,
    /// p-persistence threshold, 0-255.
    pub persist: u8,
    /// Full duplex: no carrier sensing.
    pub fulldup: bool,
}

/// Channel access state: parameters plus the shared DCD flag.
pub struct Csma {
    params: CsmaParams,
    dcd: Arc<AtomicBool>,
    timeout_ms: u64,
    poll_ms: u64,
}

/// One p-persistence draw.
///
/// The draw r is uniform on [1, 255], so persist 0 never transmits
/// and persist 255 transmits on the first slot.
pub fn persist_decision<R: Rng>(rng: &mut R, persist: u8) -> bool {
    let r: u8 = rng.random_range(1..=255);
    r <= persist
}

impl Csma {
    /// Create channel access logic around the demodulator's DCD.
    pub fn new(params: CsmaParams, dcd: Arc<AtomicBool>) -> Self {
        Self {
            params,
            dcd,
            timeout_ms: WAIT_TIMEOUT_MS,
            poll_ms: WAIT_CHECK_EVERY_MS,
        }
    }

    /// Override the give-up timeout and poll interval.
    pub fn with_timeouts(mut self, timeout_ms: u64, poll_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self.poll_ms = poll_ms;
        self
    }

    fn dcd_busy(&self) -> bool {
        self.dcd.load(Ordering::Relaxed)
    }

    fn sleep_units(&self, units_10ms: u64) {
        std::thread::sleep(Duration::from_millis(units_10ms * 10));
    }

    /// Wait for a clear channel and take the audio output lock.
    ///
    /// `expedited_waiting` reports whether high priority traffic is
    /// queued; such traffic does not gamble on persistence.
    ///
    /// Returns the held audio lock, or an error after 60 seconds of
    /// continuous carrier or lock contention.
    pub fn wait_for_clear_channel<'a, T>(
        &self,
        audio_lock: &'a Mutex<T>,
        expedited_waiting: impl Fn() -> bool,
    ) -> Result<MutexGuard<'a, T>> {
        let mut waited_ms: u64 = 0;

        if !self.params.fulldup {
            'start_over: loop {
                while self.dcd_busy() {
                    std::thread::sleep(Duration::from_millis(self.poll_ms));
                    waited_ms += self.poll_ms;
                    if waited_ms > self.timeout_ms {
                        return Err(Error::Timeout("channel busy too long".into()));
                    }
                }

                if self.params.dwait > 0 {
                    self.sleep_units(self.params.dwait as u64);
                }

                if self.dcd_busy() {
                    continue 'start_over;
                }

                let mut rng = rand::rng();
                while !expedited_waiting() {
                    self.sleep_units(self.params.slottime as u64);
                    if self.dcd_busy() {
                        continue 'start_over;
                    }
                    if persist_decision(&mut rng, self.params.persist) {
                        break;
                    }
                }
                break;
            }
        }

        loop {
            match audio_lock.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(std::sync::TryLockError::WouldBlock) => {
                    std::thread::sleep(Duration::from_millis(self.poll_ms));
                    waited_ms += self.poll_ms;
                    if waited_ms > self.timeout_ms {
                        debug!("gave up waiting for the audio output lock");
                        return Err(Error::Timeout("audio output lock contended".into()));
                    }
                }
                Err(std::sync::TryLockError::Poisoned(e)) => {
                    return Err(Error::Audio(format!("audio lock poisoned: {e}")));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_zero_never_fires() {
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            assert!(!persist_decision(&mut rng, 0));
        }
    }

    #[test]
    fn persist_max_always_fires() {
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            assert!(persist_decision(&mut rng, 255));
        }
    }

    #[test]
    fn persist_middle_is_roughly_fair() {
        let mut rng = rand::rng();
        let hits = (0..10_000)
            .filter(|_| persist_decision(&mut rng, 127))
            .count();
        // 127/255 of the draws, within generous slop.
        assert!((4000..6000).contains(&hits), "hits = {hits}");
    }

    #[test]
    fn fulldup_skips_carrier_sense() {
        let dcd = Arc::new(AtomicBool::new(true)); // busy forever
        let csma = Csma::new(
            CsmaParams {
                dwait: 0,
                slottime: 1,
                persist: 63,
                fulldup: true,
            },
            dcd,
        )
        .with_timeouts(100, 1);
        let lock = Mutex::new(());
        // Channel "busy" but full duplex: must still acquire.
        assert!(csma.wait_for_clear_channel(&lock, || false).is_ok());
    }

    #[test]
    fn busy_channel_times_out() {
        let dcd = Arc::new(AtomicBool::new(true));
        let csma = Csma::new(
            CsmaParams {
                dwait: 0,
                slottime: 1,
                persist: 63,
                fulldup: false,
            },
            dcd,
        )
        .with_timeouts(30, 1);
        let lock = Mutex::new(());
        match csma.wait_for_clear_channel(&lock, || false) {
            Err(Error::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn expedited_bypasses_persistence() {
        // persist 0 never passes the lottery, but expedited traffic
        // must still get through.
        let dcd = Arc::new(AtomicBool::new(false));
        let csma = Csma::new(
            CsmaParams {
                dwait: 0,
                slottime: 0,
                persist: 0,
                fulldup: false,
            },
            dcd,
        )
        .with_timeouts(1000, 1);
        let lock = Mutex::new(());
        assert!(csma.wait_for_clear_channel(&lock, || true).is_ok());
    }

    #[test]
    fn contended_lock_times_out() {
        let dcd = Arc::new(AtomicBool::new(false));
        let csma = Csma::new(
            CsmaParams {
                dwait: 0,
                slottime: 0,
                persist: 255,
                fulldup: false,
            },
            dcd,
        )
        .with_timeouts(30, 1);
        let lock = Mutex::new(());
        let guard = lock.lock().unwrap();
        match csma.wait_for_clear_channel(&lock, || false) {
            Err(Error::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
        drop(guard);
    }
}
