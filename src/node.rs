/*! Node wiring.

Four threads make up a running node:

1. The receive audio thread pulls PCM from the audio source and
   drives the demodulator; decoded frames and DCD changes go onto
   the receive queue.
2. The transmit thread waits on the transmit queue, runs CSMA, and
   owns the PTT cycle: key up, txdelay idle, frames, txtail idle,
   key down.
3. The KISS listener reads the client pty and queues outbound
   frames.
4. The calling thread becomes the main event loop: it drains the
   receive queue, feeds the link state machines, and fires their
   timers, sleeping no longer than the next T1/T3 deadline.

Note that a KISS client speaks raw AX.25: its SABM/I/DISC frames
are sent as-is, while the state machines answer whatever comes back
off the air for our registered callsign.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::audio::{AudioSink, AudioSource};
use crate::config::Config;
use crate::csma::Csma;
use crate::demodulator::Demodulator;
use crate::il2p_frame;
use crate::kiss::{self, KissDeframer};
use crate::link::LinkManager;
use crate::modulator::{Mode, Modulator};
use crate::packet::{Address, Packet};
use crate::ptt::{OutputLine, PttControl};
use crate::pty::KissPty;
use crate::rxqueue::{Event, ReceiveQueue};
use crate::txqueue::{Priority, TransmitQueue, TxItem};
use crate::{Result, SAMPLE_RATE, SYMBOL_RATE};

/// Frames per PTT cycle limit.
const MAX_FRAMES_PER_CYCLE: usize = 256;

/// How often blocked threads look at the shutdown flag.
const POLL: Duration = Duration::from_millis(500);

/// A packet radio node.
pub struct Node {
    config: Config,
    shutdown: Arc<AtomicBool>,
}

impl Node {
    /// Create a node from its configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag that stops all threads, e.g. from a SIGINT handler.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until the shutdown flag is raised. The calling thread
    /// becomes the main event loop.
    pub fn run(
        self,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
    ) -> Result<()> {
        let txq = Arc::new(TransmitQueue::new());
        let rxq = Arc::new(ReceiveQueue::new());
        let dcd = Arc::new(AtomicBool::new(false));
        let ptt = Arc::new(PttControl::new(&self.config, rxq.clone())?);
        let pty = Arc::new(KissPty::open()?);
        let audio_out: Arc<Mutex<Box<dyn AudioSink>>> = Arc::new(Mutex::new(sink));

        let mut link = LinkManager::new(self.config.link_config(), txq.clone());
        let mycall: Address = self
            .config
            .mycall
            .parse()
            .unwrap_or_else(|_| Address::new("NOCALL", 0).expect("fixed callsign is valid"));
        info!("node up as {mycall}");
        link.register_callsign(mycall, 0);
        link.set_deliver(Box::new(|stream_id, pid, data| {
            info!(
                "Stream {stream_id}: reassembled {} bytes of protocol {pid:#04x}",
                data.len()
            );
        }));
        let con_ptt = ptt.clone();
        link.set_connected_hook(Box::new(move |on| con_ptt.set(OutputLine::Con, on)));

        let rx_handle = {
            let rxq = rxq.clone();
            let ptt = ptt.clone();
            let dcd = dcd.clone();
            let shutdown = self.shutdown.clone();
            std::thread::Builder::new()
                .name("rx-audio".into())
                .spawn(move || receive_thread(source, dcd, rxq, ptt, shutdown))
                .map_err(|e| crate::Error::Audio(format!("spawning receive thread: {e}")))?
        };

        let tx_handle = {
            let txq = txq.clone();
            let rxq = rxq.clone();
            let ptt = ptt.clone();
            let audio_out = audio_out.clone();
            let csma = Csma::new(self.config.csma_params(), dcd.clone());
            let txdelay = self.config.txdelay;
            let txtail = self.config.txtail;
            let shutdown = self.shutdown.clone();
            std::thread::Builder::new()
                .name("tx".into())
                .spawn(move || {
                    transmit_thread(txq, rxq, ptt, audio_out, csma, txdelay, txtail, shutdown)
                })
                .map_err(|e| crate::Error::Audio(format!("spawning transmit thread: {e}")))?
        };

        let kiss_handle = {
            let pty = pty.clone();
            let txq = txq.clone();
            let shutdown = self.shutdown.clone();
            std::thread::Builder::new()
                .name("kiss".into())
                .spawn(move || kiss_listener(pty, txq, shutdown))
                .map_err(|e| crate::Error::Audio(format!("spawning kiss thread: {e}")))?
        };

        self.event_loop(&mut link, &rxq, &pty);

        info!("shutting down");
        ptt.term();
        let _ = tx_handle.join();
        let _ = kiss_handle.join();
        // The receive thread may be stuck in a blocking audio read;
        // the process is about to exit anyway.
        drop(rx_handle);
        Ok(())
    }

    fn event_loop(&self, link: &mut LinkManager, rxq: &ReceiveQueue, pty: &KissPty) {
        while !self.shutdown.load(Ordering::Relaxed) {
            let poll_at = Instant::now() + POLL;
            let deadline = match link.next_timer_expiry() {
                Some(d) => d.min(poll_at),
                None => poll_at,
            };
            if rxq.wait_while_empty(Some(deadline)) {
                link.timer_expiry();
                continue;
            }
            while let Some(event) = rxq.remove() {
                match event {
                    Event::ReceivedFrame(pp) => {
                        debug!("received {} byte frame", pp.len());
                        pty.send(&kiss::frame_data(pp.as_bytes()));
                        link.data_indication(&pp);
                    }
                    Event::ChannelBusy { line, busy } => link.channel_busy(line, busy),
                    Event::SeizeConfirm => link.seize_confirm(),
                }
            }
            link.timer_expiry();
        }
    }
}

fn receive_thread(
    mut source: Box<dyn AudioSource>,
    dcd: Arc<AtomicBool>,
    rxq: Arc<ReceiveQueue>,
    ptt: Arc<PttControl>,
    shutdown: Arc<AtomicBool>,
) {
    let mut demod = Demodulator::new(dcd.clone());
    let mut buf = vec![0i16; 1024];
    let mut last_dcd = false;
    while !shutdown.load(Ordering::Relaxed) {
        match source.read(&mut buf) {
            Ok(0) => {
                info!("audio input ended");
                break;
            }
            Ok(n) => {
                demod.process(&buf[..n], &mut |pp| rxq.rec_frame(pp));
                let now = dcd.load(Ordering::Relaxed);
                if now != last_dcd {
                    last_dcd = now;
                    ptt.set(OutputLine::Dcd, now);
                }
            }
            Err(e) => {
                warn!("audio read failed: {e}");
                break;
            }
        }
    }
    debug!("receive thread exiting, {} frames decoded", demod.decoded());
}

#[allow(clippy::too_many_arguments)]
fn transmit_thread(
    txq: Arc<TransmitQueue>,
    rxq: Arc<ReceiveQueue>,
    ptt: Arc<PttControl>,
    audio_out: Arc<Mutex<Box<dyn AudioSink>>>,
    csma: Csma,
    txdelay: u8,
    txtail: u8,
    shutdown: Arc<AtomicBool>,
) {
    let mut modulator = Modulator::new();
    while !shutdown.load(Ordering::Relaxed) {
        txq.wait_while_empty(POLL);
        while !txq.is_empty() && !shutdown.load(Ordering::Relaxed) {
            if ptt.tx_inhibited() {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            match csma.wait_for_clear_channel(&audio_out, || txq.has_item(Priority::High)) {
                Ok(mut sink) => {
                    ptt_cycle(
                        &txq,
                        &rxq,
                        &ptt,
                        &mut **sink,
                        &mut modulator,
                        txdelay,
                        txtail,
                    );
                }
                Err(e) => {
                    // The channel never cleared; drop one frame so a
                    // jammed channel can't grow the queue forever.
                    warn!("transmit failed: {e}");
                    let _ = txq
                        .remove(Priority::High)
                        .or_else(|| txq.remove(Priority::Low));
                }
            }
        }
    }
    debug!("transmit thread exiting");
}

/// 10 ms units of idle to flag bytes at one bit per symbol.
fn idle_flag_count(units_10ms: u8) -> usize {
    let bits = units_10ms as usize * 10 * SYMBOL_RATE as usize / 1000;
    bits / 8
}

/// One key-up: txdelay idle, queued frames high priority first,
/// txtail idle, then hold PTT until the audio has actually left.
fn ptt_cycle(
    txq: &TransmitQueue,
    rxq: &ReceiveQueue,
    ptt: &PttControl,
    sink: &mut dyn AudioSink,
    modulator: &mut Modulator,
    txdelay: u8,
    txtail: u8,
) {
    let time_ptt = Instant::now();
    let mut samples_sent: usize = 0;
    ptt.set(OutputLine::Ptt, true);
    rxq.seize_confirm();

    let mut pcm = Vec::new();
    modulator.modulate_idle(idle_flag_count(txdelay), &mut pcm);

    let mut numframe = 0;
    while numframe < MAX_FRAMES_PER_CYCLE {
        let item = match txq.remove(Priority::High) {
            Some(item) => item,
            None => match txq.remove(Priority::Low) {
                Some(item) => item,
                None => break,
            },
        };
        match item {
            TxItem::SeizeRequest => {
                // We already have the channel; tell the link layer so
                // pending acks can ride along in this cycle.
                rxq.seize_confirm();
                std::thread::sleep(Duration::from_millis(10));
            }
            TxItem::Frame(pp) => match il2p_frame::encode_bits(&pp) {
                Ok(bits) => {
                    modulator.modulate_bits(Mode::Qpsk, &bits, &mut pcm);
                    numframe += 1;
                }
                Err(e) => {
                    warn!("dropping unencodable frame: {e}");
                }
            },
        }
        // Push what we have so far to the device.
        samples_sent += pcm.len();
        if let Err(e) = sink.write(&pcm) {
            warn!("audio write failed: {e}");
        }
        pcm.clear();
    }

    modulator.modulate_idle(idle_flag_count(txtail), &mut pcm);
    samples_sent += pcm.len();
    if let Err(e) = sink.write(&pcm).and_then(|()| sink.flush()) {
        warn!("audio write failed: {e}");
    }

    // Hold PTT for the longer of actual elapsed time and the
    // duration the samples represent.
    let duration = Duration::from_secs_f64(samples_sent as f64 / SAMPLE_RATE as f64);
    let elapsed = time_ptt.elapsed();
    if duration > elapsed {
        std::thread::sleep(duration - elapsed);
    }
    ptt.set(OutputLine::Ptt, false);
    debug!("sent {numframe} frames in one PTT cycle");
}

fn kiss_listener(pty: Arc<KissPty>, txq: Arc<TransmitQueue>, shutdown: Arc<AtomicBool>) {
    let mut deframer = KissDeframer::new();
    let mut buf = [0u8; 1024];
    while !shutdown.load(Ordering::Relaxed) {
        match pty.read_timeout(&mut buf, POLL.as_millis() as u16) {
            Ok(0) => continue,
            Ok(n) => {
                for &b in &buf[..n] {
                    let Some(msg) = deframer.push_byte(b) else {
                        continue;
                    };
                    // Ignore all the other KISS commands; only data
                    // frames matter here.
                    if msg[0] & 0x0f != kiss::CMD_DATA_FRAME {
                        continue;
                    }
                    match Packet::from_bytes(&msg[1..]) {
                        Ok(pp) => txq.data_request(Priority::Low, pp),
                        Err(e) => warn!("invalid KISS data frame: {e}"),
                    }
                }
            }
            Err(e) => {
                warn!("KISS pty read failed: {e}");
                break;
            }
        }
    }
    debug!("kiss listener exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_flag_counts() {
        // 100 ms at 1200 baud is 120 bits, 15 flag bytes.
        assert_eq!(idle_flag_count(10), 15);
        assert_eq!(idle_flag_count(0), 0);
        assert_eq!(idle_flag_count(255), 382);
    }
}
