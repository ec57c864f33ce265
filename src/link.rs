/*! AX.25 v2.0 data link state machine.

One [`Session`] per (own call, peer call) pair, owned by the
[`LinkManager`] which the main thread drives with received frames,
channel busy changes, seize confirmations and timer expiries.

The state machine follows the ITU X.25 / AX.25 v2.0 flow charts:
five states, modulo 8 sequence numbers V(S)/V(A)/V(R), a sliding
window of unacknowledged I frames kept in per-N(S) retransmission
slots, REJ and SREJ recovery, the T1 acknowledgment timer with a
smoothed round trip estimate, and the T3 idle probe.

T1 deserves a note: while the radio channel is busy (someone else
is transmitting, or we are), T1 is paused, and its deadline shifts
forward by the paused duration on resume. Without that, a busy
channel would be indistinguishable from a lost frame.
 */
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::packet::{Address, CmdRes, ControlInfo, FrameType, Packet};
use crate::rxqueue::BusyLine;
use crate::txqueue::{Priority, TransmitQueue};

/// Idle probe timer, seconds.
pub const T3_DEFAULT: f64 = 300.0;

/// Information length limit for protocol error checks.
const MAX_INFO_LEN: usize = crate::packet::MAX_INFO_LEN;

const MODULO: u8 = 8;

fn ax25modulo(n: i32) -> u8 {
    (n & 7) as u8
}

/// Link layer configuration, from the configuration file.
#[derive(Clone, Copy, Debug)]
pub struct LinkConfig {
    /// Initial T1 value (FRACK), seconds.
    pub frack: u32,
    /// Retry limit N2.
    pub retry: u32,
    /// Maximum information part length N1 (PACLEN).
    pub paclen: usize,
    /// Window size k (MAXFRAME), 1-7.
    pub maxframe: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frack: 3,
            retry: 10,
            paclen: 256,
            maxframe: 4,
        }
    }
}

/// Data link states of the v2.0 machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DlState {
    /// No connection.
    Disconnected,
    /// SABM sent, waiting for UA.
    AwaitingConnection,
    /// DISC sent, waiting for UA.
    AwaitingRelease,
    /// Normal information transfer.
    Connected,
    /// Waiting for an acknowledgment after an enquiry.
    TimerRecovery,
}

/// The information part of an I frame waiting to be sent or
/// acknowledged.
#[derive(Clone, Debug)]
struct ConnData {
    pid: u8,
    data: Vec<u8>,
}

/// Reassembly of a segmented stream (PID 0x08).
struct Reassembly {
    pid: u8,
    buff: Vec<u8>,
    size: usize,
    following: u8,
}

/// Monotonic clock in f64 seconds, with a test hook to jump time.
struct Clock {
    base: Instant,
    skew: f64,
}

impl Clock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            skew: 0.0,
        }
    }
    fn now(&self) -> f64 {
        self.base.elapsed().as_secs_f64() + self.skew
    }
    fn to_instant(&self, t: f64) -> Instant {
        self.base + Duration::from_secs_f64((t - self.skew).max(0.0))
    }
}

/// One data link session.
pub struct Session {
    stream_id: u32,
    client: usize,
    own: Address,
    peer: Address,
    state: DlState,

    n1_paclen: usize,
    n2_retry: u32,
    k_maxframe: u8,
    rc: u32,
    vs: u8,
    va: u8,
    vr: u8,

    layer_3_initiated: bool,
    peer_receiver_busy: bool,
    reject_exception: bool,
    own_receiver_busy: bool,
    acknowledge_pending: bool,

    srt: f64,
    t1v: f64,
    radio_channel_busy: bool,
    t1_exp: f64,
    t1_paused_at: f64,
    t1_remaining_when_last_stopped: f64,
    t1_had_expired: bool,
    t3_exp: f64,

    i_frame_queue: std::collections::VecDeque<ConnData>,
    txdata_by_ns: [Option<ConnData>; MODULO as usize],
    rxdata_by_ns: [Option<ConnData>; MODULO as usize],

    ra: Option<Reassembly>,

    count_recv_frame_type: [u32; 16],
    peak_rc_value: u32,
}

impl Session {
    fn new(stream_id: u32, client: usize, own: Address, peer: Address) -> Self {
        Self {
            stream_id,
            client,
            own,
            peer,
            state: DlState::Disconnected,
            n1_paclen: 256,
            n2_retry: 10,
            k_maxframe: 4,
            rc: 0,
            vs: 0,
            va: 0,
            vr: 0,
            layer_3_initiated: false,
            peer_receiver_busy: false,
            reject_exception: false,
            own_receiver_busy: false,
            acknowledge_pending: false,
            srt: 0.0,
            t1v: 0.0,
            radio_channel_busy: false,
            t1_exp: 0.0,
            t1_paused_at: 0.0,
            t1_remaining_when_last_stopped: -999.0, // Invalid, don't use.
            t1_had_expired: false,
            t3_exp: 0.0,
            i_frame_queue: std::collections::VecDeque::new(),
            txdata_by_ns: Default::default(),
            rxdata_by_ns: Default::default(),
            ra: None,
            count_recv_frame_type: [0; 16],
            peak_rc_value: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> DlState {
        self.state
    }

    /// Stream id, unique per process.
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Own address of this session.
    pub fn own(&self) -> &Address {
        &self.own
    }

    /// Peer address of this session.
    pub fn peer(&self) -> &Address {
        &self.peer
    }

    /// Which client this session belongs to.
    pub fn client(&self) -> usize {
        self.client
    }

    /// How many frames of the given type this session has received.
    pub fn received_count(&self, ftype: FrameType) -> u32 {
        self.count_recv_frame_type[frame_type_index(ftype)]
    }

    /// Highest retry count reached so far.
    pub fn peak_rc(&self) -> u32 {
        self.peak_rc_value
    }

    fn set_vs(&mut self, n: u8) {
        self.vs = n;
    }

    fn set_vr(&mut self, n: u8) {
        self.vr = n;
    }

    /// Advance V(A), retiring acknowledged frames from their
    /// retransmission slots, cumulatively backwards from N(R)-1.
    fn set_va(&mut self, n: u8) {
        self.va = n;
        let mut x = ax25modulo(n as i32 - 1);
        for _ in 0..MODULO {
            if self.txdata_by_ns[x as usize].take().is_none() {
                break;
            }
            x = ax25modulo(x as i32 - 1);
        }
    }

    fn within_window_size(&self) -> bool {
        self.vs != ax25modulo(self.va as i32 + self.k_maxframe as i32)
    }

    /// N(R) is valid iff it lies in the cyclic interval [V(A), V(S)].
    fn is_good_nr(&self, nr: u8) -> bool {
        // Adjust values relative to V(A) so there is no wrap around.
        let adjusted_nr = ax25modulo(nr as i32 - self.va as i32);
        let adjusted_vs = ax25modulo(self.vs as i32 - self.va as i32);
        adjusted_nr <= adjusted_vs
    }

    fn start_t1(&mut self, clock: &Clock) {
        let now = clock.now();
        self.t1_exp = now + self.t1v;
        self.t1_paused_at = if self.radio_channel_busy { now } else { 0.0 };
        self.t1_had_expired = false;
    }

    fn stop_t1(&mut self, clock: &Clock) {
        let now = clock.now();
        self.resume_t1(clock); // adjust expire time if paused.
        if self.t1_exp != 0.0 {
            self.t1_remaining_when_last_stopped = (self.t1_exp - now).max(0.0);
        }
        self.t1_exp = 0.0;
        self.t1_had_expired = false;
    }

    fn is_t1_running(&self) -> bool {
        self.t1_exp != 0.0
    }

    fn pause_t1(&mut self, clock: &Clock) {
        if self.t1_paused_at == 0.0 {
            self.t1_paused_at = clock.now();
        }
    }

    fn resume_t1(&mut self, clock: &Clock) {
        if self.t1_exp != 0.0 && self.t1_paused_at != 0.0 {
            let paused_for = clock.now() - self.t1_paused_at;
            self.t1_exp += paused_for;
            self.t1_paused_at = 0.0;
        } else {
            self.t1_paused_at = 0.0;
        }
    }

    fn start_t3(&mut self, clock: &Clock) {
        self.t3_exp = clock.now() + T3_DEFAULT;
    }

    fn stop_t3(&mut self) {
        self.t3_exp = 0.0;
    }

    fn init_t1v_srt(&mut self, frack: u32) {
        self.t1v = frack as f64;
        self.srt = self.t1v / 2.0;
    }
}

/// What the link layer hands up to the client side.
type DeliverFn = Box<dyn FnMut(u32, u8, Vec<u8>) + Send>;

/// Hook driven on entry/exit of the connected states, e.g. for a
/// connected-indicator GPIO line.
type ConnectedFn = Box<dyn FnMut(bool) + Send>;

/// Owns all sessions and routes events to them.
pub struct LinkManager {
    config: LinkConfig,
    tx: Arc<TransmitQueue>,
    clock: Clock,
    sessions: Vec<Session>,
    registered: Vec<(Address, usize)>,
    next_stream_id: u32,
    dcd_status: bool,
    ptt_status: bool,
    deliver: Option<DeliverFn>,
    connected_hook: Option<ConnectedFn>,
}

impl LinkManager {
    /// Create a manager that queues outbound frames on `tx`.
    pub fn new(config: LinkConfig, tx: Arc<TransmitQueue>) -> Self {
        Self {
            config,
            tx,
            clock: Clock::new(),
            sessions: Vec::new(),
            registered: Vec::new(),
            next_stream_id: 0,
            dcd_status: false,
            ptt_status: false,
            deliver: None,
            connected_hook: None,
        }
    }

    /// Install the callback for reassembled segmented data.
    pub fn set_deliver(&mut self, f: DeliverFn) {
        self.deliver = Some(f);
    }

    /// Install the connected-indicator hook.
    pub fn set_connected_hook(&mut self, f: ConnectedFn) {
        self.connected_hook = Some(f);
    }

    /// Authorize inbound connections to `addr` on behalf of a
    /// client.
    pub fn register_callsign(&mut self, addr: Address, client: usize) {
        if !self.registered.iter().any(|(a, c)| *a == addr && *c == client) {
            self.registered.push((addr, client));
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a session for inspection.
    pub fn find_session(&self, own: &Address, peer: &Address) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.own == *own && s.peer == *peer)
    }

    fn find_index(&self, own: &Address, peer: &Address) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| s.own == *own && s.peer == *peer)
    }

    /// Find or create the session for a frame from the radio.
    /// Frames address us as destination, so own/peer are swapped
    /// relative to the frame.
    fn handle_for_frame(&mut self, pp: &Packet, create: bool) -> Option<usize> {
        let frame_dst = pp.dst().ok()?;
        let frame_src = pp.src().ok()?;
        if let Some(i) = self.find_index(&frame_dst, &frame_src) {
            return Some(i);
        }
        if !create {
            return None;
        }
        // Only a registered callsign accepts new inbound sessions.
        let client = self
            .registered
            .iter()
            .find(|(a, _)| *a == frame_dst)
            .map(|(_, c)| *c)?;
        Some(self.create_session(frame_dst, frame_src, client))
    }

    fn create_session(&mut self, own: Address, peer: Address, client: usize) -> usize {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        let mut s = Session::new(id, client, own, peer);
        s.radio_channel_busy = self.dcd_status || self.ptt_status;
        self.sessions.push(s);
        self.sessions.len() - 1
    }

    /// The earliest pending T1 or T3 deadline, for the main loop's
    /// wait timeout. Paused T1 timers don't count.
    pub fn next_timer_expiry(&self) -> Option<Instant> {
        let mut tnext: f64 = 0.0;
        for s in &self.sessions {
            if s.t1_exp != 0.0 && s.t1_paused_at == 0.0 && (tnext == 0.0 || s.t1_exp < tnext)
            {
                tnext = s.t1_exp;
            }
            if s.t3_exp != 0.0 && (tnext == 0.0 || s.t3_exp < tnext) {
                tnext = s.t3_exp;
            }
        }
        if tnext == 0.0 {
            None
        } else {
            Some(self.clock.to_instant(tnext))
        }
    }

    /// Fire any expired timers. Called whenever the main thread
    /// wakes up.
    pub fn timer_expiry(&mut self) {
        let now = self.clock.now();
        for i in 0..self.sessions.len() {
            let s = &mut self.sessions[i];
            if s.t1_exp != 0.0 && s.t1_paused_at == 0.0 && s.t1_exp <= now {
                s.t1_exp = 0.0;
                s.t1_paused_at = 0.0;
                s.t1_had_expired = true;
                self.t1_expiry(i);
            }
        }
        for i in 0..self.sessions.len() {
            let s = &mut self.sessions[i];
            if s.t3_exp != 0.0 && s.t3_exp <= now {
                s.t3_exp = 0.0;
                self.t3_expiry(i);
            }
        }
    }

    /// Channel busy status changed; pause or resume T1 everywhere.
    pub fn channel_busy(&mut self, line: BusyLine, status: bool) {
        match line {
            BusyLine::Dcd => self.dcd_status = status,
            BusyLine::Ptt => self.ptt_status = status,
        }
        let busy = self.dcd_status || self.ptt_status;
        for s in &mut self.sessions {
            if busy && !s.radio_channel_busy {
                s.radio_channel_busy = true;
                s.pause_t1(&self.clock);
            } else if !busy && s.radio_channel_busy {
                s.radio_channel_busy = false;
                s.resume_t1(&self.clock);
            }
        }
    }

    /// The transmitter keyed up: drain pending I frames and flush
    /// any pending acknowledgment.
    pub fn seize_confirm(&mut self) {
        for i in 0..self.sessions.len() {
            match self.sessions[i].state {
                DlState::Connected | DlState::TimerRecovery => {
                    self.i_frame_pop_off_queue(i);
                    if self.sessions[i].acknowledge_pending {
                        self.sessions[i].acknowledge_pending = false;
                        self.enquiry_response(i, FrameType::NotAx25, false);
                    }
                }
                _ => {}
            }
        }
    }

    /// A frame arrived from the radio.
    pub fn data_indication(&mut self, pp: &Packet) {
        let fi = pp.frame_type();
        let create = matches!(fi.ftype, FrameType::Sabm | FrameType::Sabme);
        let Some(i) = self.handle_for_frame(pp, create) else {
            return;
        };

        self.sessions[i].count_recv_frame_type[frame_type_index(fi.ftype)] += 1;
        self.check_expected_cr(i, &fi);

        match fi.ftype {
            FrameType::I => {
                self.i_frame(i, &fi, pp.pid().unwrap_or(0xf0), pp.info());
            }
            FrameType::Rr => self.rr_rnr_frame(i, true, &fi),
            FrameType::Rnr => self.rr_rnr_frame(i, false, &fi),
            FrameType::Rej => self.rej_frame(i, &fi),
            FrameType::Srej => self.srej_frame(i, &fi, pp.info()),
            FrameType::Sabm => self.sabm_frame(i, fi.pf),
            FrameType::Sabme => self.sabme_frame(i, fi.pf),
            FrameType::Disc => self.disc_frame(i, fi.pf),
            FrameType::Dm => self.dm_frame(i, fi.pf),
            FrameType::Ua => self.ua_frame(i, fi.pf),
            FrameType::Frmr => self.frmr_frame(i),
            FrameType::Ui => self.ui_frame(i, &fi),
            FrameType::Xid | FrameType::Test | FrameType::UOther | FrameType::NotAx25 => {}
        }

        // If there is outgoing data and room in the window, ask the
        // transmitter for the channel.
        let s = &self.sessions[i];
        if !s.i_frame_queue.is_empty()
            && matches!(s.state, DlState::Connected | DlState::TimerRecovery)
            && !s.peer_receiver_busy
            && s.within_window_size()
        {
            self.tx.seize_request();
        }
    }

    fn check_expected_cr(&mut self, i: usize, fi: &ControlInfo) {
        let s = &self.sessions[i];
        let sid = s.stream_id;
        match fi.ftype {
            FrameType::I | FrameType::Sabm | FrameType::Disc => {
                if fi.cr != CmdRes::Cmd {
                    warn!("Stream {sid}: AX.25 Protocol Error S: {:?} must be COMMAND", fi.ftype);
                }
            }
            FrameType::Rr | FrameType::Rnr | FrameType::Rej => {
                if fi.cr != CmdRes::Cmd && fi.cr != CmdRes::Res {
                    warn!(
                        "Stream {sid}: AX.25 Protocol Error: {:?} must be COMMAND or RESPONSE",
                        fi.ftype
                    );
                }
            }
            FrameType::Srej | FrameType::Dm | FrameType::Ua | FrameType::Frmr => {
                if fi.cr != CmdRes::Res {
                    warn!("Stream {sid}: AX.25 Protocol Error: {:?} must be RESPONSE", fi.ftype);
                }
            }
            _ => {}
        }
    }

    // ----- Local requests -----------------------------------------

    /// Connect to a peer: send SABM and await UA.
    pub fn connect_request(&mut self, own: &Address, peer: &Address, client: usize) {
        let i = match self.find_index(own, peer) {
            Some(i) => i,
            None => self.create_session(own.clone(), peer.clone(), client),
        };
        match self.sessions[i].state {
            DlState::Disconnected => {
                self.set_version_2_0(i);
                let frack = self.config.frack;
                self.sessions[i].init_t1v_srt(frack);
                self.establish_data_link(i);
                self.sessions[i].layer_3_initiated = true;
                self.enter_new_state(i, DlState::AwaitingConnection);
            }
            DlState::AwaitingConnection | DlState::AwaitingRelease => {
                self.sessions[i].layer_3_initiated = true;
            }
            DlState::Connected | DlState::TimerRecovery => {
                self.discard_i_queue(i);
                self.establish_data_link(i);
                self.sessions[i].layer_3_initiated = true;
                self.enter_new_state(i, DlState::AwaitingConnection);
            }
        }
    }

    /// Disconnect from a peer.
    pub fn disconnect_request(&mut self, own: &Address, peer: &Address) {
        let Some(i) = self.find_index(own, peer) else {
            return;
        };
        match self.sessions[i].state {
            DlState::Disconnected | DlState::AwaitingRelease => {}
            DlState::AwaitingConnection => {
                self.discard_i_queue(i);
                self.sessions[i].stop_t1(&self.clock);
                self.enter_new_state(i, DlState::Disconnected);
            }
            DlState::Connected | DlState::TimerRecovery => {
                self.discard_i_queue(i);
                self.sessions[i].rc = 1;
                self.send_u(i, CmdRes::Cmd, FrameType::Disc, true);
                self.sessions[i].stop_t3();
                self.sessions[i].start_t1(&self.clock);
                self.enter_new_state(i, DlState::AwaitingRelease);
            }
        }
    }

    /// Send connected data to a peer, segmenting if it exceeds N1.
    pub fn data_request(&mut self, own: &Address, peer: &Address, pid: u8, data: &[u8]) {
        let Some(i) = self.find_index(own, peer) else {
            warn!("data request for unknown session {own} -> {peer}");
            return;
        };
        let n1 = self.sessions[i].n1_paclen;
        if data.len() <= n1 {
            self.sessions[i].i_frame_queue.push_back(ConnData {
                pid,
                data: data.to_vec(),
            });
        } else if n1 < 3 {
            warn!(
                "Stream {}: N1 of {n1} leaves no room for segment headers; dropping {} bytes",
                self.sessions[i].stream_id,
                data.len()
            );
            return;
        } else {
            // Segment: first info holds flag+count and the original
            // PID, each later one just a countdown byte.
            let first_cap = n1 - 2;
            let rest_cap = n1 - 1;
            let nseg = 1 + (data.len() - first_cap).div_ceil(rest_cap);
            if nseg > 128 {
                warn!(
                    "Stream {}: data request of {} bytes is too large to segment",
                    self.sessions[i].stream_id,
                    data.len()
                );
                return;
            }
            let mut remaining = (nseg - 1) as u8;
            let mut first = vec![0x80 | remaining, pid];
            first.extend_from_slice(&data[..first_cap]);
            self.sessions[i].i_frame_queue.push_back(ConnData {
                pid: crate::packet::PID_SEGMENTATION_FRAGMENT,
                data: first,
            });
            for chunk in data[first_cap..].chunks(rest_cap) {
                remaining -= 1;
                let mut seg = vec![remaining];
                seg.extend_from_slice(chunk);
                self.sessions[i].i_frame_queue.push_back(ConnData {
                    pid: crate::packet::PID_SEGMENTATION_FRAGMENT,
                    data: seg,
                });
            }
        }
        self.i_frame_pop_off_queue(i);
    }

    // ----- Frame senders ------------------------------------------

    fn send_u(&self, i: usize, cr: CmdRes, ftype: FrameType, pf: bool) {
        self.send_u_prio(i, cr, ftype, pf, Priority::Low);
    }

    fn send_u_prio(&self, i: usize, cr: CmdRes, ftype: FrameType, pf: bool, prio: Priority) {
        let s = &self.sessions[i];
        match Packet::new_u(&s.peer, &s.own, cr, ftype, pf, 0, &[]) {
            Ok(pp) => self.tx.data_request(prio, pp),
            Err(e) => warn!("INTERNAL ERROR building U frame: {e}"),
        }
    }

    fn send_s(&self, i: usize, cr: CmdRes, ftype: FrameType, nr: u8, pf: bool) {
        let s = &self.sessions[i];
        match Packet::new_s(&s.peer, &s.own, cr, ftype, nr, pf, &[]) {
            Ok(pp) => self.tx.data_request(Priority::Low, pp),
            Err(e) => warn!("INTERNAL ERROR building S frame: {e}"),
        }
    }

    fn send_i(&self, i: usize, nr: u8, ns: u8, pf: bool, pid: u8, data: &[u8]) {
        let s = &self.sessions[i];
        match Packet::new_i(&s.peer, &s.own, CmdRes::Cmd, nr, ns, pf, pid, data) {
            Ok(pp) => self.tx.data_request(Priority::Low, pp),
            Err(e) => warn!("INTERNAL ERROR building I frame: {e}"),
        }
    }

    // ----- Queue management ---------------------------------------

    fn discard_i_queue(&mut self, i: usize) {
        self.sessions[i].i_frame_queue.clear();
    }

    /// Send as many queued I frames as the window allows.
    fn i_frame_pop_off_queue(&mut self, i: usize) {
        match self.sessions[i].state {
            DlState::AwaitingConnection => {
                if self.sessions[i].layer_3_initiated {
                    self.sessions[i].i_frame_queue.pop_front();
                }
            }
            DlState::Connected | DlState::TimerRecovery => {
                loop {
                    let s = &self.sessions[i];
                    if s.peer_receiver_busy
                        || s.i_frame_queue.is_empty()
                        || !s.within_window_size()
                    {
                        break;
                    }
                    let s = &mut self.sessions[i];
                    let txdata = s.i_frame_queue.pop_front().unwrap();
                    let ns = s.vs;
                    let nr = s.vr;
                    self.send_i(i, nr, ns, false, txdata.pid, &txdata.data);

                    // Stash in the sent slot in case it gets lost and
                    // needs to be sent again.
                    let s = &mut self.sessions[i];
                    s.txdata_by_ns[ns as usize] = Some(txdata);
                    s.set_vs(ax25modulo(ns as i32 + 1));
                    s.acknowledge_pending = false;
                    s.stop_t3();
                    s.start_t1(&self.clock);
                }
            }
            DlState::Disconnected | DlState::AwaitingRelease => {}
        }
    }

    // ----- Frame handlers -----------------------------------------

    fn i_frame(&mut self, i: usize, fi: &ControlInfo, pid: u8, info: &[u8]) {
        match self.sessions[i].state {
            DlState::Disconnected => {
                // Flow chart logic for "all other commands".
                if fi.cr.is_command() {
                    self.send_u(i, CmdRes::Res, FrameType::Dm, fi.pf);
                }
            }
            DlState::AwaitingConnection => {
                // Ignore it. Keep same state.
            }
            DlState::AwaitingRelease => {
                if fi.cr.is_command() && fi.pf {
                    self.send_u(i, CmdRes::Res, FrameType::Dm, true);
                }
            }
            DlState::Connected | DlState::TimerRecovery => {
                if info.len() > MAX_INFO_LEN {
                    let sid = self.sessions[i].stream_id;
                    warn!(
                        "Stream {sid}: AX.25 Protocol Error O: info length {} out of range",
                        info.len()
                    );
                    self.establish_data_link(i);
                    self.sessions[i].layer_3_initiated = false;
                    self.enter_new_state(i, DlState::AwaitingConnection);
                    return;
                }
                if !self.sessions[i].is_good_nr(fi.nr) {
                    self.nr_error_recovery(i);
                    self.enter_new_state(i, DlState::AwaitingConnection);
                    return;
                }
                self.check_i_frame_ackd(i, fi.nr);
                let s = &mut self.sessions[i];
                if s.state == DlState::TimerRecovery && s.va == s.vs {
                    s.stop_t1(&self.clock);
                    self.select_t1_value(i);
                    let s = &mut self.sessions[i];
                    s.start_t3(&self.clock);
                    s.rc = 0;
                    self.enter_new_state(i, DlState::Connected);
                }
                if self.sessions[i].own_receiver_busy {
                    if fi.pf {
                        let nr = self.sessions[i].vr;
                        self.send_s(i, CmdRes::Res, FrameType::Rnr, nr, true);
                        self.sessions[i].acknowledge_pending = false;
                    }
                } else {
                    self.i_frame_continued(i, fi.pf, fi.ns, pid, info);
                }
            }
        }
    }

    fn i_frame_continued(&mut self, i: usize, p: bool, ns: u8, pid: u8, info: &[u8]) {
        let s = &mut self.sessions[i];
        if ns == s.vr {
            s.set_vr(ax25modulo(ns as i32 + 1));
            s.reject_exception = false;
            s.rxdata_by_ns[ns as usize] = None;

            self.dl_data_indication(i, pid, info);

            // Deliver any consecutive frames saved during selective
            // reject recovery.
            loop {
                let s = &mut self.sessions[i];
                let vr = s.vr;
                match s.rxdata_by_ns[vr as usize].take() {
                    None => break,
                    Some(saved) => {
                        s.set_vr(ax25modulo(vr as i32 + 1));
                        self.dl_data_indication(i, saved.pid, &saved.data);
                    }
                }
            }

            if p {
                let nr = self.sessions[i].vr;
                self.send_s(i, CmdRes::Res, FrameType::Rr, nr, true);
                self.sessions[i].acknowledge_pending = false;
            } else if !self.sessions[i].acknowledge_pending {
                self.sessions[i].acknowledge_pending = true;
                self.tx.seize_request();
            }
        } else if s.reject_exception {
            if p {
                let nr = s.vr;
                self.send_s(i, CmdRes::Res, FrameType::Rr, nr, true);
                self.sessions[i].acknowledge_pending = false;
            }
        } else {
            // Out of sequence: ask for a go-back-N retransmission.
            s.reject_exception = true;
            let nr = s.vr;
            self.send_s(i, CmdRes::Res, FrameType::Rej, nr, p);
            self.sessions[i].acknowledge_pending = false;
        }
    }

    fn rr_rnr_frame(&mut self, i: usize, ready: bool, fi: &ControlInfo) {
        match self.sessions[i].state {
            DlState::Disconnected => {
                if fi.cr.is_command() {
                    self.send_u(i, CmdRes::Res, FrameType::Dm, fi.pf);
                }
            }
            DlState::AwaitingConnection => {}
            DlState::AwaitingRelease => {
                if fi.cr.is_command() && fi.pf {
                    self.send_u(i, CmdRes::Res, FrameType::Dm, true);
                }
            }
            DlState::Connected => {
                self.sessions[i].peer_receiver_busy = !ready;
                if fi.cr.is_command() && fi.pf {
                    self.check_need_for_response(
                        i,
                        if ready { FrameType::Rr } else { FrameType::Rnr },
                        fi,
                    );
                }
                if self.sessions[i].is_good_nr(fi.nr) {
                    self.check_i_frame_ackd(i, fi.nr);
                } else {
                    self.nr_error_recovery(i);
                    self.enter_new_state(i, DlState::AwaitingConnection);
                }
            }
            DlState::TimerRecovery => {
                self.sessions[i].peer_receiver_busy = !ready;
                if fi.cr == CmdRes::Res && fi.pf {
                    // The acknowledgment we were waiting for.
                    self.sessions[i].stop_t1(&self.clock);
                    self.select_t1_value(i);
                    if self.sessions[i].is_good_nr(fi.nr) {
                        self.sessions[i].set_va(fi.nr);
                        if self.sessions[i].vs == self.sessions[i].va {
                            let s = &mut self.sessions[i];
                            s.start_t3(&self.clock);
                            s.rc = 0;
                            self.enter_new_state(i, DlState::Connected);
                        } else {
                            self.invoke_retransmission(i, fi.nr);
                            let s = &mut self.sessions[i];
                            s.stop_t3();
                            s.start_t1(&self.clock);
                            s.acknowledge_pending = false;
                        }
                    } else {
                        self.nr_error_recovery(i);
                        self.enter_new_state(i, DlState::AwaitingConnection);
                    }
                } else {
                    if fi.cr.is_command() && fi.pf {
                        self.enquiry_response(
                            i,
                            if ready { FrameType::Rr } else { FrameType::Rnr },
                            true,
                        );
                    }
                    if self.sessions[i].is_good_nr(fi.nr) {
                        self.sessions[i].set_va(fi.nr);
                        if fi.cr == CmdRes::Res
                            && !fi.pf
                            && self.sessions[i].vs == self.sessions[i].va
                        {
                            // All caught up with the ack from the
                            // other side.
                            self.sessions[i].stop_t1(&self.clock);
                            self.select_t1_value(i);
                            let s = &mut self.sessions[i];
                            s.start_t3(&self.clock);
                            s.rc = 0;
                            self.enter_new_state(i, DlState::Connected);
                        }
                    } else {
                        self.nr_error_recovery(i);
                        self.enter_new_state(i, DlState::AwaitingConnection);
                    }
                }
            }
        }
    }

    fn rej_frame(&mut self, i: usize, fi: &ControlInfo) {
        match self.sessions[i].state {
            DlState::Disconnected => {
                if fi.cr.is_command() {
                    self.send_u(i, CmdRes::Res, FrameType::Dm, fi.pf);
                }
            }
            DlState::AwaitingConnection => {}
            DlState::AwaitingRelease => {
                if fi.cr.is_command() && fi.pf {
                    self.send_u(i, CmdRes::Res, FrameType::Dm, true);
                }
            }
            DlState::Connected => {
                self.sessions[i].peer_receiver_busy = false;
                self.check_need_for_response(i, FrameType::Rej, fi);
                if self.sessions[i].is_good_nr(fi.nr) {
                    self.sessions[i].set_va(fi.nr);
                    self.sessions[i].stop_t1(&self.clock);
                    self.sessions[i].stop_t3();
                    self.select_t1_value(i);
                    self.invoke_retransmission(i, fi.nr);
                    let s = &mut self.sessions[i];
                    s.start_t1(&self.clock);
                    s.acknowledge_pending = false;
                } else {
                    self.nr_error_recovery(i);
                    self.enter_new_state(i, DlState::AwaitingConnection);
                }
            }
            DlState::TimerRecovery => {
                self.sessions[i].peer_receiver_busy = false;
                if fi.cr == CmdRes::Res && fi.pf {
                    self.sessions[i].stop_t1(&self.clock);
                    self.select_t1_value(i);
                    if self.sessions[i].is_good_nr(fi.nr) {
                        self.sessions[i].set_va(fi.nr);
                        if self.sessions[i].vs == self.sessions[i].va {
                            let s = &mut self.sessions[i];
                            s.start_t3(&self.clock);
                            s.rc = 0;
                            self.enter_new_state(i, DlState::Connected);
                        } else {
                            self.invoke_retransmission(i, fi.nr);
                            let s = &mut self.sessions[i];
                            s.stop_t3();
                            s.start_t1(&self.clock);
                            s.acknowledge_pending = false;
                        }
                    } else {
                        self.nr_error_recovery(i);
                        self.enter_new_state(i, DlState::AwaitingConnection);
                    }
                } else {
                    if fi.cr.is_command() && fi.pf {
                        self.enquiry_response(i, FrameType::Rej, true);
                    }
                    if self.sessions[i].is_good_nr(fi.nr) {
                        self.sessions[i].set_va(fi.nr);
                        if self.sessions[i].vs != self.sessions[i].va {
                            self.invoke_retransmission(i, fi.nr);
                            let s = &mut self.sessions[i];
                            s.stop_t3();
                            s.start_t1(&self.clock);
                            s.acknowledge_pending = false;
                        }
                    } else {
                        self.nr_error_recovery(i);
                        self.enter_new_state(i, DlState::AwaitingConnection);
                    }
                }
            }
        }
    }

    fn srej_frame(&mut self, i: usize, fi: &ControlInfo, info: &[u8]) {
        match self.sessions[i].state {
            DlState::Disconnected | DlState::AwaitingConnection | DlState::AwaitingRelease => {}
            DlState::Connected => {
                self.sessions[i].peer_receiver_busy = false;
                if self.sessions[i].is_good_nr(fi.nr) {
                    if fi.pf {
                        self.sessions[i].set_va(fi.nr);
                    }
                    self.sessions[i].stop_t1(&self.clock);
                    self.sessions[i].start_t3(&self.clock);
                    self.select_t1_value(i);
                    let num_resent = self.resend_for_srej(i, fi.nr, info);
                    if num_resent > 0 {
                        let s = &mut self.sessions[i];
                        s.stop_t3();
                        s.start_t1(&self.clock);
                        s.acknowledge_pending = false;
                    }
                    // Keep same state.
                } else {
                    self.nr_error_recovery(i);
                    self.enter_new_state(i, DlState::AwaitingConnection);
                }
            }
            DlState::TimerRecovery => {
                self.sessions[i].peer_receiver_busy = false;
                self.sessions[i].stop_t1(&self.clock);
                self.select_t1_value(i);
                if self.sessions[i].is_good_nr(fi.nr) {
                    if fi.pf {
                        self.sessions[i].set_va(fi.nr);
                    }
                    if self.sessions[i].vs == self.sessions[i].va {
                        // Acks all caught up. Back to connected.
                        let s = &mut self.sessions[i];
                        s.start_t3(&self.clock);
                        s.rc = 0;
                        self.enter_new_state(i, DlState::Connected);
                    } else {
                        let num_resent = self.resend_for_srej(i, fi.nr, info);
                        if num_resent > 0 {
                            let s = &mut self.sessions[i];
                            s.stop_t3();
                            s.start_t1(&self.clock);
                            s.acknowledge_pending = false;
                        }
                    }
                } else {
                    self.nr_error_recovery(i);
                    self.enter_new_state(i, DlState::AwaitingConnection);
                }
            }
        }
    }

    /// Retransmit the I frame the SREJ names, plus any extras listed
    /// in its information part (top 3 bits of each byte). A repeated
    /// N(S) just goes out again; the slots are untouched.
    fn resend_for_srej(&mut self, i: usize, nr: u8, info: &[u8]) -> usize {
        let mut num_resent = 0;
        let vr = self.sessions[i].vr;
        let mut wanted = vec![nr];
        for &b in info {
            wanted.push((b >> 5) & 0x07);
        }
        for ns in wanted {
            match self.sessions[i].txdata_by_ns[ns as usize].clone() {
                Some(txdata) => {
                    self.send_i(i, vr, ns, false, txdata.pid, &txdata.data);
                    num_resent += 1;
                }
                None => {
                    warn!(
                        "Stream {}: INTERNAL ERROR for SREJ. I frame for N(S)={ns} is not available",
                        self.sessions[i].stream_id
                    );
                }
            }
        }
        num_resent
    }

    fn sabm_frame(&mut self, i: usize, p: bool) {
        match self.sessions[i].state {
            DlState::Disconnected => {
                self.set_version_2_0(i);
                self.send_u(i, CmdRes::Res, FrameType::Ua, p);
                self.clear_exception_conditions(i);
                let s = &mut self.sessions[i];
                s.set_vs(0);
                s.set_va(0);
                s.set_vr(0);
                info!("Stream {}: Connected to {} (v2.0)", s.stream_id, s.peer);
                let frack = self.config.frack;
                let s = &mut self.sessions[i];
                s.init_t1v_srt(frack);
                s.start_t3(&self.clock);
                s.rc = 0;
                self.enter_new_state(i, DlState::Connected);
            }
            DlState::AwaitingConnection => {
                self.send_u(i, CmdRes::Res, FrameType::Ua, p);
                // Stay in awaiting connection.
            }
            DlState::AwaitingRelease => {
                self.send_u_prio(i, CmdRes::Res, FrameType::Dm, p, Priority::High);
                // Stay in awaiting release.
            }
            DlState::Connected | DlState::TimerRecovery => {
                self.send_u(i, CmdRes::Res, FrameType::Ua, p);
                if self.sessions[i].state == DlState::TimerRecovery {
                    self.set_version_2_0(i);
                }
                self.clear_exception_conditions(i);
                let s = &mut self.sessions[i];
                if s.vs != s.va {
                    s.i_frame_queue.clear();
                }
                s.stop_t1(&self.clock);
                s.start_t3(&self.clock);
                s.set_vs(0);
                s.set_va(0);
                s.set_vr(0);
                s.rc = 0;
                self.enter_new_state(i, DlState::Connected);
            }
        }
    }

    /// Extended (modulo 128) mode is not supported; answer an
    /// attempt with DM so the peer falls back or gives up.
    fn sabme_frame(&mut self, i: usize, p: bool) {
        match self.sessions[i].state {
            DlState::Disconnected => {
                self.send_u(i, CmdRes::Res, FrameType::Dm, p);
            }
            _ => {
                debug!(
                    "Stream {}: ignoring SABME in state {:?}",
                    self.sessions[i].stream_id, self.sessions[i].state
                );
            }
        }
    }

    fn disc_frame(&mut self, i: usize, p: bool) {
        match self.sessions[i].state {
            DlState::Disconnected | DlState::AwaitingConnection => {
                self.send_u(i, CmdRes::Res, FrameType::Dm, p);
            }
            DlState::AwaitingRelease => {
                self.send_u_prio(i, CmdRes::Res, FrameType::Ua, p, Priority::High);
            }
            DlState::Connected | DlState::TimerRecovery => {
                self.discard_i_queue(i);
                self.send_u(i, CmdRes::Res, FrameType::Ua, p);
                let s = &mut self.sessions[i];
                info!("Stream {}: Disconnected from {}", s.stream_id, s.peer);
                s.stop_t1(&self.clock);
                s.stop_t3();
                self.enter_new_state(i, DlState::Disconnected);
            }
        }
    }

    fn dm_frame(&mut self, i: usize, f: bool) {
        match self.sessions[i].state {
            DlState::Disconnected => {}
            DlState::AwaitingConnection => {
                if f {
                    self.discard_i_queue(i);
                    let s = &mut self.sessions[i];
                    info!("Stream {}: Disconnected from {}", s.stream_id, s.peer);
                    s.stop_t1(&self.clock);
                    self.enter_new_state(i, DlState::Disconnected);
                }
            }
            DlState::AwaitingRelease => {
                if f {
                    let s = &mut self.sessions[i];
                    info!("Stream {}: Disconnected from {}", s.stream_id, s.peer);
                    s.stop_t1(&self.clock);
                    self.enter_new_state(i, DlState::Disconnected);
                }
            }
            DlState::Connected | DlState::TimerRecovery => {
                let s = &mut self.sessions[i];
                info!("Stream {}: Disconnected from {}", s.stream_id, s.peer);
                self.discard_i_queue(i);
                let s = &mut self.sessions[i];
                s.stop_t1(&self.clock);
                s.stop_t3();
                self.enter_new_state(i, DlState::Disconnected);
            }
        }
    }

    fn ua_frame(&mut self, i: usize, f: bool) {
        match self.sessions[i].state {
            DlState::Disconnected => {}
            DlState::AwaitingConnection => {
                if f {
                    let frack = self.config.frack;
                    let s = &mut self.sessions[i];
                    if s.layer_3_initiated {
                        info!("Stream {}: Connected to {}", s.stream_id, s.peer);
                    } else if s.vs != s.va {
                        s.init_t1v_srt(frack);
                        s.start_t3(&self.clock);
                        info!("Stream {}: Connected to {}", s.stream_id, s.peer);
                    }
                    s.stop_t1(&self.clock);
                    s.start_t3(&self.clock);
                    s.set_vs(0);
                    s.set_va(0);
                    s.set_vr(0);
                    self.select_t1_value(i);
                    self.sessions[i].rc = 0;
                    self.enter_new_state(i, DlState::Connected);
                }
            }
            DlState::AwaitingRelease => {
                if f {
                    let s = &mut self.sessions[i];
                    info!("Stream {}: Disconnected from {}", s.stream_id, s.peer);
                    s.stop_t1(&self.clock);
                    self.enter_new_state(i, DlState::Disconnected);
                }
            }
            DlState::Connected | DlState::TimerRecovery => {
                // Unexpected UA: re-establish.
                self.establish_data_link(i);
                self.sessions[i].layer_3_initiated = false;
                self.enter_new_state(i, DlState::AwaitingConnection);
            }
        }
    }

    fn frmr_frame(&mut self, i: usize) {
        match self.sessions[i].state {
            DlState::Disconnected | DlState::AwaitingConnection | DlState::AwaitingRelease => {}
            DlState::Connected | DlState::TimerRecovery => {
                self.set_version_2_0(i);
                self.establish_data_link(i);
                self.sessions[i].layer_3_initiated = false;
                self.enter_new_state(i, DlState::AwaitingConnection);
            }
        }
    }

    fn ui_frame(&mut self, i: usize, fi: &ControlInfo) {
        if fi.cr.is_command() && fi.pf {
            match self.sessions[i].state {
                DlState::Disconnected
                | DlState::AwaitingConnection
                | DlState::AwaitingRelease => {
                    self.send_u(i, CmdRes::Res, FrameType::Dm, fi.pf);
                }
                DlState::Connected | DlState::TimerRecovery => {
                    self.enquiry_response(i, FrameType::Ui, fi.pf);
                }
            }
        }
    }

    // ----- Timers -------------------------------------------------

    fn t1_expiry(&mut self, i: usize) {
        match self.sessions[i].state {
            DlState::Disconnected => {}
            DlState::AwaitingConnection => {
                let s = &self.sessions[i];
                if s.rc == s.n2_retry {
                    self.discard_i_queue(i);
                    let s = &self.sessions[i];
                    info!(
                        "Failed to connect to {} after {} tries.",
                        s.peer, s.n2_retry
                    );
                    self.enter_new_state(i, DlState::Disconnected);
                } else {
                    self.bump_rc(i);
                    self.send_u(i, CmdRes::Cmd, FrameType::Sabm, true);
                    self.select_t1_value(i);
                    self.sessions[i].start_t1(&self.clock);
                }
            }
            DlState::AwaitingRelease => {
                let s = &self.sessions[i];
                if s.rc == s.n2_retry {
                    info!("Stream {}: Disconnected from {}", s.stream_id, s.peer);
                    self.enter_new_state(i, DlState::Disconnected);
                } else {
                    self.bump_rc(i);
                    self.send_u(i, CmdRes::Cmd, FrameType::Disc, true);
                    self.select_t1_value(i);
                    self.sessions[i].start_t1(&self.clock);
                }
            }
            DlState::Connected => {
                self.sessions[i].rc = 1;
                self.transmit_enquiry(i);
                self.enter_new_state(i, DlState::TimerRecovery);
            }
            DlState::TimerRecovery => {
                let s = &self.sessions[i];
                if s.rc == s.n2_retry {
                    info!(
                        "Stream {}: Disconnected from {} due to timeouts.",
                        s.stream_id, s.peer
                    );
                    self.discard_i_queue(i);
                    // DM can only be a response; F=0 since this is
                    // not a response to P=1.
                    self.send_u(i, CmdRes::Res, FrameType::Dm, false);
                    self.enter_new_state(i, DlState::Disconnected);
                } else {
                    self.bump_rc(i);
                    self.transmit_enquiry(i);
                }
            }
        }
    }

    fn t3_expiry(&mut self, i: usize) {
        match self.sessions[i].state {
            DlState::Connected => {
                // Idle probe.
                self.sessions[i].rc = 1;
                self.transmit_enquiry(i);
                self.enter_new_state(i, DlState::TimerRecovery);
            }
            _ => {}
        }
    }

    fn bump_rc(&mut self, i: usize) {
        let s = &mut self.sessions[i];
        s.rc += 1;
        if s.rc > s.peak_rc_value {
            s.peak_rc_value = s.rc;
        }
    }

    // ----- Flow chart subroutines ---------------------------------

    fn nr_error_recovery(&mut self, i: usize) {
        self.establish_data_link(i);
        self.sessions[i].layer_3_initiated = false;
    }

    fn establish_data_link(&mut self, i: usize) {
        self.clear_exception_conditions(i);
        self.sessions[i].rc = 1;
        self.send_u(i, CmdRes::Cmd, FrameType::Sabm, true);
        let s = &mut self.sessions[i];
        s.stop_t3();
        s.start_t1(&self.clock);
    }

    fn clear_exception_conditions(&mut self, i: usize) {
        let s = &mut self.sessions[i];
        s.peer_receiver_busy = false;
        s.reject_exception = false;
        s.own_receiver_busy = false;
        s.acknowledge_pending = false;
        for slot in s.rxdata_by_ns.iter_mut() {
            *slot = None;
        }
        s.ra = None;
    }

    fn transmit_enquiry(&mut self, i: usize) {
        let s = &self.sessions[i];
        let nr = s.vr;
        let ftype = if s.own_receiver_busy {
            FrameType::Rnr
        } else {
            FrameType::Rr
        };
        self.send_s(i, CmdRes::Cmd, ftype, nr, true);
        let s = &mut self.sessions[i];
        s.acknowledge_pending = false;
        s.start_t1(&self.clock);
    }

    fn enquiry_response(&mut self, i: usize, _frame_type: FrameType, f: bool) {
        let s = &self.sessions[i];
        let nr = s.vr;
        let ftype = if s.own_receiver_busy {
            FrameType::Rnr
        } else {
            FrameType::Rr
        };
        self.send_s(i, CmdRes::Res, ftype, nr, f);
        self.sessions[i].acknowledge_pending = false;
    }

    /// Resend everything from N(R) to V(S)-1 after a REJ or a
    /// response with an old N(R).
    fn invoke_retransmission(&mut self, i: usize, nr_input: u8) {
        if self.sessions[i].txdata_by_ns[nr_input as usize].is_none() {
            warn!(
                "INTERNAL ERROR: can't resend starting with N(S)={nr_input}, not available"
            );
            return;
        }
        let mut local_vs = nr_input;
        let mut sent_count = 0;
        loop {
            let s = &self.sessions[i];
            let vs = s.vs;
            let nr = s.vr;
            match s.txdata_by_ns[local_vs as usize].clone() {
                Some(txdata) => {
                    self.send_i(i, nr, local_vs, false, txdata.pid, &txdata.data);
                    // Keep it around in case we need to send again.
                    sent_count += 1;
                }
                None => {
                    warn!(
                        "INTERNAL ERROR: need to retransmit N(S)={local_vs} but it is not available"
                    );
                }
            }
            local_vs = ax25modulo(local_vs as i32 + 1);
            if local_vs == vs {
                break;
            }
        }
        if sent_count == 0 {
            warn!("INTERNAL ERROR: nothing to retransmit, N(R)={nr_input}");
        }
    }

    fn check_i_frame_ackd(&mut self, i: usize, nr: u8) {
        let s = &mut self.sessions[i];
        if s.peer_receiver_busy {
            s.set_va(nr);
            s.start_t3(&self.clock);
            if !s.is_t1_running() {
                s.start_t1(&self.clock);
            }
        } else if nr == s.vs {
            s.set_va(nr);
            s.stop_t1(&self.clock);
            s.start_t3(&self.clock);
            self.select_t1_value(i);
        } else if nr != s.va {
            s.set_va(nr);
            s.start_t1(&self.clock);
        }
    }

    fn check_need_for_response(&mut self, i: usize, frame_type: FrameType, fi: &ControlInfo) {
        if fi.cr.is_command() && fi.pf {
            self.enquiry_response(i, frame_type, true);
        }
    }

    /// Update the smoothed round trip time and pick the next T1.
    fn select_t1_value(&mut self, i: usize) {
        let s = &mut self.sessions[i];
        let old_srt = s.srt;
        if s.rc == 0 {
            if s.t1_remaining_when_last_stopped >= 0.0 {
                // Negative means invalid, don't use it.
                s.srt = 7.0 / 8.0 * s.srt
                    + 1.0 / 8.0 * (s.t1v - s.t1_remaining_when_last_stopped);
            }
            if s.srt < 1.0 {
                s.srt = 1.0;
            }
            s.t1v = s.srt * 2.0;
        } else if s.t1_had_expired {
            s.t1v = s.rc as f64 * 0.25 + s.srt * 2.0;
        }
        if s.t1v < 0.99 || s.t1v > 30.0 {
            warn!(
                "INTERNAL ERROR? Stream {}: select_t1_value, rc={}, t1 remaining={:.3}, \
                 old srt={:.3}, new srt={:.3}, extreme new t1v={:.3}",
                s.stream_id, s.rc, s.t1_remaining_when_last_stopped, old_srt, s.srt, s.t1v
            );
        }
    }

    fn set_version_2_0(&mut self, i: usize) {
        let s = &mut self.sessions[i];
        s.n1_paclen = self.config.paclen;
        s.k_maxframe = self.config.maxframe;
        s.n2_retry = self.config.retry;
    }

    fn enter_new_state(&mut self, i: usize, new_state: DlState) {
        let s = &mut self.sessions[i];
        let was_connected = matches!(s.state, DlState::Connected | DlState::TimerRecovery);
        let is_connected = matches!(new_state, DlState::Connected | DlState::TimerRecovery);
        s.state = new_state;
        if was_connected != is_connected
            && let Some(hook) = self.connected_hook.as_mut()
        {
            hook(is_connected);
        }
    }

    // ----- Reassembly ---------------------------------------------

    /// Incoming in-sequence I frame data. Segmented streams (PID
    /// 0x08) are reassembled and handed to the delivery callback;
    /// anything else already reached the client as a raw frame.
    fn dl_data_indication(&mut self, i: usize, pid: u8, data: &[u8]) {
        let sid = self.sessions[i].stream_id;
        let seg = crate::packet::PID_SEGMENTATION_FRAGMENT;
        match self.sessions[i].ra.take() {
            None => {
                if pid != seg {
                    return;
                }
                if data.len() < 2 || data[0] & 0x80 == 0 {
                    warn!(
                        "Stream {sid}: AX.25 Reassembler Protocol Error Z: \
                         Not first segment in ready state."
                    );
                    return;
                }
                // First segment: high bit set, low 7 bits count the
                // segments still to come, then the original PID.
                let following = data[0] & 0x7f;
                let total = (following as usize + 1) * (data.len() - 1) - 1;
                let mut ra = Reassembly {
                    pid: data[1],
                    buff: Vec::with_capacity(total),
                    size: total,
                    following,
                };
                ra.buff.extend_from_slice(&data[2..]);
                if following == 0 {
                    self.complete_reassembly(i, ra);
                } else {
                    self.sessions[i].ra = Some(ra);
                }
            }
            Some(mut ra) => {
                if pid != seg {
                    warn!(
                        "Stream {sid}: AX.25 Reassembler Protocol Error Z: \
                         Not segment in reassembling state."
                    );
                    return;
                }
                if data.is_empty() || data[0] & 0x80 != 0 {
                    warn!(
                        "Stream {sid}: AX.25 Reassembler Protocol Error Z: \
                         First segment in reassembling state."
                    );
                    return;
                }
                if data[0] & 0x7f != ra.following.wrapping_sub(1) {
                    warn!(
                        "Stream {sid}: AX.25 Reassembler Protocol Error Z: \
                         Segments out of sequence."
                    );
                    return;
                }
                ra.following = data[0] & 0x7f;
                if ra.buff.len() + data.len() - 1 > ra.size {
                    warn!(
                        "Stream {sid}: AX.25 Reassembler Protocol Error Z: \
                         Segments exceed buffer space."
                    );
                    return;
                }
                ra.buff.extend_from_slice(&data[1..]);
                if ra.following == 0 {
                    self.complete_reassembly(i, ra);
                } else {
                    self.sessions[i].ra = Some(ra);
                }
            }
        }
    }

    fn complete_reassembly(&mut self, i: usize, ra: Reassembly) {
        let s = &self.sessions[i];
        debug!(
            "Stream {}: reassembled {} bytes, pid {:#x}",
            s.stream_id,
            ra.buff.len(),
            ra.pid
        );
        let sid = s.stream_id;
        if let Some(deliver) = self.deliver.as_mut() {
            deliver(sid, ra.pid, ra.buff);
        }
    }

    // ----- Test support -------------------------------------------

    #[cfg(test)]
    fn advance_clock(&mut self, secs: f64) {
        self.clock.skew += secs;
    }
}

fn frame_type_index(ftype: FrameType) -> usize {
    match ftype {
        FrameType::I => 0,
        FrameType::Rr => 1,
        FrameType::Rnr => 2,
        FrameType::Rej => 3,
        FrameType::Srej => 4,
        FrameType::Sabm => 5,
        FrameType::Sabme => 6,
        FrameType::Disc => 7,
        FrameType::Dm => 8,
        FrameType::Ua => 9,
        FrameType::Frmr => 10,
        FrameType::Ui => 11,
        FrameType::Xid => 12,
        FrameType::Test => 13,
        FrameType::UOther => 14,
        FrameType::NotAx25 => 15,
    }
}
