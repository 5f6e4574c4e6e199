//! Realtime feedback channel: binary frame decoding and the cached robot state
//!
//! The controller pushes a fixed 1440-byte little-endian frame on port 30004 every
//! few milliseconds. One reader thread owns the socket, decodes accepted frames and
//! overwrites a single snapshot behind a mutex; every accessor copies out of that
//! snapshot and never touches the network.

use crate::config::ConnectionConfig;
use crate::motion::sleep_while;
use crate::protocol::deg_to_rad;
use crate::robot::{Pose, RobotMode, ARM_JOINTS, JOINT_SLOTS};
use crate::transport::{receive_full, Received, TcpTransport, Transport};
use crate::{Mg400Error, Result};
use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Size of one realtime frame, also the value its `len` field must carry.
pub const FRAME_SIZE: usize = 1440;

const LEN_OFFSET: usize = 0;
const DIGITAL_INPUTS_OFFSET: usize = 8;
const DIGITAL_OUTPUTS_OFFSET: usize = 16;
const ROBOT_MODE_OFFSET: usize = 24;
const TIMESTAMP_OFFSET: usize = 32;
const Q_ACTUAL_OFFSET: usize = 432;
const TOOL_VECTOR_ACTUAL_OFFSET: usize = 624;
const BRAKE_STATUS_OFFSET: usize = 1025;
const ENABLE_STATUS_OFFSET: usize = 1026;
const DRAG_STATUS_OFFSET: usize = 1027;
const RUNNING_STATUS_OFFSET: usize = 1028;
const ERROR_STATUS_OFFSET: usize = 1029;
const ACTUAL_QUATERNION_OFFSET: usize = 1384;

fn le_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn le_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn le_f64_array<const N: usize>(buf: &[u8], offset: usize) -> [f64; N] {
    let mut values = [0.0; N];
    for (i, value) in values.iter_mut().enumerate() {
        *value = f64::from_bits(le_u64(buf, offset + i * 8));
    }
    values
}

/// The fields of a realtime frame this driver consumes, in controller units.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeFrame {
    pub len: u16,
    pub digital_inputs: u64,
    pub digital_outputs: u64,
    pub robot_mode: u64,
    pub timestamp: u64,
    /// Joint angles in degrees.
    pub q_actual: [f64; JOINT_SLOTS],
    /// Tool pose `[x, y, z, rx, ry, rz]` in millimeters and degrees.
    pub tool_vector_actual: [f64; 6],
    pub brake_status: u8,
    pub enable_status: u8,
    pub drag_status: u8,
    pub running_status: u8,
    pub error_status: u8,
    pub actual_quaternion: [f64; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Accepted(RealtimeFrame),
    /// Wrong size or wrong `len` field; `declared` is absent when even the length
    /// field was not received.
    Discarded { declared: Option<u16> },
}

impl RealtimeFrame {
    pub fn decode(buf: &[u8]) -> FrameOutcome {
        if buf.len() < 2 {
            return FrameOutcome::Discarded { declared: None };
        }
        let len = le_u16(buf, LEN_OFFSET);
        if buf.len() != FRAME_SIZE || len as usize != FRAME_SIZE {
            return FrameOutcome::Discarded { declared: Some(len) };
        }

        FrameOutcome::Accepted(Self {
            len,
            digital_inputs: le_u64(buf, DIGITAL_INPUTS_OFFSET),
            digital_outputs: le_u64(buf, DIGITAL_OUTPUTS_OFFSET),
            robot_mode: le_u64(buf, ROBOT_MODE_OFFSET),
            timestamp: le_u64(buf, TIMESTAMP_OFFSET),
            q_actual: le_f64_array(buf, Q_ACTUAL_OFFSET),
            tool_vector_actual: le_f64_array(buf, TOOL_VECTOR_ACTUAL_OFFSET),
            brake_status: buf[BRAKE_STATUS_OFFSET],
            enable_status: buf[ENABLE_STATUS_OFFSET],
            drag_status: buf[DRAG_STATUS_OFFSET],
            running_status: buf[RUNNING_STATUS_OFFSET],
            error_status: buf[ERROR_STATUS_OFFSET],
            actual_quaternion: le_f64_array(buf, ACTUAL_QUATERNION_OFFSET),
        })
    }

    /// Serialize into a full frame; only used to play the controller in tests.
    #[cfg(test)]
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; FRAME_SIZE];
        buf[LEN_OFFSET..LEN_OFFSET + 2].copy_from_slice(&self.len.to_le_bytes());
        for (offset, value) in [
            (DIGITAL_INPUTS_OFFSET, self.digital_inputs),
            (DIGITAL_OUTPUTS_OFFSET, self.digital_outputs),
            (ROBOT_MODE_OFFSET, self.robot_mode),
            (TIMESTAMP_OFFSET, self.timestamp),
        ] {
            buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        }
        let arrays: [(usize, &[f64]); 3] = [
            (Q_ACTUAL_OFFSET, &self.q_actual),
            (TOOL_VECTOR_ACTUAL_OFFSET, &self.tool_vector_actual),
            (ACTUAL_QUATERNION_OFFSET, &self.actual_quaternion),
        ];
        for (offset, values) in arrays {
            for (i, value) in values.iter().enumerate() {
                let at = offset + i * 8;
                buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
            }
        }
        buf[BRAKE_STATUS_OFFSET] = self.brake_status;
        buf[ENABLE_STATUS_OFFSET] = self.enable_status;
        buf[DRAG_STATUS_OFFSET] = self.drag_status;
        buf[RUNNING_STATUS_OFFSET] = self.running_status;
        buf[ERROR_STATUS_OFFSET] = self.error_status;
        buf
    }

    #[cfg(test)]
    pub(crate) fn sample(q_degrees: [f64; JOINT_SLOTS], tool: [f64; 6], mode: RobotMode) -> Self {
        Self {
            len: FRAME_SIZE as u16,
            digital_inputs: 0,
            digital_outputs: 0,
            robot_mode: mode.raw() as u64,
            timestamp: 0,
            q_actual: q_degrees,
            tool_vector_actual: tool,
            brake_status: 0,
            enable_status: 1,
            drag_status: 0,
            running_status: 0,
            error_status: 0,
            actual_quaternion: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Latest decoded state, in SI units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeedbackSnapshot {
    /// All six joint slots in radians.
    pub joints: [f64; JOINT_SLOTS],
    pub pose: Pose,
    /// Quaternion `[x, y, z, w]` as reported by the controller.
    pub quaternion: [f64; 4],
    pub mode: Option<RobotMode>,
    pub digital_inputs: u64,
    pub digital_outputs: u64,
    pub enabled: bool,
    pub error_status: bool,
    pub controller_timestamp: u64,
    /// Host time of the frame that produced this snapshot; `None` before the first frame.
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeedbackSnapshot {
    fn from_frame(frame: &RealtimeFrame) -> Self {
        Self {
            joints: frame.q_actual.map(deg_to_rad),
            pose: Pose::from_controller(&frame.tool_vector_actual),
            quaternion: frame.actual_quaternion,
            mode: Some(RobotMode::from_raw(frame.robot_mode as i64)),
            digital_inputs: frame.digital_inputs,
            digital_outputs: frame.digital_outputs,
            enabled: frame.enable_status != 0,
            error_status: frame.error_status != 0,
            controller_timestamp: frame.timestamp,
            updated_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Streaming,
    /// Terminal; the reader gave up after the configured number of failures.
    Fatal,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ChannelState::Connecting,
            2 => ChannelState::Streaming,
            3 => ChannelState::Fatal,
            _ => ChannelState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Disconnected => 0,
            ChannelState::Connecting => 1,
            ChannelState::Streaming => 2,
            ChannelState::Fatal => 3,
        }
    }
}

/// State shared between the reader thread (sole writer) and accessors.
struct Shared {
    snapshot: Mutex<FeedbackSnapshot>,
    state: AtomicU8,
    running: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            snapshot: Mutex::new(FeedbackSnapshot::default()),
            state: AtomicU8::new(ChannelState::Disconnected.as_u8()),
            running: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn snapshot(&self) -> FeedbackSnapshot {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decode `buf` and publish it. Returns false when the frame was discarded.
    fn ingest(&self, buf: &[u8]) -> bool {
        match RealtimeFrame::decode(buf) {
            FrameOutcome::Accepted(frame) => {
                let next = FeedbackSnapshot::from_frame(&frame);
                *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = next;
                true
            }
            FrameOutcome::Discarded { declared } => {
                debug!(
                    "Discarding realtime frame: {} bytes, declared length {:?}",
                    buf.len(),
                    declared
                );
                false
            }
        }
    }
}

pub struct RealtimeFeedback {
    transport: Arc<dyn Transport>,
    connection: ConnectionConfig,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    fatal_tx: Sender<Mg400Error>,
    fatal_rx: Receiver<Mg400Error>,
}

impl RealtimeFeedback {
    pub fn new(ip: &str, port: u16, connection: &ConnectionConfig) -> Self {
        Self::with_transport(Arc::new(TcpTransport::new(ip, port)), connection)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, connection: &ConnectionConfig) -> Self {
        let (fatal_tx, fatal_rx) = bounded(1);
        Self {
            transport,
            connection: connection.clone(),
            shared: Arc::new(Shared::new()),
            reader: Mutex::new(None),
            fatal_tx,
            fatal_rx,
        }
    }

    /// Spawn the reader thread. Does nothing while a previous reader has not been stopped.
    pub fn start(&self) -> Result<()> {
        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        if reader.is_some() {
            return Ok(());
        }

        if let Some(stale) = self.take_fatal() {
            warn!("Dropping unread notice from the previous realtime run: {}", stale);
        }
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.set_state(ChannelState::Disconnected);
        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let connection = self.connection.clone();
        let fatal_tx = self.fatal_tx.clone();

        let handle = thread::Builder::new()
            .name("mg400-realtime".to_string())
            .spawn(move || read_frames(transport, shared, connection, fatal_tx))?;

        *reader = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        // Shutting the socket down wakes a reader blocked in receive.
        self.transport.disconnect();
        let handle = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Realtime reader thread panicked");
            }
        }
        self.transport.disconnect();
        if self.shared.state() != ChannelState::Fatal {
            self.shared.set_state(ChannelState::Disconnected);
        }
    }

    /// True while the reader thread is supposed to run.
    pub fn is_active(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    pub fn is_fatal(&self) -> bool {
        self.state() == ChannelState::Fatal
    }

    /// Receiver that yields one `Mg400Error::ChannelFatal` if the reader gives up.
    pub fn fatal_events(&self) -> Receiver<Mg400Error> {
        self.fatal_rx.clone()
    }

    /// Non-blocking check for the fatal notification. Consumes it.
    pub fn take_fatal(&self) -> Option<Mg400Error> {
        match self.fatal_rx.try_recv() {
            Ok(err) => Some(err),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn snapshot(&self) -> FeedbackSnapshot {
        self.shared.snapshot()
    }

    /// The arm's four joint angles in radians.
    pub fn current_joint_states(&self) -> [f64; ARM_JOINTS] {
        let joints = self.snapshot().joints;
        [joints[0], joints[1], joints[2], joints[3]]
    }

    pub fn current_end_pose(&self) -> Pose {
        self.snapshot().pose
    }

    /// Mode from the latest frame, `None` until one has been accepted.
    pub fn robot_mode(&self) -> Option<RobotMode> {
        self.snapshot().mode
    }

    pub fn is_robot_mode(&self, mode: RobotMode) -> bool {
        self.robot_mode() == Some(mode)
    }

    #[cfg(test)]
    pub(crate) fn publish_frame(&self, frame: &RealtimeFrame) {
        self.shared.ingest(&frame.to_bytes());
    }
}

impl Drop for RealtimeFeedback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_frames(
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    connection: ConnectionConfig,
    fatal_tx: Sender<Mg400Error>,
) {
    let trials = connection.realtime_trials;
    let mut buf = vec![0u8; FRAME_SIZE];
    let mut failures: u32 = 0;

    info!("Realtime reader started for {}", transport.peer());

    while shared.running.load(Ordering::SeqCst) {
        if failures >= trials {
            error!(
                "Realtime channel to {} failed {} consecutive times, giving up",
                transport.peer(),
                failures
            );
            transport.disconnect();
            shared.set_state(ChannelState::Fatal);
            let notice = Mg400Error::ChannelFatal {
                channel: "realtime",
                trials,
            };
            if let Err(TrySendError::Full(notice)) = fatal_tx.try_send(notice) {
                warn!("Previous fatal notice still unread, not queueing: {}", notice);
            }
            return;
        }

        if !transport.is_connected() {
            shared.set_state(ChannelState::Connecting);
            if let Err(e) = transport.connect(connection.connect_timeout()) {
                failures += 1;
                warn!("Realtime connect failed ({}/{}): {}", failures, trials, e);
                shared.set_state(ChannelState::Disconnected);
                sleep_while(&shared.running, connection.retry_delay());
                continue;
            }
            shared.set_state(ChannelState::Streaming);
        }

        match receive_full(transport.as_ref(), &mut buf, connection.realtime_recv_timeout()) {
            Ok(Received::Data(n)) if n == FRAME_SIZE => {
                if shared.ingest(&buf) {
                    failures = 0;
                }
            }
            Ok(Received::Data(n)) => {
                // A partial frame leaves the stream misaligned; reconnect on a frame boundary.
                shared.ingest(&buf[..n]);
                transport.disconnect();
                shared.set_state(ChannelState::Disconnected);
            }
            Ok(Received::Timeout) => {
                failures += 1;
                warn!("Realtime receive timed out ({}/{})", failures, trials);
                transport.disconnect();
                shared.set_state(ChannelState::Disconnected);
            }
            Err(e) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                failures += 1;
                warn!("Realtime receive failed ({}/{}): {}", failures, trials, e);
                transport.disconnect();
                shared.set_state(ChannelState::Disconnected);
            }
        }
    }

    info!("Realtime reader stopped for {}", transport.peer());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn fast_config(trials: u32) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout_ms: 200,
            realtime_recv_timeout_ms: 300,
            realtime_trials: trials,
            retry_delay_ms: 10,
            ..ConnectionConfig::default()
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_decode_offsets() {
        let mut frame = RealtimeFrame::sample(
            [10.0, 20.0, 30.0, 40.0, 0.0, 0.0],
            [350.0, 0.0, 0.0, 0.0, 0.0, 90.0],
            RobotMode::Running,
        );
        frame.digital_inputs = 0b101;
        frame.error_status = 1;
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(&bytes[0..2], &1440u16.to_le_bytes());
        assert_eq!(bytes[ROBOT_MODE_OFFSET], 7);

        match RealtimeFrame::decode(&bytes) {
            FrameOutcome::Accepted(decoded) => assert_eq!(decoded, frame),
            other => panic!("expected accepted frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let mut frame = RealtimeFrame::sample([0.0; 6], [0.0; 6], RobotMode::Enable);
        frame.len = 1000;
        assert_eq!(
            RealtimeFrame::decode(&frame.to_bytes()),
            FrameOutcome::Discarded { declared: Some(1000) }
        );

        let good = RealtimeFrame::sample([0.0; 6], [0.0; 6], RobotMode::Enable).to_bytes();
        assert_eq!(
            RealtimeFrame::decode(&good[..700]),
            FrameOutcome::Discarded { declared: Some(1440) }
        );
        assert_eq!(RealtimeFrame::decode(&[5]), FrameOutcome::Discarded { declared: None });
    }

    #[test]
    fn test_discarded_frame_keeps_previous_snapshot() {
        let shared = Shared::new();
        let good = RealtimeFrame::sample(
            [0.0, 0.0, 45.0, 45.0, 0.0, 0.0],
            [350.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            RobotMode::Enable,
        );
        assert!(shared.ingest(&good.to_bytes()));
        let before = shared.snapshot();
        assert!((before.joints[2] - 0.25 * PI).abs() < 1e-12);
        assert!((before.pose.x - 0.35).abs() < 1e-12);

        let mut bad = RealtimeFrame::sample([90.0; 6], [0.0; 6], RobotMode::Error);
        bad.len = 1439;
        assert!(!shared.ingest(&bad.to_bytes()));
        assert_eq!(shared.snapshot(), before);
    }

    #[test]
    fn test_streams_frames_from_controller() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let frame = RealtimeFrame::sample(
                [0.0, 90.0, -45.0, 180.0, 0.0, 0.0],
                [200.0, -100.0, 50.0, 0.0, 0.0, -90.0],
                RobotMode::Enable,
            );
            // Deliver in two pieces to exercise reassembly.
            let bytes = frame.to_bytes();
            socket.write_all(&bytes[..500]).unwrap();
            socket.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            socket.write_all(&bytes[500..]).unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let feedback = RealtimeFeedback::new("127.0.0.1", port, &fast_config(100));
        assert_eq!(feedback.robot_mode(), None);
        feedback.start().unwrap();

        assert!(wait_until(|| feedback.robot_mode().is_some()));
        assert!(feedback.is_robot_mode(RobotMode::Enable));

        let joints = feedback.current_joint_states();
        assert_eq!(joints[0], 0.0);
        assert!((joints[1] - PI / 2.0).abs() < 1e-12);
        assert!((joints[2] + PI / 4.0).abs() < 1e-12);
        assert!((joints[3] - PI).abs() < 1e-12);

        let pose = feedback.current_end_pose();
        assert!((pose.x - 0.2).abs() < 1e-12);
        assert!((pose.y + 0.1).abs() < 1e-12);
        assert!((pose.yaw + PI / 2.0).abs() < 1e-12);
        assert!(feedback.snapshot().updated_at.is_some());

        feedback.stop();
        assert!(!feedback.is_active());
        server.join().unwrap();
    }

    #[test]
    fn test_fatal_after_consecutive_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let feedback = RealtimeFeedback::new("127.0.0.1", port, &fast_config(3));
        let events = feedback.fatal_events();
        feedback.start().unwrap();

        let err = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, Mg400Error::ChannelFatal { channel: "realtime", trials: 3 }));
        assert!(wait_until(|| feedback.is_fatal()));

        // Reported once, and the reader does not keep retrying.
        thread::sleep(Duration::from_millis(100));
        assert!(feedback.take_fatal().is_none());
        assert_eq!(feedback.state(), ChannelState::Fatal);

        feedback.stop();
        assert_eq!(feedback.state(), ChannelState::Fatal);
    }

    #[test]
    fn test_restart_replaces_unread_fatal_notice() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ConnectionConfig {
            retry_delay_ms: 200,
            ..fast_config(2)
        };
        let feedback = RealtimeFeedback::new("127.0.0.1", port, &config);
        feedback.start().unwrap();
        assert!(wait_until(|| feedback.is_fatal()));
        feedback.stop();

        // The first notice is never consumed; a restart clears it.
        feedback.start().unwrap();
        assert!(feedback.take_fatal().is_none());
        assert_ne!(feedback.state(), ChannelState::Fatal);

        let err = feedback.fatal_events().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, Mg400Error::ChannelFatal { trials: 2, .. }));
        assert!(feedback.is_fatal());
        feedback.stop();
    }

    #[test]
    fn test_readers_never_see_torn_snapshots() {
        let shared = Arc::new(Shared::new());
        let frames: Vec<Vec<u8>> = [10.0, 20.0]
            .iter()
            .map(|&deg| RealtimeFrame::sample([deg; 6], [deg; 6], RobotMode::Running).to_bytes())
            .collect();

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..2000 {
                    shared.ingest(&frames[i % 2]);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let snapshot = shared.snapshot();
                        let first = snapshot.joints[0];
                        assert!(snapshot.joints.iter().all(|&q| q == first));
                        assert_eq!(snapshot.pose.roll, first);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
