//! End-to-end polling cycle tests against a scripted mock transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sokbms_lib::client::Error;
use sokbms_lib::transport::{BleSession, BleTransport, TransportError};
use sokbms_lib::SokBms;

const INFO_BUFFER: [u8; 18] = [
    0xE4, 0x0C, 0xE9, 0x0C, 0xEE, 0x0C, 0xF3, 0x0C, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x41, 0x00,
];
const TEMPERATURE_BUFFER: [u8; 7] = [0x00, 0x00, 0x00, 0x00, 0x00, 0xFA, 0x00];
const CAPACITY_BUFFER: [u8; 8] = [0x10, 0x27, 0x00, 0x00, 0x32, 0x00, 0x00, 0x00];
const CELLS_BUFFER: [u8; 8] = [0xE4, 0x0C, 0xE9, 0x0C, 0xEE, 0x0C, 0xF3, 0x0C];

fn cycle_script() -> Vec<Vec<u8>> {
    vec![
        INFO_BUFFER.to_vec(),
        TEMPERATURE_BUFFER.to_vec(),
        CAPACITY_BUFFER.to_vec(),
        CELLS_BUFFER.to_vec(),
    ]
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Scripted transport: each session replays one pre-loaded list of response
/// buffers and records every write.
struct MockTransport {
    scripts: VecDeque<Vec<Vec<u8>>>,
    fail_connect: bool,
    fail_discover: bool,
    fail_read_at: Option<usize>,
    counters: Arc<Counters>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            scripts: VecDeque::new(),
            fail_connect: false,
            fail_discover: false,
            fail_read_at: None,
            counters: Arc::new(Counters::default()),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_script(script: Vec<Vec<u8>>) -> Self {
        let mut transport = Self::new();
        transport.scripts.push_back(script);
        transport
    }

    fn push_script(&mut self, script: Vec<Vec<u8>>) {
        self.scripts.push_back(script);
    }

    fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.writes)
    }
}

struct MockSession {
    responses: VecDeque<Vec<u8>>,
    fail_discover: bool,
    fail_read_at: Option<usize>,
    reads_done: usize,
    counters: Arc<Counters>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl BleTransport for MockTransport {
    type Session = MockSession;

    async fn connect(&mut self) -> Result<MockSession, TransportError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(TransportError::Connect("adapter unavailable".into()));
        }
        let responses = self.scripts.pop_front().unwrap_or_default();
        Ok(MockSession {
            responses: responses.into(),
            fail_discover: self.fail_discover,
            fail_read_at: self.fail_read_at,
            reads_done: 0,
            counters: Arc::clone(&self.counters),
            writes: Arc::clone(&self.writes),
        })
    }
}

#[async_trait]
impl BleSession for MockSession {
    async fn discover(&mut self) -> Result<(), TransportError> {
        if self.fail_discover {
            return Err(TransportError::Discovery(
                "service enumeration timed out".into(),
            ));
        }
        Ok(())
    }

    async fn write_command(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.writes.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.fail_read_at == Some(self.reads_done) {
            return Err(TransportError::Read("link dropped".into()));
        }
        self.reads_done += 1;
        self.responses
            .pop_front()
            .ok_or_else(|| TransportError::Read("no scripted response left".into()))
    }

    async fn disconnect(&mut self) {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_full_cycle_decodes_all_values() {
    let transport = MockTransport::with_script(cycle_script());
    let counters = transport.counters();
    let mut bms = SokBms::new(transport);

    let telemetry = bms.update().await.unwrap().clone();

    assert!(approx(telemetry.voltage, 13.23));
    assert!(approx(telemetry.current, 10.0));
    assert_eq!(telemetry.soc, 65);
    assert!(approx(telemetry.temperature, 25.0));
    assert!(approx(telemetry.capacity, 100.0));
    assert_eq!(telemetry.num_cycles, 50);
    assert_eq!(telemetry.cell_voltages, vec![3.3, 3.305, 3.31, 3.315]);

    let derived = bms.derived().unwrap();
    assert!(approx(derived.power, 132.3));
    let cells = derived.cells.unwrap();
    assert!(approx(cells.max, 3.315));
    assert_eq!(cells.index_max, 3);
    assert!(approx(cells.min, 3.3));
    assert_eq!(cells.index_min, 0);
    assert!(approx(cells.avg, 3.3075));
    assert!(approx(cells.median, 3.3075));
    assert!(approx(cells.delta, 0.015));

    assert_eq!(bms.num_samples(), 1);
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sequence_writes_opcodes_in_order() {
    let transport = MockTransport::with_script(cycle_script());
    let writes = transport.writes();
    let mut bms = SokBms::new(transport);

    bms.update().await.unwrap();

    let writes = writes.lock().unwrap();
    let opcodes: Vec<u8> = writes.iter().map(|w| w[1]).collect();
    assert_eq!(opcodes, vec![0xC1, 0xC1, 0xC2, 0xC2]);
}

#[tokio::test]
async fn test_connect_retry_budget_disconnects_each_attempt() {
    let mut transport = MockTransport::new();
    transport.fail_discover = true;
    let counters = transport.counters();
    let mut bms = SokBms::new(transport);
    bms.set_retry_delay(Duration::from_millis(1));

    let err = bms.update().await.unwrap_err();

    assert!(matches!(err, Error::Connection { attempts: 3, .. }));
    assert_eq!(counters.connects.load(Ordering::SeqCst), 3);
    // A session that fails service discovery is still released, once per attempt.
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 3);
    assert!(bms.telemetry().is_none());
    assert!(bms.derived().is_none());
    assert_eq!(bms.num_samples(), 0);
}

#[tokio::test]
async fn test_failed_connect_counts_toward_budget() {
    let mut transport = MockTransport::new();
    transport.fail_connect = true;
    let counters = transport.counters();
    let mut bms = SokBms::new(transport);
    bms.set_retry_delay(Duration::from_millis(1));

    let err = bms.update().await.unwrap_err();

    assert!(matches!(err, Error::Connection { attempts: 3, .. }));
    assert_eq!(counters.connects.load(Ordering::SeqCst), 3);
    // No partial session was ever handed out, so nothing to release.
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_configured_attempt_budget_is_respected() {
    let mut transport = MockTransport::new();
    transport.fail_discover = true;
    let counters = transport.counters();
    let mut bms = SokBms::new(transport);
    bms.set_connect_attempts(5);
    bms.set_retry_delay(Duration::from_millis(1));

    let err = bms.update().await.unwrap_err();

    assert!(matches!(err, Error::Connection { attempts: 5, .. }));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_transport_error_mid_sequence() {
    let mut transport = MockTransport::with_script(cycle_script());
    transport.fail_read_at = Some(1);
    let counters = transport.counters();
    let writes = transport.writes();
    let mut bms = SokBms::new(transport);

    let err = bms.update().await.unwrap_err();

    assert!(matches!(err, Error::Transport(TransportError::Read(_))));
    // The session is released exactly once even though the cycle aborted.
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    // Strict sequencing: the failing read stops the exchange before write 3.
    assert_eq!(writes.lock().unwrap().len(), 2);
    assert!(bms.telemetry().is_none());
    assert_eq!(bms.num_samples(), 0);
}

#[tokio::test]
async fn test_short_buffer_fails_after_session_release() {
    let mut script = cycle_script();
    script[0].truncate(17);
    let transport = MockTransport::with_script(script);
    let counters = transport.counters();
    let mut bms = SokBms::new(transport);

    let err = bms.update().await.unwrap_err();

    assert!(matches!(err, Error::Protocol(_)));
    // Decode happens after the session is torn down.
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    assert!(bms.telemetry().is_none());
    assert_eq!(bms.num_samples(), 0);
}

#[tokio::test]
async fn test_successful_cycle_supersedes_previous_state() {
    let mut second_info = INFO_BUFFER.to_vec();
    second_info[16] = 0x42; // SOC 66 on the second cycle
    let mut second_script = cycle_script();
    second_script[0] = second_info;

    let mut transport = MockTransport::with_script(cycle_script());
    transport.push_script(second_script);
    let mut bms = SokBms::new(transport);

    bms.update().await.unwrap();
    assert_eq!(bms.telemetry().unwrap().soc, 65);
    assert_eq!(bms.num_samples(), 1);

    bms.update().await.unwrap();
    assert_eq!(bms.telemetry().unwrap().soc, 66);
    assert_eq!(bms.num_samples(), 2);
}

#[tokio::test]
async fn test_failed_cycle_keeps_previous_state() {
    let transport = MockTransport::with_script(cycle_script());
    let mut bms = SokBms::new(transport);

    bms.update().await.unwrap();
    assert_eq!(bms.num_samples(), 1);
    let soc_before = bms.telemetry().unwrap().soc;

    // Second cycle has no scripted responses: the first read fails.
    let err = bms.update().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    assert_eq!(bms.telemetry().unwrap().soc, soc_before);
    assert_eq!(bms.num_samples(), 1);
}
