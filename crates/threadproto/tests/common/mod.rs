//! Scripted in-process glove driver for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use threadproto::{ClientConfig, ResponseFrame, HANDSHAKE_LEN};

pub const CALIBRATION_RESULT: &str = "baseline 512 498 503\nnoise 3 4 2";

pub struct StubState {
    pub telemetry: Mutex<String>,
    pub glove_connected: AtomicBool,
    pub calibrated: AtomicBool,
    /// When false, end-calibration requests are read but never answered
    pub answer_end_calibration: AtomicBool,
    pub reject_end_recording: AtomicBool,
    /// Replaces the yes/no answer to calibration queries
    pub flag_override: Mutex<Option<String>>,
    pub battery: Mutex<String>,
    pub response_delay: Mutex<Duration>,
    pub requests: Mutex<Vec<(u8, String)>>,
    pub handshakes: Mutex<Vec<Vec<u8>>>,
    pub goodbyes: AtomicUsize,
    /// Set if a request arrived before the previous response was sent
    pub pipelined: AtomicBool,
}

impl StubState {
    fn new(telemetry: &str) -> Self {
        Self {
            telemetry: Mutex::new(telemetry.to_string()),
            glove_connected: AtomicBool::new(false),
            calibrated: AtomicBool::new(false),
            answer_end_calibration: AtomicBool::new(true),
            reject_end_recording: AtomicBool::new(false),
            flag_override: Mutex::new(None),
            battery: Mutex::new("87".to_string()),
            response_delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            handshakes: Mutex::new(Vec::new()),
            goodbyes: AtomicUsize::new(0),
            pipelined: AtomicBool::new(false),
        }
    }
}

pub struct DriverStub {
    pub address: String,
    pub state: Arc<StubState>,
    handle: JoinHandle<()>,
}

impl DriverStub {
    pub async fn start(telemetry: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(StubState::new(telemetry));

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self {
            address,
            state,
            handle,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.address)
            .with_name("test")
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_millis(500))
    }

    pub fn requests(&self) -> Vec<(u8, String)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<u8> {
        self.requests().into_iter().map(|(code, _)| code).collect()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.response_delay.lock().unwrap() = delay;
    }

    pub fn goodbyes(&self) -> usize {
        self.state.goodbyes.load(Ordering::SeqCst)
    }
}

impl Drop for DriverStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn frame(status: u8, payload: &str) -> Vec<u8> {
    ResponseFrame {
        status,
        payload: payload.to_string(),
    }
    .to_bytes()
    .to_vec()
}

async fn serve(stream: TcpStream, state: Arc<StubState>) {
    let mut reader = BufReader::new(stream);

    let mut hello = [0u8; HANDSHAKE_LEN];
    if reader.read_exact(&mut hello).await.is_err() {
        return;
    }
    state.handshakes.lock().unwrap().push(hello.to_vec());
    let telemetry = state.telemetry.lock().unwrap().clone();
    let reply = if hello[0] == 0 && hello[HANDSHAKE_LEN - 1] == b'\n' {
        frame(0, &telemetry)
    } else {
        frame(1, "bad handshake")
    };
    if reader.get_mut().write_all(&reply).await.is_err() {
        return;
    }

    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if line.last() != Some(&b'\n') {
            return;
        }

        let code = line[0];
        let payload = String::from_utf8_lossy(&line[1..line.len() - 1]).to_string();

        // Goodbye shares its code with the battery query but carries the session id
        if code == 1 && !payload.is_empty() {
            state.goodbyes.fetch_add(1, Ordering::SeqCst);
            return;
        }

        state.requests.lock().unwrap().push((code, payload.clone()));

        let delay = *state.response_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !reader.buffer().is_empty() {
            state.pipelined.store(true, Ordering::SeqCst);
        }

        let flag = |value: bool| (if value { "yes" } else { "no" }).to_string();
        let reply = match code {
            1 => frame(0, &state.battery.lock().unwrap().clone()),
            2 => frame(0, ""),
            3 => {
                if !state.answer_end_calibration.load(Ordering::SeqCst) {
                    continue;
                }
                frame(0, CALIBRATION_RESULT)
            }
            4 => {
                if payload.ends_with(".bad") {
                    frame(1, "corrupt calibration data")
                } else {
                    frame(0, "")
                }
            }
            5 => {
                let answer = state
                    .flag_override
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| flag(state.calibrated.load(Ordering::SeqCst)));
                frame(0, &answer)
            }
            6 => frame(0, &flag(state.glove_connected.load(Ordering::SeqCst))),
            7 => frame(0, ""),
            8 => {
                if state.reject_end_recording.load(Ordering::SeqCst) {
                    frame(1, "no recording buffered")
                } else {
                    frame(0, "")
                }
            }
            _ => frame(1, "unknown op"),
        };
        if reader.get_mut().write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Serve `bytes` to the first telemetry connection, then hold it open for
/// `hold` before closing. Returns the `tcp://` identifier.
pub async fn telemetry_feed(bytes: Vec<u8>, hold: Duration) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let identifier = format!("tcp://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(&bytes).await;
            let _ = stream.flush().await;
            tokio::time::sleep(hold).await;
        }
    });
    (identifier, handle)
}

/// An address nothing is listening on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

pub fn utf16le_with_bom(text: &str) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}
