#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use lockcenter::connection::Transport;
use lockcenter::{
    CancelToken, ClientConfig, Endpoint, LockServer, ProtocolVersion, RetryPolicy, RunningServer,
};

/// What the scripted server does next.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Refuse the next connection.
    Refuse,
    /// Answer the next request with this byte.
    Ack(u8),
    /// Close the connection instead of answering.
    Hangup,
}

#[derive(Debug, Default)]
pub struct ScriptState {
    pub steps: VecDeque<Step>,
    pub connects: u32,
    pub closes: u32,
    pub requests: Vec<Vec<u8>>,
    /// Cancel this token once the given number of requests has been sent.
    pub cancel_after: Option<(usize, CancelToken)>,
}

/// In-memory transport replaying a script; answers `+` once the script runs
/// out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.state().steps.extend(steps);
    }

    pub fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }
}

pub struct ScriptedStream {
    state: Arc<Mutex<ScriptState>>,
    pending: Vec<u8>,
}

impl Transport for ScriptedTransport {
    type Stream = ScriptedStream;

    fn connect(&self, _endpoint: &Endpoint) -> io::Result<ScriptedStream> {
        let mut state = self.state();
        state.connects += 1;
        if let Some(Step::Refuse) = state.steps.front() {
            state.steps.pop_front();
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        Ok(ScriptedStream {
            state: self.state.clone(),
            pending: Vec::new(),
        })
    }

    fn close(&self, _stream: &mut ScriptedStream) {
        self.state().closes += 1;
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let request = std::mem::take(&mut self.pending);
        let mut state = self.state.lock().unwrap();
        state.requests.push(request);
        if let Some((after, token)) = &state.cancel_after {
            if state.requests.len() >= *after {
                token.cancel();
            }
        }
        Ok(())
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let step = self.state.lock().unwrap().steps.pop_front();
        match step {
            Some(Step::Ack(byte)) => {
                buf[0] = byte;
                Ok(1)
            }
            Some(Step::Refuse) | Some(Step::Hangup) => Ok(0),
            None => {
                buf[0] = b'+';
                Ok(1)
            }
        }
    }
}

pub fn start_server(version: ProtocolVersion) -> RunningServer {
    LockServer::bind("127.0.0.1:0", version)
        .unwrap()
        .spawn()
        .unwrap()
}

pub fn config_for(server: &RunningServer) -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 1_000,
        io_timeout_ms: 1_000,
        retry: RetryPolicy {
            max_backoff_ms: 50,
            ..RetryPolicy::default()
        },
        ..ClientConfig::new(server.addr())
    }
}
