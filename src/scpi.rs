//! Line-oriented SCPI adapter for analyzers reachable over a raw socket

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::{debug, trace};

use crate::{
    config::SweepSettings,
    errors::{PortError, PortResult},
    port::{InstrumentPort, SweepState},
};

/// Reply timeout for every query
pub const TIMEOUT: Duration = Duration::from_millis(5000);

pub struct ScpiAnalyzer<S: Read + Write> {
    stream: BufReader<S>,
    state: SweepState,
}

impl ScpiAnalyzer<TcpStream> {
    /// Connect to an instrument's raw SCPI socket, e.g. `192.168.1.100:5025`
    pub fn connect(addr: &str) -> PortResult<Self> {
        let sock = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| PortError::Fault(format!("could not resolve {addr}")))?;
        let stream = TcpStream::connect_timeout(&sock, TIMEOUT)
            .map_err(|e| PortError::from_io(e, "connection"))?;
        stream.set_read_timeout(Some(TIMEOUT))?;
        stream.set_write_timeout(Some(TIMEOUT))?;
        stream.set_nodelay(true)?;
        debug!(%sock, "Connected to instrument");
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> ScpiAnalyzer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            state: SweepState::Idle,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn write(&mut self, command: &str) -> PortResult<()> {
        trace!(command, "->");
        let out = self.stream.get_mut();
        out.write_all(command.as_bytes())
            .and_then(|_| out.write_all(b"\n"))
            .and_then(|_| out.flush())
            .map_err(|e| PortError::from_io(e, command))
    }

    fn query(&mut self, command: &str) -> PortResult<String> {
        self.write(command)?;
        let mut reply = String::new();
        let n = self
            .stream
            .read_line(&mut reply)
            .map_err(|e| PortError::from_io(e, command))?;
        if n == 0 {
            return Err(PortError::MalformedReply {
                command: command.to_owned(),
                reply: "<connection closed>".to_owned(),
            });
        }
        trace!(reply = reply.trim_end(), "<-");
        Ok(reply.trim_end().to_owned())
    }
}

/// Parse a comma separated ASCII trace
fn parse_trace(command: &str, reply: &str) -> PortResult<Vec<f64>> {
    let malformed = || PortError::MalformedReply {
        command: command.to_owned(),
        reply: reply.chars().take(64).collect(),
    };
    if reply.trim().is_empty() {
        return Err(malformed());
    }
    reply
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|_| malformed()))
        .collect()
}

impl<S: Read + Write> InstrumentPort for ScpiAnalyzer<S> {
    fn configure(&mut self, settings: &SweepSettings) -> PortResult<()> {
        self.write(&format!("FREQ:START {}", settings.fstart.as_str()))?;
        self.write(&format!("FREQ:STOP {}", settings.fstop.as_str()))?;
        self.write(&format!("BAND {}", settings.rbw.as_str()))?;
        if let Some(preamp) = settings.preamp {
            self.write(&format!(
                "PREAMP:STATE {}",
                if preamp { "ON" } else { "OFF" }
            ))?;
        }
        if let Some(att) = settings.attenuation_db {
            self.write(&format!("INP:ATT {att}"))?;
        }
        Ok(())
    }

    fn trigger_and_wait(&mut self) -> PortResult<()> {
        self.state.arm()?;
        // *OPC? only answers once the sweep has completed
        let done = self.query("INIT;*OPC?").and_then(|reply| {
            match reply.trim_start_matches('+') {
                "1" => Ok(()),
                _ => Err(PortError::MalformedReply {
                    command: "INIT;*OPC?".to_owned(),
                    reply,
                }),
            }
        });
        if done.is_err() {
            self.state = SweepState::Idle;
        }
        done
    }

    fn read_samples(&mut self) -> PortResult<Vec<f64>> {
        self.state.disarm()?;
        let reply = self.query("TRAC? TRACE1")?;
        parse_trace("TRAC? TRACE1", &reply)
    }

    fn query_identity(&mut self) -> PortResult<String> {
        self.query("*IDN?")
    }
}
