// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-level serial transport used by the session state machine.
//!
//! The engine is generic over [`Transport`] so it can run against either a
//! real [`serial::SerialPort`] handle or, in tests, an in-process device
//! simulator.

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::{from_io, Error, Result};

/// The default per-read deadline used outside of auto-baud probing and the
/// programming-state transition.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_millis(500);

/// Deadline used for each auto-baud probe.
pub const AUTO_BAUD_READ_DEADLINE: Duration = Duration::from_millis(100);

/// Deadline for the programming/erasure state transition, which the device
/// pauses before answering.
pub const PROGRAMMING_STATE_READ_DEADLINE: Duration = Duration::from_secs(1);

/// A configured byte-stream handle supporting read-with-deadline, write, and
/// runtime bit-rate change.
pub trait Transport {
    /// Write all of `bytes`, or fail.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes within `deadline`. May return fewer
    /// bytes than requested; returns `Error::TransportTimeout` if no byte
    /// arrives before the deadline elapses.
    fn read(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize>;

    /// Atomically reconfigure both input and output line rate.
    fn set_line_rate(&mut self, bps: u32) -> Result<()>;
}

/// Maps a requested bit rate to the `serial` crate's `BaudRate`, restricted
/// to the rates the host's terminal driver is documented to enumerate
/// (`serial::BaudOther` is used for the ones without a named variant).
pub fn bps_to_baud_rate(bps: u32) -> Result<serial::BaudRate> {
    use serial::BaudRate::*;

    let rate = match bps {
        200 => BaudOther(200),
        300 => Baud300,
        600 => Baud600,
        1200 => Baud1200,
        1800 => BaudOther(1800),
        2400 => Baud2400,
        4800 => Baud4800,
        9600 => Baud9600,
        19200 => Baud19200,
        38400 => Baud38400,
        57600 => Baud57600,
        115200 => Baud115200,
        230400 => BaudOther(230400),
        460800 => BaudOther(460800),
        other => return Err(Error::ConfigUnsupported(other)),
    };

    Ok(rate)
}

/// [`Transport`] implementation wrapping any handle implementing the
/// `serial` crate's `SerialPort` trait (what the CLI opens via
/// `serial::SystemPort`).
pub struct SerialTransport<P> {
    port: P,
}

impl<P> SerialTransport<P>
where
    P: serial::SerialPort,
{
    pub fn new(port: P) -> Self {
        Self { port }
    }

    pub fn into_inner(self) -> P {
        self.port
    }
}

impl<P> Transport for SerialTransport<P>
where
    P: serial::SerialPort,
{
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes).map_err(from_io)?;
        self.port.flush().map_err(from_io)
    }

    fn read(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize> {
        self.port.set_timeout(deadline).map_err(|e| from_io(e.into()))?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(Error::TransportTimeout)
            }
            Err(e) => Err(from_io(e)),
        }
    }

    fn set_line_rate(&mut self, bps: u32) -> Result<()> {
        let baud = bps_to_baud_rate(bps)?;
        self.port
            .reconfigure(&|settings| settings.set_baud_rate(baud))
            .map_err(|e| from_io(e.into()))
    }
}

/// A Vec-backed duplex transport used by the device simulator in tests: one
/// buffer holds bytes the host has written (what the simulator reads), the
/// other holds bytes queued for the host to read back.
#[cfg(test)]
pub(crate) struct LoopbackTransport {
    pub to_device: Vec<u8>,
    pub to_host: std::collections::VecDeque<u8>,
    pub line_rate: u32,
    pub rate_changes: Vec<u32>,
}

#[cfg(test)]
impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            to_device: Vec::new(),
            to_host: std::collections::VecDeque::new(),
            line_rate: 9600,
            rate_changes: Vec::new(),
        }
    }

    pub fn queue_reply(&mut self, bytes: &[u8]) {
        self.to_host.extend(bytes.iter().copied());
    }
}

#[cfg(test)]
impl Transport for LoopbackTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.to_device.extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _deadline: Duration) -> Result<usize> {
        if self.to_host.is_empty() {
            return Err(Error::TransportTimeout);
        }

        let mut n = 0;
        while n < buf.len() {
            match self.to_host.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }

        Ok(n)
    }

    fn set_line_rate(&mut self, bps: u32) -> Result<()> {
        self.line_rate = bps;
        self.rate_changes.push(bps);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bps_to_baud_rate_accepts_documented_rates() {
        for &rate in &[
            200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
            115200, 230400, 460800,
        ] {
            assert!(bps_to_baud_rate(rate).is_ok(), "rate {} rejected", rate);
        }
    }

    #[test]
    fn bps_to_baud_rate_rejects_unlisted_rate() {
        match bps_to_baud_rate(31250) {
            Err(Error::ConfigUnsupported(31250)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn loopback_read_times_out_on_empty_queue() {
        let mut t = LoopbackTransport::new();
        let mut buf = [0u8; 1];
        assert!(matches!(
            t.read(&mut buf, Duration::from_millis(1)),
            Err(Error::TransportTimeout)
        ));
    }
}
