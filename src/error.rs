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

use std::io;

use thiserror::Error;

use crate::session::SessionState;

/// The step of the session during which a device error-pair was received.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    NewBitRateSelection,
    PageProgramming,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::NewBitRateSelection => "new bit rate selection",
            Phase::PageProgramming => "256-byte programming",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("serial transport I/O error: {0}")]
    TransportIo(#[source] io::Error),

    #[error("transport read timed out")]
    TransportTimeout,

    #[error("protocol framing error: {0}")]
    ProtocolFraming(String),

    #[error("protocol checksum mismatch")]
    ProtocolChecksum,

    #[error("command issued out of order in session state {0:?}")]
    ProtocolOrderError(SessionState),

    #[error("device reported an error during {phase}: code {code:#04x}")]
    DeviceError { phase: Phase, code: u8 },

    #[error("ID code protection is enabled; unlocking is not supported")]
    IdCodeProtectionUnsupported,

    #[error("failed to parse firmware image: {0}")]
    ImageParse(String),

    #[error("requested bit rate {0} bps is not supported by this host")]
    ConfigUnsupported(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classifies a raw I/O error as a timeout or a plain transport failure,
/// the same distinction `serial::SerialPort` readers make via
/// `io::ErrorKind::TimedOut`.
pub(crate) fn from_io(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::TimedOut {
        Error::TransportTimeout
    } else {
        Error::TransportIo(err)
    }
}
