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

//! Generic framed-RPC pump: write a request, read exactly enough bytes back
//! for the caller's declared expectation, validate the checksum trailer.
//!
//! The executor performs no command-specific parsing; the session state
//! machine interprets the returned [`Reply`].

use std::time::Duration;

use crate::error::{Error, Result};
use crate::frame::{checksum, Expectation, Reply};
use crate::transport::Transport;

pub struct Executor<T> {
    transport: T,
}

impl<T> Executor<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Emit `request` and assemble the reply per `expectation`, honoring
    /// `deadline` for every individual read.
    pub fn execute(
        &mut self,
        request: &[u8],
        expectation: Expectation,
        deadline: Duration,
    ) -> Result<Reply> {
        self.transport.write(request)?;

        let mut first = [0u8; 1];
        self.read_exact(&mut first, deadline)?;

        match expectation {
            Expectation::ShortOk => Ok(Reply::Short(first[0])),

            Expectation::ShortOkOrErrorPair { success } => {
                if first[0] == success {
                    Ok(Reply::Ok)
                } else {
                    let mut second = [0u8; 1];
                    self.read_exact(&mut second, deadline)?;
                    Ok(Reply::ErrorPair(second[0]))
                }
            }

            Expectation::FramedPayload => {
                let tag = first[0];

                let mut len_buf = [0u8; 1];
                self.read_exact(&mut len_buf, deadline)?;
                let len = len_buf[0] as usize;

                // payload + trailing checksum byte
                let mut rest = vec![0u8; len + 1];
                self.read_exact(&mut rest, deadline)?;
                let (payload, trailer) = rest.split_at(len);
                let trailer = trailer[0];

                let mut framed = Vec::with_capacity(2 + len);
                framed.push(tag);
                framed.push(len_buf[0]);
                framed.extend_from_slice(payload);

                if checksum(&framed) != trailer {
                    return Err(Error::ProtocolChecksum);
                }

                Ok(Reply::Framed(tag, payload.to_vec()))
            }
        }
    }

    /// Reads from `transport` are not guaranteed to fill `buf` in one call;
    /// loop until it is full or a read fails.
    fn read_exact(&mut self, buf: &mut [u8], deadline: Duration) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.transport.read(&mut buf[filled..], deadline)?;
            if n == 0 {
                return Err(Error::ProtocolFraming(
                    "read returned zero bytes before deadline".into(),
                ));
            }
            filled += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn deadline() -> Duration {
        Duration::from_millis(50)
    }

    #[test]
    fn short_ok_reads_single_byte() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[0x06]);
        let mut exec = Executor::new(t);

        let reply = exec
            .execute(&[0x55], Expectation::ShortOk, deadline())
            .unwrap();
        assert_eq!(reply, Reply::Short(0x06));
    }

    #[test]
    fn short_ok_or_error_pair_success_path() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[0x06]);
        let mut exec = Executor::new(t);

        let reply = exec
            .execute(
                &[0x3f],
                Expectation::ShortOkOrErrorPair { success: 0x06 },
                deadline(),
            )
            .unwrap();
        assert_eq!(reply, Reply::Ok);
    }

    #[test]
    fn short_ok_or_error_pair_error_path() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[0xbf, 0x24]);
        let mut exec = Executor::new(t);

        let reply = exec
            .execute(
                &[0x3f],
                Expectation::ShortOkOrErrorPair { success: 0x06 },
                deadline(),
            )
            .unwrap();
        assert_eq!(reply, Reply::ErrorPair(0x24));
    }

    #[test]
    fn framed_payload_round_trips() {
        let mut t = LoopbackTransport::new();
        // tag 0x30, len 4, payload [1,2,3,4], checksum balancing to zero.
        let payload = [1u8, 2, 3, 4];
        let mut frame = vec![0x30u8, payload.len() as u8];
        frame.extend_from_slice(&payload);
        let csum = checksum(&frame);
        frame.push(csum);
        t.queue_reply(&frame);

        let mut exec = Executor::new(t);
        let reply = exec
            .execute(&[0x20], Expectation::FramedPayload, deadline())
            .unwrap();
        assert_eq!(reply, Reply::Framed(0x30, payload.to_vec()));
    }

    #[test]
    fn framed_payload_rejects_bad_checksum() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[0x30, 0x01, 0xaa, 0x00]); // trailer should be 0xd5
        let mut exec = Executor::new(t);

        let err = exec
            .execute(&[0x20], Expectation::FramedPayload, deadline())
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolChecksum));
    }

    #[test]
    fn no_reply_times_out() {
        let t = LoopbackTransport::new();
        let mut exec = Executor::new(t);

        let err = exec
            .execute(&[0x00], Expectation::ShortOk, deadline())
            .unwrap_err();
        assert!(matches!(err, Error::TransportTimeout));
    }
}
