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

//! The RX63N/RX631 boot-mode wire framing: checksum, request encoding, and
//! the reply-shape expectation the executor reads against.

/// `checksum(bytes) = (-sum(bytes)) mod 256`, i.e. the additive
/// two's-complement of every byte. `checksum(&[]) == 0`.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}

/// Build a framed request: `[cmd][len][payload...][checksum]`.
///
/// # Panics
///
/// Panics if `payload` is longer than 255 bytes, which can never happen for
/// a correctly-constructed caller (a logic error, not a wire fault).
pub fn encode_request(cmd: u8, payload: &[u8]) -> Vec<u8> {
    assert!(
        payload.len() <= u8::MAX as usize,
        "framed payload too large: {} bytes",
        payload.len()
    );

    let mut pkt = Vec::with_capacity(2 + payload.len() + 1);
    pkt.push(cmd);
    pkt.push(payload.len() as u8);
    pkt.extend_from_slice(payload);
    let csum = checksum(&pkt);
    pkt.push(csum);
    pkt
}

/// Build an unframed single-byte command.
pub fn encode_short(cmd: u8) -> [u8; 1] {
    [cmd]
}

/// Build a page-command frame: `[cmd][addr BE32][data...][checksum]`, with
/// **no length byte** — `COMMAND_256_BYTE_PROGRAMMING` is not a framed
/// request in the `encode_request` sense, its payload shape (0 or 256 data
/// bytes) is fixed by the command itself. `data` is either empty (the
/// terminate-programming frame) or exactly one page's worth of bytes.
pub fn encode_page_command(cmd: u8, addr: u32, data: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(1 + 4 + data.len() + 1);
    pkt.push(cmd);
    pkt.extend_from_slice(&addr.to_be_bytes());
    pkt.extend_from_slice(data);
    let csum = checksum(&pkt);
    pkt.push(csum);
    pkt
}

/// The wire shape the executor should expect for a given command's reply.
#[derive(Debug, Clone, Copy)]
pub enum Expectation {
    /// A single status byte is the entire reply.
    ShortOk,
    /// `[tag][len][payload...][checksum]`.
    FramedPayload,
    /// A single byte; if it equals `success` that is the whole reply,
    /// otherwise one more byte (the error code) follows.
    ShortOkOrErrorPair { success: u8 },
}

/// The decoded/assembled reply, tagged by which expectation produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Raw byte under `ShortOk`.
    Short(u8),
    /// `(tag, payload)` under `FramedPayload`, trailer already validated.
    Framed(u8, Vec<u8>),
    /// The success byte was seen under `ShortOkOrErrorPair`.
    Ok,
    /// The non-success byte followed by the error code, under
    /// `ShortOkOrErrorPair`.
    ErrorPair(u8),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_of_empty_is_zero() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn checksum_balances_to_zero_over_full_frame() {
        let frame = encode_request(0x10, &[0x30, 0x31, 0x32, 0x33]);
        let sum = frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn encode_request_length_byte_matches_payload() {
        let payload = [1u8, 2, 3, 4, 5];
        let frame = encode_request(0x3f, &payload);
        assert_eq!(frame[1] as usize, payload.len());
        assert_eq!(frame.len(), 2 + payload.len() + 1);
    }

    #[test]
    fn new_bit_rate_selection_payload_matches_worked_example() {
        // 115200 bps, 12 MHz input, sys ratio 8, periph ratio 4.
        let payload = [0x04u8, 0x80, 0x04, 0xb0, 0x02, 0x08, 0x04];
        let frame = encode_request(0x3f, &payload);
        assert_eq!(
            &frame[..frame.len() - 1],
            &[0x3f, 0x07, 0x04, 0x80, 0x04, 0xb0, 0x02, 0x08, 0x04]
        );
        let sum = frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn page_command_has_no_length_byte_and_is_262_bytes() {
        let data = [0xaau8; 256];
        let frame = encode_page_command(0x50, 0x0000_1000, &data);
        assert_eq!(frame.len(), 262);
        assert_eq!(frame[0], 0x50);
        assert_eq!(&frame[1..5], &0x0000_1000u32.to_be_bytes());
        assert_eq!(&frame[5..261], &data[..]);
        let sum = frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn terminate_command_is_6_bytes_with_no_data_block() {
        let frame = encode_page_command(0x50, 0xffff_ffff, &[]);
        assert_eq!(frame.len(), 6);
        assert_eq!(frame[0], 0x50);
        assert_eq!(&frame[1..5], &[0xff, 0xff, 0xff, 0xff]);
        let sum = frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }
}
