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

//! Drives the fixed linear RX63N/RX631 boot-mode handshake: auto-baud →
//! device → clock mode → multiplication ratios → operating frequency → new
//! bit rate → programming state → page programming loop → terminate.

use std::thread;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Phase, Result};
use crate::executor::Executor;
use crate::frame::{encode_page_command, encode_request, encode_short, Expectation, Reply};
use crate::page::{Page, PageBuilder};
use crate::transport::{
    Transport, AUTO_BAUD_READ_DEADLINE, DEFAULT_READ_DEADLINE,
    PROGRAMMING_STATE_READ_DEADLINE,
};

/// Linear session states. Any command issued outside the state it requires
/// fails with [`Error::ProtocolOrderError`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    Uninitialised,
    BaudMatched,
    DeviceSelected,
    ClockModeSelected,
    RatesQueried,
    BitRateSet,
    BitRateConfirmed,
    ProgrammingActive,
    Terminated,
    Failed,
}

/// A device the target boot-mode firmware reports as supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub code: [u8; 4],
    pub series_name: String,
}

/// A single clock's accepted multiplication/division ratios and its
/// inclusive operating-frequency range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockType {
    /// Positive = multiply, negative = divide.
    pub ratios: Vec<i8>,
    pub min_frequency_hz: u32,
    pub max_frequency_hz: u32,
}

/// Parameters used for device/clock-mode selection and bit-rate
/// negotiation, defaulted per §6 of the specification.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub device_index: usize,
    pub clock_mode_index: usize,
    pub bit_rate: u32,
    pub input_frequency_hz: u32,
    pub system_multiplier: i8,
    pub peripheral_multiplier: i8,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            device_index: 0,
            clock_mode_index: 0,
            bit_rate: 115_200,
            input_frequency_hz: 12_000_000,
            system_multiplier: 8,
            peripheral_multiplier: 4,
        }
    }
}

/// Owns the transport and all session-lifetime descriptor lists.
pub struct Session<T> {
    executor: Executor<T>,
    state: SessionState,
    devices: Vec<Device>,
    clock_modes: Vec<u8>,
    clock_types: Vec<ClockType>,
    programming_state_entered: bool,
}

impl<T> Session<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self {
            executor: Executor::new(transport),
            state: SessionState::Uninitialised,
            devices: Vec::new(),
            clock_modes: Vec::new(),
            clock_types: Vec::new(),
            programming_state_entered: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn clock_modes(&self) -> &[u8] {
        &self.clock_modes
    }

    pub fn clock_types(&self) -> &[ClockType] {
        &self.clock_types
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = SessionState::Failed;
        err
    }

    /// Runs the executor and transitions to `Failed` on any error, per the
    /// state machine's "any step's failure transitions to Failed" rule.
    fn exec(
        &mut self,
        request: &[u8],
        expectation: Expectation,
        deadline: Duration,
    ) -> Result<Reply> {
        self.executor
            .execute(request, expectation, deadline)
            .map_err(|e| self.fail(e))
    }

    fn require(&mut self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.fail(Error::ProtocolOrderError(self.state)))
        }
    }

    /// Step 1: repeatedly probe with `0x00` until echoed, then confirm with
    /// `0x55`/`0xE6`.
    pub fn match_bit_rates(&mut self) -> Result<()> {
        self.require(SessionState::Uninitialised)?;

        let probe = encode_short(CMD_INITIAL_TRANSMIT);
        let mut synced = false;

        for _ in 0..AUTO_BAUD_MAX_ATTEMPTS {
            match self.executor.execute(
                &probe,
                Expectation::ShortOk,
                AUTO_BAUD_READ_DEADLINE,
            ) {
                Ok(Reply::Short(b)) if b == RESP_INITIAL_TRANSMIT_OK => {
                    synced = true;
                    break;
                }
                Ok(Reply::Short(_)) => {
                    return Err(self.fail(Error::ProtocolFraming(
                        "unexpected auto-baud probe reply".into(),
                    )))
                }
                Ok(_) => unreachable!("ShortOk expectation only yields Reply::Short"),
                Err(Error::TransportTimeout) => continue,
                Err(e) => return Err(self.fail(e)),
            }
        }

        if !synced {
            return Err(self.fail(Error::TransportTimeout));
        }

        let init = encode_short(CMD_BIT_RATE_INIT);
        match self.exec(
            &init,
            Expectation::ShortOk,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Short(b) if b == RESP_BIT_RATE_INIT_OK => {
                self.state = SessionState::BaudMatched;
                Ok(())
            }
            _ => Err(self.fail(Error::ProtocolFraming(
                "bit rate init was not acknowledged".into(),
            ))),
        }
    }

    /// Step 2: supported-device inquiry (`0x20` → tag `0x30`).
    pub fn inquire_devices(&mut self) -> Result<()> {
        self.require(SessionState::BaudMatched)?;

        let req = encode_short(CMD_SUPPORTED_DEVICE_INQUIRY);
        let reply = self.exec(
            &req,
            Expectation::FramedPayload,
            DEFAULT_READ_DEADLINE,
        )?;

        let (tag, payload) = match reply {
            Reply::Framed(tag, payload) => (tag, payload),
            _ => unreachable!("FramedPayload expectation only yields Reply::Framed"),
        };
        if tag != RESP_SUPPORTED_DEVICE_INQUIRY_OK {
            return Err(self.fail(Error::ProtocolFraming(format!(
                "unexpected device-inquiry tag {:#04x}",
                tag
            ))));
        }

        self.devices = parse_devices(&payload).map_err(|e| self.fail(e))?;
        Ok(())
    }

    /// Step 3: device selection (`0x10`).
    pub fn select_device(&mut self, index: usize) -> Result<()> {
        self.require(SessionState::BaudMatched)?;

        let device = match self.devices.get(index) {
            Some(device) => device.clone(),
            None => {
                return Err(self.fail(Error::ProtocolFraming(format!(
                    "device index {} out of range ({} devices)",
                    index,
                    self.devices.len()
                ))))
            }
        };

        let req = encode_request(CMD_DEVICE_SELECTION, &device.code);
        match self.exec(
            &req,
            Expectation::ShortOk,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Short(b) if b == RESP_GENERIC_OK => {
                self.state = SessionState::DeviceSelected;
                Ok(())
            }
            _ => Err(self.fail(Error::ProtocolFraming(
                "device selection was not acknowledged".into(),
            ))),
        }
    }

    /// Step 4a: clock-mode inquiry (`0x21` → tag `0x31`).
    pub fn inquire_clock_modes(&mut self) -> Result<()> {
        self.require(SessionState::DeviceSelected)?;

        let req = encode_short(CMD_CLOCK_MODE_INQUIRY);
        let (tag, payload) = match self.exec(
            &req,
            Expectation::FramedPayload,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Framed(tag, payload) => (tag, payload),
            _ => unreachable!("FramedPayload expectation only yields Reply::Framed"),
        };
        if tag != RESP_CLOCK_MODE_INQUIRY_OK {
            return Err(self.fail(Error::ProtocolFraming(format!(
                "unexpected clock-mode-inquiry tag {:#04x}",
                tag
            ))));
        }

        let count = *payload.first().ok_or_else(|| {
            self.fail(Error::ProtocolFraming("empty clock-mode reply".into()))
        })? as usize;
        let modes = payload.get(1..1 + count).ok_or_else(|| {
            self.fail(Error::ProtocolFraming(
                "clock-mode count exceeds payload".into(),
            ))
        })?;
        self.clock_modes = modes.to_vec();
        Ok(())
    }

    /// Step 4b: clock-mode selection (`0x11`).
    pub fn select_clock_mode(&mut self, index: usize) -> Result<()> {
        self.require(SessionState::DeviceSelected)?;

        let mode = match self.clock_modes.get(index) {
            Some(&mode) => mode,
            None => {
                return Err(self.fail(Error::ProtocolFraming(format!(
                    "clock mode index {} out of range ({} modes)",
                    index,
                    self.clock_modes.len()
                ))))
            }
        };

        let req = encode_request(CMD_CLOCK_MODE_SELECTION, &[mode]);
        match self.exec(
            &req,
            Expectation::ShortOk,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Short(b) if b == RESP_GENERIC_OK => {
                self.state = SessionState::ClockModeSelected;
                Ok(())
            }
            _ => Err(self.fail(Error::ProtocolFraming(
                "clock mode selection was not acknowledged".into(),
            ))),
        }
    }

    /// Step 5: multiplication-ratio inquiry (`0x22` → tag `0x32`).
    pub fn inquire_multiplication_ratios(&mut self) -> Result<()> {
        self.require(SessionState::ClockModeSelected)?;

        let req = encode_short(CMD_MULTIPLICATION_RATIO_INQUIRY);
        let (tag, payload) = match self.exec(
            &req,
            Expectation::FramedPayload,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Framed(tag, payload) => (tag, payload),
            _ => unreachable!("FramedPayload expectation only yields Reply::Framed"),
        };
        if tag != RESP_MULTIPLICATION_RATIO_INQUIRY_OK {
            return Err(self.fail(Error::ProtocolFraming(format!(
                "unexpected multiplication-ratio tag {:#04x}",
                tag
            ))));
        }

        let num_clock_types = *payload.first().ok_or_else(|| {
            self.fail(Error::ProtocolFraming(
                "empty multiplication-ratio reply".into(),
            ))
        })? as usize;

        let mut clock_types = vec![ClockType::default(); num_clock_types];
        let mut cursor = 1usize;
        for ct in clock_types.iter_mut() {
            let count = *payload.get(cursor).ok_or_else(|| {
                self.fail(Error::ProtocolFraming(
                    "truncated multiplication-ratio reply".into(),
                ))
            })? as usize;
            cursor += 1;
            let ratios = payload.get(cursor..cursor + count).ok_or_else(|| {
                self.fail(Error::ProtocolFraming(
                    "ratio count exceeds payload".into(),
                ))
            })?;
            ct.ratios = ratios.iter().map(|&b| b as i8).collect();
            cursor += count;
        }

        self.clock_types = clock_types;
        Ok(())
    }

    /// Step 6: operating-frequency inquiry (`0x23` → tag `0x33`).
    pub fn inquire_operating_frequencies(&mut self) -> Result<()> {
        self.require(SessionState::ClockModeSelected)?;

        let req = encode_short(CMD_OPERATING_FREQUENCY_INQUIRY);
        let (tag, payload) = match self.exec(
            &req,
            Expectation::FramedPayload,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Framed(tag, payload) => (tag, payload),
            _ => unreachable!("FramedPayload expectation only yields Reply::Framed"),
        };
        if tag != RESP_OPERATING_FREQUENCY_INQUIRY_OK {
            return Err(self.fail(Error::ProtocolFraming(format!(
                "unexpected operating-frequency tag {:#04x}",
                tag
            ))));
        }

        let num_clock_types = *payload.first().ok_or_else(|| {
            self.fail(Error::ProtocolFraming(
                "empty operating-frequency reply".into(),
            ))
        })? as usize;

        if !self.clock_types.is_empty() && self.clock_types.len() != num_clock_types
        {
            return Err(self.fail(Error::ProtocolFraming(
                "clock type count disagrees with multiplication-ratio inquiry"
                    .into(),
            )));
        }
        if self.clock_types.is_empty() {
            self.clock_types = vec![ClockType::default(); num_clock_types];
        }

        let mut cursor = 1usize;
        let mut truncated = false;
        for ct in self.clock_types.iter_mut() {
            let bytes = match payload.get(cursor..cursor + 4) {
                Some(bytes) => bytes,
                None => {
                    truncated = true;
                    break;
                }
            };
            let min = u16::from_be_bytes([bytes[0], bytes[1]]) as u32 * 10_000;
            let max = u16::from_be_bytes([bytes[2], bytes[3]]) as u32 * 10_000;
            ct.min_frequency_hz = min;
            ct.max_frequency_hz = max;
            cursor += 4;
        }
        if truncated {
            return Err(self.fail(Error::ProtocolFraming(
                "truncated operating-frequency reply".into(),
            )));
        }

        self.state = SessionState::RatesQueried;
        Ok(())
    }

    /// Step 7: new-bit-rate selection (`0x3F`), followed by the 25 ms sleep,
    /// the transport reconfigure, and the separate `0x06` confirmation.
    pub fn select_bit_rate(&mut self, defaults: &SessionDefaults) -> Result<()> {
        self.require(SessionState::RatesQueried)?;

        let bit_rate_field = (defaults.bit_rate / 100) as u16;
        let freq_field = (defaults.input_frequency_hz / 10_000) as u16;

        let mut payload = Vec::with_capacity(7);
        payload.extend_from_slice(&bit_rate_field.to_be_bytes());
        payload.extend_from_slice(&freq_field.to_be_bytes());
        payload.push(2); // clock count is always fixed at 2.
        payload.push(defaults.system_multiplier as u8);
        payload.push(defaults.peripheral_multiplier as u8);

        let req = encode_request(CMD_NEW_BIT_RATE_SELECTION, &payload);
        let reply = self.exec(
            &req,
            Expectation::ShortOkOrErrorPair {
                success: RESP_GENERIC_OK,
            },
            DEFAULT_READ_DEADLINE,
        )?;

        match reply {
            Reply::Ok => {}
            Reply::ErrorPair(code) => {
                return Err(self.fail(Error::DeviceError {
                    phase: Phase::NewBitRateSelection,
                    code,
                }))
            }
            _ => unreachable!(
                "ShortOkOrErrorPair expectation only yields Ok or ErrorPair"
            ),
        }

        // Both the sleep and the transport reconfigure are part of this
        // step's success path; no byte of the confirmation may be sent
        // before them.
        thread::sleep(Duration::from_millis(25));
        self.executor
            .transport_mut()
            .set_line_rate(defaults.bit_rate)
            .map_err(|e| self.fail(e))?;

        self.state = SessionState::BitRateSet;

        let confirm = encode_short(CMD_NEW_BIT_RATE_CONFIRMATION);
        match self.exec(
            &confirm,
            Expectation::ShortOk,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Short(b) if b == RESP_GENERIC_OK => {
                self.state = SessionState::BitRateConfirmed;
                Ok(())
            }
            _ => Err(self.fail(Error::ProtocolFraming(
                "bit rate confirmation was not acknowledged".into(),
            ))),
        }
    }

    /// Step 8: programming/erasure state transition (`0x40`).
    pub fn enter_programming_state(&mut self) -> Result<()> {
        self.require(SessionState::BitRateConfirmed)?;

        let req = encode_short(CMD_PROGRAMMING_ERASURE_STATE_TRANSITION);
        match self.exec(
            &req,
            Expectation::ShortOk,
            PROGRAMMING_STATE_READ_DEADLINE,
        )? {
            Reply::Short(b) if b == RESP_PROGRAMMING_STATE_OK => {
                self.programming_state_entered = true;
                Ok(())
            }
            Reply::Short(b) if b == RESP_ID_CODE_PROTECTED => {
                Err(self.fail(Error::IdCodeProtectionUnsupported))
            }
            Reply::Short(b) => Err(self.fail(Error::ProtocolFraming(format!(
                "unexpected programming-state reply {:#04x}",
                b
            )))),
            _ => unreachable!("ShortOk expectation only yields Reply::Short"),
        }
    }

    /// Step 9: user/data area programming selection (`0x43`). Enters the
    /// page loop.
    pub fn select_user_data_area(&mut self) -> Result<()> {
        self.require(SessionState::BitRateConfirmed)?;
        if !self.programming_state_entered {
            return Err(self.fail(Error::ProtocolOrderError(self.state)));
        }

        let req = encode_short(CMD_USER_DATA_AREA_PROGRAMMING_SELECTION);
        match self.exec(
            &req,
            Expectation::ShortOk,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Short(b) if b == RESP_GENERIC_OK => {
                self.state = SessionState::ProgrammingActive;
                Ok(())
            }
            _ => Err(self.fail(Error::ProtocolFraming(
                "user/data area programming selection was not acknowledged"
                    .into(),
            ))),
        }
    }

    /// Step 10: program a single 256-byte page (`0x50`). The wire frame is
    /// `[cmd][addr BE32][256 data bytes][checksum]` — 262 bytes, with no
    /// length byte, since `COMMAND_256_BYTE_PROGRAMMING` isn't a framed
    /// request in the `encode_request` sense.
    pub fn program_page(&mut self, page: &Page) -> Result<()> {
        self.require(SessionState::ProgrammingActive)?;
        debug_assert_eq!(page.address % PAGE_SIZE as u32, 0);

        let req =
            encode_page_command(CMD_256_BYTE_PROGRAMMING, page.address, &page.data);
        let reply = self.exec(
            &req,
            Expectation::ShortOkOrErrorPair {
                success: RESP_GENERIC_OK,
            },
            DEFAULT_READ_DEADLINE,
        )?;

        match reply {
            Reply::Ok => Ok(()),
            Reply::ErrorPair(code) => Err(self.fail(Error::DeviceError {
                phase: Phase::PageProgramming,
                code,
            })),
            _ => unreachable!(
                "ShortOkOrErrorPair expectation only yields Ok or ErrorPair"
            ),
        }
    }

    /// Step 11: terminate programming with address `FF FF FF FF` and no
    /// data block — a 6-byte `[cmd][addr BE32][checksum]` frame, not a
    /// framed request with a length byte.
    pub fn terminate_programming(&mut self) -> Result<()> {
        self.require(SessionState::ProgrammingActive)?;

        let req =
            encode_page_command(CMD_256_BYTE_PROGRAMMING, TERMINATE_ADDRESS, &[]);
        match self.exec(
            &req,
            Expectation::ShortOk,
            DEFAULT_READ_DEADLINE,
        )? {
            Reply::Short(b) if b == RESP_GENERIC_OK => {
                self.state = SessionState::Terminated;
                Ok(())
            }
            _ => Err(self.fail(Error::ProtocolFraming(
                "terminate programming was not acknowledged".into(),
            ))),
        }
    }

    /// Runs the entire fixed handshake (steps 1-9) using `defaults`, then
    /// drains `regions` through the page builder (step 10) and terminates
    /// (step 11). `on_page` is invoked after each page is programmed, for
    /// progress reporting.
    pub fn flash<I>(
        &mut self,
        defaults: &SessionDefaults,
        regions: I,
        mut on_page: impl FnMut(u32),
    ) -> Result<()>
    where
        I: Iterator<Item = (u32, Vec<u8>)>,
    {
        self.match_bit_rates()?;
        self.inquire_devices()?;
        self.select_device(defaults.device_index)?;
        self.inquire_clock_modes()?;
        self.select_clock_mode(defaults.clock_mode_index)?;
        self.inquire_multiplication_ratios()?;
        self.inquire_operating_frequencies()?;
        self.select_bit_rate(defaults)?;
        self.enter_programming_state()?;
        self.select_user_data_area()?;

        for page in PageBuilder::new(regions) {
            self.program_page(&page)?;
            on_page(page.address);
        }

        self.terminate_programming()
    }
}

/// Parses the supported-device-inquiry payload: `[count][record...]` where
/// each record is `[name_len][4-byte code][name_len-4 ascii]`.
fn parse_devices(payload: &[u8]) -> Result<Vec<Device>> {
    let count = *payload
        .first()
        .ok_or_else(|| Error::ProtocolFraming("empty device-inquiry reply".into()))?
        as usize;

    let mut devices = Vec::with_capacity(count);
    let mut cursor = 1usize;

    for _ in 0..count {
        let record_len = *payload.get(cursor).ok_or_else(|| {
            Error::ProtocolFraming("truncated device record".into())
        })? as usize;
        if record_len < 4 {
            return Err(Error::ProtocolFraming(
                "device record shorter than the 4-byte code field".into(),
            ));
        }

        let record = payload
            .get(cursor + 1..cursor + 1 + record_len)
            .ok_or_else(|| {
                Error::ProtocolFraming("device record exceeds payload".into())
            })?;

        let mut code = [0u8; 4];
        code.copy_from_slice(&record[..4]);

        let name_len = (record_len - 4).min(SERIES_NAME_CAPACITY);
        let series_name =
            String::from_utf8_lossy(&record[4..4 + name_len]).into_owned();

        devices.push(Device { code, series_name });
        cursor += 1 + record_len;
    }

    Ok(devices)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::checksum;
    use crate::transport::LoopbackTransport;

    fn framed_reply(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![tag, payload.len() as u8];
        frame.extend_from_slice(payload);
        let csum = checksum(&frame);
        frame.push(csum);
        frame
    }

    #[test]
    fn parse_devices_subtracts_code_length_from_record() {
        // record: len=0x05, code=30 31 32 33, name="N"
        let payload = vec![0x01u8, 0x05, 0x30, 0x31, 0x32, 0x33, b'N'];
        let devices = parse_devices(&payload).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].code, [0x30, 0x31, 0x32, 0x33]);
        assert_eq!(devices[0].series_name, "N");
    }

    #[test]
    fn auto_baud_happy_path_sends_two_bytes_and_reads_two() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[0x00]);
        t.queue_reply(&[0xe6]);
        let mut session = Session::new(t);

        session.match_bit_rates().unwrap();
        assert_eq!(session.state(), SessionState::BaudMatched);
        let transport = session.executor.into_transport();
        assert_eq!(transport.to_device, vec![0x00, 0x55]);
    }

    #[test]
    fn auto_baud_exhausts_retries_and_fails_on_persistent_silence() {
        // An empty queue times out on every probe; match_bit_rates must give
        // up after AUTO_BAUD_MAX_ATTEMPTS rather than loop forever.
        let t = LoopbackTransport::new();
        let mut session = Session::new(t);

        let err = session.match_bit_rates().unwrap_err();
        assert!(matches!(err, Error::TransportTimeout));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn inquire_devices_parses_framed_reply_into_descriptors() {
        // count=1, record: len=0x05, code=52 58 36 33 ("RX63"), name="N"
        let payload = [0x01u8, 0x05, 0x52, 0x58, 0x36, 0x33, b'N'];
        let frame = framed_reply(RESP_SUPPORTED_DEVICE_INQUIRY_OK, &payload);

        let mut t = LoopbackTransport::new();
        t.queue_reply(&frame);
        let mut session = Session::new(t);
        session.state = SessionState::BaudMatched;

        session.inquire_devices().unwrap();
        assert_eq!(session.devices().len(), 1);
        assert_eq!(session.devices()[0].code, *b"RX63");
        assert_eq!(session.devices()[0].series_name, "N");
    }

    #[test]
    fn device_selection_requires_baud_matched_state() {
        let t = LoopbackTransport::new();
        let mut session = Session::new(t);
        let err = session.select_device(0).unwrap_err();
        assert!(matches!(err, Error::ProtocolOrderError(SessionState::Uninitialised)));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn bit_rate_selection_reconfigures_transport_before_confirmation() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[RESP_GENERIC_OK]); // new bit rate selection ack
        t.queue_reply(&[RESP_GENERIC_OK]); // confirmation ack
        let mut session = Session::new(t);
        session.state = SessionState::RatesQueried;

        let defaults = SessionDefaults::default();
        session.select_bit_rate(&defaults).unwrap();

        assert_eq!(session.state(), SessionState::BitRateConfirmed);
        let transport = session.executor.into_transport();
        assert_eq!(transport.rate_changes, vec![115_200]);
    }

    #[test]
    fn page_programming_emits_terminate_after_pages() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[RESP_GENERIC_OK]); // page 1
        t.queue_reply(&[RESP_GENERIC_OK]); // page 2
        t.queue_reply(&[RESP_GENERIC_OK]); // terminate
        let mut session = Session::new(t);
        session.state = SessionState::ProgrammingActive;

        let regions = vec![(0x0000_1000u32, vec![0xaau8; 512])].into_iter();
        let mut seen = Vec::new();
        session
            .flash_pages_only(regions, |addr| seen.push(addr))
            .unwrap();

        assert_eq!(seen, vec![0x0000_1000, 0x0000_1100]);
        assert_eq!(session.state(), SessionState::Terminated);

        // Each page command is a 262-byte no-length-byte frame
        // (cmd + addr + 256 data bytes + checksum); the terminate command
        // is 6 bytes (cmd + addr + checksum, no data block).
        let transport = session.executor.into_transport();
        assert_eq!(transport.to_device.len(), 262 + 262 + 6);
        assert_eq!(transport.to_device[0], CMD_256_BYTE_PROGRAMMING);
        assert_eq!(transport.to_device[262], CMD_256_BYTE_PROGRAMMING);
        assert_eq!(transport.to_device[524], CMD_256_BYTE_PROGRAMMING);
        assert_eq!(&transport.to_device[525..529], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn device_error_pair_is_reported_with_phase() {
        let mut t = LoopbackTransport::new();
        t.queue_reply(&[0xd0, ERR_PAGE_ADDRESS]);
        let mut session = Session::new(t);
        session.state = SessionState::ProgrammingActive;

        let page = Page {
            address: 0x1000,
            data: [0u8; PAGE_SIZE],
        };
        let err = session.program_page(&page).unwrap_err();
        match err {
            Error::DeviceError { phase, code } => {
                assert_eq!(phase, Phase::PageProgramming);
                assert_eq!(code, ERR_PAGE_ADDRESS);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    // Test-only helper mirroring the page-loop half of `flash()`, used so
    // tests can exercise the loop without repeating the full 9-step
    // handshake setup.
    impl<T> Session<T>
    where
        T: Transport,
    {
        #[cfg(test)]
        fn flash_pages_only<I>(
            &mut self,
            regions: I,
            mut on_page: impl FnMut(u32),
        ) -> Result<()>
        where
            I: Iterator<Item = (u32, Vec<u8>)>,
        {
            for page in PageBuilder::new(regions) {
                self.program_page(&page)?;
                on_page(page.address);
            }
            self.terminate_programming()
        }
    }
}
