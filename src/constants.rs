// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Based on the previous work of cc2538-bsl and Texas Instruments sblAppEx
// 1.03.00.00 (swra466c.zip).
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

//! Command, response and error-code constants for the RX63N/RX631 boot-mode
//! serial protocol, as documented in the vendor's Flash Programming manual.

pub const CMD_INITIAL_TRANSMIT: u8 = 0x00;
pub const CMD_BIT_RATE_INIT: u8 = 0x55;
pub const CMD_NEW_BIT_RATE_CONFIRMATION: u8 = 0x06;

pub const CMD_SUPPORTED_DEVICE_INQUIRY: u8 = 0x20;
pub const CMD_DEVICE_SELECTION: u8 = 0x10;
pub const CMD_CLOCK_MODE_INQUIRY: u8 = 0x21;
pub const CMD_CLOCK_MODE_SELECTION: u8 = 0x11;
pub const CMD_MULTIPLICATION_RATIO_INQUIRY: u8 = 0x22;
pub const CMD_OPERATING_FREQUENCY_INQUIRY: u8 = 0x23;
pub const CMD_NEW_BIT_RATE_SELECTION: u8 = 0x3f;
pub const CMD_PROGRAMMING_ERASURE_STATE_TRANSITION: u8 = 0x40;
pub const CMD_USER_DATA_AREA_PROGRAMMING_SELECTION: u8 = 0x43;
pub const CMD_256_BYTE_PROGRAMMING: u8 = 0x50;

pub const RESP_INITIAL_TRANSMIT_OK: u8 = 0x00;
pub const RESP_GENERIC_OK: u8 = 0x06;
pub const RESP_BIT_RATE_INIT_OK: u8 = 0xe6;
pub const RESP_SUPPORTED_DEVICE_INQUIRY_OK: u8 = 0x30;
pub const RESP_CLOCK_MODE_INQUIRY_OK: u8 = 0x31;
pub const RESP_MULTIPLICATION_RATIO_INQUIRY_OK: u8 = 0x32;
pub const RESP_OPERATING_FREQUENCY_INQUIRY_OK: u8 = 0x33;

/// Programming/erasure state transition replies.
pub const RESP_PROGRAMMING_STATE_OK: u8 = 0x26;
pub const RESP_ID_CODE_PROTECTED: u8 = 0x16;

/// `COMMAND_NEW_BIT_RATE_SELECTION` error-pair second bytes.
pub const ERR_BIT_RATE_CHECKSUM: u8 = 0x11;
pub const ERR_BIT_RATE_RANGE: u8 = 0x24;
pub const ERR_BIT_RATE_INPUT_FREQUENCY: u8 = 0x25;
pub const ERR_BIT_RATE_MULTIPLICATION_RATIO: u8 = 0x26;
pub const ERR_BIT_RATE_OPERATING_FREQUENCY: u8 = 0x27;

/// `COMMAND_256_BYTE_PROGRAMMING` error-pair second bytes.
pub const ERR_PAGE_CHECKSUM: u8 = 0x11;
pub const ERR_PAGE_ADDRESS: u8 = 0x2a;
pub const ERR_PAGE_PROGRAMMING_FAILURE: u8 = 0x53;

/// Number of auto-baud probe attempts before giving up.
pub const AUTO_BAUD_MAX_ATTEMPTS: usize = 30;

/// Maximum capacity, in bytes, of a series-name string (excluding the
/// terminator) as carried in a `DEVICE` record.
pub const SERIES_NAME_CAPACITY: usize = 47;

/// Flash page size, in bytes.
pub const PAGE_SIZE: usize = 256;

/// Value of an unwritten flash byte on this device family.
pub const ERASED_BYTE: u8 = 0xff;

/// Address sent with the terminating `COMMAND_256_BYTE_PROGRAMMING` frame.
pub const TERMINATE_ADDRESS: u32 = 0xffff_ffff;
