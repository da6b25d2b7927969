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

//! # RX63N/RX631 boot-mode serial programming interface
//!
//! A library implementing the Renesas RX63N/RX631 UART boot-mode protocol:
//! auto-baud synchronization, device/clock-mode/bit-rate negotiation, and
//! 256-byte paged flash programming from an Intel-HEX firmware image.
//!
//! The engine (`session`, `executor`, `frame`, `page`, `hex`) is generic over
//! the [`transport::Transport`] trait, so it runs identically against a real
//! `serial::SerialPort` handle or, in tests, an in-process loopback
//! simulator.
//!
//! # See also
//!
//! - Renesas RX63N Group User's Manual, boot mode chapter, for the wire
//!   protocol this crate drives.

use std::time::Duration;

use serial::SerialPort;

#[rustfmt::skip]
pub mod constants;
pub mod error;
pub mod executor;
pub mod frame;
pub mod hex;
pub mod page;
pub mod ports;
pub mod session;
pub mod transport;

pub use error::{Error, Phase, Result};
pub use session::{ClockType, Device, Session, SessionDefaults, SessionState};
pub use transport::{SerialTransport, Transport};

/// Default serial port settings used to open the port before the session's
/// own bit-rate negotiation (step 7) switches to the operating rate.
pub fn port_settings() -> serial::PortSettings {
    serial::PortSettings {
        baud_rate: serial::BaudRate::Baud9600,
        char_size: serial::CharSize::Bits8,
        parity: serial::Parity::ParityNone,
        stop_bits: serial::StopBits::Stop1,
        flow_control: serial::FlowControl::FlowNone,
    }
}

/// Use the DTR and RTS lines to drive the target's boot-mode/reset pins so
/// the board can be reset into boot mode without the user toggling pins by
/// hand.
///
/// # Parameters
///
/// - `inverted`: if `false` (default), DTR drives the boot-mode pin and RTS
///   drives `!RESET`. If `true`, the lines are swapped.
/// - `boot_mode_active_high`: whether the boot-mode pin is active low or
///   active high on the target board.
#[allow(clippy::needless_bool)]
pub fn invoke_bootloader<P>(
    port: &mut P,
    inverted: bool,
    boot_mode_active_high: bool,
) -> serial::Result<()>
where
    P: SerialPort,
{
    fn set_boot_mode_pin<P: SerialPort>(
        port: &mut P,
        inverted: bool,
        level: bool,
    ) -> serial::Result<()> {
        if inverted {
            port.set_rts(level)
        } else {
            port.set_dtr(level)
        }
    }

    fn set_reset_pin<P: SerialPort>(
        port: &mut P,
        inverted: bool,
        level: bool,
    ) -> serial::Result<()> {
        if inverted {
            port.set_dtr(level)
        } else {
            port.set_rts(level)
        }
    }

    set_boot_mode_pin(
        port,
        inverted,
        if !boot_mode_active_high { true } else { false },
    )?;
    set_reset_pin(port, inverted, false)?;
    set_reset_pin(port, inverted, true)?;
    set_reset_pin(port, inverted, false)?;
    // Make sure the pin is still asserted when the chip comes out of reset.
    #[cfg(not(test))]
    std::thread::sleep(Duration::from_millis(2));
    set_boot_mode_pin(
        port,
        inverted,
        if !boot_mode_active_high { false } else { true },
    )?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io;

    #[test]
    #[allow(bare_trait_objects)]
    fn test_invoke_bootloader() {
        struct DummySerialPort {
            rts_state: bool,
            dtr_state: bool,
        }

        impl SerialPort for DummySerialPort {
            fn timeout(&self) -> Duration {
                unreachable!()
            }
            fn set_timeout(
                &mut self,
                _timeout: Duration,
            ) -> serial::Result<()> {
                unreachable!()
            }
            fn configure(
                &mut self,
                _settings: &serial::PortSettings,
            ) -> serial::Result<()> {
                unreachable!()
            }
            fn reconfigure(
                &mut self,
                _setup: &Fn(
                    &mut serial::SerialPortSettings,
                ) -> serial::Result<()>,
            ) -> serial::Result<()> {
                unreachable!()
            }
            fn set_rts(&mut self, level: bool) -> serial::Result<()> {
                self.rts_state = level;
                Ok(())
            }
            fn set_dtr(&mut self, level: bool) -> serial::Result<()> {
                self.dtr_state = level;
                Ok(())
            }
            fn read_cts(&mut self) -> serial::Result<bool> {
                unreachable!()
            }
            fn read_dsr(&mut self) -> serial::Result<bool> {
                unreachable!()
            }
            fn read_ri(&mut self) -> serial::Result<bool> {
                unreachable!()
            }
            fn read_cd(&mut self) -> serial::Result<bool> {
                unreachable!()
            }
        }

        impl io::Read for DummySerialPort {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                unreachable!()
            }
        }

        impl io::Write for DummySerialPort {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                unreachable!()
            }
            fn flush(&mut self) -> io::Result<()> {
                unreachable!()
            }
        }

        let mut port = DummySerialPort {
            rts_state: false,
            dtr_state: false,
        };

        invoke_bootloader(&mut port, false, false).unwrap();
        assert_eq!(port.rts_state, false);
        assert_eq!(port.dtr_state, false);

        port.rts_state = false;
        port.dtr_state = false;
        invoke_bootloader(&mut port, true, false).unwrap();
        assert_eq!(port.rts_state, false);
        assert_eq!(port.dtr_state, false);

        port.rts_state = false;
        port.dtr_state = true;
        invoke_bootloader(&mut port, false, true).unwrap();
        assert_eq!(port.rts_state, false);
        assert_eq!(port.dtr_state, true);

        port.rts_state = true;
        port.dtr_state = false;
        invoke_bootloader(&mut port, true, true).unwrap();
        assert_eq!(port.rts_state, true);
        assert_eq!(port.dtr_state, false);
    }
}
