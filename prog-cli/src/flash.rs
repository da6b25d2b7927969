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

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serial::SystemPort;

use rx63n_sbl::{SerialTransport, Session, SessionDefaults};

/// Drives the session through the full boot-mode handshake and page
/// programming loop, advancing `progress` as pages are written.
pub fn run(
    session: &mut Session<SerialTransport<SystemPort>>,
    defaults: &SessionDefaults,
    regions: Vec<(u32, Vec<u8>)>,
    progress: &ProgressBar,
) -> Result<()> {
    session
        .flash(defaults, regions.into_iter(), |address| {
            log::debug!("programmed page at {:#010x}", address);
            progress.inc(rx63n_sbl::constants::PAGE_SIZE as u64);
        })
        .context("Firmware flashing failed")?;

    Ok(())
}
