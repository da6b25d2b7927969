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

use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{crate_authors, crate_version, App, AppSettings, Arg};
use indicatif::{ProgressBar, ProgressStyle};
use serial::SerialPort;

use rx63n_sbl::{hex, Session, SessionDefaults};

mod flash;
mod list;

#[cfg(unix)]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";
#[cfg(windows)]
const DEFAULT_PORT: &str = "COM0";

fn main() -> Result<()> {
    let app = App::new("RX63N/RX631 Boot-Mode Programmer")
        .setting(AppSettings::ColoredHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Programmer for the Renesas RX63N/RX631 UART boot-mode protocol\nProject website: https://locha.io/software/rx63n-sbl")
        .arg(
            Arg::with_name("PORT")
                .help("Serial device path, e.g. /dev/ttyUSB0")
                .required_unless("list-ports")
        )
        .arg(
            Arg::with_name("IMAGE")
                .help("Intel-HEX firmware image to flash")
                .required_unless("list-ports")
        )
        .arg(
            Arg::with_name("list-ports")
                .long("list-ports")
                .help("List available serial ports and exit")
        )
        .arg(
            Arg::with_name("device-index")
                .long("device-index")
                .takes_value(true)
                .default_value("0")
                .help("Index into the supported-device inquiry reply to select")
        )
        .arg(
            Arg::with_name("clock-mode-index")
                .long("clock-mode-index")
                .takes_value(true)
                .default_value("0")
                .help("Index into the clock-mode inquiry reply to select")
        )
        .arg(
            Arg::with_name("bit-rate")
                .long("bit-rate")
                .takes_value(true)
                .default_value("115200")
                .help("Target bit rate to negotiate after device selection")
        )
        .arg(
            Arg::with_name("input-frequency")
                .long("input-frequency")
                .takes_value(true)
                .default_value("12000000")
                .help("Input clock frequency in Hz")
        )
        .arg(
            Arg::with_name("system-multiplier")
                .long("system-multiplier")
                .takes_value(true)
                .default_value("8")
                .help("System clock multiplication ratio")
        )
        .arg(
            Arg::with_name("peripheral-multiplier")
                .long("peripheral-multiplier")
                .takes_value(true)
                .default_value("4")
                .help("Peripheral clock multiplication ratio")
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity, -v (debug), -vv (trace)")
        );

    // When double clicking the binary the window will close immediately on
    // error if we don't pause first. Useful on Windows.
    #[cfg(windows)]
    let app = app.setting(AppSettings::WaitOnError);

    let matches = app.get_matches();

    init_logger(match matches.occurrences_of("v") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u64::MAX => log::LevelFilter::Trace,
    })?;

    if matches.is_present("list-ports") {
        return list::list();
    }

    let port_path: PathBuf = matches.value_of("PORT").unwrap().parse()?;
    let image_path: PathBuf = matches.value_of("IMAGE").unwrap().parse()?;

    let defaults = SessionDefaults {
        device_index: matches.value_of("device-index").unwrap().parse()
            .context("invalid --device-index")?,
        clock_mode_index: matches.value_of("clock-mode-index").unwrap().parse()
            .context("invalid --clock-mode-index")?,
        bit_rate: matches.value_of("bit-rate").unwrap().parse()
            .context("invalid --bit-rate")?,
        input_frequency_hz: matches.value_of("input-frequency").unwrap().parse()
            .context("invalid --input-frequency")?,
        system_multiplier: matches.value_of("system-multiplier").unwrap().parse()
            .context("invalid --system-multiplier")?,
        peripheral_multiplier: matches.value_of("peripheral-multiplier").unwrap().parse()
            .context("invalid --peripheral-multiplier")?,
    };

    log::info!("Reading firmware image `{}`", image_path.display());
    let image_text = std::fs::read_to_string(&image_path).with_context(|| {
        format!("Couldn't read firmware image `{}`", image_path.display())
    })?;
    let regions = hex::regions_from_str(&image_text)
        .context("Couldn't parse firmware image as Intel-HEX")?;
    let total_bytes: usize = regions.iter().map(|(_, b)| b.len()).sum();
    log::info!(
        "Firmware image: {} region(s), {} bytes total",
        regions.len(),
        total_bytes
    );

    log::info!("Opening serial port `{}`", port_path.display());
    let mut port = serial::SystemPort::open(&port_path).with_context(|| {
        format!("Couldn't open serial port `{}`", port_path.display())
    })?;

    let settings = rx63n_sbl::port_settings();
    port.set_timeout(Duration::from_millis(200))?;
    port.configure(&settings)?;

    let transport = rx63n_sbl::SerialTransport::new(port);
    let mut session = Session::new(transport);

    let progress = ProgressBar::new(total_bytes as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
            .progress_chars("#>-"),
    );

    log::info!("Starting boot-mode handshake");
    flash::run(&mut session, &defaults, regions, &progress)?;
    progress.finish_with_message("done");

    log::info!("Flashing completed successfully");

    Ok(())
}

fn init_logger(level: log::LevelFilter) -> Result<()> {
    let mut logger = env_logger::Builder::from_env("TI_SBL_LOG");
    logger.filter_level(level);

    #[cfg(unix)]
    logger.format(log_format_color);
    #[cfg(not(unix))]
    logger.format(log_format_no_color);

    logger.try_init().context("Failed to initialize logger")
}

#[cfg(unix)]
fn log_format_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => ansi_term::Color::Red.bold().paint("ERROR"),
        log::Level::Warn => ansi_term::Color::Yellow.bold().paint("WARN"),
        log::Level::Info => ansi_term::Color::Green.bold().paint("INFO"),
        log::Level::Debug => ansi_term::Color::Cyan.bold().paint("DBG"),
        log::Level::Trace => ansi_term::Color::Cyan.bold().paint("TRACE"),
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

#[cfg(not(unix))]
fn log_format_no_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN",
        log::Level::Info => "INFO",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRACE",
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}
