// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use log::LevelFilter;
use relayx::config::Config;

fn main() -> ExitCode {
    unsafe { simple_logger::init().unwrap_unchecked() };
    log::set_max_level(LevelFilter::Info);

    let path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            log::warn!("no config file path provided, using config.json");
            String::from("config.json")
        }
    };

    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load {path}: {e}");
            return ExitCode::from(1);
        }
    };

    if let Ok(level) = LevelFilter::from_str(&config.log_level) {
        log::set_max_level(level);
    }

    log::info!("relayx starting. license under MPL-2.0.");

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start tokio runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let exit_code = rt.block_on(relayx::listener::run(Arc::new(config)));
    ExitCode::from(exit_code as u8)
}
