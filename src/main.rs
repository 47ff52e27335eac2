/*
 * This file is part of dcpipe.
 *
 * Copyright (C) 2025 dcpipe contributors
 *
 * dcpipe is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * dcpipe is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with dcpipe. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};

use dcpipe::config::load_scenario_config;
use dcpipe::logger;
use dcpipe::scenario::run_scenario;

const USAGE: &str = "\
Usage: dcpipe --config <scenario.json> [--logging]

Validate and commit a display scenario against simulated hardware.

Options:
  --config <path>   Scenario file (ASIC, connectors, sinks, targets, surfaces)
  --logging         Append JSON events to $DCPIPE_EVENT_LOG (default /var/log/dcpipe/events.json)
  --help            Show this message
  --version         Show version

Environment:
  DCPIPE_LOG        tracing filter, e.g. dcpipe=debug (default info)";

fn init_tracing() {
    let filter = std::env::var("DCPIPE_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    // Gather args once
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("dcpipe {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing();

    let logging_enabled = args.iter().any(|a| a == "--logging");
    if logging_enabled {
        logger::init_logging();
        logger::log_event("startup", serde_json::json!({ "args": args }));
    }

    let config_path = match args.iter().position(|a| a == "--config") {
        Some(idx) => args
            .get(idx + 1)
            .map(PathBuf::from)
            .context("--config needs a path")?,
        None => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let cfg = load_scenario_config(&config_path)
        .with_context(|| format!("failed to load scenario {}", config_path.display()))?;
    info!(path = %config_path.display(), targets = cfg.targets.len(), "Scenario loaded");

    match run_scenario(&cfg) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if logging_enabled {
                logger::log_event("scenario_complete", serde_json::json!({ "targets": report.targets }));
                logger::shutdown_logging();
            }
            Ok(())
        }
        Err(err) => {
            error!(error = %err, status = err.status().name(), "Scenario failed");
            if logging_enabled {
                logger::log_event(
                    "fatal_error",
                    serde_json::json!({ "error": err.to_string(), "status": err.status().code() }),
                );
                logger::shutdown_logging();
            }
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
