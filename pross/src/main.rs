//! Simulate a set of shareholders through generation and repeated updates.
//!
//! # Usage
//!
//! ```sh
//! cargo run --release -- --n 7 --threshold 4 --update-threshold 5 --rounds 3 --lose 2,5
//! ```
//!
//! Shareholders listed in `--lose` erase their share before every update and have it rebuilt by
//! the rest. After every update the threshold derivation of a fixed input is checked against the
//! one computed right after generation.

use clap::{value_parser, Arg, Command};
use commonware_pross::{
    administration::Administration,
    config::Config,
    primitives::group::{Group, P256},
};
use commonware_utils::hex;
use rand::{rngs::StdRng, SeedableRng};
use std::str::FromStr;
use tracing::{error, info, warn};

/// Input evaluated under the shared secret after every update.
const DERIVATION_INPUT: &[u8] = b"_COMMONWARE_PROSS_DERIVATION";

fn main() {
    // Parse arguments
    let matches = Command::new("commonware-pross")
        .about("refresh, repair, and rekey a threshold-shared secret")
        .arg(
            Arg::new("config")
                .long("config")
                .required(false)
                .help("YAML configuration (overrides n, threshold, and update-threshold)"),
        )
        .arg(
            Arg::new("n")
                .long("n")
                .required(false)
                .default_value("5")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .required(false)
                .default_value("3")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("update-threshold")
                .long("update-threshold")
                .required(false)
                .value_parser(value_parser!(u32))
                .help("Defaults to the threshold"),
        )
        .arg(
            Arg::new("rounds")
                .long("rounds")
                .required(false)
                .default_value("1")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("lose")
                .long("lose")
                .required(false)
                .value_delimiter(',')
                .value_parser(value_parser!(u32))
                .help("Shareholders that erase their share before every update"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .required(false)
                .value_parser(value_parser!(u64)),
        )
        .arg(Arg::new("log-level").long("log-level").required(false))
        .get_matches();

    // Load config
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load(path).expect("Config not well-formed"),
        None => {
            let threshold = *matches.get_one::<u32>("threshold").unwrap();
            Config {
                n: *matches.get_one::<u32>("n").unwrap(),
                threshold,
                update_threshold: matches
                    .get_one::<u32>("update-threshold")
                    .copied()
                    .unwrap_or(threshold),
                seed: None,
                log_level: "info".to_string(),
            }
        }
    };
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.seed = Some(*seed);
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_level = level.clone();
    }

    // Create logger
    let level = tracing::Level::from_str(&config.log_level).expect("Log level not well-formed");
    tracing_subscriber::fmt().with_max_level(level).init();

    // Bootstrap shareholders
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let rounds = *matches.get_one::<u32>("rounds").unwrap();
    let lose = matches
        .get_many::<u32>("lose")
        .map(|indices| indices.copied().collect::<Vec<_>>())
        .unwrap_or_default();
    let group = P256::new();
    let administration = Administration::new(group, config).expect("Config not well-formed");
    let (mut coordinator, report) = administration.launch(&mut rng);
    if !report.is_clean() {
        error!(failures = ?report.failures, "generation failed");
        std::process::exit(1);
    }
    let expected = coordinator
        .derive(DERIVATION_INPUT)
        .expect("Derivation failed");
    info!(derived = hex(&group.encode(&expected)), "generated secret");

    // Run updates
    for round in 0..rounds {
        for index in &lose {
            match coordinator.shareholder_mut(*index) {
                Some(shareholder) => shareholder.erase_share(),
                None => warn!(index, "unknown shareholder"),
            }
        }
        let reports = match coordinator.update(&mut rng) {
            Ok(reports) => reports,
            Err(err) => {
                error!(round, ?err, "update failed");
                std::process::exit(1);
            }
        };
        for report in reports {
            if !report.is_clean() {
                warn!(round, epoch = report.epoch, failures = ?report.failures, "shareholders failed");
            }
            if !report.flagged.is_empty() {
                info!(round, epoch = report.epoch, flagged = ?report.flagged, "flagged shareholders");
            }
        }
        let derived = coordinator
            .derive(DERIVATION_INPUT)
            .expect("Derivation failed");
        if derived != expected {
            error!(round, derived = hex(&group.encode(&derived)), "derivation changed");
            std::process::exit(1);
        }
        info!(round, epoch = coordinator.epoch(), "derivation unchanged");
    }
    coordinator.stop();
}
