// Copyright (C) 2020-2026  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! `shc-verify` decodes and verifies a SMART Health Card.
//!
//! QR images are not decoded here; the input is the text of the scanned codes,
//! one `shc:/...` payload per line in scan order, e.g. as printed by
//! `zbarimg --raw`.
//!
//! ```console
//! $ zbarimg --raw card.png | shc-verify
//! Verified by https://issuer.example (kid 3Kfdg-XwP-7gXyywtUfUADwBumDOPKMQx-iELL11W9s)
//! Patient: Jane Q Doe
//! Immunization: 2021-05-01 by http://hl7.org/fhir/sid/mvx|MOD (vaccine 207) (lot 0000001)
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use bh_shc::{DecoderConfig, HttpsShcDecoder, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_PAYLOAD_SIZE};
use bherror::traits::{ForeignError as _, PropagateError as _};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

mod output;

/// Decodes and verifies a SMART Health Card from its scanned QR payloads.
#[derive(Parser)]
#[command(name = "shc-verify", version, about)]
struct Args {
    /// File with the `shc:/` QR payloads, one per line, in scan order.
    ///
    /// If not provided, the payloads are read from the standard input.
    file: Option<PathBuf>,

    /// Maximum size of the decompressed card payload, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD_SIZE)]
    max_payload_size: usize,

    /// Timeout of the issuer key set request, in seconds.
    #[arg(
        long,
        value_parser = parse_seconds,
        default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs_f64()
    )]
    timeout: f64,

    /// Accept `http` issuers. Only meant for local testing.
    #[arg(long)]
    allow_insecure_issuer: bool,
}

impl Args {
    fn config(&self) -> DecoderConfig {
        DecoderConfig {
            max_payload_size: self.max_payload_size,
            fetch_timeout: Duration::from_secs_f64(self.timeout),
            allow_insecure_issuer: self.allow_insecure_issuer,
            ..Default::default()
        }
    }
}

fn parse_seconds(value: &str) -> std::result::Result<f64, String> {
    let seconds: f64 = value.parse().map_err(|_| format!("`{value}` is not a number"))?;
    Duration::try_from_secs_f64(seconds).map_err(|error| error.to_string())?;
    Ok(seconds)
}

#[derive(strum_macros::Display, Debug)]
enum CliError {
    #[strum(to_string = "could not read {0}")]
    ReadInput(String),

    #[strum(to_string = "{0}")]
    Decode(bh_shc::Error),
}

impl bherror::BhError for CliError {}

type Result<T> = bherror::Result<T, CliError>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();
    match run(args).await {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn run(args: Args) -> Result<Vec<String>> {
    let scanned = read_payloads(args.file.as_deref())?;
    tracing::debug!(payloads = scanned.len(), "read QR payloads");

    let decoder = HttpsShcDecoder::with_https_lookup(args.config())
        .match_err(|error| CliError::Decode(error.clone()))?;

    let card = decoder
        .decode(&scanned)
        .await
        .match_err(|error| CliError::Decode(error.clone()))?;

    Ok(output::render_card(&card))
}

fn read_payloads(file: Option<&Path>) -> Result<Vec<String>> {
    let input = match file {
        Some(path) => fs::read_to_string(path)
            .foreign_err(|| CliError::ReadInput(format!("`{}`", path.display())))?,
        None => io::read_to_string(io::stdin())
            .foreign_err(|| CliError::ReadInput("standard input".to_owned()))?,
    };

    Ok(split_payloads(&input))
}

// One payload per line, blank lines skipped
fn split_payloads(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}
