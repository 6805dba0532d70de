// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use prjquota_cli::check::handle_parse_error;
use prjquota_cli::{CheckCli, Parser};
use prjquota_logging::CliLogLevel;

fn main() {
    let cli = match CheckCli::try_parse() {
        Ok(cli) => cli,
        Err(err) => std::process::exit(handle_parse_error(err)),
    };

    // Stdout belongs to the status line; a logging failure must not change the result
    if let Err(err) = cli
        .logging
        .clone()
        .init_with_default_level("check_xfs_proj_quota", CliLogLevel::Warn)
    {
        eprintln!("Failed to initialize logging: {err:#}");
    }

    std::process::exit(cli.check.execute(cli.config.as_deref()));
}
