// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use prjquota_cli::{Cli, Parser};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.logging.clone().init("xfs-prjquota")?;

    let code = cli.command.run(cli.config.as_deref())?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
