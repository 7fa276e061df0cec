//! Renders the `ferry(1)` manual page into `OUT_DIR`.
//!
//! The page is built from the same clap definition the binary parses, so
//! flags and defaults cannot drift from the documentation.

use std::env;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    for input in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={input}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or("OUT_DIR was not set")?;

    let command = cli::Cli::command()
        .version(env!("CARGO_PKG_VERSION"))
        .disable_version_flag(true);
    let mut page = Vec::new();
    Man::new(command)
        .section("1")
        .manual("Ferry Manual")
        .render(&mut page)?;

    std::fs::write(out_dir.join("ferry.1"), page)?;
    Ok(())
}
