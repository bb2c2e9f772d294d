//! Demonstration client for the `archive_diff` library: loads a diff,
//! provides the source blob if the diff declares one, resolves the target
//! item and streams it to an output file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use archive_diff::archive::Archive;
use archive_diff::io::file::{BinaryFileReader, BinaryFileWriter};
use archive_diff::io::SharedReader;

/// Reconstructs a target blob from a source blob plus a differential archive.
#[derive(Debug, Parser)]
#[command(name = "applydiff")]
struct Options {
    /// Path to the source blob (ignored if the diff declares no source item)
    source: PathBuf,
    /// Path to the differential archive to apply
    diff: PathBuf,
    /// Path the reconstructed target blob is written to
    target: PathBuf,
}

fn run(options: Options) -> archive_diff::Result<()> {
    let diff_reader: SharedReader = Arc::new(BinaryFileReader::open(&options.diff)?);
    log::info!("loaded diff {}", options.diff.display());

    let archive = Archive::open(diff_reader)?;

    let source = if archive.source_item().is_some() {
        log::info!("diff declares a source item, reading {}", options.source.display());
        Some(Arc::new(BinaryFileReader::open(&options.source)?) as SharedReader)
    } else {
        log::info!("diff declares no source item, {} is unused", options.source.display());
        None
    };

    let mut writer = BinaryFileWriter::create(&options.target)?;
    archive.apply(source, &mut writer)?;
    log::info!("wrote target to {}", options.target.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let options = Options::parse();
    match run(options) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(1)
        }
    }
}
