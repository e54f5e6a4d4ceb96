//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;

use clap::{App, Arg};
use tracing_subscriber::EnvFilter;

use holo_pathtrace::address::Address;
use holo_pathtrace::correlator::Correlator;
use holo_pathtrace::error::{Error, IoError, ParseError};
use holo_pathtrace::io::GzLineReader;
use holo_pathtrace::loader::Loader;
use holo_pathtrace::path::Path;
use holo_pathtrace::probe::Probe;
use holo_pathtrace::stats;

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive("holo_pathtrace=info".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Scans `mondir` for files named `<prefix>.<ip-dotted>.gz`, returning
/// `(destination, filename)` pairs sorted by destination so streams are
/// built in a deterministic order.
fn scan_files(mondir: &FsPath, prefix: &str) -> Result<Vec<(Address, PathBuf)>, Error> {
    let dirname = mondir.display().to_string();
    let entries = fs::read_dir(mondir)
        .map_err(|e| Error::Io(IoError::Open(dirname.clone(), e)))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::Io(IoError::Read(dirname.clone(), e)))?;
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        let Some(rest) = filename
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('.'))
        else {
            continue;
        };
        let Some(key) = rest.strip_suffix(".gz") else {
            continue;
        };
        let Ok(dst) = Address::from_str(key) else {
            continue;
        };
        found.push((dst, path));
    }
    found.sort_by_key(|(dst, _)| *dst);
    Ok(found)
}

/// Reads every line out of a gzip-compressed measurement file, parsing
/// each with `parse`. Malformed lines are logged and skipped rather
/// than aborting the whole file, matching the original tool's
/// tolerance for the occasional corrupt record in a long-running
/// capture.
fn read_objects<T>(
    filename: &FsPath,
    parse: impl Fn(&str) -> Result<T, ParseError>,
) -> Result<Vec<T>, Error> {
    let mut reader = GzLineReader::open(filename)?;
    let mut objects = Vec::new();
    while let Some(line) = reader.read_line()? {
        match parse(&line) {
            Ok(object) => objects.push(object),
            Err(error) => Error::Parse(error).log(),
        }
    }
    Ok(objects)
}

fn run(mondir: &FsPath, timespan: i64, outprefix: &str) -> Result<(), Error> {
    let path_files = scan_files(mondir, "paths")?;
    let probe_files = scan_files(mondir, "probes")?;

    let mut path_sources = Vec::with_capacity(path_files.len());
    for (dst, filename) in &path_files {
        let objects = read_objects(filename, Path::parse)?;
        path_sources.push((*dst, objects.into_iter()));
    }
    let mut probe_sources = Vec::with_capacity(probe_files.len());
    for (dst, filename) in &probe_files {
        let objects = read_objects(filename, Probe::parse)?;
        probe_sources.push((*dst, objects.into_iter()));
    }

    let mut path_loader: Loader<Address, Path> = Loader::new(timespan, path_sources);
    let mut probe_loader: Loader<Address, Probe> = Loader::new(timespan, probe_sources);
    let mut correlator = Correlator::new(&mut path_loader, timespan);

    let outfile = format!("{outprefix}.stats");
    let file = File::create(&outfile).map_err(|e| Error::Io(IoError::Open(outfile.clone(), e)))?;
    let mut out = BufWriter::new(file);
    out.write_all(stats::FORMAT.as_bytes())
        .map_err(|e| Error::Io(IoError::Write(outfile.clone(), e)))?;

    while let Some((tstamp, dst, cpath, npath)) = path_loader.pop_event() {
        let reports = correlator.process_event(&mut path_loader, &mut probe_loader, tstamp, dst, cpath, npath);
        for report in reports {
            writeln!(out, "{report}").map_err(|e| Error::Io(IoError::Write(outfile.clone(), e)))?;
        }
    }

    out.flush().map_err(|e| Error::Io(IoError::Write(outfile, e)))?;
    Ok(())
}

fn main() {
    init_tracing();

    let matches = App::new("pathtrace")
        .about("Detects and correlates path changes across traceroute-style measurements")
        .arg(
            Arg::with_name("MONDIR")
                .long("mondir")
                .help("Directory containing path and probe files for one monitor")
                .value_name("DIR")
                .required(true),
        )
        .arg(
            Arg::with_name("TIMESPAN")
                .long("timespan")
                .help("Time period (seconds) to consider around the current time")
                .value_name("SECS")
                .default_value("600"),
        )
        .arg(
            Arg::with_name("OUTPREFIX")
                .short("o")
                .help("Output prefix")
                .value_name("PREFIX")
                .default_value("out"),
        )
        .get_matches();

    let mondir = PathBuf::from(matches.value_of("MONDIR").unwrap());
    let timespan = match matches.value_of("TIMESPAN").unwrap().parse::<i64>() {
        Ok(timespan) => timespan,
        Err(_) => {
            eprintln!("pathtrace: invalid --timespan value");
            std::process::exit(1);
        }
    };
    let outprefix = matches.value_of("OUTPREFIX").unwrap();

    if let Err(error) = run(&mondir, timespan, outprefix) {
        error.log();
        std::process::exit(1);
    }
}
