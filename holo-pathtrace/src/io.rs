//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path as FsPath;

use flate2::read::GzDecoder;

use crate::error::IoError;

/// Line-oriented reader over a gzip-compressed text file, the format
/// used for path and probe measurement files.
pub struct GzLineReader {
    filename: String,
    reader: BufReader<GzDecoder<File>>,
}

impl GzLineReader {
    pub fn open(path: impl AsRef<FsPath>) -> Result<GzLineReader, IoError> {
        let path = path.as_ref();
        let filename = path.display().to_string();
        let file = File::open(path).map_err(|e| IoError::Open(filename.clone(), e))?;
        Ok(GzLineReader {
            filename,
            reader: BufReader::new(GzDecoder::new(file)),
        })
    }

    /// Reads the next line, without its trailing newline. `Ok(None)` at
    /// end of file.
    pub fn read_line(&mut self) -> Result<Option<String>, IoError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| IoError::Read(self.filename.clone(), e))?;
        if n == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

impl Iterator for GzLineReader {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_line() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => None,
            Err(e) => Some(Err(io::Error::new(io::ErrorKind::Other, e))),
        }
    }
}
