// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::Display;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;

// Extract the parsing function for unittest.
pub fn parse_first_line<R: BufRead, T: FromStr>(reader: R) -> Result<T>
where
    T::Err: Display,
{
    let first_line = reader.lines().next().context("No content in buffer")??;
    let first_line = first_line.trim();
    match first_line.parse() {
        Ok(value) => Ok(value),
        Err(e) => bail!("Couldn't parse \"{}\": {}", first_line, e),
    }
}

/// Get the first line in a file and parse it.
pub fn read_from_file<T: FromStr, P: AsRef<Path>>(path: &P) -> Result<T>
where
    T::Err: Display,
{
    let reader = File::open(path).map(BufReader::new)?;
    parse_first_line(reader)
}

/// Parses a comma separated list of numbers, e.g. "0,8" or "1024, 4096".
///
/// This is the format the low memory killer tables have always been written in.
pub fn parse_number_list<T: FromStr>(content: &str) -> Result<Vec<T>>
where
    T::Err: Display,
{
    let content = content.trim();
    if content.is_empty() {
        return Ok(Vec::new());
    }
    content
        .split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Couldn't parse \"{}\" in list: {}", token, e))
        })
        .collect()
}

pub fn format_number_list<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Reads a comma separated number list from the first line of a file.
pub fn read_number_list_from_file<T: FromStr, P: AsRef<Path>>(path: &P) -> Result<Vec<T>>
where
    T::Err: Display,
{
    let reader = File::open(path).map(BufReader::new)?;
    let first_line = reader.lines().next().context("No content in list file")??;
    parse_number_list(&first_line)
}
