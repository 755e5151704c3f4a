//! Initial string ingestion from argv or stdin.

use std::io::{self, BufRead};

use crate::list::MAX_ENTRIES;

/// Longest accepted stdin line; the rest of an overlong line is cut.
const MAX_LINE_BYTES: usize = 500;

/// Read up to [`MAX_ENTRIES`] lines from `input`, stripping the
/// trailing newline and cutting each line at [`MAX_LINE_BYTES`].
pub fn from_reader(input: impl BufRead) -> io::Result<Vec<String>> {
    let mut strings = Vec::new();
    for line in input.lines() {
        if strings.len() >= MAX_ENTRIES {
            break;
        }
        let mut line = line?;
        truncate_to_boundary(&mut line, MAX_LINE_BYTES);
        strings.push(line);
    }
    Ok(strings)
}

pub fn from_stdin() -> io::Result<Vec<String>> {
    from_reader(io::stdin().lock())
}

/// Drop the trailing NUL padding some owners append to converted
/// selections.
pub fn strip_trailing_nuls(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

fn truncate_to_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
