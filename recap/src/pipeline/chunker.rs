//! Overlapping windows over a transcript.
//!
//! Window `k` covers characters `[k·(C−O), min(k·(C−O)+C, L))` and windows
//! stop once the start reaches `L`. The final window may be shorter than
//! `C`, and the last `O` characters of a window repeat at the start of the
//! next one.

use std::ops::Range;

use crate::{Error, Result};

fn check(chunk_size: usize, overlap: usize) -> Result<usize> {
    if chunk_size == 0 {
        return Err(Error::validation("chunk_size must be greater than zero"));
    }
    if overlap >= chunk_size {
        return Err(Error::validation(format!(
            "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }
    Ok(chunk_size - overlap)
}

/// Character ranges of the windows over a text of `len` characters.
pub fn chunk_windows(len: usize, chunk_size: usize, overlap: usize) -> Result<Vec<Range<usize>>> {
    let step = check(chunk_size, overlap)?;
    Ok((0..len)
        .step_by(step)
        .map(|start| start..(start + chunk_size).min(len))
        .collect())
}

/// Slice `text` into windows, counting characters rather than bytes.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<&str>> {
    // Byte offset of every char boundary, plus the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = boundaries.len() - 1;

    Ok(chunk_windows(len, chunk_size, overlap)?
        .into_iter()
        .map(|w| &text[boundaries[w.start]..boundaries[w.end]])
        .collect())
}
