//! UltraStar song file (.txt) handling.
//!
//! Reads the header tags the detector needs (#GAP, #MP3/#AUDIO, #TITLE,
//! #ARTIST) and writes an updated gap back. Song files circulate in
//! mixed encodings and line-ending styles, so the file is kept as raw
//! bytes and a gap update splices only the #GAP header line; every other
//! byte is preserved exactly as read.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{DetectionError, Result};

/// A loaded UltraStar song file.
#[derive(Debug)]
pub struct SongFile {
    path: PathBuf,
    bytes: Vec<u8>,
    line_ending: &'static str,
    /// Byte offset of the first non-header line (or end of file)
    header_end: usize,
    /// Byte range of the #GAP header line, without its terminator
    gap_span: Option<Range<usize>>,
    gap_ms: Option<f64>,
    title: Option<String>,
    artist: Option<String>,
    audio_tag: Option<String>,
    mp3_tag: Option<String>,
}

impl SongFile {
    /// Load and parse a song file.
    ///
    /// Header lines start with `#` and end at the first note line. Tags are
    /// matched case-insensitively; for repeated tags the first occurrence
    /// wins. A #GAP value that does not parse as a number is treated as
    /// absent (logged), not as an error.
    pub fn load(path: &Path) -> Result<SongFile> {
        let bytes = fs::read(path).map_err(|e| DetectionError::SongFile {
            path: path.to_path_buf(),
            message: format!("read failed: {}", e),
        })?;

        let mut title = None;
        let mut artist = None;
        let mut audio_tag = None;
        let mut mp3_tag = None;
        let mut gap_ms = None;
        let mut gap_span: Option<Range<usize>> = None;
        let mut header_end = bytes.len();

        let mut pos = 0usize;
        while pos < bytes.len() {
            let (content_end, next) = line_bounds(&bytes, pos);
            let line = &bytes[pos..content_end];
            if line.is_empty() {
                pos = next;
                continue;
            }
            if line[0] != b'#' {
                header_end = pos;
                break;
            }
            if let Some(colon) = line.iter().position(|&b| b == b':') {
                let tag = String::from_utf8_lossy(&line[1..colon])
                    .trim()
                    .to_ascii_uppercase();
                let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
                match tag.as_str() {
                    "TITLE" => {
                        if title.is_none() {
                            title = Some(value);
                        }
                    }
                    "ARTIST" => {
                        if artist.is_none() {
                            artist = Some(value);
                        }
                    }
                    "AUDIO" => {
                        if audio_tag.is_none() {
                            audio_tag = Some(value);
                        }
                    }
                    "MP3" => {
                        if mp3_tag.is_none() {
                            mp3_tag = Some(value);
                        }
                    }
                    "GAP" => {
                        if gap_span.is_none() {
                            gap_span = Some(pos..content_end);
                            gap_ms = parse_gap_value(&value);
                        }
                    }
                    _ => {}
                }
            }
            pos = next;
        }

        Ok(SongFile {
            path: path.to_path_buf(),
            line_ending: detect_line_ending(&bytes),
            header_end,
            gap_span,
            gap_ms,
            title,
            artist,
            audio_tag,
            mp3_tag,
            bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }

    /// The stored gap in milliseconds, as written in the file.
    pub fn gap_ms(&self) -> Option<f64> {
        self.gap_ms
    }

    /// The stored gap rounded to whole milliseconds, usable as the
    /// expected-position hint for detection. Negative values clamp to 0.
    pub fn gap_hint_ms(&self) -> Option<u64> {
        self.gap_ms.map(|g| if g > 0.0 { g.round() as u64 } else { 0 })
    }

    /// Audio file name from the #AUDIO tag, falling back to #MP3.
    pub fn audio_file(&self) -> Option<&str> {
        self.audio_tag.as_deref().or(self.mp3_tag.as_deref())
    }

    /// Audio file location resolved relative to the song file's directory.
    pub fn audio_path(&self) -> Option<PathBuf> {
        let name = self.audio_file()?;
        let dir = self.path.parent().unwrap_or(Path::new("."));
        Some(dir.join(name))
    }

    /// Replace the #GAP header with `gap_ms`, touching no other bytes.
    ///
    /// When the file has no #GAP header yet, one is inserted before the
    /// first note line using the file's own line-ending style.
    pub fn set_gap(&mut self, gap_ms: u64) {
        let line = format!("#GAP:{}", gap_ms);
        match self.gap_span.clone() {
            Some(span) => {
                let delta = line.len() as i64 - (span.end - span.start) as i64;
                self.bytes.splice(span.clone(), line.into_bytes());
                let new_end = (span.end as i64 + delta) as usize;
                if self.header_end >= span.end {
                    self.header_end = (self.header_end as i64 + delta) as usize;
                }
                self.gap_span = Some(span.start..new_end);
            }
            None => {
                let at = self.header_end;
                let mut insert = Vec::new();
                // A file that ends without a newline needs one before the
                // appended header.
                if at == self.bytes.len() && !self.bytes.is_empty() && self.bytes[at - 1] != b'\n'
                {
                    insert.extend_from_slice(self.line_ending.as_bytes());
                }
                let line_start = at + insert.len();
                insert.extend_from_slice(line.as_bytes());
                let line_end = at + insert.len();
                insert.extend_from_slice(self.line_ending.as_bytes());
                let inserted = insert.len();
                self.bytes.splice(at..at, insert);
                self.gap_span = Some(line_start..line_end);
                self.header_end = at + inserted;
            }
        }
        self.gap_ms = Some(gap_ms as f64);
    }

    /// Write the file back to its original location.
    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, &self.bytes).map_err(|e| DetectionError::SongFile {
            path: self.path.clone(),
            message: format!("write failed: {}", e),
        })
    }

    /// Raw file content as currently held in memory.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Bounds of the line starting at `start`: (end of content excluding the
/// terminator, start of the next line).
fn line_bounds(bytes: &[u8], start: usize) -> (usize, usize) {
    match bytes[start..].iter().position(|&b| b == b'\n') {
        Some(i) => {
            let line_end = start + i;
            let content_end = if line_end > start && bytes[line_end - 1] == b'\r' {
                line_end - 1
            } else {
                line_end
            };
            (content_end, line_end + 1)
        }
        None => {
            let mut content_end = bytes.len();
            if content_end > start && bytes[content_end - 1] == b'\r' {
                content_end -= 1;
            }
            (content_end, bytes.len())
        }
    }
}

fn detect_line_ending(bytes: &[u8]) -> &'static str {
    match bytes.iter().position(|&b| b == b'\n') {
        Some(i) if i > 0 && bytes[i - 1] == b'\r' => "\r\n",
        _ => "\n",
    }
}

/// Parse a #GAP value. Decimal commas are common in song files written
/// under European locales.
fn parse_gap_value(value: &str) -> Option<f64> {
    let normalized = value.replace(',', ".");
    match normalized.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            log::warn!("unparseable GAP value '{}'", value);
            None
        }
    }
}
