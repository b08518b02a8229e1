//! Heading-delimited markdown chunker.
//!
//! Splits a document into sections at `#`–`######` headings, with an
//! implicit leading section for content before the first heading. Each
//! surviving section becomes one [`Chunk`] carrying a truncated SHA-256
//! content hash and metadata derived once per file from the
//! `YYYY-MM-DD-<project>` filename pattern.
//!
//! Chunking is a pure function: identical text + path always yields an
//! identical chunk sequence.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::models::Chunk;

/// Sections shorter than this (after trimming) carry no retrievable signal
/// and are dropped.
pub const MIN_CHUNK_CHARS: usize = 20;

/// Hex digits kept from the SHA-256 digest.
const HASH_LEN: usize = 16;

/// Metadata derived from a source file's name and parent directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    pub date: String,
    pub project: String,
    pub kind: String,
}

/// Derive `date`/`project`/`kind` from a source path.
///
/// `2026-02-19-docstack.md` under `sessions/` yields
/// `{date: "2026-02-19", project: "docstack", kind: "session"}`; a stem not
/// matching the pattern yields an empty date and the stem as project.
pub fn file_meta(source: &Path) -> FileMeta {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let parent = source
        .parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let (date, project) = split_dated_stem(&stem);
    let kind = if parent == "plans" { "plan" } else { "session" };

    FileMeta {
        date,
        project,
        kind: kind.to_string(),
    }
}

/// Split `YYYY-MM-DD-<project>` into (date, project); non-matching stems
/// yield an empty date and the whole stem as project.
fn split_dated_stem(stem: &str) -> (String, String) {
    let b = stem.as_bytes();
    let dated = b.len() > 11
        && b[..4].iter().all(|c| c.is_ascii_digit())
        && b[4] == b'-'
        && b[5..7].iter().all(|c| c.is_ascii_digit())
        && b[7] == b'-'
        && b[8..10].iter().all(|c| c.is_ascii_digit())
        && b[10] == b'-';

    if dated {
        (stem[..10].to_string(), stem[11..].to_string())
    } else {
        (String::new(), stem.to_string())
    }
}

/// Truncated SHA-256 hex digest of a chunk's trimmed content.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

/// Parse a markdown heading line: 1–6 `#` followed by whitespace and a
/// non-empty title.
fn parse_heading(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some(title)
}

/// Split markdown into heading-bounded chunks with per-file metadata.
///
/// A document with no headings yields exactly one chunk (or zero, if the
/// trimmed text is shorter than [`MIN_CHUNK_CHARS`]).
pub fn chunk_markdown(text: &str, source: &Path) -> Vec<Chunk> {
    let lines: Vec<&str> = text.split('\n').collect();

    let mut headings: Vec<(usize, String)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if let Some(title) = parse_heading(line) {
            headings.push((i, title.to_string()));
        }
    }

    // Section spans: heading line inclusive to next heading exclusive, with
    // an implicit leading section for anything before the first heading.
    let mut sections: Vec<(usize, usize, String)> = Vec::new();
    if headings.first().map_or(true, |(first, _)| *first > 0) {
        let end = headings.first().map_or(lines.len(), |(first, _)| *first);
        sections.push((0, end, String::new()));
    }
    for (idx, (line_idx, title)) in headings.iter().enumerate() {
        let next = headings.get(idx + 1).map_or(lines.len(), |(n, _)| *n);
        sections.push((*line_idx, next, title.clone()));
    }

    let meta = file_meta(source);
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let source_str = source.to_string_lossy().to_string();

    let mut chunks = Vec::new();
    for (start, end, title) in sections {
        let content = lines[start..end].join("\n");
        let content = content.trim();
        if content.chars().count() < MIN_CHUNK_CHARS {
            continue;
        }
        let hash = content_hash(content);
        chunks.push(Chunk {
            id: format!("{}:{}:{}", file_name, start, hash),
            content: content.to_string(),
            source: source_str.clone(),
            section_title: title,
            date: meta.date.clone(),
            project: meta.project.clone(),
            kind: meta.kind.clone(),
            content_hash: hash,
        });
    }
    chunks
}
