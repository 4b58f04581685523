// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Signed JAR manifest handling: `META-INF/MANIFEST.MF` and the `.SF`
//! signature file derived from it.
//!
//! Manifests are treated as text with CRLF line endings. Sections are
//! separated by blank lines, and a line starting with a single space
//! continues the previous one.

use std::ops::Range;

use base64::{prelude::BASE64_STANDARD, Engine};
use repack_common::{RepackError, Result};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
/// Longest line, in bytes and without the CRLF, before it has to be folded.
pub const LINE_WIDTH: usize = 70;

const CRLF: &str = "\r\n";

/// A named section of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    /// Base64 value of the section's first `*-Digest` attribute
    pub digest: Option<String>,
    // Logical lines, continuations already joined
    lines: Vec<String>
}

impl ManifestEntry {
    /// The section as hashed for the signature file: unfolded lines, each
    /// ending in CRLF, followed by the blank separator line.
    pub fn canonical_text(&self) -> String {
        let mut text = self.lines.join(CRLF);
        text.push_str("\r\n\r\n");
        text
    }
}

/// The updated manifest and the signature file describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenManifest {
    pub manifest: Vec<u8>,
    pub signature_file: Vec<u8>
}

/// Base64 of the SHA-1 digest, the form every digest attribute uses.
pub fn sha1_base64(input: impl AsRef<[u8]>) -> String {
    BASE64_STANDARD.encode(Sha1::digest(input))
}

/// Points the manifest entry `entry_path` at `content`, then regenerates the
/// signature file for the result.
pub fn rewrite_manifest(manifest: &[u8], entry_path: &str, content: &[u8]) -> Result<RewrittenManifest> {
    let manifest = update_manifest_entry(manifest, entry_path, content)?;
    let signature_file = create_signature_file(&manifest)?;
    Ok(RewrittenManifest {
        manifest,
        signature_file
    })
}

/// Sets the `SHA1-Digest` of `entry_path` to the digest of `content`.
///
/// An existing entry keeps its position and every other byte of the
/// manifest. Only the first `*-Digest` attribute of its section is replaced.
/// A missing entry is appended as a new section at the end.
pub fn update_manifest_entry(manifest: &[u8], entry_path: &str, content: &[u8]) -> Result<Vec<u8>> {
    let text = manifest_text(manifest)?;
    let name_line = fold_line(&format!("Name: {entry_path}"));
    let digest_line = format!("SHA1-Digest: {}\r\n", sha1_base64(content));

    let mut updated = String::with_capacity(text.len() + name_line.len() + digest_line.len() + 2);
    match find_line(text, &name_line) {
        Some(name_start) => {
            let digest = find_digest_line(text, name_start + name_line.len())?.ok_or_else(|| {
                RepackError::MalformedManifest(format!("entry {entry_path:?} has no digest line"))
            })?;
            debug!(entry = entry_path, "Replacing digest of existing manifest entry");
            updated.push_str(&text[..digest.start]);
            updated.push_str(&digest_line);
            updated.push_str(&text[digest.end..]);
        }
        None => {
            debug!(entry = entry_path, "Appending new manifest entry");
            updated.push_str(text);
            if !updated.is_empty() && !updated.ends_with("\r\n\r\n") {
                updated.push_str(if updated.ends_with(CRLF) { CRLF } else { "\r\n\r\n" });
            }
            updated.push_str(&name_line);
            updated.push_str(&digest_line);
            updated.push_str(CRLF);
        }
    }
    Ok(updated.into_bytes())
}

/// Builds the `.SF` file for a manifest.
///
/// The header carries the digest of the whole manifest. Then, per named
/// section, the digest of that section's canonical text, see
/// [ManifestEntry::canonical_text].
pub fn create_signature_file(manifest: &[u8]) -> Result<Vec<u8>> {
    let entries = parse_entries(manifest)?;

    let mut output_sig = String::from("Signature-Version: 1.0\r\n");
    output_sig.push_str(&format!("SHA1-Digest-Manifest: {}\r\n\r\n", sha1_base64(manifest)));
    for entry in &entries {
        output_sig.push_str(&fold_line(&format!("Name: {}", entry.name)));
        output_sig.push_str(&format!("SHA1-Digest: {}\r\n\r\n", sha1_base64(entry.canonical_text())));
    }

    info!(entries = entries.len(), "Generated signature file");
    Ok(output_sig.into_bytes())
}

/// Every named section of the manifest, in order. The main section is skipped.
pub fn parse_entries(manifest: &[u8]) -> Result<Vec<ManifestEntry>> {
    let text = manifest_text(manifest)?;
    let mut entries = vec![];
    let mut section: Vec<String> = vec![];

    // A trailing CRLF leaves one empty string at the end, which closes the last section
    for line in text.split(CRLF) {
        if line.is_empty() {
            if let Some(entry) = entry_from_section(std::mem::take(&mut section))? {
                entries.push(entry);
            }
        } else if let Some(continuation) = line.strip_prefix(' ') {
            let previous = section.last_mut().ok_or_else(|| {
                RepackError::MalformedManifest(format!("continuation line without a header: {line:?}"))
            })?;
            previous.push_str(continuation);
        } else {
            section.push(line.to_string());
        }
    }
    if let Some(entry) = entry_from_section(section)? {
        entries.push(entry);
    }
    Ok(entries)
}

fn entry_from_section(lines: Vec<String>) -> Result<Option<ManifestEntry>> {
    let Some(name) = lines.first().and_then(|line| line.strip_prefix("Name: ")) else {
        return Ok(None);
    };
    if lines.len() < 2 {
        return Err(RepackError::MalformedManifest(format!(
            "entry {name:?} has no attributes"
        )));
    }
    let digest = lines[1..].iter().find_map(|line| {
        let (key, value) = line.split_once(": ")?;
        key.ends_with("-Digest").then(|| value.to_string())
    });
    Ok(Some(ManifestEntry {
        name: name.to_string(),
        digest,
        lines
    }))
}

/// Splits a header line into the 70 byte first line and continuation lines,
/// each ending in CRLF.
pub fn fold_line(line: &str) -> String {
    let mut folded = String::with_capacity(line.len() + line.len() / LINE_WIDTH * 3 + 2);
    let mut rest = line;
    let mut limit = LINE_WIDTH;
    loop {
        if rest.len() <= limit {
            folded.push_str(rest);
            folded.push_str(CRLF);
            return folded;
        }
        let mut split = limit;
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        folded.push_str(&rest[..split]);
        folded.push_str("\r\n ");
        rest = &rest[split..];
        // The leading space counts towards the width
        limit = LINE_WIDTH - 1;
    }
}

fn manifest_text(manifest: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(manifest)
        .map_err(|e| RepackError::MalformedManifest(format!("not UTF-8: {e}")))?;
    let bytes = text.as_bytes();
    if let Some(i) = (0..bytes.len()).find(|&i| bytes[i] == b'\n' && (i == 0 || bytes[i - 1] != b'\r')) {
        return Err(RepackError::MalformedManifest(format!(
            "line feed without carriage return at byte {i}"
        )));
    }
    Ok(text)
}

/// Byte offset of `line` when it starts a line of `text`.
fn find_line(text: &str, line: &str) -> Option<usize> {
    text.match_indices(line)
        .map(|(i, _)| i)
        .find(|&i| i == 0 || text[..i].ends_with(CRLF))
}

/// Byte range of the first `*-Digest` attribute in the section whose
/// attributes start at `from`, if the section has one.
fn find_digest_line(text: &str, from: usize) -> Result<Option<Range<usize>>> {
    let mut start = from;
    while start < text.len() && !text[start..].starts_with(CRLF) {
        let end = start + logical_line_len(&text[start..])?;
        let is_digest = text[start..end]
            .split_once(':')
            .is_some_and(|(key, _)| key.ends_with("-Digest"));
        if is_digest {
            return Ok(Some(start..end));
        }
        start = end;
    }
    Ok(None)
}

/// Length of the logical line at the start of `text`, continuation lines and
/// the final CRLF included.
fn logical_line_len(text: &str) -> Result<usize> {
    let line_end = |from: usize| {
        text[from..]
            .find(CRLF)
            .map(|i| from + i + CRLF.len())
            .ok_or_else(|| RepackError::MalformedManifest("unterminated line".into()))
    };
    let mut end = line_end(0)?;
    while text[end..].starts_with(' ') {
        end = line_end(end)?;
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "Manifest-Version: 1.0\r\nCreated-By: 1.0 (Android)\r\n\r\n\
        Name: AndroidManifest.xml\r\nSHA1-Digest: 3SEz9W1CtOgfDdKg8e9RmXVCGCE=\r\n\r\n\
        Name: classes.dex\r\nSHA1-Digest: g1E1HRZi9nLKfPWCLbj4jBQ2Vmo=\r\n\r\n";

    fn digest_line_of(manifest: &str, name: &str) -> String {
        let entries = parse_entries(manifest.as_bytes()).unwrap();
        let entry = entries.into_iter().find(|e| e.name == name).unwrap();
        entry.digest.unwrap()
    }

    #[test]
    fn appends_a_missing_entry() {
        let updated = update_manifest_entry(MANIFEST.as_bytes(), "cpid", b"channel-42").unwrap();
        let expected = format!(
            "{MANIFEST}Name: cpid\r\nSHA1-Digest: {}\r\n\r\n",
            sha1_base64("channel-42")
        );
        assert_eq!(String::from_utf8(updated).unwrap(), expected);
    }

    #[test]
    fn appended_entry_starts_a_new_section() {
        let manifest = "Manifest-Version: 1.0\r\n";
        let updated = update_manifest_entry(manifest.as_bytes(), "cpid", b"x").unwrap();
        let updated = String::from_utf8(updated).unwrap();
        assert!(updated.starts_with("Manifest-Version: 1.0\r\n\r\nName: cpid\r\n"));
        assert_eq!(parse_entries(updated.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn replaces_only_the_digest_line_of_an_existing_entry() {
        let first = update_manifest_entry(MANIFEST.as_bytes(), "cpid", b"old").unwrap();
        let second = update_manifest_entry(&first, "cpid", b"new").unwrap();
        let (first, second) = (String::from_utf8(first).unwrap(), String::from_utf8(second).unwrap());

        assert_eq!(first.len(), second.len());
        let differing: Vec<(&str, &str)> = first
            .split(CRLF)
            .zip(second.split(CRLF))
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(
            differing,
            vec![(
                format!("SHA1-Digest: {}", sha1_base64("old")).as_str(),
                format!("SHA1-Digest: {}", sha1_base64("new")).as_str()
            )]
        );
    }

    #[test]
    fn rewriting_is_idempotent() {
        let once = update_manifest_entry(MANIFEST.as_bytes(), "cpid", b"same").unwrap();
        let twice = update_manifest_entry(&once, "cpid", b"same").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn existing_entry_in_the_middle_keeps_its_place() {
        let manifest = format!(
            "Manifest-Version: 1.0\r\n\r\nName: cpid\r\nSHA1-Digest: AAAA\r\n\r\n\
             Name: classes.dex\r\nSHA1-Digest: BBBB\r\n\r\n"
        );
        let updated = update_manifest_entry(manifest.as_bytes(), "cpid", b"v2").unwrap();
        let updated = String::from_utf8(updated).unwrap();
        assert_eq!(
            updated,
            format!(
                "Manifest-Version: 1.0\r\n\r\nName: cpid\r\nSHA1-Digest: {}\r\n\r\n\
                 Name: classes.dex\r\nSHA1-Digest: BBBB\r\n\r\n",
                sha1_base64("v2")
            )
        );
    }

    #[test]
    fn name_must_start_a_line() {
        // "XName: cpid" is not the cpid entry
        let manifest = "Manifest-Version: 1.0\r\n\r\nName: a\r\nXName: cpid\r\nSHA1-Digest: AAAA\r\n\r\n";
        let updated = update_manifest_entry(manifest.as_bytes(), "cpid", b"v").unwrap();
        let updated = String::from_utf8(updated).unwrap();
        assert!(updated.starts_with(manifest));
    }

    #[test]
    fn bare_line_feeds_are_rejected() {
        let err = update_manifest_entry(b"Manifest-Version: 1.0\n\n", "cpid", b"v").unwrap_err();
        assert!(matches!(err, RepackError::MalformedManifest(_)));
    }

    #[test]
    fn other_attributes_of_the_entry_survive() {
        let manifest = "Manifest-Version: 1.0\r\n\r\n\
            Name: cpid\r\nX-Extra: keep\r\nSHA1-Digest: OLDOLD=\r\n\r\n";
        let updated = update_manifest_entry(manifest.as_bytes(), "cpid", b"channel-42").unwrap();
        let expected = format!(
            "Manifest-Version: 1.0\r\n\r\nName: cpid\r\nX-Extra: keep\r\nSHA1-Digest: {}\r\n\r\n",
            sha1_base64("channel-42")
        );
        assert_eq!(String::from_utf8(updated).unwrap(), expected);
    }

    #[test]
    fn digest_search_stops_at_the_end_of_the_section() {
        let manifest = "Manifest-Version: 1.0\r\n\r\n\
            Name: cpid\r\nX-Extra: keep\r\n\r\n\
            Name: classes.dex\r\nSHA1-Digest: g1E1HRZi9nLKfPWCLbj4jBQ2Vmo=\r\n\r\n";
        let err = update_manifest_entry(manifest.as_bytes(), "cpid", b"v").unwrap_err();
        assert!(matches!(err, RepackError::MalformedManifest(_)));
    }

    #[test]
    fn entry_without_digest_line_is_rejected() {
        let manifest = "Manifest-Version: 1.0\r\n\r\nName: cpid\r\n\r\n";
        let err = update_manifest_entry(manifest.as_bytes(), "cpid", b"v").unwrap_err();
        assert!(matches!(err, RepackError::MalformedManifest(_)));
    }

    #[test]
    fn folds_long_lines_at_seventy_bytes() {
        let name = format!("Name: {}", "a".repeat(150));
        let folded = fold_line(&name);
        let lines: Vec<&str> = folded.trim_end_matches(CRLF).split(CRLF).collect();
        assert_eq!(lines[0].len(), 70);
        assert!(lines[1..].iter().all(|l| l.starts_with(' ') && l.len() <= 70));
        let unfolded: String = lines
            .iter()
            .enumerate()
            .map(|(i, l)| if i == 0 { *l } else { &l[1..] })
            .collect();
        assert_eq!(unfolded, name);
    }

    #[test]
    fn short_lines_are_not_folded() {
        assert_eq!(fold_line("Name: cpid"), "Name: cpid\r\n");
        let exactly = "x".repeat(70);
        assert_eq!(fold_line(&exactly), format!("{exactly}\r\n"));
    }

    #[test]
    fn parses_folded_names() {
        let long_name = format!("res/{}.png", "drawable".repeat(10));
        let manifest = format!(
            "Manifest-Version: 1.0\r\n\r\n{}SHA1-Digest: CCCC\r\n\r\n",
            fold_line(&format!("Name: {long_name}"))
        );
        let entries = parse_entries(manifest.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, long_name);
        assert_eq!(entries[0].digest.as_deref(), Some("CCCC"));
        assert_eq!(
            entries[0].canonical_text(),
            format!("Name: {long_name}\r\nSHA1-Digest: CCCC\r\n\r\n")
        );
    }

    #[test]
    fn signature_file_digests_agree_with_the_manifest() {
        let rewritten = rewrite_manifest(MANIFEST.as_bytes(), "cpid", b"channel-42").unwrap();
        let sf = String::from_utf8(rewritten.signature_file).unwrap();
        let manifest = String::from_utf8(rewritten.manifest).unwrap();

        let header = format!(
            "Signature-Version: 1.0\r\nSHA1-Digest-Manifest: {}\r\n\r\n",
            sha1_base64(&manifest)
        );
        assert!(sf.starts_with(&header));

        // Each .SF section hashes the two lines plus blank line taken from the manifest
        let sf_entries = parse_entries(sf.as_bytes()).unwrap();
        assert_eq!(sf_entries.len(), 3);
        for sf_entry in sf_entries {
            let start = manifest.find(&format!("Name: {}\r\n", sf_entry.name)).unwrap();
            let block_end = start + manifest[start..].find("\r\n\r\n").unwrap() + 4;
            let block = &manifest[start..block_end];
            assert_eq!(sf_entry.digest.unwrap(), sha1_base64(block));
        }
        assert_eq!(digest_line_of(&manifest, "cpid"), sha1_base64("channel-42"));
    }

    #[test]
    fn signature_file_folds_long_names() {
        let long_name = format!("assets/{}", "x".repeat(100));
        let manifest = format!(
            "Manifest-Version: 1.0\r\n\r\n{}SHA1-Digest: DDDD\r\n\r\n",
            fold_line(&format!("Name: {long_name}"))
        );
        let sf = String::from_utf8(create_signature_file(manifest.as_bytes()).unwrap()).unwrap();
        assert!(sf.lines().all(|line| line.trim_end_matches('\r').len() <= LINE_WIDTH));
        let entries = parse_entries(sf.as_bytes()).unwrap();
        assert_eq!(entries[0].name, long_name);
        assert_eq!(
            entries[0].digest.clone().unwrap(),
            sha1_base64(format!("Name: {long_name}\r\nSHA1-Digest: DDDD\r\n\r\n"))
        );
    }
}
