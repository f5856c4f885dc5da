//! The ZIP container behind an EPUB, loaded into memory with limits applied.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use crate::error::ParseError;
use crate::resolve::ResourceLookup;
use crate::security::{self, SecurityLimits};

/// Every file entry of an EPUB, keyed by its entry name.
#[derive(Debug, Clone, Default)]
pub struct ArchiveContainer {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveContainer {
    /// Read every file entry. Container-level violations (not a ZIP, too many
    /// entries, oversized or bomb entries) are fatal. Entries with escaping
    /// names or unreadable data are skipped.
    pub fn open<R: Read + Seek>(input: R, limits: &SecurityLimits) -> Result<Self, ParseError> {
        let mut archive = zip::ZipArchive::new(input)
            .map_err(|e| ParseError::InvalidArchive(e.to_string()))?;

        security::check_file_count(archive.len() as u64, limits)?;

        let mut entries = BTreeMap::new();
        let mut total: u64 = 0;
        for i in 0..archive.len() {
            let mut file = match archive.by_index(i) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("Skipping unreadable archive entry #{}: {}", i, e);
                    continue;
                }
            };
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            if let Err(e) = security::check_entry_name(&name) {
                tracing::warn!("Skipping archive entry: {}", e);
                continue;
            }
            security::check_resource_size(&name, file.size(), limits)?;
            security::check_compression_ratio(&name, file.compressed_size(), file.size(), limits)?;

            let mut data = Vec::with_capacity(file.size() as usize);
            let read = file
                .by_ref()
                .take(limits.max_resource_size_bytes.saturating_add(1))
                .read_to_end(&mut data);
            if let Err(e) = read {
                tracing::warn!("Skipping archive entry {}: {}", name, e);
                continue;
            }
            // Declared sizes can lie.
            security::check_resource_size(&name, data.len() as u64, limits)?;
            total = total.saturating_add(data.len() as u64);
            security::check_total_size(total, limits)?;

            entries.insert(name, data);
        }

        tracing::debug!("Loaded {} archive entries ({} bytes)", entries.len(), total);
        Ok(Self { entries })
    }

    /// Build a container from already-extracted entries.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn read(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Entry decoded as text, `None` when missing or binary.
    pub fn read_text(&self, name: &str) -> Option<String> {
        self.read(name).and_then(decode_text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceLookup for ArchiveContainer {
    fn find(&self, path: &str) -> Option<(&str, &[u8])> {
        self.entries.find(path)
    }

    fn paths(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        self.entries.paths()
    }
}

/// Entry decoded as text. A byte order mark wins, then strict UTF-8, then
/// the encoding named by the `<?xml encoding?>` declaration, then
/// Windows-1252. Data that decodes to NUL characters is binary and yields
/// `None`.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    let text = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => encoding.decode_without_bom_handling(&bytes[bom_len..]).0,
        None => match UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
            Some(text) => text,
            None => {
                let encoding = declared_encoding(bytes).unwrap_or(WINDOWS_1252);
                tracing::debug!("Entry is not UTF-8, decoding as {}", encoding.name());
                encoding.decode_without_bom_handling(bytes).0
            }
        },
    };
    if text.contains('\0') {
        tracing::debug!("Entry is binary, not text");
        return None;
    }
    Some(text.into_owned())
}

/// Encoding named in the XML declaration at the start of `bytes`. A UTF-16
/// label on ASCII-readable bytes is wrong, so it maps to UTF-8.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(128)];
    let start = head.windows(5).position(|w| w == b"<?xml")?;
    let declaration = &head[start..];
    let declaration = &declaration[..declaration.windows(2).position(|w| w == b"?>")?];

    let at = declaration
        .windows(8)
        .position(|w| w.eq_ignore_ascii_case(b"encoding"))?;
    let rest = skip_space(&declaration[at + 8..]);
    let rest = skip_space(rest.strip_prefix(b"=")?);
    let (&quote, rest) = rest.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let label = &rest[..rest.iter().position(|&b| b == quote)?];
    Encoding::for_label(label).map(Encoding::output_encoding)
}

fn skip_space(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    &bytes[start..]
}
