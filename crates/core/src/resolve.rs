//! Resource resolution: turn an `src`/`href` found in content into archive bytes.
//!
//! Lookup order for a relative reference:
//! 1. the reference normalized against the referring document's path
//! 2. the bare file name
//! 3. the file name under each of [`IMAGE_DIRECTORIES`]
//! 4. any entry whose path ends with `/<file name>` (shortest path wins)
//!
//! Data URIs are decoded inline and never touch the manifest. Absolute paths
//! and remote URLs never resolve. Nothing in here panics or errors; failure
//! is always `None`.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use percent_encoding::percent_decode_str;

/// Conventional image folders tried when a reference misses.
pub const IMAGE_DIRECTORIES: [&str; 6] = ["images/", "Images/", "image/", "Image/", "img/", "Img/"];

/// Read access to a set of named resources (archive entries or a chapter's
/// resource map).
pub trait ResourceLookup {
    /// Exact lookup, returning the stored key alongside the bytes.
    fn find(&self, path: &str) -> Option<(&str, &[u8])>;

    /// Every key in the lookup.
    fn paths(&self) -> Box<dyn Iterator<Item = &str> + '_>;

    fn bytes(&self, path: &str) -> Option<&[u8]> {
        self.find(path).map(|(_, data)| data)
    }

    fn contains(&self, path: &str) -> bool {
        self.find(path).is_some()
    }
}

impl ResourceLookup for HashMap<String, Vec<u8>> {
    fn find(&self, path: &str) -> Option<(&str, &[u8])> {
        self.get_key_value(path)
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    fn paths(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.keys().map(String::as_str))
    }
}

impl ResourceLookup for BTreeMap<String, Vec<u8>> {
    fn find(&self, path: &str) -> Option<(&str, &[u8])> {
        self.get_key_value(path)
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    fn paths(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.keys().map(String::as_str))
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<'a> {
    /// Decoded from a data URI.
    Inline(Vec<u8>),
    /// Found in the lookup under `path`.
    Entry { path: &'a str, data: &'a [u8] },
}

impl<'a> Resolved<'a> {
    /// Lookup key the bytes were found under, if any.
    pub fn path(&self) -> Option<&'a str> {
        match self {
            Resolved::Inline(_) => None,
            Resolved::Entry { path, .. } => Some(path),
        }
    }

    pub fn into_bytes(self) -> Cow<'a, [u8]> {
        match self {
            Resolved::Inline(data) => Cow::Owned(data),
            Resolved::Entry { data, .. } => Cow::Borrowed(data),
        }
    }
}

/// Resolve `reference` as seen from the document at `base_path`.
pub fn resolve<'a, L>(base_path: &str, reference: &str, manifest: &'a L) -> Option<Cow<'a, [u8]>>
where
    L: ResourceLookup + ?Sized,
{
    locate(base_path, reference, manifest).map(Resolved::into_bytes)
}

/// Like [`resolve`], but also reports which lookup key matched.
pub fn locate<'a, L>(base_path: &str, reference: &str, manifest: &'a L) -> Option<Resolved<'a>>
where
    L: ResourceLookup + ?Sized,
{
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    if is_data_uri(reference) {
        return decode_data_uri(reference).map(Resolved::Inline);
    }
    if reference.starts_with('/') || is_remote(reference) {
        tracing::debug!("Not resolvable locally: {}", reference);
        return None;
    }

    let normalized = normalize_path(base_path, reference);
    if let Some(found) = lookup(manifest, &normalized) {
        return Some(found);
    }

    let file_name = file_name(&normalized);
    if file_name.is_empty() {
        return None;
    }
    if let Some(found) = lookup(manifest, file_name) {
        tracing::debug!("Resolved {} by file name", reference);
        return Some(found);
    }
    for dir in IMAGE_DIRECTORIES {
        if let Some(found) = lookup(manifest, &format!("{dir}{file_name}")) {
            tracing::debug!("Resolved {} under {}", reference, dir);
            return Some(found);
        }
    }

    let suffix = format!("/{file_name}");
    let candidate = manifest
        .paths()
        .filter(|path| path.ends_with(&suffix))
        .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    if let Some(found) = candidate.and_then(|path| lookup(manifest, path)) {
        tracing::debug!("Resolved {} by suffix scan", reference);
        return Some(found);
    }

    tracing::debug!("Unresolved reference {} from {}", reference, base_path);
    None
}

fn lookup<'a, L>(manifest: &'a L, path: &str) -> Option<Resolved<'a>>
where
    L: ResourceLookup + ?Sized,
{
    manifest
        .find(path)
        .map(|(path, data)| Resolved::Entry { path, data })
}

/// Normalize `reference` against the document at `base_path`.
///
/// The last component of `base_path` is dropped when it contains a dot (it
/// names a file); otherwise the whole path is taken as a directory. `..`
/// pops one base component and clamps at the archive root. Fragments,
/// queries, and percent-encoding are removed.
pub fn normalize_path(base_path: &str, reference: &str) -> String {
    let decoded = percent_decode_str(strip_fragment(reference)).decode_utf8_lossy();

    let mut parts: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.last().is_some_and(|last| last.contains('.')) {
        parts.pop();
    }
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Drop any `#fragment` or `?query` suffix.
pub fn strip_fragment(href: &str) -> &str {
    match href.find(['#', '?']) {
        Some(i) => &href[..i],
        None => href,
    }
}

/// Final path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn is_data_uri(reference: &str) -> bool {
    reference
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

/// `scheme:` prefix such as `http:`, `mailto:`, or `urn:`. Single letters are
/// not schemes.
fn is_remote(reference: &str) -> bool {
    let Some(colon) = reference.find(':') else {
        return false;
    };
    let scheme = &reference[..colon];
    scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Decode `data:[<media type>][;base64],<payload>`.
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let (header, payload) = uri.get(5..)?.split_once(',')?;
    if header.to_ascii_lowercase().ends_with(";base64") {
        let cleaned: String = percent_decode_str(payload)
            .decode_utf8_lossy()
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        STANDARD
            .decode(&cleaned)
            .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
            .map_err(|e| tracing::debug!("Invalid base64 data URI: {}", e))
            .ok()
    } else {
        Some(percent_decode_str(payload).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn manifest(paths: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        paths
            .iter()
            .map(|(p, d)| (p.to_string(), d.to_vec()))
            .collect()
    }

    /// Counts every lookup so tests can assert the manifest was never consulted.
    struct CountingLookup {
        inner: BTreeMap<String, Vec<u8>>,
        hits: Cell<usize>,
    }

    impl ResourceLookup for CountingLookup {
        fn find(&self, path: &str) -> Option<(&str, &[u8])> {
            self.hits.set(self.hits.get() + 1);
            self.inner.find(path)
        }

        fn paths(&self) -> Box<dyn Iterator<Item = &str> + '_> {
            self.hits.set(self.hits.get() + 1);
            self.inner.paths()
        }
    }

    #[test]
    fn test_normalize_relative_to_file() {
        assert_eq!(normalize_path("OEBPS/Text/ch1.xhtml", "../Images/a.png"), "OEBPS/Images/a.png");
        assert_eq!(normalize_path("OEBPS/Text/ch1.xhtml", "b.png"), "OEBPS/Text/b.png");
        assert_eq!(normalize_path("OEBPS/Text/ch1.xhtml", "./sub/c.png"), "OEBPS/Text/sub/c.png");
    }

    #[test]
    fn test_normalize_base_without_dot_is_directory() {
        assert_eq!(normalize_path("OEBPS/Text", "a.png"), "OEBPS/Text/a.png");
        assert_eq!(normalize_path("", "a.png"), "a.png");
    }

    #[test]
    fn test_normalize_excess_parent_segments_clamp_at_root() {
        assert_eq!(normalize_path("OEBPS/ch1.xhtml", "../../../x/pic.png"), "x/pic.png");
        assert_eq!(normalize_path("", "../pic.png"), "pic.png");
    }

    #[test]
    fn test_normalize_strips_fragment_and_percent_encoding() {
        assert_eq!(normalize_path("OEBPS/toc.ncx", "Text/My%20Chapter.xhtml#sec2"), "OEBPS/Text/My Chapter.xhtml");
        assert_eq!(normalize_path("a.xhtml", "b.xhtml?x=1"), "b.xhtml");
    }

    #[test]
    fn test_resolve_direct_hit() {
        let m = manifest(&[("OEBPS/Images/a.png", b"A")]);
        let data = resolve("OEBPS/Text/ch1.xhtml", "../Images/a.png", &m).unwrap();
        assert_eq!(&*data, b"A");
    }

    #[test]
    fn test_resolve_falls_back_to_image_directory() {
        let m = manifest(&[("images/pic.png", b"PIC")]);
        let found = locate("chapter.xhtml", "img/pic.png", &m).unwrap();
        assert_eq!(found.path(), Some("images/pic.png"));
        assert_eq!(&*found.into_bytes(), b"PIC");
    }

    #[test]
    fn test_resolve_falls_back_to_file_name() {
        let m = manifest(&[("pic.png", b"ROOT"), ("images/pic.png", b"DIR")]);
        let found = locate("OEBPS/Text/ch1.xhtml", "../art/pic.png", &m).unwrap();
        assert_eq!(found.path(), Some("pic.png"));
    }

    #[test]
    fn test_resolve_falls_back_to_suffix_scan() {
        let m = manifest(&[
            ("OEBPS/assets/deep/pic.png", b"DEEP"),
            ("OEBPS/assets/pic.png", b"SHALLOW"),
            ("OEBPS/assets/mypic.png", b"OTHER"),
        ]);
        let found = locate("OEBPS/Text/ch1.xhtml", "missing/pic.png", &m).unwrap();
        assert_eq!(found.path(), Some("OEBPS/assets/pic.png"));
    }

    #[test]
    fn test_resolve_miss_is_none() {
        let m = manifest(&[("OEBPS/a.png", b"A")]);
        assert!(resolve("OEBPS/ch1.xhtml", "nothing.png", &m).is_none());
        assert!(resolve("OEBPS/ch1.xhtml", "", &m).is_none());
    }

    #[test]
    fn test_absolute_and_remote_references_do_not_resolve() {
        let m = manifest(&[("pic.png", b"A"), ("OEBPS/pic.png", b"B")]);
        assert!(resolve("OEBPS/ch1.xhtml", "/pic.png", &m).is_none());
        assert!(resolve("OEBPS/ch1.xhtml", "https://example.com/pic.png", &m).is_none());
        assert!(resolve("OEBPS/ch1.xhtml", "mailto:someone@example.com", &m).is_none());
    }

    #[test]
    fn test_data_uri_base64() {
        let m = manifest(&[]);
        let data = resolve("x.xhtml", "data:image/png;base64,SGVsbG8=", &m).unwrap();
        assert_eq!(&*data, b"Hello");
        let unpadded = resolve("x.xhtml", "data:image/png;base64,SGVsbG8", &m).unwrap();
        assert_eq!(&*unpadded, b"Hello");
    }

    #[test]
    fn test_data_uri_plain_payload() {
        assert_eq!(decode_data_uri("data:text/plain,a%20b").unwrap(), b"a b");
        assert_eq!(decode_data_uri("data:,x").unwrap(), b"x");
        assert!(decode_data_uri("data:image/png;base64").is_none());
        assert!(decode_data_uri("data:image/png;base64,!!!").is_none());
    }

    #[test]
    fn test_data_uri_never_consults_manifest() {
        let lookup = CountingLookup {
            inner: manifest(&[("SGVsbG8=", b"wrong")]),
            hits: Cell::new(0),
        };
        let data = resolve("x.xhtml", "DATA:image/png;base64,SGVsbG8=", &lookup).unwrap();
        assert_eq!(&*data, b"Hello");
        assert_eq!(lookup.hits.get(), 0);

        assert!(resolve("x.xhtml", "data:image/png;base64,@@", &lookup).is_none());
        assert_eq!(lookup.hits.get(), 0);
    }

    #[test]
    fn test_hashmap_lookup() {
        let mut m: HashMap<String, Vec<u8>> = HashMap::new();
        m.insert("Images/p.jpg".into(), vec![1, 2]);
        let found = locate("", "p.jpg", &m).unwrap();
        assert_eq!(found.path(), Some("Images/p.jpg"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn resolve_never_panics(base in ".{0,40}", reference in ".{0,60}") {
                let m = manifest(&[("OEBPS/images/a.png", b"A"), ("b.png", b"B")]);
                let _ = resolve(&base, &reference, &m);
            }

            #[test]
            fn resolve_is_idempotent(
                base in "[a-zA-Z./]{0,30}",
                reference in "(\\.\\./){0,6}[a-zA-Z./]{0,20}",
            ) {
                let m = manifest(&[
                    ("OEBPS/images/a.png", b"A"),
                    ("OEBPS/Text/b.png", b"B"),
                    ("c.png", b"C"),
                ]);
                let first = resolve(&base, &reference, &m).map(|c| c.into_owned());
                let second = resolve(&base, &reference, &m).map(|c| c.into_owned());
                prop_assert_eq!(first, second);
            }

            #[test]
            fn data_uris_decode_deterministically(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                let uri = format!("data:application/octet-stream;base64,{}", STANDARD.encode(&bytes));
                let m = manifest(&[]);
                let first = resolve("ch.xhtml", &uri, &m).map(|c| c.into_owned());
                let second = resolve("other/ch.xhtml", &uri, &m).map(|c| c.into_owned());
                prop_assert_eq!(first.as_deref(), Some(bytes.as_slice()));
                prop_assert_eq!(first, second);
            }
        }
    }
}
