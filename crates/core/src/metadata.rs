//! Map the package document's bibliographic fields onto [`Metadata`].

use crate::document::Metadata;
use crate::package::PackageDocument;

pub fn extract(package: &PackageDocument) -> Metadata {
    let mut metadata = Metadata::default();
    let mut creators = Vec::new();
    let mut contributors = Vec::new();
    let mut identifiers = Vec::new();

    for element in &package.dublin_core {
        let text = element.text.trim();
        if text.is_empty() {
            continue;
        }
        match element.name.as_str() {
            "title" => set_if_empty(&mut metadata.title, text),
            "creator" => creators.push(text.to_string()),
            "contributor" => contributors.push(text.to_string()),
            "publisher" => {
                metadata.publisher.get_or_insert_with(|| text.to_string());
            }
            "description" => {
                metadata.description.get_or_insert_with(|| text.to_string());
            }
            "subject" => metadata.subjects.push(text.to_string()),
            "language" => set_if_empty(&mut metadata.language, text),
            "identifier" => identifiers.push((element.id.as_deref(), text)),
            "date" => set_if_empty(&mut metadata.date, text),
            "rights" => set_if_empty(&mut metadata.rights, text),
            other => {
                metadata
                    .other
                    .entry(other.to_string())
                    .or_insert_with(|| text.to_string());
            }
        }
    }

    if !creators.is_empty() {
        metadata.creator = Some(creators.join(", "));
    }
    if !contributors.is_empty() {
        metadata.contributor = Some(contributors.join(", "));
    }

    // The identifier named by `unique-identifier` wins over the first one.
    let unique = package.unique_identifier.as_deref();
    if let Some((_, text)) = identifiers
        .iter()
        .find(|(id, _)| id.is_some() && *id == unique)
        .or_else(|| identifiers.first())
    {
        metadata.identifier = text.to_string();
    }

    for meta in &package.meta {
        if meta.name.is_empty() || meta.value.trim().is_empty() {
            continue;
        }
        metadata
            .other
            .entry(meta.name.clone())
            .or_insert_with(|| meta.value.trim().to_string());
    }

    metadata
}

fn set_if_empty(field: &mut String, value: &str) {
    if field.is_empty() {
        *field = value.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{DublinCoreElement, MetaElement};
    use pretty_assertions::assert_eq;

    fn dc(name: &str, text: &str) -> DublinCoreElement {
        DublinCoreElement {
            name: name.into(),
            id: None,
            text: text.into(),
        }
    }

    #[test]
    fn test_extract_all_fields() {
        let package = PackageDocument {
            unique_identifier: Some("uid".into()),
            dublin_core: vec![
                dc("title", "Main Title"),
                dc("title", "Subtitle"),
                dc("creator", "A. Author"),
                dc("creator", "B. Author"),
                dc("contributor", "Editor"),
                dc("publisher", "Press"),
                dc("description", "About it."),
                dc("subject", "Fiction"),
                dc("subject", "Adventure"),
                dc("language", "en-GB"),
                dc("identifier", "isbn-first"),
                DublinCoreElement {
                    name: "identifier".into(),
                    id: Some("uid".into()),
                    text: "urn:uuid:abc".into(),
                },
                dc("date", "2020-05-01"),
                dc("rights", "All rights reserved"),
                dc("source", "Print edition"),
            ],
            meta: vec![MetaElement {
                name: "calibre:series".into(),
                value: "Saga".into(),
            }],
            ..PackageDocument::default()
        };

        let metadata = extract(&package);
        assert_eq!(metadata.title, "Main Title");
        assert_eq!(metadata.creator.as_deref(), Some("A. Author, B. Author"));
        assert_eq!(metadata.contributor.as_deref(), Some("Editor"));
        assert_eq!(metadata.publisher.as_deref(), Some("Press"));
        assert_eq!(metadata.description.as_deref(), Some("About it."));
        assert_eq!(metadata.subjects, vec!["Fiction", "Adventure"]);
        assert_eq!(metadata.language, "en-GB");
        assert_eq!(metadata.identifier, "urn:uuid:abc");
        assert_eq!(metadata.date, "2020-05-01");
        assert_eq!(metadata.rights, "All rights reserved");
        assert_eq!(metadata.other.get("source").map(String::as_str), Some("Print edition"));
        assert_eq!(metadata.other.get("calibre:series").map(String::as_str), Some("Saga"));
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let metadata = extract(&PackageDocument::default());
        assert_eq!(metadata, Metadata::default());
        assert!(metadata.creator.is_none());
        assert!(metadata.subjects.is_empty());
    }

    #[test]
    fn test_first_identifier_without_unique_id() {
        let package = PackageDocument {
            dublin_core: vec![dc("identifier", "first"), dc("identifier", "second"), dc("title", "  ")],
            ..PackageDocument::default()
        };
        let metadata = extract(&package);
        assert_eq!(metadata.identifier, "first");
        assert_eq!(metadata.title, "");
    }
}
