//! Schema-specific decoders for sanitized E-utilities XML.
//!
//! Every decoder walks the document once with [`walk_xml`] and projects a
//! fixed set of element paths into flat records. The path table of each
//! decoder is versioned through its [`Schema`]; changing which path feeds
//! which column requires a version bump.

use std::fmt;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Serialize;

use crate::error::EnrichError;

pub mod gene;
pub mod insight;
pub mod pathway;
pub mod protein;

pub use gene::decode_gene_records;
pub use insight::{decode_go_terms, decode_pubmed_articles};
pub use pathway::{decode_biosystems, decode_pathway_summaries};
pub use protein::{decode_protein_records, parse_fasta_sequence};

/// Placeholder written for fields absent from an otherwise valid record.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub name: &'static str,
    pub version: u32,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/v{}", self.name, self.version)
    }
}

pub(crate) enum XmlEvent<'a> {
    Open {
        path: &'a [String],
        attributes: &'a [(String, String)],
    },
    Text {
        path: &'a [String],
        text: &'a str,
    },
    Close {
        path: &'a [String],
    },
}

/// Streams `xml` and reports every element open/close and text node together
/// with the full element path. Several concatenated documents are accepted;
/// text outside any element and truncated documents are errors.
pub(crate) fn walk_xml<F>(schema: Schema, xml: &[u8], mut visit: F) -> Result<(), EnrichError>
where
    F: FnMut(XmlEvent<'_>),
{
    let malformed = |message: String| EnrichError::Decode {
        schema: schema.name,
        message,
    };

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().expand_empty_elements = true;
    reader.config_mut().check_end_names = true;

    let mut path: Vec<String> = Vec::new();
    let mut attributes: Vec<(String, String)> = Vec::new();
    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf).map_err(|err| {
            malformed(format!(
                "{err} at byte {}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(start) => {
                path.push(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                attributes.clear();
                for attr in start.attributes() {
                    let attr = attr.map_err(|err| malformed(err.to_string()))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| malformed(err.to_string()))?;
                    attributes.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        value.into_owned(),
                    ));
                }
                visit(XmlEvent::Open {
                    path: &path,
                    attributes: &attributes,
                });
            }
            Event::End(_) => {
                visit(XmlEvent::Close { path: &path });
                path.pop();
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|err| malformed(err.to_string()))?;
                if path.is_empty() {
                    if !text.trim().is_empty() {
                        return Err(malformed(format!(
                            "text outside of any element: {:?}",
                            truncate(&text, 80)
                        )));
                    }
                    continue;
                }
                visit(XmlEvent::Text { path: &path, text: &text });
            }
            Event::CData(data) => {
                if path.is_empty() {
                    return Err(malformed("CDATA outside of any element".to_string()));
                }
                let inner = data.into_inner();
                let text = String::from_utf8_lossy(&inner);
                visit(XmlEvent::Text { path: &path, text: &text });
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = path.last() {
        return Err(malformed(format!("document ends inside <{open}>")));
    }
    Ok(())
}

/// Path below the innermost `root` element, or `None` outside of it.
pub(crate) fn relative<'p>(path: &'p [String], root: &str) -> Option<&'p [String]> {
    path.iter()
        .rposition(|name| name == root)
        .map(|pos| &path[pos + 1..])
}

pub(crate) fn is_path(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

pub(crate) fn starts_with(path: &[String], prefix: &[&str]) -> bool {
    path.len() >= prefix.len() && path.iter().zip(prefix).all(|(a, b)| a == b)
}

pub(crate) fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Collapses runs of whitespace (tabs and newlines included) to one space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Text of the first occurrence of an element; later occurrences are ignored.
#[derive(Debug, Default)]
pub(crate) struct FirstText {
    buf: Option<String>,
    done: bool,
}

impl FirstText {
    pub(crate) fn push(&mut self, text: &str) {
        if !self.done {
            self.buf.get_or_insert_with(String::new).push_str(text);
        }
    }

    pub(crate) fn close(&mut self) {
        if self.buf.is_some() {
            self.done = true;
        }
    }

    pub(crate) fn value(&self) -> Option<String> {
        self.buf
            .as_deref()
            .map(normalize_text)
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn or_unknown(&self) -> String {
        self.value().unwrap_or_else(|| UNKNOWN.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TEST: Schema = Schema {
        name: "test",
        version: 1,
    };

    fn texts(xml: &str) -> Result<Vec<(String, String)>, EnrichError> {
        let mut out = Vec::new();
        walk_xml(TEST, xml.as_bytes(), |event| {
            if let XmlEvent::Text { path, text } = event {
                if !text.trim().is_empty() {
                    out.push((path.join("/"), text.to_string()));
                }
            }
        })?;
        Ok(out)
    }

    #[test]
    fn reports_paths_and_unescaped_text() {
        let out = texts("<a><b>x &amp; y</b><c/><d><![CDATA[<z>]]></d></a>").unwrap();
        assert_eq!(
            out,
            vec![
                ("a/b".to_string(), "x & y".to_string()),
                ("a/d".to_string(), "<z>".to_string()),
            ]
        );
    }

    #[test]
    fn accepts_concatenated_documents() {
        let xml = "<?xml version=\"1.0\"?>\n<a><b>1</b></a>\n<?xml version=\"1.0\"?>\n<a><b>2</b></a>\n";
        assert_eq!(texts(xml).unwrap().len(), 2);
    }

    #[test]
    fn empty_body_is_empty_document() {
        assert!(texts("").unwrap().is_empty());
        assert!(texts("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn rejects_truncated_document() {
        let err = texts("<a><b>1</b>").unwrap_err();
        assert_matches!(err, EnrichError::Decode { .. });
    }

    #[test]
    fn rejects_plain_text_payload() {
        let err = texts("ERROR: query failed").unwrap_err();
        assert_matches!(err, EnrichError::Decode { .. });
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(texts("<a><b></a></b>").is_err());
    }

    #[test]
    fn rejects_bare_ampersand() {
        assert!(texts("<a>x & y</a>").is_err());
    }

    #[test]
    fn first_text_ignores_later_occurrences() {
        let mut field = FirstText::default();
        field.push("  first\n value ");
        field.close();
        field.push("second");
        assert_eq!(field.value().as_deref(), Some("first value"));
        assert_eq!(FirstText::default().or_unknown(), UNKNOWN);
    }
}
