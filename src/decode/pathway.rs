use crate::decode::{
    FirstText, Schema, UNKNOWN, XmlEvent, attribute, is_path, relative, starts_with, walk_xml,
};
use crate::error::EnrichError;
use crate::records::PathwayRecord;

pub const BIOSYSTEM_SCHEMA: Schema = Schema {
    name: "biosystem",
    version: 1,
};

pub const SUMMARY_SCHEMA: Schema = Schema {
    name: "esummary",
    version: 1,
};

const DEFAULT_ROLE: &str = "Member";

const BIOSYSTEM: &str = "Biosystem";
const SYSTEM_ID: &[&str] = &["System_id"];
const SYSTEM_NAME: &[&str] = &["System_name"];
const SYSTEM_SOURCE: &[&str] = &["System_source", "BioSource", "BioSource_name"];
const GENE_ROLE: &[&str] = &[
    "System_ent",
    "System-ent_genes",
    "System-links_db-memberships",
    "System-links_db-memberships_value",
];

const DOCSUM: &str = "DocSum";
const DOCSUM_ID: &[&str] = &["Id"];
const DOCSUM_ITEM: &[&str] = &["Item"];

#[derive(Default)]
struct BiosystemBuilder {
    id: FirstText,
    name: FirstText,
    source: FirstText,
    role: FirstText,
}

impl BiosystemBuilder {
    fn field_for(&mut self, rel: &[String]) -> Option<&mut FirstText> {
        if starts_with(rel, SYSTEM_ID) {
            Some(&mut self.id)
        } else if starts_with(rel, SYSTEM_NAME) {
            Some(&mut self.name)
        } else if is_path(rel, SYSTEM_SOURCE) {
            Some(&mut self.source)
        } else if is_path(rel, GENE_ROLE) {
            Some(&mut self.role)
        } else {
            None
        }
    }

    fn finish(self) -> PathwayRecord {
        PathwayRecord {
            pathway_id: self.id.or_unknown(),
            name: self.name.or_unknown(),
            source: self.source.or_unknown(),
            gene_role: self.role.value().unwrap_or_else(|| DEFAULT_ROLE.to_string()),
        }
    }
}

/// Decodes BioSystems records (esearch -db biosystems | elink | efetch).
pub fn decode_biosystems(xml: &[u8]) -> Result<Vec<PathwayRecord>, EnrichError> {
    let mut records = Vec::new();
    let mut current: Option<BiosystemBuilder> = None;

    walk_xml(BIOSYSTEM_SCHEMA, xml, |event| match event {
        XmlEvent::Open { path, .. } => {
            if path.last().is_some_and(|name| name == BIOSYSTEM) {
                current = Some(BiosystemBuilder::default());
            }
        }
        XmlEvent::Text { path, text } => {
            if let (Some(system), Some(rel)) = (current.as_mut(), relative(path, BIOSYSTEM)) {
                if let Some(field) = system.field_for(rel) {
                    field.push(text);
                }
            }
        }
        XmlEvent::Close { path } => {
            if path.last().is_some_and(|name| name == BIOSYSTEM) {
                if let Some(system) = current.take() {
                    records.push(system.finish());
                }
                return;
            }
            let (Some(system), Some(rel)) = (current.as_mut(), relative(path, BIOSYSTEM)) else {
                return;
            };
            // System_id and System_name may wrap Object-id children; only the
            // owning element ends the field.
            let owns_field = [SYSTEM_ID, SYSTEM_NAME, SYSTEM_SOURCE, GENE_ROLE]
                .iter()
                .any(|expected| is_path(rel, expected));
            if owns_field {
                if let Some(field) = system.field_for(rel) {
                    field.close();
                }
            }
        }
    })?;

    Ok(records)
}

#[derive(Default)]
struct SummaryBuilder {
    id: FirstText,
    name: FirstText,
    source: FirstText,
    item: Option<String>,
}

/// Decodes an `eSummaryResult` of linked pathway records; every `DocSum`
/// becomes one record with role `Member`.
pub fn decode_pathway_summaries(xml: &[u8]) -> Result<Vec<PathwayRecord>, EnrichError> {
    let mut records = Vec::new();
    let mut current: Option<SummaryBuilder> = None;

    walk_xml(SUMMARY_SCHEMA, xml, |event| match event {
        XmlEvent::Open { path, attributes } => {
            if path.last().is_some_and(|name| name == DOCSUM) {
                current = Some(SummaryBuilder::default());
                return;
            }
            if let (Some(summary), Some(rel)) = (current.as_mut(), relative(path, DOCSUM)) {
                if is_path(rel, DOCSUM_ITEM) {
                    summary.item = attribute(attributes, "Name").map(str::to_string);
                }
            }
        }
        XmlEvent::Text { path, text } => {
            let (Some(summary), Some(rel)) = (current.as_mut(), relative(path, DOCSUM)) else {
                return;
            };
            if is_path(rel, DOCSUM_ID) {
                summary.id.push(text);
            } else if is_path(rel, DOCSUM_ITEM) {
                match summary.item.as_deref() {
                    Some("Full_name_E") => summary.name.push(text),
                    Some("Source") => summary.source.push(text),
                    _ => {}
                }
            }
        }
        XmlEvent::Close { path } => {
            if path.last().is_some_and(|name| name == DOCSUM) {
                if let Some(summary) = current.take() {
                    records.push(PathwayRecord {
                        pathway_id: summary.id.or_unknown(),
                        name: summary.name.or_unknown(),
                        source: summary.source.or_unknown(),
                        gene_role: DEFAULT_ROLE.to_string(),
                    });
                }
                return;
            }
            let (Some(summary), Some(rel)) = (current.as_mut(), relative(path, DOCSUM)) else {
                return;
            };
            if is_path(rel, DOCSUM_ID) {
                summary.id.close();
            } else if is_path(rel, DOCSUM_ITEM) {
                match summary.item.take().as_deref() {
                    Some("Full_name_E") => summary.name.close(),
                    Some("Source") => summary.source.close(),
                    _ => {}
                }
            }
        }
    })?;

    Ok(records)
}
