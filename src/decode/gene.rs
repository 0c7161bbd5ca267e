use crate::decode::{
    FirstText, Schema, UNKNOWN, XmlEvent, attribute, is_path, relative, starts_with, walk_xml,
};
use crate::error::EnrichError;
use crate::records::GeneRecord;

pub const SCHEMA: Schema = Schema {
    name: "entrezgene",
    version: 1,
};

const RECORD: &str = "Entrezgene";
const GENE_ID: &[&str] = &["Entrezgene_track", "Gene-track", "Gene-track_geneid"];
const SYMBOL: &[&str] = &["Entrezgene_gene", "Gene-ref", "Gene-ref_locus"];
const DESCRIPTION: &[&str] = &["Entrezgene_gene", "Gene-ref", "Gene-ref_desc"];
const MAP_LOCATION: &[&str] = &[
    "Entrezgene_gene",
    "Gene-ref",
    "Gene-ref_maploc",
    "Maps",
    "Maps_display-str",
];
const SUBSOURCE: &[&str] = &[
    "Entrezgene_source",
    "BioSource",
    "BioSource_subtype",
    "SubSource",
];

#[derive(Default)]
struct GeneBuilder {
    gene_id: FirstText,
    symbol: FirstText,
    description: FirstText,
    map_location: FirstText,
    chromosome: Option<String>,
    subsource: Option<SubSourceBuilder>,
}

#[derive(Default)]
struct SubSourceBuilder {
    subtype: Option<String>,
    subtype_text: String,
    name: FirstText,
}

impl SubSourceBuilder {
    fn is_chromosome(&self) -> bool {
        match &self.subtype {
            Some(value) => value == "chromosome",
            None => self.subtype_text.trim() == "chromosome",
        }
    }
}

impl GeneBuilder {
    fn finish(self) -> GeneRecord {
        GeneRecord {
            gene_id: self.gene_id.or_unknown(),
            symbol: self.symbol.or_unknown(),
            description: self.description.or_unknown(),
            chromosome: self
                .chromosome
                .unwrap_or_else(|| UNKNOWN.to_string()),
            map_location: self.map_location.or_unknown(),
        }
    }
}

/// Decodes an `Entrezgene-Set` (efetch -db gene -format xml) into one record
/// per `Entrezgene`.
pub fn decode_gene_records(xml: &[u8]) -> Result<Vec<GeneRecord>, EnrichError> {
    let mut records = Vec::new();
    let mut current: Option<GeneBuilder> = None;

    walk_xml(SCHEMA, xml, |event| match event {
        XmlEvent::Open { path, attributes } => {
            if path.last().is_some_and(|name| name == RECORD) {
                current = Some(GeneBuilder::default());
                return;
            }
            let (Some(gene), Some(rel)) = (current.as_mut(), relative(path, RECORD)) else {
                return;
            };
            if is_path(rel, SUBSOURCE) {
                gene.subsource = Some(SubSourceBuilder::default());
            } else if rel.len() == SUBSOURCE.len() + 1
                && starts_with(rel, SUBSOURCE)
                && rel[SUBSOURCE.len()] == "SubSource_subtype"
            {
                if let (Some(sub), Some(value)) =
                    (gene.subsource.as_mut(), attribute(attributes, "value"))
                {
                    sub.subtype = Some(value.to_string());
                }
            }
        }
        XmlEvent::Text { path, text } => {
            let (Some(gene), Some(rel)) = (current.as_mut(), relative(path, RECORD)) else {
                return;
            };
            if is_path(rel, GENE_ID) {
                gene.gene_id.push(text);
            } else if is_path(rel, SYMBOL) {
                gene.symbol.push(text);
            } else if is_path(rel, DESCRIPTION) {
                gene.description.push(text);
            } else if is_path(rel, MAP_LOCATION) {
                gene.map_location.push(text);
            } else if let Some(sub) = gene.subsource.as_mut() {
                if rel.len() == SUBSOURCE.len() + 1 && starts_with(rel, SUBSOURCE) {
                    match rel[SUBSOURCE.len()].as_str() {
                        "SubSource_subtype" => sub.subtype_text.push_str(text),
                        "SubSource_name" => sub.name.push(text),
                        _ => {}
                    }
                }
            }
        }
        XmlEvent::Close { path } => {
            if path.last().is_some_and(|name| name == RECORD) {
                if let Some(gene) = current.take() {
                    records.push(gene.finish());
                }
                return;
            }
            let (Some(gene), Some(rel)) = (current.as_mut(), relative(path, RECORD)) else {
                return;
            };
            if is_path(rel, GENE_ID) {
                gene.gene_id.close();
            } else if is_path(rel, SYMBOL) {
                gene.symbol.close();
            } else if is_path(rel, DESCRIPTION) {
                gene.description.close();
            } else if is_path(rel, MAP_LOCATION) {
                gene.map_location.close();
            } else if is_path(rel, SUBSOURCE) {
                if let Some(sub) = gene.subsource.take() {
                    if gene.chromosome.is_none() && sub.is_chromosome() {
                        gene.chromosome = sub.name.value();
                    }
                }
            }
        }
    })?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IL6: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE Entrezgene-Set PUBLIC "-//NCBI//NCBI Entrezgene/EN" "https://www.ncbi.nlm.nih.gov/data_specs/dtd/NCBI_Entrezgene.dtd">
<Entrezgene-Set>
  <Entrezgene>
    <Entrezgene_track-info>
      <Gene-track>
        <Gene-track_geneid>3569</Gene-track_geneid>
        <Gene-track_status value="live">0</Gene-track_status>
      </Gene-track>
    </Entrezgene_track-info>
    <Entrezgene_track>
      <Gene-track>
        <Gene-track_geneid>3569</Gene-track_geneid>
      </Gene-track>
    </Entrezgene_track>
    <Entrezgene_source>
      <BioSource>
        <BioSource_subtype>
          <SubSource>
            <SubSource_subtype value="other">255</SubSource_subtype>
            <SubSource_name>ignored</SubSource_name>
          </SubSource>
          <SubSource>
            <SubSource_subtype value="chromosome">1</SubSource_subtype>
            <SubSource_name>7</SubSource_name>
          </SubSource>
        </BioSource_subtype>
      </BioSource>
    </Entrezgene_source>
    <Entrezgene_gene>
      <Gene-ref>
        <Gene-ref_locus>IL6</Gene-ref_locus>
        <Gene-ref_desc>interleukin 6</Gene-ref_desc>
        <Gene-ref_maploc>
          <Maps>
            <Maps_display-str>7p15.3</Maps_display-str>
          </Maps>
        </Gene-ref_maploc>
      </Gene-ref>
    </Entrezgene_gene>
    <Entrezgene_comments>
      <Gene-commentary>
        <Gene-commentary_products>
          <Gene-ref>
            <Gene-ref_locus>NOT-THIS</Gene-ref_locus>
          </Gene-ref>
        </Gene-commentary_products>
      </Gene-commentary>
    </Entrezgene_comments>
  </Entrezgene>
  <Entrezgene>
    <Entrezgene_track>
      <Gene-track>
        <Gene-track_geneid>16193</Gene-track_geneid>
      </Gene-track>
    </Entrezgene_track>
    <Entrezgene_gene>
      <Gene-ref>
        <Gene-ref_locus>Il6</Gene-ref_locus>
      </Gene-ref>
    </Entrezgene_gene>
  </Entrezgene>
</Entrezgene-Set>
"#;

    #[test]
    fn decodes_entrezgene_fields() {
        let records = decode_gene_records(IL6.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.gene_id, "3569");
        assert_eq!(first.symbol, "IL6");
        assert_eq!(first.description, "interleukin 6");
        assert_eq!(first.chromosome, "7");
        assert_eq!(first.map_location, "7p15.3");
    }

    #[test]
    fn missing_fields_become_unknown() {
        let records = decode_gene_records(IL6.as_bytes()).unwrap();
        let second = &records[1];
        assert_eq!(second.gene_id, "16193");
        assert_eq!(second.chromosome, UNKNOWN);
        assert_eq!(second.description, UNKNOWN);
        assert_eq!(second.map_location, UNKNOWN);
    }

    #[test]
    fn chromosome_from_subtype_text() {
        let xml = r#"<Entrezgene-Set><Entrezgene>
            <Entrezgene_source><BioSource><BioSource_subtype><SubSource>
              <SubSource_subtype>chromosome</SubSource_subtype>
              <SubSource_name>X</SubSource_name>
            </SubSource></BioSource_subtype></BioSource></Entrezgene_source>
          </Entrezgene></Entrezgene-Set>"#;
        let records = decode_gene_records(xml.as_bytes()).unwrap();
        assert_eq!(records[0].chromosome, "X");
    }

    #[test]
    fn empty_search_yields_no_records() {
        assert!(decode_gene_records(b"").unwrap().is_empty());
    }
}
