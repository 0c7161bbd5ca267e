use crate::decode::{
    FirstText, Schema, XmlEvent, attribute, is_path, relative, starts_with, walk_xml,
};
use crate::error::EnrichError;
use crate::records::ProteinRecord;

pub const SCHEMA: Schema = Schema {
    name: "bioseq",
    version: 1,
};

const RECORD: &str = "Bioseq";
const SEQ_ID: &[&str] = &["Bioseq_id", "Seq-id"];
const GI: &[&str] = &["Bioseq_id", "Seq-id", "Seq-id_gi"];
const MOLECULE: &[&str] = &["Bioseq_inst", "Seq-inst", "Seq-inst_mol"];
const INST_LENGTH: &[&str] = &["Bioseq_inst", "Seq-inst", "Seq-inst_length"];
const LEGACY_LENGTH: &[&str] = &["Bioseq_length"];
const INSTANCE: &[&str] = &["Bioseq_inst"];
const ANNOTATION: &[&str] = &["Bioseq_annot"];

#[derive(Default)]
struct ProteinBuilder {
    gi: FirstText,
    accession: FirstText,
    version: FirstText,
    id_name: FirstText,
    prot_name: FirstText,
    length: FirstText,
    molecular_weight: FirstText,
    sequence: String,
    molecule: Option<String>,
}

impl ProteinBuilder {
    fn is_protein(&self) -> bool {
        self.molecule.as_deref().is_none_or(|mol| mol == "aa")
    }

    fn finish(self) -> ProteinRecord {
        let accession = match (self.accession.value(), self.version.value()) {
            (Some(acc), Some(version)) => Some(format!("{acc}.{version}")),
            (acc, _) => acc,
        };
        let sequence: String = self
            .sequence
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect();
        ProteinRecord {
            protein_id: self.gi.value(),
            accession,
            name: self.prot_name.value().or_else(|| self.id_name.value()),
            length: self.length.value().and_then(|value| value.parse().ok()),
            molecular_weight: self
                .molecular_weight
                .value()
                .and_then(|value| value.parse().ok()),
            sequence: (!sequence.is_empty()).then_some(sequence),
        }
    }
}

/// Decodes a `Bioseq-set` (efetch -db protein -format xml) into one record per
/// amino-acid `Bioseq`; nucleotide members of nuc-prot sets are skipped.
pub fn decode_protein_records(xml: &[u8]) -> Result<Vec<ProteinRecord>, EnrichError> {
    let mut records = Vec::new();
    let mut current: Option<ProteinBuilder> = None;

    walk_xml(SCHEMA, xml, |event| match event {
        XmlEvent::Open { path, attributes } => {
            if path.last().is_some_and(|name| name == RECORD) {
                current = Some(ProteinBuilder::default());
                return;
            }
            if let (Some(protein), Some(rel)) = (current.as_mut(), relative(path, RECORD)) {
                if is_path(rel, MOLECULE) {
                    protein.molecule = attribute(attributes, "value").map(str::to_string);
                }
            }
        }
        XmlEvent::Text { path, text } => {
            let (Some(protein), Some(rel)) = (current.as_mut(), relative(path, RECORD)) else {
                return;
            };
            if let Some(field) = protein.field_for(rel) {
                field.push(text);
            } else if starts_with(rel, INSTANCE) && rel.last().is_some_and(|n| n == "IUPACaa") {
                protein.sequence.push_str(text);
            }
        }
        XmlEvent::Close { path } => {
            if path.last().is_some_and(|name| name == RECORD) {
                if let Some(protein) = current.take() {
                    if protein.is_protein() {
                        records.push(protein.finish());
                    }
                }
                return;
            }
            if let (Some(protein), Some(rel)) = (current.as_mut(), relative(path, RECORD)) {
                if let Some(field) = protein.field_for(rel) {
                    field.close();
                }
            }
        }
    })?;

    Ok(records)
}

impl ProteinBuilder {
    fn field_for(&mut self, rel: &[String]) -> Option<&mut FirstText> {
        let leaf = rel.last()?.as_str();
        if is_path(rel, GI) {
            return Some(&mut self.gi);
        }
        if is_path(rel, INST_LENGTH) || is_path(rel, LEGACY_LENGTH) {
            return Some(&mut self.length);
        }
        if starts_with(rel, SEQ_ID) {
            return match leaf {
                "Textseq-id_accession" => Some(&mut self.accession),
                "Textseq-id_version" => Some(&mut self.version),
                "Textseq-id_name" => Some(&mut self.id_name),
                _ => None,
            };
        }
        if starts_with(rel, ANNOTATION) {
            return match leaf {
                "Prot-ref_name_E" => Some(&mut self.prot_name),
                "User-field_data_real" => Some(&mut self.molecular_weight),
                _ => None,
            };
        }
        None
    }
}

/// Residues of the first record in a FASTA payload, header and line breaks
/// removed.
pub fn parse_fasta_sequence(fasta: &[u8]) -> String {
    let text = String::from_utf8_lossy(fasta);
    let mut sequence = String::new();
    let mut headers = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('>') {
            headers += 1;
            if headers > 1 {
                break;
            }
            continue;
        }
        sequence.extend(line.chars().filter(|ch| !ch.is_whitespace()));
    }
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;

    const NUC_PROT: &str = r#"<?xml version="1.0" ?>
<Bioseq-set>
  <Bioseq-set_seq-set>
    <Seq-entry>
      <Seq-entry_set>
        <Bioseq-set>
          <Bioseq-set_seq-set>
            <Seq-entry>
              <Seq-entry_seq>
                <Bioseq>
                  <Bioseq_id>
                    <Seq-id>
                      <Seq-id_other>
                        <Textseq-id>
                          <Textseq-id_accession>NM_000600</Textseq-id_accession>
                        </Textseq-id>
                      </Seq-id_other>
                    </Seq-id>
                  </Bioseq_id>
                  <Bioseq_inst>
                    <Seq-inst>
                      <Seq-inst_mol value="rna"/>
                      <Seq-inst_length>1201</Seq-inst_length>
                    </Seq-inst>
                  </Bioseq_inst>
                </Bioseq>
              </Seq-entry_seq>
            </Seq-entry>
            <Seq-entry>
              <Seq-entry_seq>
                <Bioseq>
                  <Bioseq_id>
                    <Seq-id>
                      <Seq-id_other>
                        <Textseq-id>
                          <Textseq-id_name>IL6_HUMAN</Textseq-id_name>
                          <Textseq-id_accession>NP_000591</Textseq-id_accession>
                          <Textseq-id_version>1</Textseq-id_version>
                        </Textseq-id>
                      </Seq-id_other>
                    </Seq-id>
                    <Seq-id>
                      <Seq-id_gi>10834984</Seq-id_gi>
                    </Seq-id>
                  </Bioseq_id>
                  <Bioseq_inst>
                    <Seq-inst>
                      <Seq-inst_mol value="aa"/>
                      <Seq-inst_length>12</Seq-inst_length>
                      <Seq-inst_seq-data>
                        <Seq-data>
                          <Seq-data_iupacaa>
                            <IUPACaa>MNSFSTSA
FGPV</IUPACaa>
                          </Seq-data_iupacaa>
                        </Seq-data>
                      </Seq-inst_seq-data>
                    </Seq-inst>
                  </Bioseq_inst>
                  <Bioseq_annot>
                    <Seq-annot>
                      <Seq-annot_data>
                        <Seq-annot_data_ftable>
                          <Seq-feat>
                            <Seq-feat_data>
                              <SeqFeatData>
                                <SeqFeatData_prot>
                                  <Prot-ref>
                                    <Prot-ref_name>
                                      <Prot-ref_name_E>interleukin-6 isoform 1 precursor</Prot-ref_name_E>
                                    </Prot-ref_name>
                                  </Prot-ref>
                                </SeqFeatData_prot>
                              </SeqFeatData>
                            </Seq-feat_data>
                            <Seq-feat_ext>
                              <User-object>
                                <User-object_data>
                                  <User-field>
                                    <User-field_data>
                                      <User-field_data_real>23718.2</User-field_data_real>
                                    </User-field_data>
                                  </User-field>
                                </User-object_data>
                              </User-object>
                            </Seq-feat_ext>
                          </Seq-feat>
                        </Seq-annot_data_ftable>
                      </Seq-annot_data>
                    </Seq-annot>
                  </Bioseq_annot>
                </Bioseq>
              </Seq-entry_seq>
            </Seq-entry>
          </Bioseq-set_seq-set>
        </Bioseq-set>
      </Seq-entry_set>
    </Seq-entry>
  </Bioseq-set_seq-set>
</Bioseq-set>
"#;

    #[test]
    fn decodes_protein_member_only() {
        let records = decode_protein_records(NUC_PROT.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let protein = &records[0];
        assert_eq!(protein.protein_id.as_deref(), Some("10834984"));
        assert_eq!(protein.accession.as_deref(), Some("NP_000591.1"));
        assert_eq!(
            protein.name.as_deref(),
            Some("interleukin-6 isoform 1 precursor")
        );
        assert_eq!(protein.length, Some(12));
        assert_eq!(protein.molecular_weight, Some(23718.2));
        assert_eq!(protein.sequence.as_deref(), Some("MNSFSTSAFGPV"));
    }

    #[test]
    fn name_falls_back_to_textseq_name() {
        let xml = r#"<Bioseq-set><Bioseq>
            <Bioseq_id><Seq-id><Seq-id_other><Textseq-id>
              <Textseq-id_name>XP_1</Textseq-id_name>
            </Textseq-id></Seq-id_other></Seq-id></Bioseq_id>
            <Bioseq_length>50</Bioseq_length>
          </Bioseq></Bioseq-set>"#;
        let records = decode_protein_records(xml.as_bytes()).unwrap();
        assert_eq!(records[0].name.as_deref(), Some("XP_1"));
        assert_eq!(records[0].length, Some(50));
        assert_eq!(records[0].protein_id, None);
        assert_eq!(records[0].sequence, None);
    }

    #[test]
    fn fasta_sequence_of_first_record() {
        let fasta = b">NP_000591.1 interleukin-6\nMNSFSTSA\nFGPVAFSL\n\n>second\nAAAA\n";
        assert_eq!(parse_fasta_sequence(fasta), "MNSFSTSAFGPVAFSL");
    }
}
