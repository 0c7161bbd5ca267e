use crate::decode::{
    FirstText, Schema, UNKNOWN, XmlEvent, attribute, is_path, normalize_text, relative,
    starts_with, walk_xml,
};
use crate::error::EnrichError;
use crate::records::InsightRecord;

pub const PUBMED_SCHEMA: Schema = Schema {
    name: "pubmed",
    version: 1,
};

pub const GO_SCHEMA: Schema = Schema {
    name: "goterm",
    version: 1,
};

const ARTICLE: &str = "PubmedArticle";
const PMID: &[&str] = &["MedlineCitation", "PMID"];
const TITLE: &[&str] = &["MedlineCitation", "Article", "ArticleTitle"];
const ABSTRACT_TEXT: &[&str] = &["MedlineCitation", "Article", "Abstract", "AbstractText"];
const KEYWORD: &[&str] = &["MedlineCitation", "KeywordList", "Keyword"];

const DEFAULT_FUNCTION: &str = "Molecular Function";
const LITERATURE_EVIDENCE: &str = "Literature";
const PREFERRED_SECTIONS: [&str; 3] = ["RESULTS", "CONCLUSION", "CONCLUSIONS"];

#[derive(Default)]
struct AbstractSection {
    label: Option<String>,
    text: String,
}

#[derive(Default)]
struct ArticleBuilder {
    pmid: FirstText,
    title: FirstText,
    sections: Vec<AbstractSection>,
    keywords: Vec<String>,
    keyword: Option<String>,
}

impl ArticleBuilder {
    /// First non-empty RESULTS or CONCLUSION(S) section, else the first
    /// abstract section, else the title.
    fn description(&self) -> Option<String> {
        let text = |section: &AbstractSection| {
            Some(normalize_text(&section.text)).filter(|text| !text.is_empty())
        };
        self.sections
            .iter()
            .filter(|section| {
                section
                    .label
                    .as_deref()
                    .is_some_and(|label| PREFERRED_SECTIONS.contains(&label))
            })
            .find_map(text)
            .or_else(|| self.sections.first().and_then(text))
            .or_else(|| self.title.value())
    }

    fn finish(self) -> InsightRecord {
        InsightRecord {
            function_type: classify_keywords(&self.keywords).to_string(),
            description: self.description().unwrap_or_else(|| UNKNOWN.to_string()),
            evidence: LITERATURE_EVIDENCE.to_string(),
            reference: self.pmid.or_unknown(),
        }
    }
}

/// Function category implied by article keywords. Later keywords override
/// earlier ones.
pub fn classify_keywords(keywords: &[String]) -> &'static str {
    let mut function_type = DEFAULT_FUNCTION;
    for keyword in keywords {
        let lower = keyword.to_lowercase();
        if lower.contains("signal") || lower.contains("pathway") {
            function_type = "Signaling";
        } else if lower.contains("metabol") {
            function_type = "Metabolism";
        } else if lower.contains("immune") || lower.contains("inflamm") {
            function_type = "Immune Regulation";
        } else if lower.contains("exercis") || lower.contains("muscle") {
            function_type = "Exercise Response";
        }
    }
    function_type
}

/// Decodes a `PubmedArticleSet` into one insight per article.
pub fn decode_pubmed_articles(xml: &[u8]) -> Result<Vec<InsightRecord>, EnrichError> {
    let mut records = Vec::new();
    let mut current: Option<ArticleBuilder> = None;

    walk_xml(PUBMED_SCHEMA, xml, |event| match event {
        XmlEvent::Open { path, attributes } => {
            if path.last().is_some_and(|name| name == ARTICLE) {
                current = Some(ArticleBuilder::default());
                return;
            }
            let (Some(article), Some(rel)) = (current.as_mut(), relative(path, ARTICLE)) else {
                return;
            };
            if is_path(rel, ABSTRACT_TEXT) {
                article.sections.push(AbstractSection {
                    label: attribute(attributes, "Label").map(str::to_uppercase),
                    text: String::new(),
                });
            } else if is_path(rel, KEYWORD) {
                article.keyword = Some(String::new());
            }
        }
        XmlEvent::Text { path, text } => {
            let (Some(article), Some(rel)) = (current.as_mut(), relative(path, ARTICLE)) else {
                return;
            };
            if is_path(rel, PMID) {
                article.pmid.push(text);
            } else if starts_with(rel, TITLE) {
                article.title.push(text);
            } else if starts_with(rel, ABSTRACT_TEXT) {
                if let Some(section) = article.sections.last_mut() {
                    section.text.push_str(text);
                }
            } else if starts_with(rel, KEYWORD) {
                if let Some(keyword) = article.keyword.as_mut() {
                    keyword.push_str(text);
                }
            }
        }
        XmlEvent::Close { path } => {
            if path.last().is_some_and(|name| name == ARTICLE) {
                if let Some(article) = current.take() {
                    records.push(article.finish());
                }
                return;
            }
            let (Some(article), Some(rel)) = (current.as_mut(), relative(path, ARTICLE)) else {
                return;
            };
            if is_path(rel, PMID) {
                article.pmid.close();
            } else if is_path(rel, TITLE) {
                article.title.close();
            } else if is_path(rel, KEYWORD) {
                if let Some(keyword) = article.keyword.take() {
                    let keyword = normalize_text(&keyword);
                    if !keyword.is_empty() {
                        article.keywords.push(keyword);
                    }
                }
            }
        }
    })?;

    Ok(records)
}

const GO_TERM: &str = "GoTerm";

#[derive(Default)]
struct TermBuilder {
    id: FirstText,
    name: FirstText,
    category: FirstText,
    evidence: FirstText,
    source: FirstText,
}

impl TermBuilder {
    fn field_for(&mut self, rel: &[String]) -> Option<&mut FirstText> {
        let [leaf] = rel else {
            return None;
        };
        match leaf.as_str() {
            "GO_term_id" => Some(&mut self.id),
            "GO_term_name" => Some(&mut self.name),
            "GO_term_category" => Some(&mut self.category),
            "GO_term_evidence" => Some(&mut self.evidence),
            "GO_term_source" => Some(&mut self.source),
            _ => None,
        }
    }

    fn finish(self) -> InsightRecord {
        let function_type = match self.category.value().as_deref() {
            Some("Function") => "Molecular Function".to_string(),
            Some("Process") => "Biological Process".to_string(),
            Some("Component") => "Cellular Component".to_string(),
            Some(other) => other.to_string(),
            None => UNKNOWN.to_string(),
        };
        InsightRecord {
            function_type,
            description: self
                .name
                .value()
                .or_else(|| self.id.value())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            evidence: self.evidence.or_unknown(),
            reference: self.source.or_unknown(),
        }
    }
}

/// Decodes Gene Ontology annotations linked from a gene record; one insight
/// per `GoTerm`.
pub fn decode_go_terms(xml: &[u8]) -> Result<Vec<InsightRecord>, EnrichError> {
    let mut records = Vec::new();
    let mut current: Option<TermBuilder> = None;

    walk_xml(GO_SCHEMA, xml, |event| match event {
        XmlEvent::Open { path, .. } => {
            if path.last().is_some_and(|name| name == GO_TERM) {
                current = Some(TermBuilder::default());
            }
        }
        XmlEvent::Text { path, text } => {
            if let (Some(term), Some(rel)) = (current.as_mut(), relative(path, GO_TERM)) {
                if let Some(field) = term.field_for(rel) {
                    field.push(text);
                }
            }
        }
        XmlEvent::Close { path } => {
            if path.last().is_some_and(|name| name == GO_TERM) {
                if let Some(term) = current.take() {
                    records.push(term.finish());
                }
            } else if let (Some(term), Some(rel)) = (current.as_mut(), relative(path, GO_TERM)) {
                if let Some(field) = term.field_for(rel) {
                    field.close();
                }
            }
        }
    })?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLES: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">31234567</PMID>
      <Article PubModel="Print">
        <ArticleTitle>IL-6 release from contracting muscle.</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Background text.</AbstractText>
          <AbstractText Label="RESULTS">Plasma <i>IL-6</i>
            rose tenfold.</AbstractText>
          <AbstractText Label="CONCLUSIONS">Not chosen.</AbstractText>
        </Abstract>
      </Article>
      <KeywordList Owner="NOTNLM">
        <Keyword MajorTopicYN="N">inflammation</Keyword>
        <Keyword MajorTopicYN="N">Skeletal muscle</Keyword>
      </KeywordList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>30000001</PMID>
      <Article>
        <ArticleTitle>Only a title.</ArticleTitle>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList><ArticleId IdType="pubmed">30000001</ArticleId></ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn prefers_results_section_and_last_keyword() {
        let records = decode_pubmed_articles(ARTICLES.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reference, "31234567");
        assert_eq!(records[0].description, "Plasma IL-6 rose tenfold.");
        assert_eq!(records[0].function_type, "Exercise Response");
        assert_eq!(records[0].evidence, "Literature");
    }

    #[test]
    fn falls_back_to_title() {
        let records = decode_pubmed_articles(ARTICLES.as_bytes()).unwrap();
        assert_eq!(records[1].description, "Only a title.");
        assert_eq!(records[1].function_type, DEFAULT_FUNCTION);
    }

    #[test]
    fn unlabelled_abstract_uses_first_section() {
        let xml = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation>
            <PMID>1</PMID><Article><ArticleTitle>T</ArticleTitle>
            <Abstract><AbstractText>First.</AbstractText><AbstractText>Second.</AbstractText></Abstract>
            </Article></MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        let records = decode_pubmed_articles(xml.as_bytes()).unwrap();
        assert_eq!(records[0].description, "First.");
    }

    #[test]
    fn empty_results_section_uses_first_section() {
        let xml = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation>
            <PMID>2</PMID><Article><ArticleTitle>Title.</ArticleTitle>
            <Abstract>
              <AbstractText Label="BACKGROUND">First section.</AbstractText>
              <AbstractText Label="RESULTS"></AbstractText>
            </Abstract>
            </Article></MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        let records = decode_pubmed_articles(xml.as_bytes()).unwrap();
        assert_eq!(records[0].description, "First section.");
    }

    #[test]
    fn keyword_classification() {
        let keywords = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        assert_eq!(classify_keywords(&keywords(&["JAK/STAT signalling"])), "Signaling");
        assert_eq!(classify_keywords(&keywords(&["Lipid metabolism"])), "Metabolism");
        assert_eq!(
            classify_keywords(&keywords(&["Metabolic syndrome", "innate immune"])),
            "Immune Regulation"
        );
        assert_eq!(classify_keywords(&[]), DEFAULT_FUNCTION);
    }

    #[test]
    fn decodes_go_terms_with_category_mapping() {
        let xml = r#"<GoTermSet>
  <GoTerm>
    <GO_term_id>GO:0005125</GO_term_id>
    <GO_term_name>cytokine activity</GO_term_name>
    <GO_term_category>Function</GO_term_category>
    <GO_term_evidence>IDA</GO_term_evidence>
    <GO_term_source>PMID:1234</GO_term_source>
  </GoTerm>
  <GoTerm>
    <GO_term_id>GO:0006955</GO_term_id>
    <GO_term_category>Process</GO_term_category>
  </GoTerm>
</GoTermSet>"#;
        let records = decode_go_terms(xml.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].function_type, "Molecular Function");
        assert_eq!(records[0].description, "cytokine activity");
        assert_eq!(records[0].evidence, "IDA");
        assert_eq!(records[0].reference, "PMID:1234");
        assert_eq!(records[1].function_type, "Biological Process");
        assert_eq!(records[1].description, "GO:0006955");
        assert_eq!(records[1].evidence, UNKNOWN);
    }
}
