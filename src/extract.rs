use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::decoder::teps::{TepGroups, TepMap};
use crate::decoder::value::{scalar_text, Verbatim};
use crate::decoder::{decode, parse_custom_attributes, DecodedAttributes};
use crate::enrich::{enrich, Enrichment};
use crate::error::Result;
use crate::search::RawDocumentStub;
use crate::session::{Endpoints, SessionHandle};

pub const REGION: &str = "moscow";

/// One fully assembled permit document, as emitted in the output array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub region: String,
    pub date: Option<String>,
    pub number: Option<String>,
    pub address: Option<String>,
    pub cadastral_numbers: Vec<String>,
    pub details: BTreeMap<String, Verbatim>,
    pub teps: TepMap,
    pub additional_teps: TepMap,
    pub tep_groups: TepGroups,
    pub additional_tep_groups: TepGroups,
    pub url: String,
    pub cadastral_links: Vec<String>,
    pub description: Option<String>,
    pub functional_designation: Option<String>,
    pub developer_org_name: Option<String>,
}

// ── Detail payload ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentBrief {
    #[serde(default)]
    custom_attributes: Option<Value>,
    #[serde(default)]
    data_objects: Option<Vec<DataObject>>,
}

#[derive(Deserialize)]
struct DataObject {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    destination: Option<Value>,
    #[serde(default)]
    terrains: Option<Vec<Terrain>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Terrain {
    #[serde(default)]
    cadastral_numbers: Option<Vec<CadastralLink>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CadastralLink {
    #[serde(default)]
    case_number: Option<Value>,
}

#[derive(Debug, Default, PartialEq)]
struct ObjectScan {
    description: Option<String>,
    functional_designation: Option<String>,
    case_numbers: Vec<String>,
}

fn present(v: &Option<Value>) -> Option<String> {
    match v {
        None | Some(Value::Null) => None,
        Some(v) => Some(scalar_text(v)),
    }
}

/// Later data objects override earlier description/destination values.
fn scan_data_objects(objects: &[DataObject]) -> ObjectScan {
    let mut scan = ObjectScan::default();
    for object in objects {
        if let Some(name) = present(&object.name) {
            scan.description = Some(name);
        }
        if let Some(destination) = present(&object.destination) {
            scan.functional_designation = Some(destination);
        }
        let links = object
            .terrains
            .iter()
            .flatten()
            .flat_map(|t| t.cadastral_numbers.iter().flatten());
        for link in links {
            if let Some(case_number) = present(&link.case_number) {
                scan.case_numbers.push(case_number);
            }
        }
    }
    scan
}

// ── Extraction ──

/// Expand one search stub into a record: detail payload, attribute decoding,
/// cadastral case enrichment.
pub async fn extract(session: &SessionHandle, stub: &RawDocumentStub) -> Result<DocumentRecord> {
    let url = session.endpoints().document_brief(&stub.id);
    let brief: DocumentBrief = session.get_json(&url).await?;

    let attributes = parse_custom_attributes(brief.custom_attributes.as_ref());
    let decoded = decode(&attributes);
    let scan = scan_data_objects(brief.data_objects.as_deref().unwrap_or_default());
    debug!(
        id = %stub.id,
        attributes = attributes.len(),
        cases = scan.case_numbers.len(),
        "Document detail"
    );

    let enrichment = enrich(session, &scan.case_numbers).await?;
    Ok(assemble(stub, decoded, scan, enrichment, session.endpoints()))
}

fn assemble(
    stub: &RawDocumentStub,
    decoded: DecodedAttributes,
    scan: ObjectScan,
    enrichment: Enrichment,
    endpoints: &Endpoints,
) -> DocumentRecord {
    DocumentRecord {
        region: REGION.to_string(),
        date: stub.date_of_document.clone(),
        number: stub.official_document_number.clone(),
        address: stub.address.clone(),
        cadastral_numbers: stub
            .cadastral_numbers
            .iter()
            .flatten()
            .map(scalar_text)
            .collect(),
        details: decoded.details,
        teps: decoded.teps,
        additional_teps: decoded.additional_teps,
        tep_groups: decoded.tep_groups,
        additional_tep_groups: decoded.additional_tep_groups,
        url: endpoints.document_page(&stub.id),
        cadastral_links: enrichment.links,
        description: scan.description,
        functional_designation: scan.functional_designation,
        developer_org_name: enrichment.developer_org_name,
    }
}
