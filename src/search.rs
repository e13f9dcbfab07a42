use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::session::SessionHandle;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
const SORT_FIELD: &str = "dateOfRegistration";
const SORT_ORDER: &str = "ASC";

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub document_type_code: String,
    pub since: NaiveDate,
    pub page_size: u32,
    pub page_index: u32,
    pub sort_field: String,
    pub sort_order: String,
}

impl SearchQuery {
    pub fn new(document_type_code: &str, since: NaiveDate) -> Self {
        Self {
            document_type_code: document_type_code.to_string(),
            since,
            page_size: DEFAULT_PAGE_SIZE,
            page_index: 0,
            sort_field: SORT_FIELD.to_string(),
            sort_order: SORT_ORDER.to_string(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Registry query-language filter: document chapter plus a date lower bound.
    pub fn filter(&self) -> String {
        format!(
            "chapterCode:(\"{}\") AND dateOfDocument:[{}T00:00:00.000Z TO *]",
            self.document_type_code,
            self.since.format("%Y-%m-%d")
        )
    }

    fn body(&self) -> SearchBody<'_> {
        SearchBody {
            pagination: Pagination {
                size: self.page_size,
                page: self.page_index,
                sort_model: SortModel {
                    field: &self.sort_field,
                    order: &self.sort_order,
                },
            },
            request: self.filter(),
        }
    }
}

#[derive(Serialize)]
struct SearchBody<'a> {
    pagination: Pagination<'a>,
    request: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination<'a> {
    size: u32,
    page: u32,
    sort_model: SortModel<'a>,
}

#[derive(Serialize)]
struct SortModel<'a> {
    field: &'a str,
    order: &'a str,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<RawDocumentStub>,
    pagination: PageInfo,
}

#[derive(Deserialize)]
struct PageInfo {
    total: u64,
}

/// A search hit. Only the fields the extractor reads are typed; the rest is
/// carried along untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDocumentStub {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    #[serde(default)]
    pub date_of_document: Option<String>,
    #[serde(default)]
    pub official_document_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub cadastral_numbers: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn id_text<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "document id must be a string or number, got {}",
            other
        ))),
    }
}

/// Walk the search results page by page until `total` stubs are collected or
/// a page comes back empty. Upstream order is kept.
pub async fn crawl(session: &SessionHandle, mut query: SearchQuery) -> Result<Vec<RawDocumentStub>> {
    let url = session.endpoints().search();
    let mut stubs: Vec<RawDocumentStub> = Vec::new();

    info!("Searching: {}", query.filter());
    loop {
        let page: SearchPage = session.post_json(&url, &query.body()).await?;
        let received = page.data.len();
        let total = page.pagination.total;
        stubs.extend(page.data);
        debug!(
            page = query.page_index,
            received,
            collected = stubs.len(),
            total,
            "Search page"
        );

        if received == 0 {
            if (stubs.len() as u64) < total {
                warn!(
                    "Search page {} was empty with {}/{} collected, stopping",
                    query.page_index,
                    stubs.len(),
                    total
                );
            }
            break;
        }
        if stubs.len() as u64 >= total {
            break;
        }
        query.page_index += 1;
    }

    info!("Search returned {} documents over {} pages", stubs.len(), query.page_index + 1);
    Ok(stubs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::{bridge, ClientOptions, Endpoints};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SEARCH_PATH: &str = "/isogd/front/api/solr/docsSearch";

    fn session_for(server: &MockServer) -> SessionHandle {
        let options = ClientOptions {
            endpoints: Endpoints::new(&server.uri()).unwrap(),
            proxy: None,
        };
        bridge(&[], &options).unwrap()
    }

    fn query() -> SearchQuery {
        SearchQuery::new("RS", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    fn stubs(range: std::ops::Range<u32>) -> Vec<Value> {
        range
            .map(|i| {
                json!({
                    "id": i,
                    "dateOfDocument": "2024-01-02",
                    "officialDocumentNumber": format!("77-{}", i),
                    "address": "Москва",
                })
            })
            .collect()
    }

    async fn mount_page(server: &MockServer, page: u32, data: Vec<Value>, total: u64) {
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .and(body_partial_json(json!({ "pagination": { "page": page } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": data,
                "pagination": { "total": total },
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(query().body()).unwrap();
        assert_eq!(
            body,
            json!({
                "pagination": {
                    "size": 100,
                    "page": 0,
                    "sortModel": { "field": "dateOfRegistration", "order": "ASC" }
                },
                "request": "chapterCode:(\"RS\") AND dateOfDocument:[2024-01-01T00:00:00.000Z TO *]"
            })
        );
    }

    #[test]
    fn stub_fields() {
        let raw = std::fs::read_to_string("tests/fixtures/stub.json").unwrap();
        let stub: RawDocumentStub = serde_json::from_str(&raw).unwrap();
        assert_eq!(stub.id, "d-1001");
        assert_eq!(stub.official_document_number.as_deref(), Some("77-01-012345-2024"));
        assert_eq!(stub.cadastral_numbers.as_ref().map(Vec::len), Some(2));
        assert_eq!(stub.extra.get("chapterCode"), Some(&json!("RS")));

        let numeric: RawDocumentStub = serde_json::from_value(json!({ "id": 15 })).unwrap();
        assert_eq!(numeric.id, "15");
        assert!(serde_json::from_value::<RawDocumentStub>(json!({ "id": null })).is_err());
    }

    #[tokio::test]
    async fn walks_all_pages() {
        let server = MockServer::start().await;
        mount_page(&server, 0, stubs(0..100), 250).await;
        mount_page(&server, 1, stubs(100..200), 250).await;
        mount_page(&server, 2, stubs(200..250), 250).await;

        let result = crawl(&session_for(&server), query()).await.unwrap();
        assert_eq!(result.len(), 250);
        assert_eq!(result[0].id, "0");
        assert_eq!(result[249].id, "249");
        // `expect(1)` on each page is verified when the server drops.
    }

    #[tokio::test]
    async fn empty_page_stops_short_total() {
        let server = MockServer::start().await;
        mount_page(&server, 0, stubs(0..100), 500).await;
        mount_page(&server, 1, Vec::new(), 500).await;

        let result = crawl(&session_for(&server), query()).await.unwrap();
        assert_eq!(result.len(), 100);
    }

    #[tokio::test]
    async fn unauthorized_is_session_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = crawl(&session_for(&server), query()).await.unwrap_err();
        assert!(err.is_session_expired(), "got {:?}", err);
    }

    #[tokio::test]
    async fn server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = crawl(&session_for(&server), query()).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { status, .. } if status.as_u16() == 500));
        assert!(!err.is_session_expired());
    }

    #[tokio::test]
    async fn garbage_body_is_payload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let err = crawl(&session_for(&server), query()).await.unwrap_err();
        assert!(matches!(err, Error::Payload { .. }));
    }
}
