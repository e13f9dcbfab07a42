use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{check_status, Result};
use crate::session::{read_json, SessionHandle};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub links: Vec<String>,
    pub developer_org_name: Option<String>,
}

enum CaseOutcome {
    Resolved(Option<String>),
    /// The case card timed out upstream (504); the case keeps its link only.
    TransientMiss,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaseCard {
    #[serde(default)]
    office_case: Option<OfficeCase>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfficeCase {
    #[serde(default)]
    organisation_name: Option<String>,
}

/// Resolve cadastral cases in order. Every case gets a display link; the
/// developer is the last non-empty organisation name seen.
pub async fn enrich(session: &SessionHandle, case_numbers: &[String]) -> Result<Enrichment> {
    let mut out = Enrichment::default();

    for case_number in case_numbers {
        out.links.push(session.endpoints().case_page(case_number));
        match fetch_case(session, case_number).await? {
            CaseOutcome::Resolved(Some(name)) => out.developer_org_name = Some(name),
            CaseOutcome::Resolved(None) => debug!("Case {} has no organisation", case_number),
            CaseOutcome::TransientMiss => {
                warn!("Case card {} timed out upstream (504), skipping enrichment", case_number)
            }
        }
    }

    Ok(out)
}

async fn fetch_case(session: &SessionHandle, case_number: &str) -> Result<CaseOutcome> {
    let url = session.endpoints().case_card(case_number);
    let resp = session.send(session.client().get(&url), &url).await?;
    if resp.status() == StatusCode::GATEWAY_TIMEOUT {
        return Ok(CaseOutcome::TransientMiss);
    }
    check_status(&url, resp.status())?;

    let card: CaseCard = read_json(resp, &url).await?;
    let name = card
        .office_case
        .and_then(|c| c.organisation_name)
        .filter(|n| !n.trim().is_empty());
    Ok(CaseOutcome::Resolved(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::{bridge, ClientOptions, Endpoints};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_for(server: &MockServer) -> SessionHandle {
        let options = ClientOptions {
            endpoints: Endpoints::new(&server.uri()).unwrap(),
            proxy: None,
        };
        bridge(&[], &options).unwrap()
    }

    async fn mount_case(server: &MockServer, case: &str, resp: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/isogd/front/api/gisogd/office-cases/{}/card", case)))
            .respond_with(resp)
            .expect(1)
            .mount(server)
            .await;
    }

    fn org(name: Option<&str>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "officeCase": { "organisationName": name } }))
    }

    fn cases() -> Vec<String> {
        vec!["C1".into(), "C2".into(), "C3".into()]
    }

    #[tokio::test]
    async fn gateway_timeout_is_soft_and_last_name_wins() {
        let server = MockServer::start().await;
        mount_case(&server, "C1", org(Some("ООО Первый"))).await;
        mount_case(&server, "C2", ResponseTemplate::new(504)).await;
        mount_case(&server, "C3", org(Some("ООО Третий"))).await;

        let out = enrich(&session_for(&server), &cases()).await.unwrap();
        assert_eq!(out.links.len(), 3);
        assert_eq!(out.links[1], format!("{}/cases/C2", server.uri()));
        assert_eq!(out.developer_org_name.as_deref(), Some("ООО Третий"));
    }

    #[tokio::test]
    async fn empty_later_name_keeps_earlier() {
        let server = MockServer::start().await;
        mount_case(&server, "C1", org(Some("ООО Первый"))).await;
        mount_case(&server, "C2", ResponseTemplate::new(504)).await;
        mount_case(&server, "C3", org(Some(""))).await;

        let out = enrich(&session_for(&server), &cases()).await.unwrap();
        assert_eq!(out.links.len(), 3);
        assert_eq!(out.developer_org_name.as_deref(), Some("ООО Первый"));
    }

    #[tokio::test]
    async fn card_without_office_case() {
        let server = MockServer::start().await;
        mount_case(&server, "C1", ResponseTemplate::new(200).set_body_json(json!({}))).await;

        let out = enrich(&session_for(&server), &["C1".to_string()]).await.unwrap();
        assert_eq!(out.links.len(), 1);
        assert!(out.developer_org_name.is_none());
    }

    #[tokio::test]
    async fn other_failures_are_fatal() {
        let server = MockServer::start().await;
        mount_case(&server, "C1", ResponseTemplate::new(502)).await;
        let err = enrich(&session_for(&server), &["C1".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { status, .. } if status.as_u16() == 502));

        let server = MockServer::start().await;
        mount_case(&server, "C1", ResponseTemplate::new(401)).await;
        let err = enrich(&session_for(&server), &["C1".to_string()]).await.unwrap_err();
        assert!(err.is_session_expired());
    }

    #[tokio::test]
    async fn no_cases_no_requests() {
        let server = MockServer::start().await;
        let out = enrich(&session_for(&server), &[]).await.unwrap();
        assert_eq!(out, Enrichment::default());
    }
}
