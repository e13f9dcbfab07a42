use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, Proxy, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{check_status, Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://gisogd.mos.ru";

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// One cookie as the browser login hands it over (Selenium `get_cookies()` shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthCookie {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    /// Unix seconds; Selenium sometimes emits it as a float.
    #[serde(default)]
    pub expiry: Option<f64>,
}

fn root_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CookieKey {
    pub domain: String,
    pub path: String,
    pub name: String,
}

impl AuthCookie {
    fn key(&self) -> CookieKey {
        CookieKey {
            domain: self.domain.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        let missing = [
            ("name", &self.name),
            ("value", &self.value),
            ("domain", &self.domain),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty());

        match missing {
            Some((field, _)) => Err(Error::InvalidCredentialState(format!(
                "cookie {:?} has no {}",
                self.name, field
            ))),
            None => Ok(()),
        }
    }

    /// The URL the cookie is "set from". A leading dot marks a domain cookie,
    /// anything else is host-only.
    fn origin_url(&self) -> Result<Url> {
        let host = self.domain.trim_start_matches('.');
        let path = if self.path.starts_with('/') { self.path.as_str() } else { "/" };
        Url::parse(&format!("https://{}{}", host, path)).map_err(|e| {
            Error::InvalidCredentialState(format!(
                "cookie {:?} has unusable domain {:?}: {}",
                self.name, self.domain, e
            ))
        })
    }

    fn set_cookie_header(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.domain.starts_with('.') {
            header.push_str(&format!("; Domain={}", self.domain));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if let Some(expires) = self
            .expiry
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        {
            header.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        header
    }
}

// ── Endpoints ──

/// Registry URLs, all derived from one base so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base: &str) -> Result<Self> {
        let parsed = Url::parse(base)
            .map_err(|e| Error::Configuration(format!("invalid base url {:?}: {}", base, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "base url must be http(s), got {:?}",
                base
            )));
        }
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn search(&self) -> String {
        format!("{}/isogd/front/api/solr/docsSearch", self.base)
    }

    pub fn document_brief(&self, id: &str) -> String {
        format!("{}/isogd/front/api/gisogd/documents/{}/brief", self.base, id)
    }

    pub fn case_card(&self, case_number: &str) -> String {
        format!(
            "{}/isogd/front/api/gisogd/office-cases/{}/card",
            self.base, case_number
        )
    }

    pub fn document_page(&self, id: &str) -> String {
        format!("{}/document/{}", self.base, id)
    }

    pub fn case_page(&self, case_number: &str) -> String {
        format!("{}/cases/{}", self.base, case_number)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_URL.to_string(),
        }
    }
}

// ── Session ──

/// Transport settings shared by every request of a run.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoints: Endpoints,
    pub proxy: Option<String>,
}

/// A ready HTTP context seeded with the login cookies. Cloning is cheap and
/// every clone talks through the same client and cookie store.
#[derive(Clone)]
pub struct SessionHandle {
    client: Client,
    endpoints: Arc<Endpoints>,
    cookies: Arc<BTreeMap<CookieKey, AuthCookie>>,
}

impl SessionHandle {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn cookie_count(&self) -> usize {
        self.cookies.len()
    }

    #[cfg(test)]
    pub fn cookie(&self, domain: &str, path: &str, name: &str) -> Option<&AuthCookie> {
        self.cookies.get(&CookieKey {
            domain: domain.to_string(),
            path: path.to_string(),
            name: name.to_string(),
        })
    }

    /// Send without judging the status; only transport failures are errors.
    pub async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        request.send().await.map_err(|source| Error::Transport {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.send(self.client.get(url), url).await?;
        check_status(url, resp.status())?;
        read_json(resp, url).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T> {
        let resp = self.send(self.client.post(url).json(body), url).await?;
        check_status(url, resp.status())?;
        read_json(resp, url).await
    }
}

pub async fn read_json<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let body = resp.bytes().await.map_err(|source| Error::Transport {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|source| Error::Payload {
        url: url.to_string(),
        source,
    })
}

/// Install the login cookies into a fresh client. No network traffic.
/// Cookies the store refuses (already expired, unparsable) are left out.
pub fn bridge(cookies: &[AuthCookie], options: &ClientOptions) -> Result<SessionHandle> {
    let mut keyed = BTreeMap::new();
    for cookie in cookies {
        cookie.validate()?;
        keyed.insert(cookie.key(), cookie.clone());
    }

    let jar = Arc::new(Jar::default());
    let mut installed = BTreeMap::new();
    for (key, cookie) in keyed {
        let url = cookie.origin_url()?;
        jar.add_cookie_str(&cookie.set_cookie_header(), &url);
        if jar_holds(&jar, &cookie, &url) {
            debug!("Installed cookie {} for {}{}", cookie.name, cookie.domain, cookie.path);
            installed.insert(key, cookie);
        } else {
            warn!(
                "Cookie {} for {}{} was rejected by the cookie store",
                cookie.name, cookie.domain, cookie.path
            );
        }
    }

    let client = build_client(jar, options)?;
    info!("Session ready with {} cookies", installed.len());

    Ok(SessionHandle {
        client,
        endpoints: Arc::new(options.endpoints.clone()),
        cookies: Arc::new(installed),
    })
}

fn jar_holds(jar: &Jar, cookie: &AuthCookie, url: &Url) -> bool {
    let pair = format!("{}={}", cookie.name, cookie.value);
    jar.cookies(url)
        .and_then(|header| header.to_str().ok().map(|h| h.split("; ").any(|kv| kv == pair)))
        .unwrap_or(false)
}

fn build_client(jar: Arc<Jar>, options: &ClientOptions) -> Result<Client> {
    let base = options.endpoints.base();
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ORIGIN, header_value(base)?);
    headers.insert(REFERER, header_value(&format!("{}/documents", base))?);

    let mut builder = Client::builder()
        .cookie_provider(jar)
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT);

    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(parse_proxy(proxy)?);
    }

    builder
        .build()
        .map_err(|e| Error::Configuration(format!("cannot build http client: {}", e)))
}

fn header_value(s: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(s)
        .map_err(|e| Error::Configuration(format!("invalid header value {:?}: {}", s, e)))
}

/// Proxy for all schemes, from any form `proxy_url` accepts.
pub fn parse_proxy(raw: &str) -> Result<Proxy> {
    let url = proxy_url(raw)?;
    Proxy::all(&url).map_err(|e| Error::Configuration(format!("invalid proxy {:?}: {}", raw, e)))
}

/// Normalise a proxy address to `scheme://[user:pass@]host:port`. Accepted:
/// `user:pass@host:port`, `host:port:user:pass` and `host:port`, each with or
/// without a scheme. A missing scheme means http.
pub fn proxy_url(raw: &str) -> Result<String> {
    let invalid = || {
        Error::Configuration(format!(
            "invalid proxy {:?} (expected host:port, user:pass@host:port or host:port:user:pass)",
            raw
        ))
    };
    let trimmed = raw.trim().trim_end_matches('/');
    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", trimmed),
    };

    let (auth, host, port) = match rest.rsplit_once('@') {
        Some((auth, addr)) => {
            let (host, port) = addr.split_once(':').ok_or_else(invalid)?;
            (Some(auth.to_string()), host, port)
        }
        None => match rest.split(':').collect::<Vec<_>>().as_slice() {
            [host, port] => (None, *host, *port),
            [host, port, user, pass] => (Some(format!("{}:{}", user, pass)), *host, *port),
            _ => return Err(invalid()),
        },
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }

    Ok(match auth {
        Some(auth) => format!("{}://{}@{}:{}", scheme, auth, host, port),
        None => format!("{}://{}:{}", scheme, host, port),
    })
}
