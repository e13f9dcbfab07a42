use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::Parser;

use crate::error::{Error, Result};
use crate::login::{CommandLogin, CookieFileLogin, CookieSupplier, Credentials};
use crate::pipeline::{OnDocumentError, RunOptions};
use crate::search::{SearchQuery, DEFAULT_PAGE_SIZE};
use crate::session::{parse_proxy, proxy_url, ClientOptions, Endpoints, DEFAULT_BASE_URL};

#[derive(Parser, Debug)]
#[command(name = "permit_scraper", about = "Construction permit crawler for the Moscow ISOGD registry")]
pub struct Cli {
    /// Document type: GPZU or RNS
    #[arg(long = "type", env = "ARG_TYPE")]
    pub doc_type: Option<String>,
    /// Earliest document date (YYYY-MM-DD), not in the future
    #[arg(long, env = "ARG_DATE_FROM")]
    pub date_from: Option<String>,
    /// Proxy for all outbound traffic: host:port, user:pass@host:port or host:port:user:pass
    #[arg(long, env = "ARG_PROXY")]
    pub proxy: Option<String>,
    /// Portal account email, passed to the login helper
    #[arg(long, env = "ARG_EMAIL")]
    pub email: Option<String>,
    /// Portal account password, passed to the login helper
    #[arg(long, env = "ARG_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Login helper command that prints a JSON cookie array
    #[arg(long, env = "ARG_LOGIN_COMMAND")]
    pub login_command: Option<String>,
    /// Use cookies exported from a browser instead of a login helper
    #[arg(long, env = "ARG_COOKIES_FILE")]
    pub cookies_file: Option<PathBuf>,
    /// Documents extracted concurrently (1 = strictly sequential)
    #[arg(long, env = "ARG_WORKERS", default_value_t = 4)]
    pub workers: usize,
    #[arg(long, env = "ARG_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,
    #[arg(long, env = "ARG_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
    /// What to do when a single document cannot be extracted
    #[arg(long, env = "ARG_ON_DOCUMENT_ERROR", value_enum, default_value_t = OnDocumentError::Skip)]
    pub on_document_error: OnDocumentError,
    /// Re-authentications allowed after the session expires mid-run
    #[arg(long, env = "ARG_MAX_REAUTH", default_value_t = 1)]
    pub max_reauth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    /// Town-planning plan of a land plot.
    Gpzu,
    /// Construction permit.
    Rns,
}

impl DocumentType {
    /// Chapter code the registry search uses for this type.
    pub fn registry_code(self) -> &'static str {
        match self {
            DocumentType::Gpzu => "GPZU",
            DocumentType::Rns => "RS",
        }
    }
}

impl FromStr for DocumentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "GPZU" => Ok(DocumentType::Gpzu),
            "RNS" => Ok(DocumentType::Rns),
            other => Err(Error::Configuration(format!(
                "unknown document type {:?} (expected GPZU or RNS)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoginSource {
    Command(CommandLogin),
    CookieFile(PathBuf),
}

/// Validated run configuration. Built before any network activity.
#[derive(Debug, Clone)]
pub struct Settings {
    pub document_type: DocumentType,
    pub date_from: NaiveDate,
    pub proxy: Option<String>,
    pub credentials: Credentials,
    pub login: LoginSource,
    pub workers: usize,
    pub page_size: u32,
    pub endpoints: Endpoints,
    pub on_document_error: OnDocumentError,
    pub max_reauth: u32,
}

impl Settings {
    pub fn from_cli(cli: Cli, today: NaiveDate) -> Result<Self> {
        let document_type = cli
            .doc_type
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Configuration("document type is not set (ARG_TYPE)".into()))?
            .parse::<DocumentType>()?;

        let raw_date = cli
            .date_from
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Configuration("start date is not set (ARG_DATE_FROM)".into()))?;
        let date_from = parse_start_date(raw_date, today)?;

        // Normalised once; the login helper gets the same URL form.
        let proxy = cli
            .proxy
            .filter(|p| !p.trim().is_empty())
            .map(|p| proxy_url(&p))
            .transpose()?;
        if let Some(p) = &proxy {
            parse_proxy(p)?;
        }

        if cli.workers == 0 {
            return Err(Error::Configuration("workers must be at least 1".into()));
        }
        if cli.page_size == 0 {
            return Err(Error::Configuration("page size must be at least 1".into()));
        }
        let endpoints = Endpoints::new(&cli.base_url)?;

        let credentials = Credentials {
            email: cli.email.unwrap_or_default(),
            password: cli.password.unwrap_or_default(),
        };
        let login = match (cli.cookies_file, cli.login_command.as_deref()) {
            (Some(path), _) => LoginSource::CookieFile(path),
            (None, Some(line)) => {
                let command = CommandLogin::from_command_line(line)
                    .ok_or_else(|| Error::Configuration("login command is empty".into()))?;
                if credentials.email.trim().is_empty() || credentials.password.is_empty() {
                    return Err(Error::Configuration(
                        "login command needs credentials (ARG_EMAIL, ARG_PASSWORD)".into(),
                    ));
                }
                LoginSource::Command(command)
            }
            (None, None) => {
                return Err(Error::Configuration(
                    "no login method: set ARG_LOGIN_COMMAND or ARG_COOKIES_FILE".into(),
                ))
            }
        };

        Ok(Self {
            document_type,
            date_from,
            proxy,
            credentials,
            login,
            workers: cli.workers,
            page_size: cli.page_size,
            endpoints,
            on_document_error: cli.on_document_error,
            max_reauth: cli.max_reauth,
        })
    }

    /// The search lower bound is the day before the requested start date.
    pub fn search_query(&self) -> SearchQuery {
        let since = self.date_from.pred_opt().unwrap_or(self.date_from);
        SearchQuery::new(self.document_type.registry_code(), since).with_page_size(self.page_size)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            endpoints: self.endpoints.clone(),
            proxy: self.proxy.clone(),
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            query: self.search_query(),
            client: self.client_options(),
            credentials: self.credentials.clone(),
            workers: self.workers,
            on_document_error: self.on_document_error,
            max_reauth: self.max_reauth,
        }
    }

    pub fn cookie_supplier(&self) -> Box<dyn CookieSupplier> {
        match &self.login {
            LoginSource::Command(command) => Box::new(command.clone()),
            LoginSource::CookieFile(path) => Box::new(CookieFileLogin::new(path.clone())),
        }
    }
}

fn parse_start_date(raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| Error::Configuration(format!("invalid start date {:?}: {}", raw, e)))?;
    if date > today {
        return Err(Error::Configuration(format!(
            "start date {} is in the future",
            date
        )));
    }
    Ok(date)
}
