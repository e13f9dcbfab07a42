use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::{Error, Result};
use crate::session::AuthCookie;

#[derive(Clone, Default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// The browser login, seen from the crawler: something that eventually
/// hands back the portal's auth cookies.
#[async_trait]
pub trait CookieSupplier: Send + Sync {
    async fn obtain_auth_cookies(
        &self,
        credentials: &Credentials,
        proxy: Option<&str>,
    ) -> Result<Vec<AuthCookie>>;
}

/// Runs an external login helper (typically a browser-automation script).
/// Credentials and proxy go in through the environment; the helper prints a
/// JSON cookie array on stdout.
#[derive(Debug, Clone)]
pub struct CommandLogin {
    program: String,
    args: Vec<String>,
}

impl CommandLogin {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line on whitespace; no shell quoting.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl CookieSupplier for CommandLogin {
    async fn obtain_auth_cookies(
        &self,
        credentials: &Credentials,
        proxy: Option<&str>,
    ) -> Result<Vec<AuthCookie>> {
        info!("Running login helper {}", self.program);
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("LOGIN_EMAIL", &credentials.email)
            .env("LOGIN_PASSWORD", &credentials.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        match proxy {
            Some(p) => cmd.env("LOGIN_PROXY", p),
            None => cmd.env_remove("LOGIN_PROXY"),
        };

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::LoginFailed(format!("cannot run {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(Error::LoginFailed(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        parse_cookies(&output.stdout, &self.program)
    }
}

/// Cookies exported earlier from a logged-in browser.
#[derive(Debug, Clone)]
pub struct CookieFileLogin {
    path: PathBuf,
}

impl CookieFileLogin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CookieSupplier for CookieFileLogin {
    async fn obtain_auth_cookies(
        &self,
        _credentials: &Credentials,
        _proxy: Option<&str>,
    ) -> Result<Vec<AuthCookie>> {
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            Error::LoginFailed(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        parse_cookies(&raw, &self.path.display().to_string())
    }
}

fn parse_cookies(raw: &[u8], source: &str) -> Result<Vec<AuthCookie>> {
    let cookies: Vec<AuthCookie> = serde_json::from_slice(raw)
        .map_err(|e| Error::LoginFailed(format!("{} did not yield a cookie array: {}", source, e)))?;
    info!("Login produced {} cookies", cookies.len());
    Ok(cookies)
}
