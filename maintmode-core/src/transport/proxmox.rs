//! Proxmox VE API client
//!
//! Authenticates once with a username and password, keeps the returned ticket
//! and CSRF prevention token in a [`Session`], and attaches both to every
//! subsequent request. The session is never renewed; a run that outlives the
//! ticket lifetime (two hours on a default cluster) will start failing with
//! 401 responses.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use url::Url;

use crate::api::ClusterApi;
use crate::config::ApiConfig;
use crate::error::{MaintError, MaintResult};
use crate::types::{
    ClusterResource, HaGroupRecord, HaResourceRecord, Membership, NodeRecord, ResourceAssignment,
    Sid,
};

const AUTH_COOKIE: &str = "PVEAuthCookie";
const CSRF_HEADER: &str = "CSRFPreventionToken";

/// Every API response wraps its payload in `{"data": ...}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
    #[serde(default)]
    username: Option<String>,
}

/// Authenticated API session: ticket cookie plus anti-forgery token
#[derive(Clone)]
pub struct Session {
    ticket: String,
    csrf_token: String,
    username: String,
}

impl Session {
    pub fn new(
        ticket: impl Into<String>,
        csrf_token: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            ticket: ticket.into(),
            csrf_token: csrf_token.into(),
            username: username.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn cookie(&self) -> String {
        format!("{}={}", AUTH_COOKIE, self.ticket)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("ticket", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct GroupForm<'a> {
    group: &'a str,
    nodes: String,
}

#[derive(Serialize)]
struct ResourceForm<'a> {
    sid: String,
    group: &'a str,
    #[serde(rename = "type")]
    resource_type: &'a str,
    state: String,
}

/// HTTPS client for the Proxmox VE JSON API
pub struct ProxmoxClient {
    http: reqwest::Client,
    base: Url,
    session: Session,
}

impl ProxmoxClient {
    /// Authenticate against the API and return a client holding the session
    pub async fn login(config: &ApiConfig) -> MaintResult<Self> {
        let http = build_http_client(config)?;
        let base = config.base_url()?;
        let session = authenticate(&http, &base, &config.username, &config.password).await?;

        tracing::info!("Token successfully retrieved for {}", session.username());
        debug!("Session: {:?}", session);

        Ok(Self {
            http,
            base,
            session,
        })
    }

    /// Build a client around an existing session
    pub fn with_session(config: &ApiConfig, session: Session) -> MaintResult<Self> {
        Ok(Self {
            http: build_http_client(config)?,
            base: config.base_url()?,
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn url(&self, segments: &[&str]) -> MaintResult<Url> {
        endpoint(&self.base, segments)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str], operation: &str) -> MaintResult<T> {
        let url = self.url(segments)?;
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header(reqwest::header::COOKIE, self.session.cookie())
            .send()
            .await
            .map_err(|e| MaintError::request(operation, e))?;

        let body = check_status(response, operation)
            .await?
            .bytes()
            .await
            .map_err(|e| MaintError::request(operation, e))?;

        decode(operation, &body)
    }

    async fn post_form<F: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        form: &F,
        operation: &str,
    ) -> MaintResult<()> {
        let url = self.url(segments)?;
        debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .header(reqwest::header::COOKIE, self.session.cookie())
            .header(CSRF_HEADER, &self.session.csrf_token)
            .form(form)
            .send()
            .await
            .map_err(|e| MaintError::request(operation, e))?;

        check_status(response, operation).await.map(|_| ())
    }

    async fn delete(&self, segments: &[&str], operation: &str) -> MaintResult<()> {
        let url = self.url(segments)?;
        debug!("DELETE {}", url);

        let response = self
            .http
            .delete(url)
            .header(reqwest::header::COOKIE, self.session.cookie())
            .header(CSRF_HEADER, &self.session.csrf_token)
            .send()
            .await
            .map_err(|e| MaintError::request(operation, e))?;

        check_status(response, operation).await.map(|_| ())
    }
}

#[async_trait]
impl ClusterApi for ProxmoxClient {
    async fn nodes(&self) -> MaintResult<Vec<NodeRecord>> {
        self.get(&["nodes"], "list nodes").await
    }

    async fn cluster_resources(&self) -> MaintResult<Vec<ClusterResource>> {
        self.get(&["cluster", "resources"], "list cluster resources")
            .await
    }

    async fn ha_groups(&self) -> MaintResult<Vec<HaGroupRecord>> {
        self.get(&["cluster", "ha", "groups"], "list HA groups").await
    }

    async fn ha_resources(&self) -> MaintResult<Vec<HaResourceRecord>> {
        self.get(&["cluster", "ha", "resources"], "list HA resources")
            .await
    }

    async fn create_ha_group(&self, name: &str, members: &Membership) -> MaintResult<()> {
        let form = GroupForm {
            group: name,
            nodes: members.to_string(),
        };
        self.post_form(&["cluster", "ha", "groups"], &form, "create HA group")
            .await
    }

    async fn delete_ha_group(&self, name: &str) -> MaintResult<()> {
        self.delete(&["cluster", "ha", "groups", name], "delete HA group")
            .await
    }

    async fn create_ha_resource(&self, assignment: &ResourceAssignment) -> MaintResult<()> {
        let form = ResourceForm {
            sid: assignment.sid.to_string(),
            group: &assignment.group,
            resource_type: assignment.resource_type(),
            state: assignment.state.to_string(),
        };
        self.post_form(&["cluster", "ha", "resources"], &form, "create HA resource")
            .await
    }

    async fn delete_ha_resource(&self, sid: &Sid) -> MaintResult<()> {
        let sid = sid.to_string();
        self.delete(&["cluster", "ha", "resources", &sid], "delete HA resource")
            .await
    }
}

fn build_http_client(config: &ApiConfig) -> MaintResult<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .timeout(config.timeout)
        .danger_accept_invalid_certs(!config.verify_tls)
        .build()
        .map_err(|e| MaintError::request("build HTTP client", e))
}

async fn authenticate(
    http: &reqwest::Client,
    base: &Url,
    username: &str,
    password: &str,
) -> MaintResult<Session> {
    let operation = "request ticket";
    let url = endpoint(base, &["access", "ticket"])?;

    let response = http
        .post(url)
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .map_err(|e| MaintError::request(operation, e))?;

    let status = response.status();
    if !status.is_success() {
        let reason = failure_reason(status, response).await;
        return Err(MaintError::Authentication {
            status: status.as_u16(),
            reason,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| MaintError::request(operation, e))?;
    let ticket: TicketData = decode(operation, &body)?;

    Ok(Session {
        ticket: ticket.ticket,
        csrf_token: ticket.csrf_token,
        username: ticket.username.unwrap_or_else(|| username.to_string()),
    })
}

/// Join path segments onto the API base, percent-encoding each one
fn endpoint(base: &Url, segments: &[&str]) -> MaintResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| MaintError::configuration("api.host", format!("cannot use {} as a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn check_status(response: Response, operation: &str) -> MaintResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let reason = failure_reason(status, response).await;
    Err(MaintError::Transport {
        operation: operation.to_string(),
        status: status.as_u16(),
        reason,
    })
}

/// Canonical reason plus whatever the API put in the body
async fn failure_reason(status: StatusCode, response: Response) -> String {
    let canonical = status.canonical_reason().unwrap_or("Unknown");
    match response.text().await {
        Ok(body) if !body.trim().is_empty() => format!("{}: {}", canonical, body.trim()),
        _ => canonical.to_string(),
    }
}

fn decode<T: DeserializeOwned>(operation: &str, body: &[u8]) -> MaintResult<T> {
    serde_json::from_slice::<Envelope<T>>(body)
        .map(|envelope| envelope.data)
        .map_err(|source| MaintError::Deserialization {
            operation: operation.to_string(),
            source,
        })
}
