use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

use crate::{
    client::{DirectoryClient, MembershipClient, RepoType, RepositoryQuery},
    error::AuditError,
    model::{AccessLevel, Member, Repository, Visibility},
};

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters left as-is when a namespaced path is used as a project id.
const PROJECT_ID: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

#[derive(Deserialize)]
struct GitLabProject {
    path_with_namespace: String,
    #[serde(default)]
    archived: bool,
    visibility: Visibility,
}

#[derive(Deserialize)]
struct GitLabMember {
    username: String,
    access_level: u32,
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("request to {url} failed: {source}")]
    Transport { url: Url, source: reqwest::Error },

    #[error("{url} returned {status}")]
    Status { url: Url, status: StatusCode },
}

/// GitLab REST v4 client implementing both the directory and membership contracts.
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    server_url: Url,
    api_url: Url,
    token: String,
}

impl GitLabClient {
    /// `server_url` is the instance root such as `https://gitlab.com/`.
    pub fn new(server_url: &Url, token: &str, ignore_certs: bool) -> Result<Self> {
        let server_url = with_trailing_slash(server_url);
        let api_url = server_url.join("api/v4/").context("Failed to build GitLab API URL")?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(ignore_certs)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, server_url, api_url, token: token.to_string() })
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    async fn get_paginated<T: DeserializeOwned>(&self, base: Url) -> Result<Vec<T>, RequestError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let resp = self
                .http
                .get(url.clone())
                .header("PRIVATE-TOKEN", &self.token)
                .header(header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|source| RequestError::Transport { url: url.clone(), source })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(RequestError::Status { url, status });
            }
            let next_page = resp
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .map(|v| v.parse::<u32>().ok());

            let page_items: Vec<T> = resp
                .json()
                .await
                .map_err(|source| RequestError::Transport { url: url.clone(), source })?;
            let fetched = page_items.len();
            items.extend(page_items);

            // An empty `X-Next-Page` marks the last page; without the header, a short page does.
            page = match next_page {
                Some(Some(next)) if fetched > 0 => next,
                Some(_) => break,
                None if fetched == PER_PAGE => page + 1,
                None => break,
            };
        }
        Ok(items)
    }

    fn projects_url(&self, query: &RepositoryQuery) -> Result<Url, url::ParseError> {
        let mut url = self.api_url.join("projects")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("archived", if query.archived { "true" } else { "false" })
                .append_pair("order_by", "name")
                .append_pair("sort", "asc");
            if let Some(visibility) = query.visibility {
                pairs.append_pair("visibility", &visibility.to_string());
            }
            match query.repo_type {
                RepoType::Owner => {
                    pairs.append_pair("owned", "true");
                }
                RepoType::Member => {
                    pairs.append_pair("membership", "true");
                }
                RepoType::All => {}
            }
        }
        Ok(url)
    }

    fn members_url(&self, repository: &Repository) -> Result<Url, url::ParseError> {
        let id = utf8_percent_encode(&repository.path, PROJECT_ID);
        self.api_url.join(&format!("projects/{id}/members/all"))
    }
}

#[async_trait]
impl DirectoryClient for GitLabClient {
    async fn list_repositories(
        &self,
        query: &RepositoryQuery,
    ) -> Result<Vec<Repository>, AuditError> {
        let url = self
            .projects_url(query)
            .map_err(|e| AuditError::DirectoryUnavailable(format!("invalid projects URL: {e}")))?;
        let projects: Vec<GitLabProject> = self
            .get_paginated(url)
            .await
            .map_err(|e| AuditError::DirectoryUnavailable(e.to_string()))?;
        Ok(projects
            .into_iter()
            .map(|p| Repository::new(p.path_with_namespace, p.archived, p.visibility))
            .collect())
    }
}

#[async_trait]
impl MembershipClient for GitLabClient {
    async fn list_members(&self, repository: &Repository) -> Result<Vec<Member>, AuditError> {
        let unavailable = |message: String| AuditError::MembershipUnavailable {
            repository: repository.path.clone(),
            message,
        };
        let url = self
            .members_url(repository)
            .map_err(|e| unavailable(format!("invalid members URL: {e}")))?;
        let members: Vec<GitLabMember> =
            self.get_paginated(url).await.map_err(|e| unavailable(e.to_string()))?;

        members
            .into_iter()
            .map(|m| match AccessLevel::from_code(m.access_level) {
                Some(access_level) => Ok(Member { username: m.username, access_level }),
                None => Err(unavailable(format!(
                    "unrecognised access level {} for `{}`",
                    m.access_level, m.username
                ))),
            })
            .collect()
    }
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Link to the members page of a project, e.g. `https://gitlab.com/org/app/-/project_members`.
pub fn project_members_url(server_url: &Url, repository_path: &str) -> String {
    let base = with_trailing_slash(server_url);
    format!("{}{}/-/project_members", base, repository_path.trim_matches('/'))
}
