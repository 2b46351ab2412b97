use std::path::PathBuf;

use clap::{Args, ValueEnum, ValueHint};
use strum::Display;
use url::Url;

use crate::{aggregator::default_concurrency, client::RepoType, model::Visibility};

/// `gitlab-access-report audit`
#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    /// Absolute URL of the GitLab server (e.g. https://gitlab.my-company.com)
    #[arg(long, default_value = "https://gitlab.com/", value_hint = ValueHint::Url)]
    pub server: Url,

    /// Personal access token; prompted for when omitted and stdin is a terminal
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Only audit projects whose full path starts with this prefix (case-insensitive)
    #[arg(long, default_value = "", value_parser = parse_prefix)]
    pub prefix: String,

    /// Filter projects by lifecycle state
    #[arg(long, default_value_t = ProjectState::All)]
    pub state: ProjectState,

    /// Which projects visible to the token are listed
    #[arg(long, default_value_t = GitLabRepoType::Owner)]
    pub scope: GitLabRepoType,

    /// Only list projects with this visibility
    #[arg(long, default_value_t = VisibilityFilter::Private)]
    pub visibility: VisibilityFilter,

    /// Maximum number of membership requests in flight
    #[arg(long, short = 'j', default_value_t = default_concurrency())]
    pub concurrency: usize,

    /// Where to write the HTML report
    #[arg(long, value_name = "PATH", default_value = "output.html")]
    pub html_out: PathBuf,

    /// Optional path to also write the report as JSON
    #[arg(long, value_name = "PATH")]
    pub json_out: Option<PathBuf>,
}

fn parse_prefix(raw: &str) -> Result<String, std::convert::Infallible> {
    Ok(raw.trim().to_string())
}

/// Project lifecycle filter
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum ProjectState {
    /// Active and archived projects
    All,
    /// Only active projects
    Active,
    /// Only archived projects
    Archived,
}

impl ProjectState {
    pub fn include_active(self) -> bool {
        matches!(self, ProjectState::All | ProjectState::Active)
    }

    pub fn include_archived(self) -> bool {
        matches!(self, ProjectState::All | ProjectState::Archived)
    }
}

/// GitLab repository type filter
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum GitLabRepoType {
    /// All projects the token can see
    All,
    /// Only projects owned by the token's user
    Owner,
    /// Only projects where the token's user is a member
    Member,
}

impl From<GitLabRepoType> for RepoType {
    fn from(val: GitLabRepoType) -> Self {
        match val {
            GitLabRepoType::All => RepoType::All,
            GitLabRepoType::Owner => RepoType::Owner,
            GitLabRepoType::Member => RepoType::Member,
        }
    }
}

/// Project visibility filter
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum VisibilityFilter {
    Private,
    Internal,
    Public,
    /// Do not filter by visibility
    Any,
}

impl VisibilityFilter {
    pub fn visibility(self) -> Option<Visibility> {
        match self {
            VisibilityFilter::Private => Some(Visibility::Private),
            VisibilityFilter::Internal => Some(Visibility::Internal),
            VisibilityFilter::Public => Some(Visibility::Public),
            VisibilityFilter::Any => None,
        }
    }
}
