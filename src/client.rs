use async_trait::async_trait;

use crate::{
    error::AuditError,
    model::{Member, Repository, Visibility},
};

/// Which projects of the credential's owner a listing covers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RepoType {
    /// Every project the credential can see.
    All,
    /// Only projects owned by the credential's user.
    #[default]
    Owner,
    /// Only projects the credential's user is a member of.
    Member,
}

/// Criteria for one directory listing pass. Listings are ordered by name, ascending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryQuery {
    pub archived: bool,
    pub repo_type: RepoType,
    /// `None` lists every visibility.
    pub visibility: Option<Visibility>,
}

/// Lists the repositories visible to a credential.
///
/// Implementations return [`AuditError::DirectoryUnavailable`] on any transport or
/// authorization failure.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_repositories(&self, query: &RepositoryQuery)
        -> Result<Vec<Repository>, AuditError>;
}

/// Fetches the member roster of a single repository.
///
/// Implementations return [`AuditError::MembershipUnavailable`] on failure.
#[async_trait]
pub trait MembershipClient: Send + Sync {
    async fn list_members(&self, repository: &Repository) -> Result<Vec<Member>, AuditError>;
}
