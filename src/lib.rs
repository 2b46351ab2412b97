pub mod aggregator;
pub mod audit;
pub mod cli;
pub mod client;
pub mod error;
pub mod filter;
pub mod gitlab;
pub mod model;
pub mod progress;
pub mod reporter;

pub use aggregator::{Aggregation, Aggregator, AuditRequest, FetchFailure, ProgressObserver};
pub use client::{DirectoryClient, MembershipClient, RepositoryQuery};
pub use error::{AuditError, ErrorKind};
pub use model::{AccessIndex, AccessLevel, AccessRecord, Member, Repository, Visibility};
