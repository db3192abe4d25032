pub mod commit_message_generator;
pub mod commit_validator;
pub mod error;
pub mod git_cli;
pub mod git_ops;

pub use commit_message_generator::{CommitMessageError, CommitMessageGenerator};
pub use commit_validator::{CommitValidator, ValidationWarning, WarningSeverity};
pub use error::GitOpsError;
pub use git_cli::{GitOutput, GitRunner, RealGitRunner};
pub use git_ops::{is_conflict_output, GitOps};
