pub mod checks;
pub mod gitlab;
pub mod partition_lock;
pub mod sanitizer;

pub use checks::{
    translate, CheckRunConclusion, CheckRunDescriptor, CheckRunState, CheckRunStatus, JobStatus,
};
pub use gitlab::{GitLabEvent, JobEvent, PipelineEvent, GITLAB_TOKEN_HEADER};
pub use partition_lock::{PartitionGuard, PartitionLock};
pub use sanitizer::redact_headers;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Version string reported by the server and the CLI.
///
/// The crate version, suffixed with a short git hash when the packaging
/// environment provides one.
pub fn version() -> String {
    match option_env!("HOOKMIRROR_GIT_HASH") {
        Some(hash) if !hash.is_empty() => {
            format!("{}+{}", built_info::PKG_VERSION, &hash[..8.min(hash.len())])
        }
        _ => built_info::PKG_VERSION.to_string(),
    }
}
