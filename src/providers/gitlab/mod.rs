mod client;
mod provider;
mod types;

pub use client::{GitLabClient, RetryPolicy};
pub use provider::GitLabHost;
