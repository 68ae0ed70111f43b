mod gitlab;
mod memory;

pub use gitlab::{GitLabClient, GitLabHost, RetryPolicy};
pub use memory::{FixtureBuild, FixtureJob, HostFixture, MemoryHost};
