//! WhatJobs API client: request building, bounded fetching and XML parsing.

mod client;
mod parser;

pub use client::{ApiError, JobsApi, RequestContext, SearchParams, REQUEST_TIMEOUT};
pub use parser::{parse_job_date, parse_jobs, JobRecord};
