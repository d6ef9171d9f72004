//! HTTP request handlers for the job, batch, model, and file endpoints.

pub mod batches;
pub mod files;
pub mod jobs;
pub mod models;
