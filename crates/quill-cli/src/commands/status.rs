use quill_core::{ContentType, SyncService};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub notes: usize,
    pub tags: usize,
    pub pending: usize,
    pub remote: Option<String>,
    pub has_sync_token: bool,
}

pub fn status_report(service: &SyncService) -> StatusReport {
    StatusReport {
        notes: service.items(ContentType::Note).len(),
        tags: service.items(ContentType::Tag).len(),
        pending: service.pending_count(),
        remote: service.settings().sync_endpoint.clone(),
        has_sync_token: service.with_session(|session| session.sync_token().is_some()),
    }
}

pub fn run_status(service: &SyncService, as_json: bool) -> Result<(), CliError> {
    let report = status_report(service);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Notes:   {}", report.notes);
    println!("Tags:    {}", report.tags);
    println!("Pending: {}", report.pending);
    match &report.remote {
        Some(endpoint) => println!("Remote:  {endpoint}"),
        None => println!("Remote:  none (local only)"),
    }
    Ok(())
}
