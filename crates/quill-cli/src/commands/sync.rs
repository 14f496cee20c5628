use quill_core::sync::RoundOutcome;
use quill_core::SyncService;

use crate::error::CliError;

/// Run one round and return the resulting status line
pub async fn run_sync(service: &SyncService) -> Result<String, CliError> {
    let Some(event) = service.sync_now().await else {
        return Ok(service.status().to_string());
    };

    match event.outcome {
        RoundOutcome::Saved { .. } => {
            tracing::info!(
                round = event.round,
                saved = event.saved.len(),
                retrieved = event.retrieved.len(),
                "Sync completed"
            );
            Ok(service.status().to_string())
        }
        RoundOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
    }
}
