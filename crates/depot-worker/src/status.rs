use std::sync::Arc;

use depot_core::models::CompressionInfo;
use depot_db::FileRepository;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Terminal compression outcome for one file.
#[derive(Debug)]
pub struct StatusUpdate {
    pub file_id: Uuid,
    pub info: CompressionInfo,
    /// Answered with whether the store accepted the transition.
    pub(crate) ack: Option<oneshot::Sender<bool>>,
}

impl StatusUpdate {
    pub fn new(file_id: Uuid, info: CompressionInfo) -> Self {
        Self {
            file_id,
            info,
            ack: None,
        }
    }

    pub(crate) fn with_ack(file_id: Uuid, info: CompressionInfo) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                file_id,
                info,
                ack: Some(tx),
            },
            rx,
        )
    }
}

pub type StatusSender = mpsc::UnboundedSender<StatusUpdate>;

/// Drain status updates into the repository until every sender is gone.
pub(crate) async fn run_recorder(
    repository: Arc<dyn FileRepository>,
    mut rx: mpsc::UnboundedReceiver<StatusUpdate>,
) {
    tracing::debug!("Compression status recorder started");

    while let Some(update) = rx.recv().await {
        let applied = match repository
            .complete_compression(update.file_id, &update.info)
            .await
        {
            Ok(true) => {
                tracing::debug!(
                    file_id = %update.file_id,
                    status = %update.info.status,
                    "Compression status recorded"
                );
                true
            }
            Ok(false) => {
                tracing::warn!(
                    file_id = %update.file_id,
                    status = %update.info.status,
                    "Compression status already terminal or record gone, update dropped"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    file_id = %update.file_id,
                    error = %e,
                    "Failed to record compression status"
                );
                false
            }
        };

        if let Some(ack) = update.ack {
            let _ = ack.send(applied);
        }
    }

    tracing::debug!("Compression status recorder stopped");
}
