//! Delivery failures and the handler they are reported to
//!
//! Broadcast code never returns delivery errors to game logic. A failure to
//! reach one connection is handed to a [`FaultHandler`] and the broadcast
//! carries on with the remaining connections.

use log::{error, warn};
use shared::ProtocolError;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode packet: {0}")]
    Encode(#[from] ProtocolError),
    #[error("connection to player {player_id} is closed")]
    ConnectionClosed { player_id: u32 },
    #[error("background task failed: {0}")]
    Task(String),
}

/// Receives failures from best-effort operations
pub trait FaultHandler: Send + Sync {
    fn handle_fault(&self, fault: BroadcastError);
}

/// Default handler: writes every fault to the log
#[derive(Debug, Default)]
pub struct LoggingFaultHandler;

impl FaultHandler for LoggingFaultHandler {
    fn handle_fault(&self, fault: BroadcastError) {
        match fault {
            // Expected when a client vanishes between resolution and send
            BroadcastError::ConnectionClosed { .. } => warn!("{}", fault),
            _ => error!("{}", fault),
        }
    }
}

/// Runs a fire-and-forget task, reporting its error or panic to `faults`
pub fn run_async<F>(faults: Arc<dyn FaultHandler>, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), BroadcastError>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::spawn(task).await {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => faults.handle_fault(fault),
            Err(join_error) => faults.handle_fault(BroadcastError::Task(join_error.to_string())),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingFaults;

    #[tokio::test]
    async fn test_run_async_success_reports_nothing() {
        let faults = Arc::new(RecordingFaults::default());
        let handle = run_async(faults.clone(), async { Ok(()) });
        tokio_test::assert_ok!(handle.await);
        assert!(faults.messages().is_empty());
    }

    #[tokio::test]
    async fn test_run_async_reports_error() {
        let faults = Arc::new(RecordingFaults::default());
        let handle = run_async(faults.clone(), async {
            Err(BroadcastError::ConnectionClosed { player_id: 3 })
        });
        tokio_test::assert_ok!(handle.await);
        assert_eq!(
            faults.messages(),
            vec!["connection to player 3 is closed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_async_reports_panic() {
        let faults = Arc::new(RecordingFaults::default());
        let handle = run_async(faults.clone(), async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        tokio_test::assert_ok!(handle.await);

        let messages = faults.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("background task failed"));
    }

    #[test]
    fn test_logging_handler_does_not_panic() {
        let handler = LoggingFaultHandler;
        handler.handle_fault(BroadcastError::ConnectionClosed { player_id: 1 });
        handler.handle_fault(BroadcastError::Task("gone".to_string()));
    }
}
