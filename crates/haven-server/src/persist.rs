//! Bridge from the router's persistence capability to the JSON store.
//!
//! The router hands over finished documents synchronously; the actual
//! disk writes are queued to one writer task so the routing loop never
//! waits on I/O and two writes to the same document never race. Failed
//! writes are logged and otherwise ignored, matching the fire-and-forget
//! contract.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use haven_core::Persist;
use haven_shared::snapshot::{CommunitiesDoc, IdentityDoc, MessagesDoc};
use haven_store::JsonFileStore;

enum WriteJob {
    Communities(CommunitiesDoc),
    Messages(MessagesDoc),
    Identity(IdentityDoc),
}

pub struct StorePersist {
    jobs: mpsc::UnboundedSender<WriteJob>,
}

impl StorePersist {
    /// Spawn the writer task and return the queueing handle.
    pub fn spawn(store: Arc<JsonFileStore>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let store = store.clone();
                let result = tokio::task::spawn_blocking(move || match job {
                    WriteJob::Communities(doc) => store.save_communities(&doc),
                    WriteJob::Messages(doc) => store.save_messages(&doc),
                    WriteJob::Identity(doc) => store.save_identity(&doc),
                })
                .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(error = %err, "snapshot write failed"),
                    Err(err) => error!(error = %err, "snapshot writer panicked"),
                }
            }
        });
        Self { jobs }
    }
}

impl Persist for StorePersist {
    fn save_communities(&self, doc: CommunitiesDoc) {
        let _ = self.jobs.send(WriteJob::Communities(doc));
    }

    fn save_messages(&self, doc: MessagesDoc) {
        let _ = self.jobs.send(WriteJob::Messages(doc));
    }

    fn save_identity(&self, doc: IdentityDoc) {
        let _ = self.jobs.send(WriteJob::Identity(doc));
    }
}
