use std::{
    fs,
    path::Path,
    sync::{
        mpsc::{self, TrySendError},
        Arc, RwLock, RwLockReadGuard,
    },
};

use tracing::{debug, error, trace};

use crate::common::{error::SwapError, types::SerdeGenericTrait};

enum PersisterMsg {
    Persist,
    Close,
}

/// Durable write-behind for a single trade or offer record. Mutation sites
/// call `queue()`; the sync_channel of depth 1 coalesces bursts so the
/// persistence thread writes at most one snapshot per completed write.
pub(crate) struct Persister {
    persist_tx: mpsc::SyncSender<PersisterMsg>,
    task_handle: std::thread::JoinHandle<()>,
}

impl Persister {
    pub(crate) fn restore(data_path: impl AsRef<Path>) -> Result<String, SwapError> {
        let json: String = std::fs::read_to_string(data_path.as_ref())?;
        Ok(json)
    }

    pub(crate) fn new(
        store: Arc<RwLock<dyn SerdeGenericTrait>>,
        data_path: impl AsRef<Path>,
    ) -> Self {
        let data_path_buf = data_path.as_ref().to_path_buf();

        let (persist_tx, persist_rx) = mpsc::sync_channel(1);
        let task_handle = std::thread::spawn(move || loop {
            match persist_rx.recv() {
                Ok(PersisterMsg::Persist) => {
                    let store = match store.read() {
                        Ok(store) => store,
                        Err(error) => {
                            error!("Error reading store for persistence - {}", error);
                            continue;
                        }
                    };
                    if let Some(error) = Self::persist(store, &data_path_buf).err() {
                        error!(
                            "Error persisting data to path {} - {}",
                            data_path_buf.display(),
                            error
                        );
                    }
                }
                Ok(PersisterMsg::Close) => break,
                Err(err) => {
                    error!("Persistence channel recv Error - {}", err);
                    break;
                }
            }
        });

        Self {
            persist_tx,
            task_handle,
        }
    }

    fn persist(
        store: RwLockReadGuard<'_, dyn SerdeGenericTrait>,
        data_path: impl AsRef<Path>,
    ) -> Result<(), SwapError> {
        let json = serde_json::to_string(&*store)?;
        debug!(
            "Persisting record to path {}",
            data_path.as_ref().display()
        );
        fs::write(data_path.as_ref(), json)?;
        Ok(())
    }

    pub(crate) fn queue(&self) {
        match self.persist_tx.try_send(PersisterMsg::Persist) {
            Ok(_) => {}
            Err(error) => match error {
                TrySendError::Full(_) => {
                    trace!("Persistence channel full")
                }
                TrySendError::Disconnected(_) => {
                    error!("Persistence channel disconnected")
                }
            },
        }
    }

    pub(crate) fn terminate(self) {
        if self.persist_tx.send(PersisterMsg::Close).is_err() {
            error!("Persistence channel already disconnected at terminate");
            return;
        }
        if let Some(error) = self.task_handle.join().err() {
            error!("Error terminating persistence thread - {:?}", error);
        }
    }
}
