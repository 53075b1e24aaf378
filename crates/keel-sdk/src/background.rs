use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to the monitor loop and retention sweep.
///
/// Dropping it also stops the tasks (their shutdown channel closes), but
/// only [`shutdown`](Self::shutdown) waits for them to finish.
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub(crate) fn new(shutdown: watch::Sender<bool>) -> Self {
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    /// Names of the running tasks.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for (name, handle) in self.handles {
            match handle.await {
                Ok(()) => debug!(task = name, "background task stopped"),
                Err(e) => warn!(task = name, error = %e, "background task ended abnormally"),
            }
        }
    }
}
