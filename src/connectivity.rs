//! Connectivity monitor: a passive observer the host pushes online/offline
//! events into. Consumers subscribe to the watch channel; nothing polls.

use tokio::sync::watch;

use crate::types::PipelineMode;

pub struct ConnectivityMonitor {
    tx: watch::Sender<PipelineMode>,
}

impl ConnectivityMonitor {
    pub fn new(initial: PipelineMode) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn mode(&self) -> PipelineMode {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.mode() == PipelineMode::Online
    }

    /// Host-driven online/offline observation.
    pub fn set_online(&self, online: bool) {
        let mode = if online {
            PipelineMode::Online
        } else {
            PipelineMode::Offline
        };
        self.set_mode(mode);
    }

    pub fn set_mode(&self, mode: PipelineMode) {
        // send_replace delivers even when no subscriber exists yet.
        self.tx.send_replace(mode);
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineMode> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(PipelineMode::Online)
    }
}
