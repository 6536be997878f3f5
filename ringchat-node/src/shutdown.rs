use tokio::sync::broadcast;

/// Cooperative shutdown signal handed to every background task spawned by a
/// peer (readers, keep-alive pings, the election timer, the ring-repair
/// loop), so `leave()` can unwind them deterministically instead of relying
/// on socket teardown to unblock a `select!`.
#[derive(Debug)]
pub struct Shutdown {
    shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Shutdown {
        Shutdown {
            shutdown: self.shutdown,
            notify: self.notify.resubscribe(),
        }
    }
}
