use std::time::Duration;

use tokio::sync::watch;

use crate::core::{StoreError, StoreResult};

/// Creates a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Owner side: cancelling interrupts every sleep waiting on a linked signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Sleep for `duration`, failing with [`StoreError::Interrupted`] if the
/// signal fires first. A dropped handle never interrupts.
pub async fn pause(duration: Duration, signal: Option<&CancelSignal>) -> StoreResult<()> {
    let Some(signal) = signal else {
        tokio::time::sleep(duration).await;
        return Ok(());
    };

    if signal.is_cancelled() {
        return Err(StoreError::Interrupted("wait cancelled before sleeping".into()));
    }

    let mut rx = signal.rx.clone();
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    tokio::select! {
        _ = &mut sleep => Ok(()),
        fired = async { rx.wait_for(|cancelled| *cancelled).await.is_ok() } => {
            if fired {
                return Err(StoreError::Interrupted(format!(
                    "wait of {:?} cancelled",
                    duration
                )));
            }
            sleep.await;
            Ok(())
        }
    }
}
