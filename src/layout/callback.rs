use std::io::{Error, ErrorKind, Result};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Mutex;

/// Bridges an asynchronous completion back to a blocking caller.
///
/// The notifier side is a closure handed to an async operation; the waiting
/// side parks until the completion fires. Each instance delivers exactly one
/// value.
pub struct BlockingCallback<T> {
    sender: SyncSender<T>,
    receiver: Mutex<Option<Receiver<T>>>,
}

impl<T: Send + 'static> BlockingCallback<T> {
    pub fn new() -> BlockingCallback<T> {
        let (sender, receiver) = sync_channel(1);
        BlockingCallback { sender, receiver: Mutex::new(Some(receiver)) }
    }

    /// A completion closure that hands its value to the waiting side.
    pub fn notifier(&self) -> impl FnOnce(T) + Send + 'static {
        let sender = self.sender.clone();
        move |value| {
            // The waiter may have given up; nothing to do then.
            let _ = sender.send(value);
        }
    }

    /// Blocks until the notifier fires and returns its value.
    pub fn wait(&self) -> Result<T> {
        if let Some(receiver) = self.receiver.lock().unwrap().take() {
            return receiver
                .recv()
                .map_err(|e| Error::new(ErrorKind::Interrupted, e));
        }
        Err(Error::new(
            ErrorKind::Other,
            "Unsupported wait call to an already exhausted callback",
        ))
    }
}
