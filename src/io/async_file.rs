use std::fs::{File, OpenOptions};
use std::io::Result;
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::io::aligned::AlignedBuf;

/// Completion handler for an asynchronous transfer. It receives the buffer
/// back together with the outcome and is invoked exactly once, from an I/O
/// thread.
pub type IoCompletion = Box<dyn FnOnce(AlignedBuf, Result<()>) + Send>;

/// A file supporting positional transfers of aligned buffers, synchronously
/// from the calling thread or asynchronously from the file's own threads.
///
/// Buffers are owned by the request for the duration of the transfer and
/// handed back through the completion.
pub trait AsyncFile: Send + Sync {
    /// Reads exactly `buf.len()` bytes at `offset`.
    fn read(&self, offset: u64, buf: &mut AlignedBuf) -> Result<()>;

    /// Writes the whole buffer at `offset`, extending the file if needed.
    fn write(&self, offset: u64, buf: &AlignedBuf) -> Result<()>;

    /// Queues a read of `buf.len()` bytes at `offset`.
    fn async_read(&self, offset: u64, buf: AlignedBuf, complete: IoCompletion);

    /// Queues a write of the whole buffer at `offset`.
    fn async_write(&self, offset: u64, buf: AlignedBuf, complete: IoCompletion);

    /// Shrinks or extends the file to `new_length` bytes.
    fn truncate(&self, new_length: u64) -> Result<()>;

    /// Current physical length of the file.
    fn len(&self) -> Result<u64>;
}

enum IoOp {
    Read,
    Write,
}

struct IoRequest {
    op: IoOp,
    offset: u64,
    buf: AlignedBuf,
    complete: IoCompletion,
}

/// Pending requests tolerated before `async_read`/`async_write` block the
/// submitter.
const QUEUE_CAPACITY: usize = 128;

/// [`AsyncFile`] over a regular file, with a small pool of worker threads
/// draining a bounded request queue.
pub struct PosixFile {
    file: Arc<File>,
    sender: Option<SyncSender<IoRequest>>,
    workers: Vec<JoinHandle<()>>,
}

impl PosixFile {
    pub fn open(path: &Path, create: bool, io_threads: usize) -> Result<PosixFile> {
        assert!(io_threads > 0, "at least one I/O worker is required");

        let file = Arc::new(
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(create)
                .open(path)?,
        );

        let (sender, receiver): (SyncSender<IoRequest>, Receiver<IoRequest>) =
            sync_channel(QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..io_threads)
            .map(|_| {
                let file = file.clone();
                let receiver = receiver.clone();
                thread::spawn(move || loop {
                    let request = receiver.lock().unwrap().recv();
                    match request {
                        Ok(mut request) => {
                            let result = match request.op {
                                IoOp::Read => read_at(&file, request.offset, request.buf.as_mut_slice()),
                                IoOp::Write => write_at(&file, request.offset, request.buf.as_slice()),
                            };
                            (request.complete)(request.buf, result);
                        }
                        // The sender is gone, the file is shutting down.
                        Err(_) => break,
                    }
                })
            })
            .collect();

        Ok(PosixFile { file, sender: Some(sender), workers })
    }

    fn submit(&self, request: IoRequest) {
        self.sender
            .as_ref()
            .expect("the I/O queue outlives every submitter")
            .send(request)
            .expect("the I/O workers outlive every submitter");
    }
}

impl AsyncFile for PosixFile {
    fn read(&self, offset: u64, buf: &mut AlignedBuf) -> Result<()> {
        read_at(&self.file, offset, buf.as_mut_slice())
    }

    fn write(&self, offset: u64, buf: &AlignedBuf) -> Result<()> {
        write_at(&self.file, offset, buf.as_slice())
    }

    fn async_read(&self, offset: u64, buf: AlignedBuf, complete: IoCompletion) {
        self.submit(IoRequest { op: IoOp::Read, offset, buf, complete });
    }

    fn async_write(&self, offset: u64, buf: AlignedBuf, complete: IoCompletion) {
        self.submit(IoRequest { op: IoOp::Write, offset, buf, complete });
    }

    fn truncate(&self, new_length: u64) -> Result<()> {
        self.file.set_len(new_length)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl Drop for PosixFile {
    fn drop(&mut self) {
        // Closing the channel stops the workers once the queue drains.
        drop(self.sender.take());
        // A completion may drop the last handle to the file from a worker
        // thread; that worker must not join itself.
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    use std::io::{Error, ErrorKind};
    use std::os::windows::fs::FileExt;
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(Error::new(ErrorKind::UnexpectedEof, "failed to fill whole buffer"));
        }
        pos += n;
    }
    Ok(())
}

#[cfg(windows)]
fn write_at(file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    use std::io::{Error, ErrorKind};
    use std::os::windows::fs::FileExt;
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_write(&buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(Error::new(ErrorKind::WriteZero, "failed to write whole buffer"));
        }
        pos += n;
    }
    Ok(())
}
