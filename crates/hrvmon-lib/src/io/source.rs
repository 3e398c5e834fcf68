use super::text::decode_sample;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, warn};
use std::io::{self, BufRead};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one pull from a sample source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Sample(i64),
    /// Nothing arrived within the source's poll interval; the caller may retry.
    Pending,
    /// The stream ended or the device went away.
    Closed,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read sample stream: {0}")]
    Io(#[from] io::Error),
}

/// Pull-based producer of raw ADC samples.
pub trait SampleSource {
    fn pull(&mut self) -> Result<Pull, SourceError>;

    /// Lines dropped so far because they did not decode to an integer.
    fn dropped(&self) -> u64 {
        0
    }

    /// Release the underlying stream. Further pulls report `Closed`.
    fn close(&mut self) {}
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn pull(&mut self) -> Result<Pull, SourceError> {
        (**self).pull()
    }
    fn dropped(&self) -> u64 {
        (**self).dropped()
    }
    fn close(&mut self) {
        (**self).close()
    }
}

/// Adapts any iterator of samples; the source closes when the iterator ends.
pub struct IterSource<I> {
    iter: Option<I>,
}

impl<I: Iterator<Item = i64>> IterSource<I> {
    pub fn new<T: IntoIterator<IntoIter = I>>(samples: T) -> Self {
        Self {
            iter: Some(samples.into_iter()),
        }
    }
}

impl<I: Iterator<Item = i64>> SampleSource for IterSource<I> {
    fn pull(&mut self) -> Result<Pull, SourceError> {
        Ok(match self.iter.as_mut().and_then(Iterator::next) {
            Some(sample) => Pull::Sample(sample),
            None => Pull::Closed,
        })
    }

    fn close(&mut self) {
        self.iter = None;
    }
}

/// Synchronous line decoder over a buffered reader.
pub struct LineSource<R> {
    reader: Option<R>,
    line: Vec<u8>,
    dropped: u64,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            line: Vec::new(),
            dropped: 0,
        }
    }
}

impl<R: BufRead> SampleSource for LineSource<R> {
    fn pull(&mut self) -> Result<Pull, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Pull::Closed);
        };
        loop {
            self.line.clear();
            if reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(Pull::Closed);
            }
            if let Some(sample) = decode_line(&self.line, &mut self.dropped) {
                return Ok(Pull::Sample(sample));
            }
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Line decoder fed by a dedicated reader thread.
///
/// Blocking reads happen off the caller's thread, so `pull` returns `Pending`
/// after `poll` elapses without data and the caller can observe a shutdown request.
pub struct ThreadedLineSource {
    rx: Option<Receiver<io::Result<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
    poll: Duration,
    dropped: u64,
}

impl ThreadedLineSource {
    pub fn spawn<R: BufRead + Send + 'static>(mut reader: R, poll: Duration) -> Self {
        let (tx, rx) = bounded(1024);
        let handle = std::thread::spawn(move || loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        });
        Self {
            rx: Some(rx),
            handle: Some(handle),
            poll,
            dropped: 0,
        }
    }
}

impl SampleSource for ThreadedLineSource {
    fn pull(&mut self) -> Result<Pull, SourceError> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(Pull::Closed);
        };
        loop {
            match rx.recv_timeout(self.poll) {
                Ok(Ok(line)) => {
                    if let Some(sample) = decode_line(&line, &mut self.dropped) {
                        return Ok(Pull::Sample(sample));
                    }
                }
                Ok(Err(err)) => return Err(SourceError::Io(err)),
                Err(RecvTimeoutError::Timeout) => return Ok(Pull::Pending),
                Err(RecvTimeoutError::Disconnected) => return Ok(Pull::Closed),
            }
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped
    }

    fn close(&mut self) {
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // A reader blocked on a quiet device exits on its next send.
                debug!("detaching sample reader thread");
            }
        }
    }
}

fn decode_line(line: &[u8], dropped: &mut u64) -> Option<i64> {
    let sample = decode_sample(line);
    if sample.is_none() {
        *dropped += 1;
        if dropped.is_power_of_two() {
            warn!("dropped {} undecodable input lines so far", dropped);
        }
    }
    sample
}
