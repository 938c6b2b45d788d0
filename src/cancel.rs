//! Cancellation of registry calls

use crate::error::*;
use std::{
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Abort flag and optional deadline shared by all network calls of a run
///
/// Clones share the abort flag, so the handle given to a run can be aborted
/// from another thread. Every registry request checks it before being sent
/// and its timeout is bounded by the time left until the deadline. Response
/// bodies read through [Cancel::read_to_end] are also checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    aborted: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Cancel {
            aborted: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Shares the abort flag, with the deadline moved earlier to `timeout` from now if sooner
    pub fn limited(&self, timeout: Duration) -> Self {
        let limit = Instant::now() + timeout;
        Cancel {
            aborted: self.aborted.clone(),
            deadline: Some(self.deadline.map_or(limit, |deadline| deadline.min(limit))),
        }
    }

    /// Abort every call sharing this flag
    ///
    /// Takes effect at the next request, or at the next chunk of a response
    /// body being read by [Cancel::read_to_end]. A request already waiting
    /// for the registry is only bounded by the deadline.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Time left until the deadline, `None` if there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            return Err(Error::Cancelled);
        }
        if self.remaining() == Some(Duration::ZERO) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Read a response body, checking the abort flag and the deadline between chunks
    pub fn read_to_end(&self, mut reader: impl Read) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut chunk = [0_u8; 64 * 1024];
        loop {
            self.check()?;
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(bytes),
                Ok(n) => bytes.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_read(e)),
            }
        }
    }
}
