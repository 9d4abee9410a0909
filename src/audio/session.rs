//! Capture session identity.
//!
//! Every capture session gets a monotonically increasing token. Results are
//! tagged with the token of the session that submitted them and discarded
//! if the pane has moved on to a newer session in the meantime.

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Current,
    Stale,
}

#[derive(Debug, Default)]
pub struct SessionCounter {
    current: u64,
}

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new session, superseding every earlier token.
    pub fn begin(&mut self) -> SessionToken {
        self.current += 1;
        SessionToken(self.current)
    }

    pub fn current(&self) -> SessionToken {
        SessionToken(self.current)
    }

    pub fn freshness(&self, token: SessionToken) -> Freshness {
        if token.0 == self.current {
            Freshness::Current
        } else {
            Freshness::Stale
        }
    }

    pub fn ensure_current(&self, token: SessionToken) -> Result<()> {
        match self.freshness(token) {
            Freshness::Current => Ok(()),
            Freshness::Stale => Err(PipelineError::StaleSession {
                expected: self.current,
                actual: token.0,
            }),
        }
    }
}
