use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::DatabaseError;

/// Cooperative cancellation flag shared between a request and its query.
///
/// Clones observe the same flag. Executors call [`check`](Self::check)
/// between partition batches and periodically inside long loops.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), DatabaseError> {
        if self.is_cancelled() {
            Err(DatabaseError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Check every `every` iterations; `i` is the loop counter
    pub fn check_every(&self, i: usize, every: usize) -> Result<(), DatabaseError> {
        if every == 0 || i % every == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(DatabaseError::Cancelled)));
    }

    #[test]
    fn test_check_every_skips_between_intervals() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.check_every(3, 256).is_ok());
        assert!(token.check_every(256, 256).is_err());
    }
}
