//! Search budget: a plain step counter shared by one top-level call.

use crate::error::DomainError;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Budget {
    limit: u64,
    used: u64,
}

impl Budget {
    pub fn new(limit: u64) -> Self {
        Budget { limit, used: 0 }
    }

    /// Count one expansion. Fails once the limit is passed.
    pub fn step(&mut self) -> Result<(), DomainError> {
        self.used += 1;
        if self.used > self.limit {
            warn!(limit = self.limit, "search budget exceeded");
            return Err(DomainError::SearchBudgetExceeded { limit: self.limit });
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeding_the_limit_is_fatal() {
        let mut budget = Budget::new(2);
        assert!(budget.step().is_ok());
        assert!(budget.step().is_ok());
        match budget.step() {
            Err(DomainError::SearchBudgetExceeded { limit }) => assert_eq!(limit, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(budget.used(), 3);
    }
}
