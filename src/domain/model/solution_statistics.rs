use std::fmt;
use std::time::Duration;

/// Effort spent by one search. Several statistics merge into one when a
/// problem was split into partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolutionStatistics {
    pub nodes: u64,
    pub backtracks: u64,
    pub elapsed: Duration,
    pub solutions: u64,

    /// Cost of the best plan, when optimizing.
    pub objective: Option<i64>,
}

impl SolutionStatistics {
    /// Sums the counters. Partitions are solved concurrently so the elapsed
    /// time is the longest one.
    pub fn merge(&self, other: &SolutionStatistics) -> SolutionStatistics {
        let objective = match (self.objective, other.objective) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };

        SolutionStatistics {
            nodes: self.nodes + other.nodes,
            backtracks: self.backtracks + other.backtracks,
            elapsed: self.elapsed.max(other.elapsed),
            solutions: self.solutions + other.solutions,
            objective,
        }
    }
}

impl fmt::Display for SolutionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} backtracks, {} solutions in {} ms",
            self.nodes,
            self.backtracks,
            self.solutions,
            self.elapsed.as_millis()
        )?;
        if let Some(objective) = self.objective {
            write!(f, ", objective {}", objective)?;
        }
        Ok(())
    }
}
