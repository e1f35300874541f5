//! Evaluation metrics over embedding solutions.

use std::fmt;

use super::environment::Solution;

/// Aggregated metrics over a sequence of embedding episodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationMetrics {
    /// Fraction of accepted requests.
    pub acceptance_rate: f64,
    /// Mean revenue-to-cost ratio of accepted requests.
    pub mean_r2c: f64,
    /// Total revenue over total cost of accepted requests.
    pub long_term_r2c: f64,
    /// Sum of the revenue of accepted requests.
    pub total_revenue: f64,
    /// Sum of the cost of accepted requests.
    pub total_cost: f64,
    /// Number of evaluated requests.
    pub n_episodes: usize,
}

impl EvaluationMetrics {
    /// Aggregates a set of solutions.
    pub fn from_solutions<'a>(solutions: impl IntoIterator<Item = &'a Solution>) -> Self {
        let mut n_episodes = 0;
        let mut accepted = 0;
        let mut r2c_sum = 0.0;
        let mut total_revenue = 0.0;
        let mut total_cost = 0.0;

        for solution in solutions {
            n_episodes += 1;
            if solution.accepted {
                accepted += 1;
                r2c_sum += solution.r2c();
                total_revenue += solution.revenue;
                total_cost += solution.cost;
            }
        }

        let acceptance_rate = if n_episodes > 0 {
            accepted as f64 / n_episodes as f64
        } else {
            0.0
        };
        let mean_r2c = if accepted > 0 {
            r2c_sum / accepted as f64
        } else {
            0.0
        };
        let long_term_r2c = if total_cost > 0.0 {
            total_revenue / total_cost
        } else {
            0.0
        };

        Self {
            acceptance_rate,
            mean_r2c,
            long_term_r2c,
            total_revenue,
            total_cost,
            n_episodes,
        }
    }
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== Evaluation Metrics ({} requests) ===",
            self.n_episodes
        )?;
        writeln!(
            f,
            "  Acceptance rate:         {:.1}%",
            self.acceptance_rate * 100.0
        )?;
        writeln!(f, "  Mean r2c:                {:.3}", self.mean_r2c)?;
        writeln!(f, "  Long-term r2c:           {:.3}", self.long_term_r2c)?;
        writeln!(f, "  Total revenue:           {:.2}", self.total_revenue)?;
        writeln!(f, "  Total cost:              {:.2}", self.total_cost)
    }
}
