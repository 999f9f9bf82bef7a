// ============================================================
// Layer 5 — Learning Rate Schedule
// ============================================================
//   lr(step) = lr0 · rate ^ (step / decay_steps)
//
// With `staircase` the exponent is floored, so the rate drops in
// discrete steps every `decay_steps` global steps.
//
// Adam is run at 1/100 of the scheduled rate; momentum SGD uses
// the schedule as-is.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialDecay {
    pub lr:          f64,
    pub decay_rate:  f64,
    pub decay_steps: f64,
    pub staircase:   bool,
}

impl ExponentialDecay {
    pub fn new(lr: f64, decay_rate: f64, decay_steps: f64) -> Self {
        Self { lr, decay_rate, decay_steps, staircase: true }
    }

    pub fn at(&self, step: usize) -> f64 {
        if self.decay_steps <= 0.0 {
            return self.lr;
        }
        let mut p = step as f64 / self.decay_steps;
        if self.staircase {
            p = p.floor();
        }
        self.lr * self.decay_rate.powf(p)
    }
}

/// Which optimiser drives the updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solver {
    Adam,
    Momentum,
}

impl Solver {
    pub fn from_flag(adam: bool) -> Self {
        if adam { Solver::Adam } else { Solver::Momentum }
    }

    /// Factor applied to the scheduled rate before each step.
    pub fn lr_scale(self) -> f64 {
        match self {
            Solver::Adam => 0.01,
            Solver::Momentum => 1.0,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staircase() {
        let s = ExponentialDecay::new(0.01, 0.95, 500.0);
        assert_eq!(s.at(0), 0.01);
        assert_eq!(s.at(499), 0.01);
        assert!((s.at(500) - 0.0095).abs() < 1e-12);
        assert!((s.at(1999) - 0.01 * 0.95f64.powi(3)).abs() < 1e-12);
    }

    #[test]
    fn test_continuous() {
        let s = ExponentialDecay { staircase: false, ..ExponentialDecay::new(1.0, 0.5, 2.0) };
        assert!((s.at(1) - 0.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_solver_scale() {
        assert_eq!(Solver::from_flag(true), Solver::Adam);
        assert_eq!(Solver::Adam.lr_scale(), 0.01);
        assert_eq!(Solver::from_flag(false).lr_scale(), 1.0);
    }
}
