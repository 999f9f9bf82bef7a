// ============================================================
// Layer 6 — Metrics Aggregator
// ============================================================
// Keeps a running, batch-size-weighted mean of a fixed list of
// named metrics over one training or validation pass.
//
//   sum_i += value_i * weight
//   cnt   += weight
//   avg_i  = sum_i / cnt
//
// `update` returns the current averages already formatted for the
// progress bar and the epoch summary line:
//
//   xe=0.693 acc=0.500 L=0.693

use anyhow::{ensure, Result};

/// Weighted running averages for one pass.
#[derive(Debug, Clone)]
pub struct Metrics {
    names: Vec<String>,
    sum:   Vec<f64>,
    cnt:   f64,
    avg:   Option<Vec<f64>>,
}

impl Metrics {
    pub fn new(names: Vec<String>) -> Self {
        let sum = vec![0.0; names.len()];
        Self { names, sum, cnt: 0.0, avg: None }
    }

    /// Fold one batch of metric values in, weighted by `weight`
    /// (normally the batch size), and return the formatted averages.
    ///
    /// A zero weight leaves the state untouched. The number of values
    /// must match the number of names.
    pub fn update(&mut self, values: &[f64], weight: f64) -> Result<String> {
        ensure!(
            values.len() == self.names.len(),
            "got {} metric values for {} names ({})",
            values.len(),
            self.names.len(),
            self.names.join(" ")
        );
        if weight > 0.0 {
            for (s, v) in self.sum.iter_mut().zip(values) {
                *s += v * weight;
            }
            self.cnt += weight;
            self.avg = Some(self.sum.iter().map(|s| s / self.cnt).collect());
        }
        Ok(self.report())
    }

    /// Averages so far; `None` until the first weighted update.
    pub fn avg(&self) -> Option<&[f64]> {
        self.avg.as_deref()
    }

    /// `name=value` pairs, three decimals, space separated.
    pub fn report(&self) -> String {
        let Some(avg) = &self.avg else { return String::new() };
        self.names
            .iter()
            .zip(avg)
            .map(|(name, v)| format!("{name}={v:.3}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_undefined_before_first_update() {
        let m = Metrics::new(names(&["xe", "L"]));
        assert!(m.avg().is_none());
        assert_eq!(m.report(), "");
    }

    #[test]
    fn test_weighted_mean() {
        let mut m = Metrics::new(names(&["xe", "acc"]));
        m.update(&[1.0, 0.0], 1.0).unwrap();
        let text = m.update(&[4.0, 1.0], 3.0).unwrap();
        let avg = m.avg().unwrap();
        assert!((avg[0] - 13.0 / 4.0).abs() < 1e-12);
        assert!((avg[1] - 0.75).abs() < 1e-12);
        assert_eq!(text, "xe=3.250 acc=0.750");
    }

    #[test]
    fn test_mean_over_many_batches() {
        // Batches of uneven size; the result must equal the per-example mean.
        let batches: [(f64, f64); 4] = [(0.2, 8.0), (0.9, 8.0), (0.5, 3.0), (0.1, 1.0)];
        let mut m = Metrics::new(names(&["L"]));
        for (v, w) in batches {
            m.update(&[v], w).unwrap();
        }
        let total: f64 = batches.iter().map(|(v, w)| v * w).sum();
        let count: f64 = batches.iter().map(|(_, w)| w).sum();
        assert!((m.avg().unwrap()[0] - total / count).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weight_is_ignored() {
        let mut m = Metrics::new(names(&["L"]));
        m.update(&[2.0], 2.0).unwrap();
        let text = m.update(&[100.0], 0.0).unwrap();
        assert_eq!(m.avg().unwrap(), &[2.0]);
        assert_eq!(text, "L=2.000");
    }

    #[test]
    fn test_zero_weight_first_keeps_undefined() {
        let mut m = Metrics::new(names(&["L"]));
        assert_eq!(m.update(&[5.0], 0.0).unwrap(), "");
        assert!(m.avg().is_none());
    }

    #[test]
    fn test_value_count_mismatch_is_an_error() {
        let mut m = Metrics::new(names(&["xe", "L"]));
        assert!(m.update(&[1.0], 1.0).is_err());
        assert!(m.update(&[1.0, 2.0, 3.0], 1.0).is_err());
        // rejected updates leave nothing behind
        assert!(m.avg().is_none());
    }
}
