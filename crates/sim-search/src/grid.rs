//! Parameter ranges and the grid enumeration over them.

use serde::{Deserialize, Serialize};

/// Closed search interval for one named `ProjectConfig` parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    /// Parameter name as accepted by `ProjectConfig::set`.
    pub name: String,
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
}

impl ParamRange {
    pub fn new(name: &str, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
        }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Value of grid index `i` when the range is split into `steps` points.
    /// A single step always yields `min`.
    pub fn value_at(&self, i: usize, steps: usize) -> f64 {
        if steps <= 1 {
            return self.min;
        }
        self.min + i as f64 * self.span() / (steps - 1) as f64
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Ranges used when the caller names none: the knobs that most directly
/// change how much testing matters.
pub fn default_ranges() -> Vec<ParamRange> {
    vec![
        ParamRange::new("test_effort", 5.0, 20.0),
        ParamRange::new("regression_risk", 0.05, 0.5),
        ParamRange::new("max_stealth", 0.2, 0.9),
        ParamRange::new("test_type_coefficient", 0.05, 0.5),
        ParamRange::new("test_knowledge_coefficient", 0.2, 1.5),
    ]
}

/// Number of grid points, saturating on overflow.
pub fn grid_size(params: usize, steps: usize) -> usize {
    let exp = u32::try_from(params).unwrap_or(u32::MAX);
    steps.saturating_pow(exp)
}

/// Cartesian product of every range split into `steps` points, produced by a
/// mixed-radix counter. The first parameter varies slowest.
#[derive(Clone, Debug)]
pub struct GridPoints<'a> {
    ranges: &'a [ParamRange],
    steps: usize,
    digits: Vec<usize>,
    done: bool,
}

impl<'a> GridPoints<'a> {
    pub fn new(ranges: &'a [ParamRange], steps: usize) -> Self {
        Self {
            ranges,
            steps,
            digits: vec![0; ranges.len()],
            done: steps == 0,
        }
    }

    fn advance(&mut self) {
        for d in self.digits.iter_mut().rev() {
            *d += 1;
            if *d < self.steps {
                return;
            }
            *d = 0;
        }
        self.done = true;
    }
}

impl Iterator for GridPoints<'_> {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Vec<f64>> {
        if self.done {
            return None;
        }
        let point = self
            .ranges
            .iter()
            .zip(&self.digits)
            .map(|(r, &i)| r.value_at(i, self.steps))
            .collect();
        self.advance();
        Some(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn value_at_spans_endpoints() {
        let r = ParamRange::new("x", 1.0, 3.0);
        assert_eq!(r.value_at(0, 3), 1.0);
        assert_eq!(r.value_at(1, 3), 2.0);
        assert_eq!(r.value_at(2, 3), 3.0);
        assert_eq!(r.value_at(0, 1), 1.0);
        assert_eq!(r.clamp(5.0), 3.0);
        assert_eq!(r.clamp(-1.0), 1.0);
    }

    #[test]
    fn enumerates_in_mixed_radix_order() {
        let ranges = vec![ParamRange::new("a", 0.0, 1.0), ParamRange::new("b", 10.0, 20.0)];
        let points: Vec<Vec<f64>> = GridPoints::new(&ranges, 2).collect();
        assert_eq!(
            points,
            vec![
                vec![0.0, 10.0],
                vec![0.0, 20.0],
                vec![1.0, 10.0],
                vec![1.0, 20.0],
            ]
        );
    }

    #[test]
    fn degenerate_grids() {
        assert_eq!(GridPoints::new(&[], 3).count(), 1);
        let ranges = default_ranges();
        assert_eq!(GridPoints::new(&ranges, 0).count(), 0);
        assert_eq!(GridPoints::new(&ranges, 1).count(), 1);
        assert_eq!(grid_size(3, 3), 27);
        assert_eq!(grid_size(64, 10), usize::MAX);
    }

    proptest! {
        #[test]
        fn yields_steps_pow_params_points(params in 0usize..5, steps in 1usize..5) {
            let ranges: Vec<ParamRange> = (0..params)
                .map(|i| ParamRange::new(&format!("p{i}"), 0.0, i as f64 + 1.0))
                .collect();
            let points: Vec<Vec<f64>> = GridPoints::new(&ranges, steps).collect();
            prop_assert_eq!(points.len(), grid_size(params, steps));
            for p in &points {
                prop_assert_eq!(p.len(), params);
                for (v, r) in p.iter().zip(&ranges) {
                    prop_assert!(*v >= r.min && *v <= r.max + 1e-9);
                }
            }
        }
    }
}
