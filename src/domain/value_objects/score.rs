#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Score(f64);

impl Score {
    /// A score on the 0-100 scale used for category and composite scores.
    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Score must be finite".to_string());
        }
        if (0.0..=100.0).contains(&value) {
            Ok(Score(value))
        } else {
            Err(format!("Score must be in [0.0, 100.0], got {}", value))
        }
    }

    /// Clamp an already-computed value into the valid range.
    ///
    /// Normalization can land a hair outside [0, 100] through floating-point
    /// rounding; anything further out is a logic error upstream.
    pub fn clamped(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Score must be finite".to_string());
        }
        Ok(Score(value.max(0.0).min(100.0)))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}
