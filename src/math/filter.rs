//! Discrete first-order filters used by the heading fusion
//!
//! Both filters are the bilinear-free first-order forms with
//! `c = dt / time_constant`:
//!
//! - low-pass:  `y[k] = c*x[k-1] - (c-1)*y[k-1]`
//! - high-pass: `y[k] = (1-c)*x[k] + (c-1)*x[k-1] - (c-1)*y[k-1]`
//!
//! Note the low-pass consumes the previous input, not the current one. The
//! pair is complementary: fed the same signal, `lp + hp` reproduces it after
//! settling.

/// First-order low-pass filter
#[derive(Debug, Clone)]
pub struct LowPass {
    c: f64,
    prev_in: f64,
    prev_out: f64,
}

impl LowPass {
    /// Build a filter for step `dt` seconds and the given time constant
    pub fn new(dt: f64, time_constant: f64) -> Self {
        Self {
            c: dt / time_constant,
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    /// Seed the input history with a constant
    pub fn prefill_inputs(&mut self, value: f64) {
        self.prev_in = value;
    }

    /// Seed the output history with a constant
    pub fn prefill_outputs(&mut self, value: f64) {
        self.prev_out = value;
    }

    /// Advance the filter one step and return the new output
    pub fn march(&mut self, input: f64) -> f64 {
        let out = self.c * self.prev_in - (self.c - 1.0) * self.prev_out;
        self.prev_in = input;
        self.prev_out = out;
        out
    }
}

/// First-order high-pass filter
#[derive(Debug, Clone)]
pub struct HighPass {
    c: f64,
    prev_in: f64,
    prev_out: f64,
}

impl HighPass {
    /// Build a filter for step `dt` seconds and the given time constant
    pub fn new(dt: f64, time_constant: f64) -> Self {
        Self {
            c: dt / time_constant,
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    /// Seed the input history with a constant
    pub fn prefill_inputs(&mut self, value: f64) {
        self.prev_in = value;
    }

    /// Seed the output history with a constant
    pub fn prefill_outputs(&mut self, value: f64) {
        self.prev_out = value;
    }

    /// Advance the filter one step and return the new output
    pub fn march(&mut self, input: f64) -> f64 {
        let out = (1.0 - self.c) * input + (self.c - 1.0) * self.prev_in
            - (self.c - 1.0) * self.prev_out;
        self.prev_in = input;
        self.prev_out = out;
        out
    }
}
