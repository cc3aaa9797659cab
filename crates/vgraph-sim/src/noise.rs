//! ---
//! vg_section: "02-generation"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Noise sources injected into the waveform synthesizer."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use chrono::Utc;
use rand::prelude::*;
use rand_distr::StandardNormal;

/// Random draws consumed by the synthesizer.
pub trait NoiseSource: Send {
    /// Uniform draw in `[0, 1)`.
    fn uniform(&mut self) -> f64;
    /// Standard normal draw.
    fn gaussian(&mut self) -> f64;
}

impl<N: NoiseSource + ?Sized> NoiseSource for Box<N> {
    fn uniform(&mut self) -> f64 {
        (**self).uniform()
    }

    fn gaussian(&mut self) -> f64 {
        (**self).gaussian()
    }
}

/// PRNG-backed noise.
#[derive(Debug)]
pub struct SeededNoise {
    rng: StdRng,
}

impl SeededNoise {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed from the current wall-clock time in nanoseconds.
    pub fn from_clock() -> Self {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::from_seed(nanos as u64)
    }
}

impl NoiseSource for SeededNoise {
    fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn gaussian(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }
}

/// Replays fixed draw sequences, cycling when exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedNoise {
    uniform: Vec<f64>,
    gaussian: Vec<f64>,
    uniform_pos: usize,
    gaussian_pos: usize,
}

impl ScriptedNoise {
    pub fn new(uniform: Vec<f64>, gaussian: Vec<f64>) -> Self {
        Self {
            uniform: if uniform.is_empty() { vec![0.5] } else { uniform },
            gaussian: if gaussian.is_empty() { vec![0.0] } else { gaussian },
            uniform_pos: 0,
            gaussian_pos: 0,
        }
    }

    /// Centred uniform draws and zero gaussian draws: jitter, spikes and
    /// gaussian noise all vanish.
    pub fn silent() -> Self {
        Self::new(vec![0.5], vec![0.0])
    }
}

impl NoiseSource for ScriptedNoise {
    fn uniform(&mut self) -> f64 {
        let value = self.uniform[self.uniform_pos % self.uniform.len()];
        self.uniform_pos += 1;
        value
    }

    fn gaussian(&mut self) -> f64 {
        let value = self.gaussian[self.gaussian_pos % self.gaussian.len()];
        self.gaussian_pos += 1;
        value
    }
}
