//! Heightmap oracle: fractal Brownian motion over simplex noise, with an
//! optional ridged multifractal layer for sharp crests.

use noise::{NoiseFn, Simplex};

/// A pure `(x, z) -> height` function sampled by worker threads.
pub trait Heightmap: Send + Sync {
    fn height(&self, x: f64, z: f64) -> f64;
}

impl<F> Heightmap for F
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    fn height(&self, x: f64, z: f64) -> f64 {
        self(x, z)
    }
}

/// Parameters of the terrain height function.
#[derive(Clone, Debug, PartialEq)]
pub struct HeightmapParams {
    /// World seed for deterministic generation.
    pub seed: u64,
    /// Number of fBm octaves.
    pub octaves: u32,
    /// Frequency multiplier between successive octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between successive octaves.
    pub persistence: f64,
    /// Frequency of the first octave.
    pub base_frequency: f64,
    /// Amplitude of the first octave.
    pub amplitude: f64,
    /// Scale of the ridged layer. Zero disables it.
    pub ridged_weight: f64,
    /// Frequency of the first ridged octave.
    pub ridged_frequency: f64,
    pub ridged_octaves: u32,
    /// Constant added to every sample.
    pub base_height: f64,
}

impl Default for HeightmapParams {
    fn default() -> Self {
        Self {
            seed: 0,
            octaves: 6,
            lacunarity: 2.0,
            persistence: 0.5,
            base_frequency: 0.0005,
            amplitude: 400.0,
            ridged_weight: 0.0,
            ridged_frequency: 1.0 / 128.0,
            ridged_octaves: 6,
            base_height: 0.0,
        }
    }
}

impl From<&terra_config::HeightmapConfig> for HeightmapParams {
    fn from(config: &terra_config::HeightmapConfig) -> Self {
        Self {
            seed: config.seed,
            octaves: config.octaves,
            lacunarity: config.lacunarity,
            persistence: config.persistence,
            base_frequency: config.base_frequency,
            amplitude: config.amplitude,
            ridged_weight: config.ridged_weight,
            ridged_frequency: config.ridged_frequency,
            ridged_octaves: config.ridged_octaves,
            base_height: config.base_height,
        }
    }
}

/// Samples terrain height from [`HeightmapParams`].
pub struct HeightmapSampler {
    noise: Simplex,
    ridged: Simplex,
    params: HeightmapParams,
}

impl HeightmapSampler {
    pub fn new(params: HeightmapParams) -> Self {
        let noise = Simplex::new(params.seed as u32);
        let ridged = Simplex::new((params.seed as u32).wrapping_add(0x9E37_79B9));
        Self {
            noise,
            ridged,
            params,
        }
    }

    /// Height at world coordinate `(x, z)`.
    pub fn sample(&self, x: f64, z: f64) -> f64 {
        let mut total = self.params.base_height + self.fbm(x, z);
        if self.params.ridged_weight != 0.0 {
            total += self.params.ridged_weight * self.ridged_multifractal(x, z);
        }
        total
    }

    fn fbm(&self, x: f64, z: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = self.params.amplitude;

        for _ in 0..self.params.octaves {
            total += self.noise.get([x * frequency, z * frequency]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }

        total
    }

    /// Sum of halving octaves of `1 - |n|`, each in `[0, 1]`.
    fn ridged_multifractal(&self, x: f64, z: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.ridged_frequency;
        let mut amplitude = 1.0;

        for _ in 0..self.params.ridged_octaves {
            let n = self.ridged.get([x * frequency, z * frequency]);
            total += amplitude * (1.0 - n.abs());
            frequency *= 2.0;
            amplitude *= 0.5;
        }

        total
    }

    /// Largest possible distance of a sample from `base_height`.
    pub fn max_amplitude(&self) -> f64 {
        let mut sum = 0.0;
        let mut amp = self.params.amplitude;
        for _ in 0..self.params.octaves {
            sum += amp;
            amp *= self.params.persistence;
        }
        let mut ridged = 0.0;
        let mut amp = 1.0;
        for _ in 0..self.params.ridged_octaves {
            ridged += amp;
            amp *= 0.5;
        }
        sum + self.params.ridged_weight.abs() * ridged
    }

    pub fn params(&self) -> &HeightmapParams {
        &self.params
    }
}

impl Heightmap for HeightmapSampler {
    fn height(&self, x: f64, z: f64) -> f64 {
        self.sample(x, z)
    }
}
