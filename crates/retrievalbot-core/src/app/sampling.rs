//! Provider-weighted down-sampling.
//!
//! A uniform sample of deals mirrors the deal distribution, where a few
//! large providers hold most deals. Down-sampling with per-item weights
//! that shrink as a provider's share grows spreads tasks over more
//! providers.

use std::collections::HashMap;

use rand::Rng;

/// Weight of one item given how many items in the sample share its
/// provider. Must be positive and non-increasing in `provider_count`.
pub trait ProviderWeighting: Send + Sync {
    fn weight(&self, provider_count: usize) -> f64;
}

/// `count^-bias`. A bias of 0 is uniform; larger values push harder
/// against frequent providers.
#[derive(Debug, Clone, Copy)]
pub struct PowerLawWeighting {
    pub bias: f64,
}

impl PowerLawWeighting {
    pub fn new(bias: f64) -> Self {
        Self {
            bias: bias.max(0.0),
        }
    }
}

impl Default for PowerLawWeighting {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl ProviderWeighting for PowerLawWeighting {
    fn weight(&self, provider_count: usize) -> f64 {
        (provider_count.max(1) as f64).powf(-self.bias)
    }
}

/// Pick `n` items without replacement, each with probability proportional
/// to its weight (Efraimidis-Spirakis: keep the `n` largest `ln(u) / w`).
pub fn weighted_downsample<T, R>(
    items: Vec<T>,
    n: usize,
    provider_of: impl Fn(&T) -> &str,
    weighting: &dyn ProviderWeighting,
    rng: &mut R,
) -> Vec<T>
where
    R: Rng + ?Sized,
{
    if n >= items.len() {
        return items;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in &items {
        *counts.entry(provider_of(item)).or_default() += 1;
    }
    let weights: Vec<f64> = items
        .iter()
        .map(|item| weighting.weight(counts[provider_of(item)]))
        .collect();
    drop(counts);

    let mut keyed: Vec<(f64, T)> = items
        .into_iter()
        .zip(weights)
        .map(|(item, w)| {
            // u in (0, 1] so ln(u) is finite
            let u: f64 = 1.0 - rng.r#gen::<f64>();
            let key = if w > 0.0 { u.ln() / w } else { f64::NEG_INFINITY };
            (key, item)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.truncate(n);
    keyed.into_iter().map(|(_, item)| item).collect()
}
