//! Pose entropy of the particle set

use super::engine::Particle;

/// Shannon entropy of the normalized weights, `-sum(p ln p)`.
///
/// Non-positive normalized weights contribute nothing; a set without
/// positive total weight has entropy 0.
pub fn weight_entropy<I>(weights: I) -> f64
where
    I: IntoIterator<Item = f64>,
    I::IntoIter: Clone,
{
    let weights = weights.into_iter();
    let total: f64 = weights.clone().sum();
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }

    let entropy: f64 = weights
        .map(|w| w / total)
        .filter(|&p| p > 0.0)
        .map(|p| p * p.ln())
        .sum();
    // Avoid handing out -0.0
    (-entropy).max(0.0)
}

/// Entropy of the particle weights.
pub fn pose_entropy(particles: &[Particle]) -> f64 {
    weight_entropy(particles.iter().map(|p| p.weight))
}

/// The entropy if it is worth publishing. Zero and negative values are
/// suppressed.
pub fn publishable_entropy(particles: &[Particle]) -> Option<f64> {
    let entropy = pose_entropy(particles);
    (entropy > 0.0).then_some(entropy)
}
