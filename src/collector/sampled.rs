use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

use super::{CollectionOutcome, CollectionStrategy};
use crate::error::ConfigError;

/// Real-user-monitoring style collection: only a fraction of cycles collect,
/// the rest report [`CollectionOutcome::Skipped`].
pub struct SampledStrategy {
    inner: Arc<dyn CollectionStrategy>,
    sample_rate: f64,
}

impl SampledStrategy {
    pub fn new(inner: Arc<dyn CollectionStrategy>, sample_rate: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&sample_rate) {
            return Err(ConfigError::SampleRate(sample_rate));
        }
        Ok(Self { inner, sample_rate })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

#[async_trait]
impl CollectionStrategy for SampledStrategy {
    fn name(&self) -> &str {
        "rum"
    }

    async fn collect(&self) -> CollectionOutcome {
        let sampled = rand::thread_rng().gen::<f64>() < self.sample_rate;
        if !sampled {
            return CollectionOutcome::Skipped {
                reason: format!("not sampled (rate {})", self.sample_rate),
            };
        }

        match self.inner.collect().await {
            CollectionOutcome::Collected(metrics) => CollectionOutcome::Collected(
                metrics
                    .into_iter()
                    .map(|mut metric| {
                        if metric.connection_type.is_none() {
                            metric.connection_type = Some("unknown".to_string());
                        }
                        metric
                    })
                    .collect(),
            ),
            skipped => skipped,
        }
    }
}
