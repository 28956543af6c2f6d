//! Credit pricing for generation requests.

use super::models::MusicModel;

/// Pricing curve of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub base_credits: u32,
    pub min_duration_secs: u32,
    pub max_duration_secs: u32,
    pub step_secs: u32,
    pub credits_per_step: u32,
}

pub fn model_pricing(model: MusicModel) -> ModelPricing {
    match model {
        MusicModel::Short => ModelPricing {
            base_credits: 5,
            min_duration_secs: 10,
            max_duration_secs: 60,
            step_secs: 10,
            credits_per_step: 1,
        },
        MusicModel::Standard => ModelPricing {
            base_credits: 10,
            min_duration_secs: 30,
            max_duration_secs: 240,
            step_secs: 30,
            credits_per_step: 3,
        },
        MusicModel::Pro => ModelPricing {
            base_credits: 20,
            min_duration_secs: 60,
            max_duration_secs: 480,
            step_secs: 30,
            credits_per_step: 5,
        },
    }
}

/// Credits charged for generating `duration_secs` of audio with `model`.
///
/// Anything up to the model's minimum duration costs the base price; each
/// started step above it adds `credits_per_step`. Durations past the maximum
/// are priced as the maximum.
pub fn calculate_music_cost(model: MusicModel, duration_secs: u32) -> u32 {
    let pricing = model_pricing(model);
    let duration = duration_secs.min(pricing.max_duration_secs);
    if duration <= pricing.min_duration_secs {
        return pricing.base_credits;
    }
    let extra = duration - pricing.min_duration_secs;
    let steps = extra.div_ceil(pricing.step_secs);
    pricing.base_credits + steps * pricing.credits_per_step
}
