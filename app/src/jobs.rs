// ==============================================================================
// jobs.rs - Variant Job Definitions
// ==============================================================================
// Description: Step catalogue of the variant and aggregated variant jobs
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// variantJob           : transform → load → statsCreate → statsLoad
// aggregatedVariantJob : transform → load
// None of the steps restart once COMPLETED for a job instance.
// ==============================================================================

use tracing::info;

use crate::engine::{Job, Step, StepContext, StepResult};
use crate::error::PipelineError;

pub const VARIANT_JOB: &str = "variantJob";
pub const AGGREGATED_VARIANT_JOB: &str = "aggregatedVariantJob";

pub const TRANSFORM_STEP: &str = "transform";
pub const LOAD_STEP: &str = "load";
pub const STATS_CREATE_STEP: &str = "statsCreate";
pub const STATS_LOAD_STEP: &str = "statsLoad";

/// Full pipeline for studies with per-sample genotypes
pub fn variant_job() -> Job {
    Job::new(VARIANT_JOB)
        .step(Step::new(TRANSFORM_STEP, transform_step))
        .step(Step::new(LOAD_STEP, load_step))
        .step(Step::new(STATS_CREATE_STEP, stats_create_step))
        .step(Step::new(STATS_LOAD_STEP, stats_load_step))
}

/// Pipeline for aggregated studies; their statistics come from the VCF
/// itself so no stats steps run
pub fn aggregated_variant_job() -> Job {
    Job::new(AGGREGATED_VARIANT_JOB)
        .step(Step::new(TRANSFORM_STEP, transform_step))
        .step(Step::new(LOAD_STEP, load_step))
}

/// Look up a job by its name or CLI alias
pub fn job_by_name(name: &str) -> Option<Job> {
    match name {
        VARIANT_JOB | "variant" => Some(variant_job()),
        AGGREGATED_VARIANT_JOB | "aggregated" => Some(aggregated_variant_job()),
        _ => None,
    }
}

pub fn transform_step(ctx: &StepContext<'_>) -> Result<StepResult, PipelineError> {
    let config = ctx.config;
    info!("transform file {} to {}", config.input, config.output_dir);

    ctx.storage.extract(&config.input, &config.output_dir, &config.options)?;
    ctx.storage.pre_transform(&config.input, &config.options)?;
    ctx.storage.transform(
        &config.input,
        config.pedigree.as_ref(),
        &config.output_dir,
        &config.options,
    )?;
    ctx.storage.post_transform(&config.input, &config.output_dir, &config.options)?;

    Ok(StepResult::Completed)
}

pub fn load_step(ctx: &StepContext<'_>) -> Result<StepResult, PipelineError> {
    let config = ctx.config;
    if config.skip.load {
        info!("skipping load step, skipLoad is set to true");
        return Ok(StepResult::Skipped);
    }

    let transformed = config.transformed_variants_uri();
    ctx.storage.pre_load(&transformed, &config.output_dir, &config.options)?;
    ctx.storage.load(&transformed, &config.options)?;
    ctx.storage.post_load(&transformed, &config.output_dir, &config.options)?;

    Ok(StepResult::Completed)
}

pub fn stats_create_step(ctx: &StepContext<'_>) -> Result<StepResult, PipelineError> {
    let config = ctx.config;
    if config.skip.stats_create {
        info!("skipping stats creation step, skipStatsCreate is set to true");
        return Ok(StepResult::Skipped);
    }

    let db = ctx.storage.get_db_adaptor(config.db_name())?;
    let stats_uri = config.stats_uri();
    let written = ctx
        .storage
        .create_stats(db.as_ref(), &stats_uri, None, &config.options)?;
    info!("stats created at {}", written);

    Ok(StepResult::Completed)
}

pub fn stats_load_step(ctx: &StepContext<'_>) -> Result<StepResult, PipelineError> {
    let config = ctx.config;
    if config.skip.stats_load {
        info!("skipping stats loading step, skipStatsLoad is set to true");
        return Ok(StepResult::Skipped);
    }

    let db = ctx.storage.get_db_adaptor(config.db_name())?;
    let stats_uri = config.stats_uri();
    ctx.storage.load_stats(db.as_ref(), &stats_uri, &config.options)?;

    Ok(StepResult::Completed)
}
