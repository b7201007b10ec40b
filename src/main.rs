// =============================================================================
// RENDER-CAPS PROBE - What would the renderers get on this machine?
// =============================================================================
//
// Loads config.toml (or the path given as the first argument), negotiates an
// instance for every configured renderer, selects and builds a device per
// renderer and logs the outcome.
//
// FLOW:
// 1. Aggregate renderer requests
// 2. Negotiate instance layers/extensions (narrowing what is missing)
// 3. Per renderer: score devices, pick one, build logical device + queues
// 4. Report narrowed features, chosen devices, queue layout
//
// =============================================================================

use anyhow::{Context as _, Result};
use render_caps::backend::QueueRoles;
use render_caps::{Config, Context};
use std::fs::OpenOptions;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_path(&path)?,
        None => Config::load(),
    };

    init_logging(&config)?;
    log::info!("Starting render-caps probe");

    let context = Context::new(config.descriptor()).context("Failed to create context")?;
    report_context(&context);

    let renderers = context
        .create_renderers()
        .context("Failed to create renderers")?;

    for (i, renderer) in renderers.iter().enumerate() {
        log::info!("Renderer #{} on \"{}\"", i, renderer.device_name());
        log::info!("  requested: {:?}", renderer.requested().features);
        log::info!("  usable:    {:?}", renderer.features().features);
        log::info!("  score:     {} ({:?})", renderer.score().total(), renderer.score());

        for role in [
            QueueRoles::GRAPHICS,
            QueueRoles::COMPUTE,
            QueueRoles::TRANSFER,
            QueueRoles::PRESENT,
        ] {
            if let Some(slots) = renderer.device().layout.role(role) {
                log::info!(
                    "  {:?}: family {}, {} queue(s)",
                    role,
                    slots.family,
                    renderer.queues(role).len()
                );
            }
        }
    }

    log::info!("Probe finished");
    Ok(())
}

fn report_context(context: &Context) {
    let features = context.features();
    log::info!("Instance features: {:?}", features.features);
    if let Some(version) = features.api_version {
        log::info!("Requested API version: {}", version);
    }
    log::info!(
        "Debug bridge: {}",
        if context.has_debug_bridge() { "attached" } else { "none" }
    );
}

/// Initialize logging, optionally into the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file: {}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}
