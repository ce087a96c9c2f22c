// src/flame.rs

use std::fs::File;
use std::io::BufWriter;

use tracing::info;
use tracing_chrome::ChromeLayerBuilder;
use tracing_flame::FlameLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::build::build_with_spans;
use crate::error::RunError;

/// Builds the site with profiling spans active and emits the formats the
/// caller asked for: folded stacks (`fold`), an SVG flamechart (`svg`) and
/// a Chrome DevTools trace (`time`). With none of the three set, `svg` is
/// produced as the default.
pub(crate) fn flame(config_file: &str, output_path: &str, fold: bool, svg: bool, time: bool) -> Result<(), RunError> {
    let want_svg = svg || (!fold && !svg && !time);
    let folded_path = format!("{output_path}.folded");
    let trace_path = format!("{output_path}.json");

    let (flame_layer, flame_guard) =
        FlameLayer::with_file(&folded_path).map_err(|e| RunError::IoError(format!("Failed to create flame layer: {e}")))?;

    let (chrome_layer, chrome_guard) = if time {
        let (layer, guard) = ChromeLayerBuilder::new().file(&trace_path).build();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bengal=trace".into()))
        .with(flame_layer)
        .with(chrome_layer)
        .init();

    info!("flame::start profiling build");
    build_with_spans(config_file)?;

    drop(flame_guard);
    drop(chrome_guard);

    if want_svg {
        info!("flame::generate → {}.svg", output_path);
        generate_flamechart(&folded_path, &format!("{output_path}.svg"))?;
    }

    if time {
        info!("flame::trace → {}", trace_path);
    }

    if fold {
        info!("flame::folded → {}", folded_path);
    } else {
        std::fs::remove_file(&folded_path).ok();
    }

    info!("flame::complete ✓");
    Ok(())
}

/// Generate flamechart SVG from folded stacks using inferno.
fn generate_flamechart(folded_path: &str, svg_path: &str) -> Result<(), RunError> {
    use inferno::flamegraph::{self, Options};

    let folded_file =
        File::open(folded_path).map_err(|e| RunError::IoError(format!("Failed to open folded stacks file: {e}")))?;
    let svg_file = File::create(svg_path).map_err(|e| RunError::IoError(format!("Failed to create SVG file: {e}")))?;

    let mut options = Options::default();
    options.title = "Bengal Build Profile".to_string();
    options.subtitle = Some("Function call flamechart".to_string());

    let reader = std::io::BufReader::new(folded_file);
    let writer = BufWriter::new(svg_file);

    flamegraph::from_reader(&mut options, reader, writer)
        .map_err(|e| RunError::IoError(format!("Failed to generate flamechart: {e}")))?;

    Ok(())
}
