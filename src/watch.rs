// src/watch.rs

use tracing::{debug, error, info};

use crate::build::{build_watched, get_paths_to_watch};
use crate::config::Config;
use crate::error::RunError;
use crate::nav::NavTreeCache;

/// Watch for file changes and rebuild incrementally (macOS only).
#[cfg(target_os = "macos")]
pub(crate) fn watch(config_file: &str) -> Result<(), RunError> {
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::{Duration, Instant};

    let config = Config::load_from_file(config_file)?;
    let paths_to_watch = get_paths_to_watch(config_file, &config);

    info!("watch::start {:?}", paths_to_watch);
    info!("watch::info press Ctrl+C to stop");

    let nav_tree_cache = NavTreeCache::new();
    if let Err(e) = build_watched(config_file, &nav_tree_cache) {
        error!("Initial build failed: {:?}", e);
    }

    let (sender, receiver) = channel();

    let _watcher_thread = thread::spawn(move || {
        let fsevent = fsevent::FsEvent::new(paths_to_watch);
        fsevent.observe(sender);
    });

    let mut last_build = Instant::now();
    let debounce_duration = Duration::from_millis(500);

    loop {
        match receiver.recv() {
            Ok(events) => {
                if last_build.elapsed() < debounce_duration {
                    debug!("watch::debounce skipping rebuild");
                    continue;
                }

                info!("watch::change event_id: {}", events.event_id);
                debug!("watch::change {:?}", events);
                last_build = Instant::now();

                // `build`'s own provenance-hash comparison finds exactly
                // what changed; fsevent only tells us "something did".
                if let Err(e) = build_watched(config_file, &nav_tree_cache) {
                    error!("Build failed: {:?}", e);
                }
            }
            Err(e) => {
                error!("Watch error: {:?}", e);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(not(target_os = "macos"))]
pub(crate) fn watch(_config_file: &str) -> Result<(), RunError> {
    eprintln!("Watch mode is only supported on macOS");
    std::process::exit(1);
}
