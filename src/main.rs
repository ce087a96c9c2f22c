// src/main.rs

use argh::FromArgs;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod asset_hash;
mod build;
mod cache;
mod cache_registry;
mod config;
mod content;
mod error;
mod flame;
mod guide;
mod incremental;
mod nav;
mod output;
mod postprocess;
mod render;
mod syntax;
mod template;
mod url_registry;
mod utils;
mod watch;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_config_file() -> String {
    "bengal.toml".to_string()
}

#[derive(FromArgs, Debug)]
/// Bengal - a static site generator with incremental builds
struct Argz {
    /// print version information
    #[argh(switch, short = 'V')]
    version: bool,

    #[argh(subcommand)]
    command: Option<SubCommand>,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Build(BuildArgs),
    Watch(WatchArgs),
    Guide(GuideArgs),
    Flame(FlameArgs),
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "build")]
/// Build the static site
struct BuildArgs {
    /// path to the config file
    #[argh(option, short = 'c', default = "default_config_file()")]
    config_file: String,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "watch")]
/// Watch for changes and rebuild automatically
struct WatchArgs {
    /// path to the config file
    #[argh(option, short = 'c', default = "default_config_file()")]
    config_file: String,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "guide")]
/// Print a guide explaining Bengal's features and configuration
struct GuideArgs {}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "flame")]
/// Build the site with profiling and generate flamechart output
struct FlameArgs {
    /// path to the config file
    #[argh(option, short = 'c', default = "default_config_file()")]
    config_file: String,

    /// output base path (extensions added based on format flags)
    #[argh(option, short = 'o', default = "default_flame_output()")]
    output: String,

    /// keep the folded stacks file (.folded) for speedscope/inferno
    #[argh(switch)]
    fold: bool,

    /// output SVG flamegraph (.svg) — the default when no flags are given
    #[argh(switch)]
    svg: bool,

    /// output a Chrome DevTools trace (.json) for timeline view
    #[argh(switch)]
    time: bool,
}

fn default_flame_output() -> String {
    "flamechart".to_string()
}

fn main() {
    let argz: Argz = argh::from_env();

    if argz.version {
        println!("bengal {}", VERSION);
        return;
    }

    // Flame has its own tracing setup so it can capture spans from the
    // very first phase of the build it profiles.
    if let Some(SubCommand::Flame(args)) = argz.command {
        if let Err(e) = flame::flame(&args.config_file, &args.output, args.fold, args.svg, args.time) {
            eprintln!("Error: {:?}", e);
            std::process::exit(1);
        }
        return;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bengal=info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(tracing_subscriber::fmt::time::UtcTime::new(kiters::timestamp::get_utc_formatter()))
                .with_target(false)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE),
        )
        .init();

    match argz.command {
        Some(SubCommand::Build(args)) => {
            if let Err(e) = build::build(&args.config_file) {
                error!("{:?}", e);
                std::process::exit(1);
            }
        }
        Some(SubCommand::Watch(args)) => {
            if let Err(e) = watch::watch(&args.config_file) {
                error!("{:?}", e);
                std::process::exit(1);
            }
        }
        Some(SubCommand::Guide(_)) => {
            guide::print_guide();
        }
        Some(SubCommand::Flame(_)) => unreachable!(), // Handled above
        None => {
            println!("bengal {}", VERSION);
            println!("Use --help for usage information");
        }
    }
}
