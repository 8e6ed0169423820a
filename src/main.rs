use anyhow::{Context, Result};
use artpipe::color::{ColorPolicy, KMeans};
use artpipe::config::AppConfig;
use artpipe::faces::facepp::FacePlusPlus;
use artpipe::pipeline::{self, RunOptions};
use artpipe::store::ArtworkStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "artpipe", version, about = "Artwork collection content pipeline")]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the JSON store
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pass: images, face analysis, face crops, colors, store
    Run {
        /// Local CSV export instead of the configured spreadsheet
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Only use raw images already on disk
        #[arg(long)]
        skip_download: bool,

        /// How to pick the dominant color (defaults to config)
        #[arg(long, value_enum)]
        color_policy: Option<ColorPolicy>,
    },

    /// Acquire raw images and write the derived variants
    Images {
        /// Local CSV export instead of the configured spreadsheet
        #[arg(long)]
        dataset: Option<PathBuf>,
    },

    /// Export face crops for records in the store
    Faces,

    /// Compute missing dominant colors for records in the store
    Colors {
        /// How to pick the dominant color (defaults to config)
        #[arg(long, value_enum)]
        color_policy: Option<ColorPolicy>,
    },

    /// Print the slug for an artist and title
    Slug {
        artist: String,
        title: String,
    },

    /// Show store statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = AppConfig::load(cli.config.as_deref());

    // Resolve store path: CLI > config > web dir default
    let store_path = cli.store.unwrap_or_else(|| config.resolve_store_path());
    log::info!("Store: {}", store_path.display());

    match cli.command {
        Commands::Run { dataset, skip_download, color_policy } => {
            let analyzer = FacePlusPlus::new(&config.face_api)
                .context("Set FACEPP_KEY and FACEPP_SECRET (or [face_api] in config)")?;
            let options = RunOptions {
                dataset,
                download: !skip_download,
                color_policy: color_policy.unwrap_or(config.color.policy),
            };
            let summary = pipeline::run(&config, &store_path, &analyzer, &options)
                .context("Pipeline failed")?;

            let images = &summary.images;
            println!(
                "Images: {} rows, {} acquired, {} variants written, {} missing raw, {} errors",
                images.rows, images.acquired, images.variants_written, images.missing_raw, images.errors
            );
            let merge = &summary.merge;
            println!(
                "Merge: {} added, {} retried, {} refreshed, {} skipped, {} failed ({} analyzed, {} pending)",
                merge.added, merge.retried, merge.refreshed, merge.skipped, merge.failed,
                merge.analyzed, merge.analysis_failed
            );
            println!(
                "Faces: {} exported, {} errors",
                summary.faces.exported, summary.faces.errors
            );
            println!(
                "Colors: {} computed, {} failed",
                summary.colors.computed, summary.colors.failed
            );
            println!("Store: {} records written to {}", summary.total_records, store_path.display());
        }

        Commands::Images { dataset } => {
            let rows = pipeline::load_rows(&config, dataset.as_deref())?;
            let result = artpipe::images::process_rows(&config, &rows, true)
                .context("Image stage failed")?;
            println!(
                "Images complete: {} rows, {} acquired, {} variants written, {} missing raw, {} errors",
                result.rows, result.acquired, result.variants_written, result.missing_raw, result.errors
            );
        }

        Commands::Faces => {
            let store = ArtworkStore::load(&store_path).context("Failed to load store")?;
            let result = artpipe::faces::crop::export_faces(&config, &store)
                .context("Face export failed")?;
            println!(
                "Face export complete: {} exported, {} errors",
                result.exported, result.errors
            );
        }

        Commands::Colors { color_policy } => {
            let mut store = ArtworkStore::load(&store_path).context("Failed to load store")?;
            let result = artpipe::color::fill_dominant_colors(
                &mut store,
                &config.layout(),
                color_policy.unwrap_or(config.color.policy),
                &KMeans::default(),
            );
            if result.computed > 0 {
                store.save(&store_path).context("Failed to write store")?;
            }
            println!(
                "Colors complete: {} computed, {} failed",
                result.computed, result.failed
            );
        }

        Commands::Slug { artist, title } => {
            println!("{}", artpipe::slug::slug(&artist, &title));
        }

        Commands::Stats => {
            let store = ArtworkStore::load(&store_path).context("Failed to load store")?;
            let stats = store.stats();
            println!("Store Statistics");
            println!("================");
            println!("Total records:    {}", stats.total);
            println!("Analyzed:         {}", stats.analyzed);
            println!("Pending analysis: {}", stats.pending);
            println!("With face:        {}", stats.with_face);
            println!("With color:       {}", stats.with_color);
        }
    }

    Ok(())
}
