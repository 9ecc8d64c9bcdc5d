pub mod batch;
pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod interactive;
pub mod render;
pub mod tabular;
pub mod types;

use anyhow::Result;
use clap::{Parser, Subcommand};
use error::MapError;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the choropleth described by the [plot] section
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Render one map per row of the [batch] metadata file
    Batch {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Keep the rows of a CSV/XLSX table whose column equals a value
    Filter {
        #[arg(default_value = "bc2011nhs.csv")]
        input: PathBuf,
        #[arg(default_value = "CD_Name")]
        column: String,
        #[arg(default_value = "Greater Vancouver")]
        value: String,
        #[arg(default_value = "GV2011nhs.csv")]
        output: PathBuf,
        /// Directory the input and output paths are relative to
        #[arg(long, default_value = "Data")]
        root: PathBuf,
    },
    /// Print the shape count and attribute fields of a shapefile
    Properties {
        #[arg(short, long, value_name = "FILE")]
        shapefile: PathBuf,
    },
    /// Write an interactive web map from the [interactive] section
    Interactive {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Render { config } => {
            info!("Rendering map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let plot = app_config
                .plot
                .as_ref()
                .ok_or(MapError::MissingSection("plot"))?
                .resolved(&app_config.input);
            let style = render::Style::from_config(&app_config.style)?;

            batch::render_plot(
                &plot,
                &style,
                app_config.style.format.as_deref(),
                app_config.style.save_dpi,
            )?;
        }
        Commands::Batch { config } => {
            info!("Running batch with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let count = batch::run(&app_config)?;
            info!("Batch complete, {} maps rendered", count);
        }
        Commands::Filter {
            input,
            column,
            value,
            output,
            root,
        } => {
            let (input, output) = (root.join(input), root.join(output));
            let filtered = filter::filter_file(&input, column, value, &output)?;
            println!("{}", filter::head(&filtered, 5));
        }
        Commands::Properties { shapefile } => {
            let schema = data::load_schema(shapefile)?;
            print!("{}", schema);
        }
        Commands::Interactive { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            interactive::write_interactive(&app_config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn filter_defaults() {
        let cli = Cli::try_parse_from(["census-choropleth", "filter"]).unwrap();
        match cli.command {
            Commands::Filter {
                input,
                column,
                value,
                output,
                root,
            } => {
                assert_eq!(input, PathBuf::from("bc2011nhs.csv"));
                assert_eq!(column, "CD_Name");
                assert_eq!(value, "Greater Vancouver");
                assert_eq!(output, PathBuf::from("GV2011nhs.csv"));
                assert_eq!(root, PathBuf::from("Data"));
            }
            _ => panic!("expected filter"),
        }
    }
}
