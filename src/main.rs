use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, builder::BoolishValueParser};
use log::LevelFilter;

use dicom_rtmask::{
    config::ConverterConfig,
    converter::Converter,
    enums::{MatchStrategy, SortBy},
};

#[derive(Parser)]
#[command(name = "rtmask")]
#[command(about = "Convert DICOM series and RTSTRUCT annotations into NIfTI masks")]
#[command(version)]
struct Cli {
    /// Root folder holding the DICOM tree
    #[arg(value_name = "ROOT", default_value = "./data")]
    root: PathBuf,

    /// Where attributes.csv and headers.json are written (defaults to ROOT)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// CSV with PatientId and Modality columns selecting the series to keep
    #[arg(long, env = "IMAGEDRIVE_CSV")]
    query_csv: Option<PathBuf>,

    /// Move outputs out of the destination tree into the folder above it
    #[arg(
        long,
        env = "RESTRUCTURE_FOLDERS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    restructure: bool,

    /// Dump the raw header of every series to headers.json
    #[arg(long)]
    save_json: bool,

    /// Write every image series as a NIfTI volume too (PET scaled to SUV)
    #[arg(long)]
    convert_series: bool,

    /// Delete series rejected by the query CSV from disk
    #[arg(long, requires = "query_csv")]
    delete_filtered: bool,

    /// Keep long directory names untouched
    #[arg(long)]
    no_shorten_dirs: bool,

    /// Directory names longer than this are shortened
    #[arg(long, default_value_t = 20)]
    max_dir_name_len: usize,

    /// How labels are paired with image series
    #[arg(long, value_enum, default_value_t = MatchStrategy::ByUid)]
    strategy: MatchStrategy,

    /// How slices are ordered before stacking
    #[arg(long, value_enum, default_value_t = SortBy::ImagePositionPatient)]
    sort_by: SortBy,

    /// Path component naming the DICOM tree
    #[arg(long, default_value = "DICOM")]
    source_token: String,

    /// Path component replacing the source token in output paths
    #[arg(long, default_value = "NIFTI")]
    dest_token: String,

    /// Build masks in parallel
    #[arg(long)]
    parallel: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> ConverterConfig {
        ConverterConfig {
            root: self.root,
            output_dir: self.output_dir,
            query_csv: self.query_csv,
            delete_filtered: self.delete_filtered,
            save_json: self.save_json,
            convert_series: self.convert_series,
            restructure: self.restructure,
            shorten_dirs: !self.no_shorten_dirs,
            max_dir_name_len: self.max_dir_name_len,
            strategy: self.strategy,
            sort_by: self.sort_by,
            source_token: self.source_token,
            dest_token: self.dest_token,
            parallel: self.parallel,
            ..ConverterConfig::default()
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format_timestamp_secs()
        .try_init();

    let config = cli.into_config();
    let root = config.root.clone();
    let report = Converter::new(config)
        .run()
        .with_context(|| format!("Failed to convert {}", root.display()))?;

    for failure in &report.failures {
        eprintln!("{}: {}", failure.label_path.display(), failure.reason);
    }
    println!("{}", report.summary());
    Ok(())
}
