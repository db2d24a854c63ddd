use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use clap::{Parser, Subcommand};

use census_geo::export::to_record_batch;
use census_geo::{Analysis, AnalysisConfig, AnalysisOutput, AttributeFetcher, ClientConfig, HttpTransport, Survey};

/// Rows shown in the terminal preview.
const PREVIEW_ROWS: usize = 10;

#[derive(Parser)]
#[command(name = "census-geo", version, about = "Census estimates joined to TIGER boundaries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an analysis described by a JSON config file
    Run {
        config: PathBuf,
    },
    /// List the variables a dataset publishes
    Variables {
        #[arg(long)]
        year: u16,
        #[arg(long, value_enum, default_value_t = SurveyArg::Acs5)]
        survey: SurveyArg,
        /// Sub-dataset: profile, subject or cprofile
        #[arg(long)]
        dataset: Option<String>,
        /// Case-insensitive text to match in name, label or concept
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SurveyArg {
    Acs1,
    Acs3,
    Acs5,
}

impl From<SurveyArg> for Survey {
    fn from(s: SurveyArg) -> Self {
        match s {
            SurveyArg::Acs1 => Survey::Acs1,
            SurveyArg::Acs3 => Survey::Acs3,
            SurveyArg::Acs5 => Survey::Acs5,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { config } => run(&config),
        Command::Variables {
            year,
            survey,
            dataset,
            search,
        } => variables(year, survey.into(), dataset.as_deref(), search.as_deref()),
    };
    if let Err(e) = result {
        log::error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(path: &Path) -> Result<()> {
    let config = AnalysisConfig::load(path)?;
    let output = Analysis::new(HttpTransport::new(), config.clone())
        .run()
        .with_context(|| format!("running {}", path.display()))?;
    print_output(&output)?;
    if let Some(export) = &config.export {
        println!("wrote {} ({})", export.path.display(), export.crs);
    }
    Ok(())
}

fn print_output(output: &AnalysisOutput) -> Result<()> {
    let joined = &output.joined;
    match &output.reference {
        Some(layer) => println!(
            "{} of {} {} rows {} '{}' ({} dropped)",
            joined.len(),
            joined.input_rows,
            joined.table.level,
            joined.predicate,
            layer.name,
            joined.dropped()
        ),
        None => println!("{} {} rows", joined.len(), joined.table.level),
    }

    let batch = to_record_batch(&joined.table).context("building preview")?;
    // Geometry text is too wide for a terminal.
    let columns: Vec<usize> = (0..batch.num_columns() - 1).collect();
    let preview = batch
        .project(&columns)
        .context("building preview")?
        .slice(0, batch.num_rows().min(PREVIEW_ROWS));
    println!("{}", pretty_format_batches(&[preview]).context("formatting preview")?);

    for s in joined.table.summary() {
        let fmt = |v: Option<f64>| v.map(|x| format!("{x:.2}")).unwrap_or_else(|| "-".into());
        println!(
            "{:<24} n={:<6} missing={:<6} min={:<12} mean={:<12} max={}",
            s.variable,
            s.count,
            s.missing,
            fmt(s.min),
            fmt(s.mean),
            fmt(s.max)
        );
    }
    Ok(())
}

fn variables(year: u16, survey: Survey, dataset: Option<&str>, search: Option<&str>) -> Result<()> {
    let fetcher = AttributeFetcher::new(HttpTransport::new(), ClientConfig::from_env());
    let vars = fetcher
        .list_variables(year, survey, dataset)
        .with_context(|| format!("listing {} {year} variables", survey.path()))?;
    let needle = search.map(str::to_lowercase);
    let mut shown = 0usize;
    for v in &vars {
        if let Some(needle) = &needle {
            let haystack = format!("{} {} {}", v.name, v.label, v.concept.as_deref().unwrap_or(""));
            if !haystack.to_lowercase().contains(needle) {
                continue;
            }
        }
        println!("{:<16} {}  [{}]", v.name, v.label, v.concept.as_deref().unwrap_or(""));
        shown += 1;
    }
    log::info!("{shown} of {} variables shown", vars.len());
    Ok(())
}
