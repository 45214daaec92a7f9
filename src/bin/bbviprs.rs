use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use bbviprs::harmonize::HarmonizeConfig;
use bbviprs::logging::init_tracing;
use bbviprs::prs::{PrsConfig, run, write_harmonized};
use bbviprs::sumstats::SumstatsConfig;
use bbviprs::sweep::{SweepConfig, SweepGrid};
use bbviprs::types::{AmbiguousPolicy, EffectScaling, InitStrategy, OptimizerKind};

#[derive(Parser)]
#[command(name = "bbviprs")]
#[command(about = "Polygenic risk scores by black-box variational inference", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct InputArgs {
    #[arg(long, required = true)]
    genotypes: PathBuf,
    #[arg(long, required = true)]
    variants: PathBuf,
    #[arg(long, required = true)]
    sumstats: PathBuf,
    #[arg(long)]
    phenotype: Option<PathBuf>,
    #[arg(long)]
    phenotype_column: Option<String>,
    #[arg(long)]
    n: Option<f64>,
    #[arg(long, default_value_t = 1.0)]
    p_threshold: f64,
    #[arg(long)]
    column_names: Option<String>,
    #[arg(long, default_value = "drop")]
    ambiguous: String,
    #[arg(long, default_value = "zscore")]
    effect_scaling: String,
    #[arg(long, default_value = "bbviprs")]
    out: String,
    #[arg(long)]
    no_log_file: bool,
}

#[derive(Subcommand)]
enum Command {
    Sweep {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long, default_value = "1.0,0.1,0.01")]
        scale1: String,
        #[arg(long, default_value_t = 0.001)]
        scale2: f64,
        #[arg(long, default_value = "0.01,0.1,0.5")]
        mixture_prob: String,
        #[arg(long, default_value_t = 500)]
        steps: usize,
        #[arg(long, default_value_t = 0.01)]
        learning_rate: f64,
        #[arg(long, default_value_t = 50)]
        mc_samples: usize,
        #[arg(long, default_value = "adam")]
        optimizer: String,
        #[arg(long)]
        kl_weight: Option<f64>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long)]
        inf_h2: Option<f64>,
        #[arg(long)]
        cores: Option<usize>,
        #[arg(long)]
        max_fit_seconds: Option<f64>,
    },
    Harmonize {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Sweep {
            inputs,
            scale1,
            scale2,
            mixture_prob,
            steps,
            learning_rate,
            mc_samples,
            optimizer,
            kl_weight,
            seed,
            inf_h2,
            cores,
            max_fit_seconds,
        } => {
            let mut config = prs_config(inputs)?;
            config.grid = SweepGrid {
                scale1: split_f64_list(scale1),
                scale2,
                mixture_prob: split_f64_list(mixture_prob),
            };
            config.init = match inf_h2 {
                Some(h2) => InitStrategy::Infinitesimal { h2 },
                None => InitStrategy::Zero,
            };
            let max_fit_duration = max_fit_seconds
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("invalid --max-fit-seconds")?;
            config.sweep = SweepConfig {
                steps,
                learning_rate,
                n_mc_samples: mc_samples,
                optimizer: optimizer.parse::<OptimizerKind>()?,
                kl_weight,
                seed,
                cores,
                max_fit_duration,
            };

            let result = run(&config)?;
            println!("{}", result.table.to_dataframe()?);
            println!("Results written to {}", result.results_path.display());
            if let Some(path) = result.weights_path {
                println!("Weights written to {}", path.display());
            }
        }
        Command::Harmonize { inputs, output } => {
            let config = prs_config(inputs)?;
            let output = output
                .unwrap_or_else(|| PathBuf::from(format!("{}_harmonized.tsv", config.out_prefix)));
            let data = write_harmonized(&config, &output)?;
            println!(
                "{} SNPs harmonized ({} flipped, {} reversed); written to {}",
                data.report.retained,
                data.report.flipped,
                data.report.reversed,
                output.display()
            );
        }
    }

    Ok(())
}

fn prs_config(inputs: InputArgs) -> anyhow::Result<PrsConfig> {
    let column_names = inputs
        .column_names
        .map(parse_column_names)
        .transpose()?
        .unwrap_or_default();
    Ok(PrsConfig {
        genotypes: inputs.genotypes,
        variants: inputs.variants,
        sumstats: inputs.sumstats,
        phenotype: inputs.phenotype,
        phenotype_column: inputs.phenotype_column,
        out_prefix: inputs.out,
        sumstats_config: SumstatsConfig {
            p_threshold: inputs.p_threshold,
            n: inputs.n,
            column_names,
        },
        harmonize: HarmonizeConfig {
            ambiguous: inputs.ambiguous.parse::<AmbiguousPolicy>()?,
        },
        effect_scaling: inputs.effect_scaling.parse::<EffectScaling>()?,
        write_log: !inputs.no_log_file,
        ..PrsConfig::default()
    })
}

fn split_string_list(input: String) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_f64_list(input: String) -> Vec<f64> {
    split_string_list(input)
        .into_iter()
        .map(|s| s.parse::<f64>().unwrap_or(f64::NAN))
        .collect()
}

fn parse_column_names(input: String) -> anyhow::Result<HashMap<String, String>> {
    split_string_list(input)
        .into_iter()
        .map(|pair| {
            let (canonical, column) = pair
                .split_once('=')
                .with_context(|| format!("expected CANONICAL=column, got {pair}"))?;
            Ok((canonical.trim().to_string(), column.trim().to_string()))
        })
        .collect()
}
