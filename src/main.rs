use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hmm_regime_trader::data::{load_bars, load_stream, write_stream};
use hmm_regime_trader::{
    build_features, simulate, AppConfig, Bar, FeatureMatrix, FittedRegimeModel, MetricsCalculator, RegimeModel,
    SimulationResult,
};

#[derive(Parser)]
#[command(name = "regime-trader")]
#[command(version = "0.1.0")]
#[command(about = "Detect market regimes with a Gaussian HMM and trade them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "regime.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the regime model and print its parameters
    Fit {
        /// OHLC csv file
        #[arg(short, long)]
        data: PathBuf,
        /// Fit on the leading share of rows and score the rest
        #[arg(long)]
        train_fraction: Option<f64>,
    },
    /// Fit, then write the bars annotated with regimes
    Annotate {
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run the position simulator on an annotated csv file
    Simulate {
        #[arg(short, long)]
        input: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load, fit, annotate and simulate in one go
    Backtest {
        #[arg(short, long)]
        data: PathBuf,
        /// Also write the annotated stream here
        #[arg(short, long)]
        annotated: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration as TOML
    InitConfig {
        #[arg(short, long, default_value = "regime.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Commands::InitConfig { output } = &cli.command {
        return init_config(output);
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            warn!("config: {}", e);
        }
        return Err(anyhow!("Invalid configuration ({} errors)", errors.len()));
    }

    match cli.command {
        Commands::Fit { data, train_fraction } => run_fit(&config, &data, train_fraction),
        Commands::Annotate { data, output } => run_annotate(&config, &data, &output),
        Commands::Simulate { input, json } => run_simulate(&config, &input, json),
        Commands::Backtest { data, annotated, json } => run_backtest(&config, &data, annotated.as_deref(), json),
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn init_config(output: &Path) -> Result<()> {
    let toml = AppConfig::default().to_toml()?;
    std::fs::write(output, toml).with_context(|| format!("Failed to write {:?}", output))?;
    info!("Wrote default configuration to {:?}", output);
    Ok(())
}

fn fit_on(config: &AppConfig, data: &Path) -> Result<(Vec<Bar>, FeatureMatrix, FittedRegimeModel)> {
    let bars = load_bars(data).with_context(|| format!("Failed to load bars from {:?}", data))?;
    info!("Loaded {} bars", bars.len());

    let features = build_features(&bars, &config.features)?;
    info!("Features: {}", features.columns().join(", "));

    let model = RegimeModel::new(config.model.clone())?;
    let fitted = model.fit(&features)?;
    Ok((bars, features, fitted))
}

fn print_model(fitted: &FittedRegimeModel) {
    let report = fitted.report();
    let params = fitted.params();

    println!("\n{}", "=".repeat(60));
    println!("                  REGIME MODEL");
    println!("{}", "=".repeat(60));
    println!("Observations:     {}", report.n_observations);
    println!("Log-likelihood:   {:.4}", report.log_likelihood);
    println!("Iterations:       {} (converged: {})", report.iterations, report.converged);
    println!("Covariance:       {:?}", params.covariance_kind());
    println!("{}", "-".repeat(60));

    let means = params.means();
    let std_devs = params.std_devs();
    for state in 0..params.n_states() {
        let row: Vec<String> = params
            .columns()
            .iter()
            .enumerate()
            .map(|(j, name)| format!("{}={:.5}±{:.5}", name, means[[state, j]], std_devs[[state, j]]))
            .collect();
        println!(
            "  State {} -> {:<10} start={:.3}  {}",
            state,
            fitted.label(state).to_string(),
            params.initial_distribution()[state],
            row.join("  ")
        );
    }
    println!("{}", "-".repeat(60));
    println!("TRANSITIONS");
    print!("{}", fitted.transition_table());
    println!("{}", "=".repeat(60));
}

fn run_fit(config: &AppConfig, data: &Path, train_fraction: Option<f64>) -> Result<()> {
    let bars = load_bars(data).with_context(|| format!("Failed to load bars from {:?}", data))?;
    let features = build_features(&bars, &config.features)?.clean();
    let model = RegimeModel::new(config.model.clone())?;

    match train_fraction {
        Some(fraction) => {
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(anyhow!("train fraction must be in (0, 1), got {}", fraction));
            }
            let cut = (features.n_rows() as f64 * fraction).round() as usize;
            let (train, validation) = features.split_at(cut);
            info!("Training on {} rows, validating on {}", train.n_rows(), validation.n_rows());

            let fitted = model.fit(&train)?;
            print_model(&fitted);
            if !validation.is_empty() {
                let ll = fitted.score(&validation)?;
                println!("Validation log-likelihood: {:.4} ({:.4} per row)", ll, ll / validation.n_rows() as f64);
                println!("Validation BIC:            {:.4}", fitted.bic(&validation)?);
            }
        }
        None => {
            let fitted = model.fit(&features)?;
            print_model(&fitted);
            println!("AIC: {:.4}  BIC: {:.4}", fitted.aic(&features)?, fitted.bic(&features)?);
            for (regime, share) in fitted.occupancy(&features)? {
                println!("  {:<10} {:.1}% of bars", regime.to_string(), share * 100.0);
            }
        }
    }
    Ok(())
}

fn run_annotate(config: &AppConfig, data: &Path, output: &Path) -> Result<()> {
    let (bars, features, fitted) = fit_on(config, data)?;
    let stream = fitted.annotate(&bars, &features)?;
    write_stream(&stream, output).with_context(|| format!("Failed to write {:?}", output))?;
    info!("Wrote {} annotated bars to {:?}", stream.len(), output);
    Ok(())
}

fn report(config: &AppConfig, result: &SimulationResult, json: bool) -> Result<()> {
    let summary = MetricsCalculator::calculate(result, config.simulator.periods_per_year);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print_summary();
    }
    Ok(())
}

fn run_simulate(config: &AppConfig, input: &Path, json: bool) -> Result<()> {
    let stream = load_stream(input).with_context(|| format!("Failed to load {:?}", input))?;
    let result = simulate(config.simulator.clone(), &stream)?;
    report(config, &result, json)
}

fn run_backtest(config: &AppConfig, data: &Path, annotated: Option<&Path>, json: bool) -> Result<()> {
    info!("━━━ Step 1: Fitting regime model ━━━");
    let (bars, features, fitted) = fit_on(config, data)?;
    if !json {
        print_model(&fitted);
    }

    info!("━━━ Step 2: Annotating bars ━━━");
    let stream = fitted.annotate(&bars, &features)?;
    if let Some(path) = annotated {
        write_stream(&stream, path).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Wrote annotated bars to {:?}", path);
    }

    info!("━━━ Step 3: Simulating ━━━");
    let result = simulate(config.simulator.clone(), &stream)?;
    report(config, &result, json)
}
