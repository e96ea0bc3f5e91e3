//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::DataArgs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use widedeep_ml::config::{TrainerConfig, WORKSPACE_CONFIG_DIR, load_config};
use widedeep_ml::data::source::{DataAccessor, JsonlAccessor, resolve_file_patterns};
use widedeep_ml::data::transform::{RawRecord, TransformArtifact};
use widedeep_ml::training::{TrainerFnArgs, run_fn};
use widedeep_ml::tuning::tuner::BEST_HYPERPARAMETERS_FILE;
use widedeep_ml::tuning::{TunerFnArgs, tuner_fn};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Analyze {
            inputs,
            output,
            examples_out,
        } => handle_analyze(&inputs, &output, examples_out.as_deref(), workspace),
        Commands::Tune {
            data,
            working_dir,
            max_trials,
        } => handle_tune(data, working_dir, max_trials, workspace),
        Commands::Train {
            data,
            hyperparameters,
            model_run_dir,
            serving_model_dir,
            replicas,
        } => handle_train(
            data,
            hyperparameters.as_deref(),
            model_run_dir,
            serving_model_dir,
            replicas,
            workspace,
        ),
        Commands::Predict { servable, input } => handle_predict(&servable, &input),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn resolve_config(workspace: &Path) -> anyhow::Result<TrainerConfig> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    tracing::debug!(workspace = %workspace.display(), ?config, "Resolved configuration");
    Ok(config)
}

fn apply_data_overrides(config: &mut TrainerConfig, data: &DataArgs) {
    if let Some(epochs) = data.epochs {
        config.training.epochs = epochs;
    }
    if data.seed.is_some() {
        config.training.seed = data.seed;
    }
}

/// Every record of every file matching `patterns`, file by file.
fn read_records(patterns: &[String]) -> anyhow::Result<Vec<(PathBuf, Vec<RawRecord>)>> {
    let accessor = JsonlAccessor;
    resolve_file_patterns(patterns)?
        .into_iter()
        .map(|path| -> anyhow::Result<(PathBuf, Vec<RawRecord>)> {
            let records = accessor.records(&path)?.collect::<Result<Vec<_>, _>>()?;
            Ok((path, records))
        })
        .collect()
}

fn handle_analyze(
    inputs: &[String],
    output: &Path,
    examples_out: Option<&Path>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = resolve_config(workspace)?;
    let files = read_records(inputs)?;
    let all: Vec<RawRecord> = files.iter().flat_map(|(_, r)| r.iter().cloned()).collect();

    let artifact = TransformArtifact::analyze(&config.catalog, &all)?;
    artifact.write(output)?;
    println!(
        "Analyzed {} records; wrote transform artifact to {}",
        all.len(),
        output.display()
    );

    if let Some(out_dir) = examples_out {
        std::fs::create_dir_all(out_dir)?;
        let transform = artifact.transform_features_fn();
        for (path, records) in &files {
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("input path has no file name: {}", path.display()))?;
            let target = out_dir.join(name);
            let mut writer = std::io::BufWriter::new(std::fs::File::create(&target)?);
            for record in records {
                let transformed = transform.apply_to_json(record)?;
                writeln!(writer, "{}", serde_json::Value::Object(transformed))?;
            }
            writer.flush()?;
            println!("  {} -> {}", path.display(), target.display());
        }
    }
    Ok(())
}

fn handle_tune(
    data: DataArgs,
    working_dir: PathBuf,
    max_trials: Option<usize>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let mut config = resolve_config(workspace)?;
    apply_data_overrides(&mut config, &data);
    if let Some(max_trials) = max_trials {
        config.tuning.max_trials = max_trials;
    }

    let args = TunerFnArgs {
        working_dir,
        train_files: data.train_files,
        eval_files: data.eval_files,
        train_steps: data.train_steps,
        eval_steps: data.eval_steps,
        transform_graph_path: data.transform_output,
    };
    let mut result = tuner_fn(&args, &config)?;
    result.tuner.search(&result.fit_kwargs)?;

    println!("{}", result.tuner.results_summary(3));
    println!(
        "\nBest hyperparameters: {}",
        result
            .tuner
            .project_dir()
            .join(BEST_HYPERPARAMETERS_FILE)
            .display()
    );
    Ok(())
}

fn handle_train(
    data: DataArgs,
    hyperparameters: Option<&Path>,
    model_run_dir: PathBuf,
    serving_model_dir: PathBuf,
    replicas: Option<usize>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let mut config = resolve_config(workspace)?;
    apply_data_overrides(&mut config, &data);
    if replicas.is_some() {
        config.training.replicas = replicas;
    }

    let hyperparameters = match hyperparameters {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read hyperparameters {}: {}", path.display(), e)
            })?;
            Some(serde_json::from_str::<serde_json::Value>(&content)?)
        }
        None => None,
    };

    let args = TrainerFnArgs {
        transform_output: data.transform_output,
        train_files: data.train_files,
        eval_files: data.eval_files,
        train_steps: data.train_steps,
        eval_steps: data.eval_steps,
        hyperparameters,
        model_run_dir,
        serving_model_dir,
    };
    let history = run_fn(&args, &config)?;

    if let Some(last) = history.last() {
        println!(
            "loss: {:.4}  accuracy: {:.4}  val_loss: {}  val_accuracy: {}",
            last.loss,
            last.sparse_categorical_accuracy,
            last.val_loss.map_or("-".to_string(), |v| format!("{v:.4}")),
            last.val_sparse_categorical_accuracy
                .map_or("-".to_string(), |v| format!("{v:.4}")),
        );
    }
    println!("Servable exported to {}", args.serving_model_dir.display());
    Ok(())
}

/// Non-blank lines of a JSON-lines file.
fn read_examples(path: &Path) -> anyhow::Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", path.display(), e))?;
    let mut examples = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            examples.push(line);
        }
    }
    Ok(examples)
}

fn handle_predict(servable: &Path, input: &Path) -> anyhow::Result<()> {
    let serve = widedeep_ml::load_servable(servable)?;
    let examples = read_examples(input)?;
    for probs in serve.call(&examples)? {
        let (class, _) = probs
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &p)| {
                if p > best.1 { (i, p) } else { best }
            });
        println!(
            "{}",
            serde_json::json!({ "class": class, "probabilities": probs })
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(WORKSPACE_CONFIG_DIR);
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&TrainerConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = resolve_config(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
