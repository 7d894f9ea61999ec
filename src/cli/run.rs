//! Batch inference command

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use crate::assemble::{AssemblerConfig, Batch, BatchAssembler};
use crate::config::{BatchrConfig, DecodeFailurePolicy, DevicePreference, OutputFormat};
use crate::decode::{decode_batch, LabelTable, Prediction};
use crate::device::select_device;
use crate::engine::{
    profiled, DeviceActivityTracer, InputBinding, OperatorProfiler, PredictorConfig,
    PredictorSession, ProfileScope,
};
use crate::error::{BatchrError, BatchrResult};
use crate::provision::{Artifacts, Provisioner};

/// Flags of `batchr run`; each one overrides the configuration file
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Configuration file (YAML or JSON)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Image directory
    #[arg(long, short)]
    pub images: Option<PathBuf>,

    /// Images per batch
    #[arg(long, short)]
    pub batch_size: Option<usize>,

    /// auto, cpu, cuda or cuda:N
    #[arg(long)]
    pub device: Option<DevicePreference>,

    /// Log and skip images that fail to decode
    #[arg(long)]
    pub skip_bad_images: bool,

    /// Time every operator of the forward pass
    #[arg(long)]
    pub profile_ops: bool,

    /// Write operator timings as a Chrome trace (implies --profile-ops)
    #[arg(long)]
    pub trace_output: Option<PathBuf>,

    /// Ranked classes reported per image
    #[arg(long, short = 'k')]
    pub top_k: Option<usize>,

    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

/// Run the pipeline and print one prediction per image
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let predictions = run_pipeline(&config).await?;
    report(&predictions, config.output.format, &mut io::stdout().lock())?;
    Ok(())
}

/// Layer command-line flags over the loaded configuration
pub fn apply_overrides(config: &mut BatchrConfig, args: &RunArgs) {
    if let Some(dir) = &args.images {
        config.input.dir = dir.clone();
    }
    if let Some(n) = args.batch_size {
        config.inference.batch_size = n;
    }
    if let Some(device) = args.device {
        config.inference.device = device;
    }
    if args.skip_bad_images {
        config.input.on_decode_error = DecodeFailurePolicy::Skip;
    }
    if args.profile_ops {
        config.profiling.operators = true;
    }
    if let Some(path) = &args.trace_output {
        config.profiling.operators = true;
        config.profiling.trace_output = Some(path.clone());
    }
    if let Some(k) = args.top_k {
        config.output.top_k = k;
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
}

/// Provision, assemble, select a device, run one forward pass and decode.
///
/// Provisioning and assembly run side by side on blocking tasks and are both
/// joined before the predictor is built. The forward pass gets a blocking task
/// of its own.
pub async fn run_pipeline(config: &BatchrConfig) -> BatchrResult<Vec<Prediction>> {
    config.validate()?;
    config.validate_artifacts()?;

    let provisioner = Arc::new(Provisioner::new(&config.artifacts.dir));
    let fetches = config.artifacts.required().map(|(_, url)| {
        let provisioner = Arc::clone(&provisioner);
        let url = url.to_string();
        let handle = tokio::task::spawn_blocking(move || provisioner.fetch(&url));
        async move { handle.await.map_err(join_error).and_then(|fetched| fetched) }
    });

    let assembler = BatchAssembler::new(AssemblerConfig::from_config(config));
    let image_dir = config.input.dir.clone();
    let assembly = tokio::task::spawn_blocking(move || assembler.assemble(&image_dir));

    let (fetched, batch) = futures::future::join(
        futures::future::join_all(fetches),
        async move { assembly.await.map_err(join_error).and_then(|batch| batch) },
    )
    .await;
    // artifact failures take precedence so they keep their exit status
    let fetched = fetched.into_iter().collect::<BatchrResult<Vec<_>>>()?;
    let batch = batch?;

    let artifacts = match <[PathBuf; 3]>::try_from(fetched) {
        Ok([graph, weights, labels]) => Artifacts {
            graph,
            weights,
            labels,
        },
        Err(_) => return Err(BatchrError::Execution("artifact count mismatch".into())),
    };

    if batch.is_empty() {
        tracing::warn!(
            "No eligible images in {}, nothing to classify",
            config.input.dir.display()
        );
        return Ok(Vec::new());
    }

    let config = config.clone();
    tokio::task::spawn_blocking(move || infer(&config, &artifacts, batch))
        .await
        .map_err(join_error)?
}

fn infer(
    config: &BatchrConfig,
    artifacts: &Artifacts,
    batch: Batch,
) -> BatchrResult<Vec<Prediction>> {
    let inference = &config.inference;
    let selection = select_device(&inference.device)?;

    let labels = LabelTable::from_file(&artifacts.labels)?;
    let mut session = PredictorSession::new(PredictorConfig {
        graph: std::fs::read(&artifacts.graph)?,
        weights: std::fs::read(&artifacts.weights)?,
        device: selection,
        input: InputBinding::new(inference.input_name.as_str(), inference.input_dims()),
        batch_size: inference.batch_size,
    })?;

    let paths = batch.paths().to_vec();
    let count = batch.count();
    session.set_input(&inference.input_name, &batch.padded(inference.batch_size))?;

    let mut scopes: Vec<Box<dyn ProfileScope>> = Vec::new();
    if selection.is_cuda() && config.profiling.device_activity {
        match DeviceActivityTracer::new(session.device()) {
            Ok(tracer) => scopes.push(Box::new(tracer)),
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Device activity tracing disabled: {}", e)
            }
            Err(e) => return Err(e),
        }
    }
    if config.profiling.operators {
        let profiler = OperatorProfiler::new(config.profiling.trace_output.clone());
        session.attach_recorder(profiler.recorder());
        scopes.push(Box::new(profiler));
    }

    let span = tracing::info_span!(
        "batch_inference",
        device = %selection,
        batch_size = inference.batch_size,
        count
    );
    let _entered = span.enter();
    profiled(scopes, &span, || session.forward())?;

    let output = session.output(inference.output_index)?;
    let predictions = decode_batch(
        &output,
        inference.batch_size,
        &paths,
        &labels,
        config.output.top_k,
    )?;
    session.close()?;
    Ok(predictions)
}

fn join_error(err: tokio::task::JoinError) -> BatchrError {
    BatchrError::Execution(format!("background task failed: {err}"))
}

/// Write predictions as text lines or a JSON array
pub fn report<W: Write>(
    predictions: &[Prediction],
    format: OutputFormat,
    out: &mut W,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, predictions)?;
            writeln!(out)
        }
        OutputFormat::Text => {
            for prediction in predictions {
                let Some(top) = prediction.top() else {
                    continue;
                };
                writeln!(
                    out,
                    "{}: {} ({:.4})",
                    prediction.path.display(),
                    top.label,
                    top.score
                )?;
                for rest in prediction.classes.iter().skip(1) {
                    writeln!(out, "    {} ({:.4})", rest.label, rest.score)?;
                }
            }
            Ok(())
        }
    }
}
