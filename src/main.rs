mod cli;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use texforge::scanner::{self, DDS_EXTENSIONS, IMAGE_EXTENSIONS};
use tf_convert::{unpack_many, ConverterLocator, TexconvConverter};
use tf_core::config::Config;
use tf_core::{JobState, TaskId, TextureCategory};
use tf_pipeline::{ConversionTask, JobEventKind, JobSummary, Pipeline};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "texforge=debug,tf_pipeline=debug,tf_convert=debug,tf_core=debug".to_string()
        } else {
            "texforge=info,tf_pipeline=info,tf_convert=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Convert {
            inputs,
            output,
            category,
            encoding,
            background,
            timeout,
        } => {
            let config = Config::load_or_default(config_path);
            let request = ConvertRequest {
                inputs,
                output,
                category,
                encoding,
                timeout: Duration::from_secs(timeout),
            };
            if background {
                convert_in_background(config, request)
            } else {
                convert(config, request)
            }
        }
        Commands::Unpack { inputs, output } => unpack(&inputs, &output, config_path),
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("texforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

struct ConvertRequest {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    category: Option<TextureCategory>,
    encoding: Option<String>,
    timeout: Duration,
}

impl ConvertRequest {
    fn plan(&self) -> Result<Vec<ConversionTask>> {
        let images = scanner::collect_files(&self.inputs, IMAGE_EXTENSIONS);
        if images.is_empty() {
            anyhow::bail!("No images found in {:?}", self.inputs);
        }
        tracing::info!("Found {} images", images.len());
        Ok(scanner::plan_tasks(
            &images,
            &self.output,
            self.category,
            self.encoding.as_deref(),
        ))
    }
}

fn open_pipeline(config: Config) -> Result<Pipeline> {
    let pipeline = Pipeline::new(config).context("Failed to start conversion pipeline")?;
    if !pipeline.is_available() {
        anyhow::bail!(
            "texconv not found. Set converter.path in the config file or add texconv to PATH."
        );
    }
    Ok(pipeline)
}

fn convert(config: Config, request: ConvertRequest) -> Result<()> {
    let tasks = request.plan()?;
    let pipeline = open_pipeline(config)?;

    let ids = pipeline.submit_batch(tasks);
    let total = ids.len();
    let finished = pipeline.wait_for_all(&ids, request.timeout, |left| {
        tracing::info!("{}/{} textures done", total - left, total);
    });
    if !finished {
        tracing::warn!("Timed out after {:?}; reporting partial results", request.timeout);
    }
    pipeline.stop();

    let failed = report_tasks(&pipeline, &ids);
    let stats = pipeline.stats();
    println!(
        "\n{} converted, {} failed ({} converter runs, {} already present)",
        total - failed,
        failed,
        stats.invocations,
        stats.tasks_skipped_existing
    );

    if failed > 0 {
        anyhow::bail!("{failed} of {total} textures failed");
    }
    Ok(())
}

fn report_tasks(pipeline: &Pipeline, ids: &[TaskId]) -> usize {
    let mut failed = 0;
    for id in ids {
        match pipeline.get_status(*id) {
            Some(status) if status.result => {
                println!("✓ {} -> {}", status.name, status.output_path.display());
            }
            Some(status) => {
                failed += 1;
                let reason = status.error.unwrap_or_else(|| status.state.to_string());
                println!("✗ {}: {}", status.name, reason);
            }
            None => failed += 1,
        }
    }
    failed
}

fn convert_in_background(config: Config, request: ConvertRequest) -> Result<()> {
    let tasks = request.plan()?;
    let poll_interval = config.jobs.poll_interval();
    let pipeline = open_pipeline(config)?;

    let summary: Rc<RefCell<Option<JobSummary>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&summary);
    let job = pipeline.start_background_job(
        tasks,
        |event| match &event.kind {
            JobEventKind::TaskDone { .. } | JobEventKind::GroupFailed { .. } => {
                println!("{}", event.describe());
            }
            _ => tracing::debug!(job_id = %event.job_id, "{}", event.describe()),
        },
        move |done| *slot.borrow_mut() = Some(done.clone()),
    );

    let deadline = Instant::now() + request.timeout;
    loop {
        if pipeline.poll_jobs().is_idle() {
            break;
        }
        if Instant::now() >= deadline && pipeline.cancel_job(job) {
            tracing::warn!(job_id = %job, "Timed out after {:?}; cancelling", request.timeout);
        }
        std::thread::sleep(poll_interval);
    }
    pipeline.stop();

    let summary = summary
        .borrow_mut()
        .take()
        .context("Job finished without a summary")?;
    println!(
        "\nJob {}: {}/{} successful, {} failed, {} skipped in {:.1}s",
        summary.state,
        summary.succeeded,
        summary.total,
        summary.failed,
        summary.skipped,
        summary.elapsed_secs
    );

    if summary.state != JobState::Completed || summary.failed > 0 {
        let reason = summary
            .error
            .unwrap_or_else(|| format!("{} textures failed", summary.failed + summary.skipped));
        anyhow::bail!("Job {}: {reason}", summary.state);
    }
    Ok(())
}

fn unpack(inputs: &[PathBuf], output: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let files = scanner::collect_files(inputs, DDS_EXTENSIONS);
    if files.is_empty() {
        anyhow::bail!("No DDS files found in {:?}", inputs);
    }

    let converter = TexconvConverter::discover(&config.converter);
    if !converter.locator().is_available() {
        anyhow::bail!(
            "texconv not found. Set converter.path in the config file or add texconv to PATH."
        );
    }

    let rt = tokio::runtime::Runtime::new()?;
    let produced = rt.block_on(unpack_many(
        &converter,
        &config.converter,
        &files,
        output,
        |index, total, message| println!("[{index}/{total}] {message}"),
    ));

    println!("\nUnpacked {} of {} textures", produced.len(), files.len());
    if produced.len() < files.len() {
        anyhow::bail!("{} textures failed to unpack", files.len() - produced.len());
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tool = ConverterLocator::discover(&config.converter).check();

    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);
    if let Some(ref version) = tool.version {
        print!(" ({})", version);
    }
    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }
    println!();

    println!();
    if tool.available {
        println!("All required tools are available!");
    } else {
        println!("texconv is missing. Install DirectXTex texconv to enable conversion.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file {:?}", p))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    match &config.converter.path {
        Some(p) => println!("  Converter: {}", p.display()),
        None => println!("  Converter: texconv (from PATH)"),
    }
    println!(
        "  Output: {} with {} mip levels",
        config.converter.container_format, config.converter.mip_levels
    );
    println!(
        "  Batch size: {} (flush after {} ms idle)",
        config.pipeline.batch_size, config.pipeline.batch_timeout_ms
    );
    println!("  Workers: {}", config.pipeline.effective_workers());

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  ⚠ {warning}");
        }
    }

    Ok(())
}
