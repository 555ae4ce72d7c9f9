use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};

use crate::{
    config::Config,
    graph::ComputationGraph,
    submitter::JobSubmitter,
    workflow::CardRequest,
};

mod config;
mod graph;
mod submitter;
mod utils;
mod workflow;

/// Queue a trading-card image on a ComfyUI server.
#[derive(Parser, Debug)]
struct CommandLineFlags {
    /// TOML config file. Defaults are used for anything it leaves out.
    #[arg(long, short)]
    pub config_path: Option<PathBuf>,
    /// ComfyUI base URL. Overrides the config file and $COMFYUI_URL.
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Submit this API-format workflow instead of the built-in card.
    #[arg(long, conflicts_with_all = ["prompt", "negative", "seed", "steps", "width", "height", "filename_prefix"])]
    pub workflow: Option<PathBuf>,
    #[arg(long)]
    pub prompt: Option<String>,
    #[arg(long)]
    pub negative: Option<String>,
    /// Defaults to a random seed.
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub steps: Option<u32>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long)]
    pub filename_prefix: Option<String>,
    /// Print the request body instead of sending it.
    #[arg(long)]
    pub dry_run: bool,
}

impl CommandLineFlags {
    fn card_request(&self) -> CardRequest {
        let mut request = CardRequest::default();
        if let Some(prompt) = &self.prompt {
            request.prompt = prompt.clone();
        }
        if let Some(negative) = &self.negative {
            request.negative_prompt = negative.clone();
        }
        if let Some(seed) = self.seed {
            request.seed = seed;
        }
        if let Some(steps) = self.steps {
            request.steps = steps;
        }
        if let Some(width) = self.width {
            request.width = width;
        }
        if let Some(height) = self.height {
            request.height = height;
        }
        if let Some(prefix) = &self.filename_prefix {
            request.filename_prefix = prefix.clone();
        }
        request
    }

    fn graph(&self, config: &Config) -> Result<ComputationGraph> {
        if let Some(path) = &self.workflow {
            let graph = workflow::load_workflow(path)?;
            info!("Loaded {} nodes from {}", graph.len(), path.display());
            return Ok(graph);
        }
        let request = self.card_request();
        info!("Card prompt: {}", utils::preview(&request.prompt, 100));
        info!("Seed: {}, {}x{}, {} steps", request.seed, request.width, request.height, request.steps);
        Ok(request.build(&config.model))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CommandLineFlags::parse();

    let mut config = Config::load(args.config_path.as_deref()).context("failed to initialize config")?;
    if let Some(endpoint) = &args.endpoint {
        config.backend.endpoint = endpoint.clone();
    }
    debug!("Loaded config: {:?}", config);

    let graph = args.graph(&config).context("failed to build workflow")?;

    let submitter = match JobSubmitter::new(&config.backend) {
        Ok(submitter) => submitter,
        Err(e) => {
            error!("{}", e);
            error!("{}", e.remediation());
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.dry_run {
        if let Err(e) = graph.validate() {
            warn!("Workflow would be rejected: {}", e);
        }
        let body = submitter.request_body(&graph).context("failed to build request")?;
        let body = serde_json::to_string_pretty(&body).context("failed to serialize request")?;
        println!("{}", body);
        return Ok(ExitCode::SUCCESS);
    }

    info!("Queueing workflow on {}", submitter.endpoint());
    match submitter.submit(&graph).await {
        Ok(handle) => {
            info!("Generation queued. Prompt ID: {}", handle.id);
            if args.workflow.is_none() {
                let prefix = args.filename_prefix.as_deref().unwrap_or("hemingway_card");
                info!("Output will appear in ComfyUI's output folder as {}_*.png", prefix);
            }
            println!("{}", handle.id);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Submission failed: {}", e);
            error!("{}", e.remediation());
            Ok(ExitCode::FAILURE)
        }
    }
}
