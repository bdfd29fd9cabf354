use std::sync::Arc;

use clap::Parser;
use eyre::Result;
use tracing_subscriber::{filter::LevelFilter, fmt::format::FmtSpan, EnvFilter};

use sandgate_agent::cli::{Cli, Command, Config};
use sandgate_agent::ignore::IgnoreList;
use sandgate_agent::listener;
use sandgate_agent::pipeline::{
    stage_channels, Dispatcher, InvestigationDispatcher, Launcher, PipelineHandle,
    PrefilterDispatcher, ReportDispatcher, ResultDispatcher, UploadDispatcher, WaitDispatcher,
};
use sandgate_agent::sandbox::{HttpSandboxClient, SandboxClient};
use sandgate_agent::storage::ArtifactStore;
use sandgate_agent::task_list::TaskList;

fn start_logger(default_level: LevelFilter) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        _ => EnvFilter::default().add_directive(default_level.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    start_logger(LevelFilter::INFO);

    let cli = Cli::parse();
    match cli.subcommand {
        Command::Run { config } => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.data_directory)?;
    if let Some(parent) = config.submit_socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let list = Arc::new(TaskList::new());
    let client: Arc<dyn SandboxClient> =
        Arc::new(HttpSandboxClient::new(&config.endpoint_url, &config.api_key));
    let store = Arc::new(ArtifactStore::new(&config.data_directory));
    let ignore = IgnoreList::new(&config.ignore_masks)?;

    let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![
        Arc::new(PrefilterDispatcher::new(Arc::clone(&list), ignore)),
        Arc::new(UploadDispatcher::new(Arc::clone(&list), client.clone())),
        Arc::new(WaitDispatcher::new(
            Arc::clone(&list),
            client.clone(),
            config.poll_interval(),
            config.max_poll_attempts,
        )),
        Arc::new(ResultDispatcher::new(Arc::clone(&list), client.clone())),
        Arc::new(ReportDispatcher::new(
            Arc::clone(&list),
            client.clone(),
            Arc::clone(&store),
        )),
        Arc::new(InvestigationDispatcher::new(
            Arc::clone(&list),
            client,
            store,
        )),
    ];

    let (tx, rx) = stage_channels(config.channel_capacity);
    let handle = PipelineHandle::new(Arc::clone(&list), tx.clone());
    let launcher = Launcher::start(list, dispatchers, config.worker_counts(), tx, &rx);

    let submit_listener =
        listener::spawn_submit_listener(config.submit_socket.clone(), handle).await?;
    tracing::info!("sandgate agent running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received; shutting down");

    if let Err(err) = listener::send_stop(&config.submit_socket).await {
        tracing::debug!("listener already gone: {}", err);
    }
    submit_listener.await?;
    launcher.shutdown().await;

    Ok(())
}
