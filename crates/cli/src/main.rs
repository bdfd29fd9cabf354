use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use sandgate_agent::listener::STOP_SENTINEL;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Submit items to a running sandgate agent", long_about = None)]
pub struct ArgConfiguration {
    /// Submit socket of the running agent.
    #[clap(
        short,
        long,
        default_value = "/var/run/sandgate/submit.sock",
        value_name = "SOCKET PATH"
    )]
    socket: PathBuf,
    #[command(subcommand)]
    command: ConfCommands,
}

#[derive(Subcommand, Debug)]
enum ConfCommands {
    /// Submit local files or directories for analysis.
    #[command(arg_required_else_help = true)]
    File {
        /// Paths to submit. Directories are expanded by the agent.
        #[clap(value_name = "PATH", num_args = 1..)]
        paths: Vec<PathBuf>,
    },

    /// Submit URLs for analysis.
    #[command(arg_required_else_help = true)]
    Url {
        #[clap(value_name = "URL", num_args = 1..)]
        urls: Vec<String>,
    },

    /// Ask the agent to stop accepting submissions.
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = ArgConfiguration::parse();

    let records = match cfg.command {
        ConfCommands::File { paths } => paths
            .into_iter()
            .map(|path| {
                // The agent resolves paths in its own working directory,
                // so relative ones must be absolutized here.
                let absolute = path
                    .canonicalize()
                    .with_context(|| format!("cannot resolve {}", path.display()))?;
                Ok(absolute.to_string_lossy().into_owned())
            })
            .collect::<Result<Vec<_>>>()?,
        ConfCommands::Url { urls } => urls,
        ConfCommands::Stop => vec![STOP_SENTINEL.to_string()],
    };

    let mut stream = UnixStream::connect(&cfg.socket)
        .await
        .with_context(|| format!("cannot reach agent at {}", cfg.socket.display()))?;
    for record in records {
        stream.write_all(record.as_bytes()).await?;
        stream.write_all(b"\n").await?;
    }
    stream.shutdown().await?;

    Ok(())
}
