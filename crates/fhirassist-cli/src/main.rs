mod config;
mod render;

use clap::{Parser, Subcommand};
use config::{CliConfig, TOKEN_ENV};
use fhirassist_client::{HttpChatApi, SessionController};
use fhirassist_core::{Message, Role};
use fhirassist_session::{ConversationBuffer, ConversationStore, FileConversationStore};
use render::TerminalObserver;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fhirassist", about = "Chat with the SMART on FHIR admin assistant")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "fhirassist.toml")]
    config: PathBuf,

    /// Name of the saved conversation to use
    #[arg(long, default_value = "default")]
    conversation: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (/reset, /retry, /history, /quit)
    Chat,
    /// Ask a single question and print the answer
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Print the saved conversation
    History,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_history(messages: &[Message]) {
    if messages.is_empty() {
        println!("No messages.");
        return;
    }
    for message in messages {
        let who = match message.role {
            Role::User => "you",
            Role::Agent => "assistant",
        };
        println!("[{}] {who}:", message.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!("{}", message.content);
        if !message.sources.is_empty() {
            let titles: Vec<&str> = message.sources.iter().map(|s| s.title.as_str()).collect();
            println!("  sources: {}", titles.join(", "));
        }
        println!();
    }
}

async fn open_controller(
    cli: &Cli,
    config: &CliConfig,
    store: Arc<FileConversationStore>,
) -> anyhow::Result<SessionController> {
    let buffer = match store.load(&cli.conversation).await? {
        Some(conversation) => {
            info!(
                name = %cli.conversation,
                messages = conversation.message_count(),
                "Resuming saved conversation"
            );
            ConversationBuffer::from_conversation(conversation, config.greeting())
        }
        None => ConversationBuffer::new(config.greeting()),
    };

    let api = Arc::new(HttpChatApi::new(config.client.clone())?);
    Ok(
        SessionController::new(config.client.clone(), api, buffer)
            .with_translator(config.translator())
            .with_observer(Arc::new(TerminalObserver::new()))
            .with_store(store, cli.conversation.clone()),
    )
}

async fn run_chat(mut controller: SessionController) -> anyhow::Result<()> {
    if let Some(last) = controller.buffer().messages().last() {
        println!("{}\n", last.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                controller.reset().await?;
                if let Some(greeting) = controller.buffer().messages().first() {
                    println!("{}\n", greeting.content);
                }
            }
            "/retry" => {
                controller.retry_connection().await?;
                if let Some(notice) = controller.buffer().messages().last() {
                    println!("{}\n", notice.content);
                }
            }
            "/history" => print_history(&controller.buffer().messages()),
            _ => {
                if let Err(e) = controller.send(input).await {
                    warn!(error = %e, "Message not sent");
                    eprintln!("{e}");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = CliConfig::load(&cli.config)
        .await?
        .with_env_token(std::env::var(TOKEN_ENV).ok());
    config.client.validate()?;

    let store = Arc::new(FileConversationStore::new(config.data_dir.join("conversations")).await?);

    match &cli.command {
        Commands::Chat => {
            let controller = open_controller(&cli, &config, store).await?;
            run_chat(controller).await?;
        }
        Commands::Ask { message } => {
            let mut controller = open_controller(&cli, &config, store).await?;
            controller.send(&message.join(" ")).await?;
        }
        Commands::History => match store.load(&cli.conversation).await? {
            Some(conversation) => print_history(&conversation.messages),
            None => println!("No saved conversation named '{}'.", cli.conversation),
        },
    }

    Ok(())
}
