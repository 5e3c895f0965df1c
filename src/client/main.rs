//! Cipher Chat Client
//!
//! Terminal client for the chat channel and the file/token API. Payloads are
//! encrypted locally before they leave the machine.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use cipher_chat::crypto::envelope;
use cipher_chat::{ClientConfig, ClientFrame, FileShare, FileSummary, Message, ServerFrame};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "cipher-client")]
#[command(about = "Cipher Chat Client")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/client.toml")]
    config: PathBuf,

    /// Server base URL
    #[arg(long)]
    server: Option<String>,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// API key for the file endpoints
    #[arg(long)]
    api_key: Option<String>,

    /// Send chat messages in plaintext
    #[arg(long)]
    plaintext: bool,

    /// Log level (defaults to the config file's value)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the chat room
    Chat,
    /// Request a capability token for the file-sharing surface
    Token,
    /// Encrypt and upload a file
    Upload { path: PathBuf },
    /// List shared files
    List,
    /// Download and decrypt a file
    Download { id: String, out: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let mut config = if config_found {
        ClientConfig::from_file(&args.config.to_string_lossy())?
    } else {
        ClientConfig::default()
    };

    // Initialize logging
    let log_level = log_filter(args.log_level, &config);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level))
        .init();

    if !config_found {
        info!("Config file not found, using defaults");
    }
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(username) = args.username {
        config.username = username;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key;
    }
    if args.plaintext {
        config.encrypt = false;
    }

    match args.command {
        Command::Chat => run_chat(&config).await,
        Command::Token => {
            let response = api_request(&config, reqwest::Method::POST, "/api/generate-token")
                .send()
                .await?;
            let body: Value = check(response).await?.json().await?;
            println!("{}", body["token"].as_str().unwrap_or_default());
            Ok(())
        }
        Command::Upload { path } => upload(&config, &path).await,
        Command::List => {
            let response = api_request(&config, reqwest::Method::GET, "/api/files")
                .send()
                .await?;
            let files: Vec<FileSummary> = check(response).await?.json().await?;
            for file in files {
                println!(
                    "{}  {}  {}  {}",
                    file.id,
                    format_time(file.timestamp),
                    file.username,
                    file.name
                );
            }
            Ok(())
        }
        Command::Download { id, out } => download(&config, &id, &out).await,
    }
}

/// `--log-level` wins over the config file
fn log_filter(arg: Option<String>, config: &ClientConfig) -> String {
    arg.unwrap_or_else(|| config.log_level.clone())
}

/// Interactive chat session
async fn run_chat(config: &ClientConfig) -> Result<()> {
    let url = config.ws_url();
    let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", url))?;
    let (mut sink, mut stream) = socket.split();

    println!("Connected to {} as {}", url, config.username);
    println!("Type a message and press enter. /quit to leave.");
    println!();

    let mut reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Text(text)) => match ServerFrame::from_json(&text) {
                    Ok(frame) => print_frame(frame),
                    Err(e) => error!("Unreadable frame from server: {}", e),
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    error!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut reader => {
                println!("Disconnected from server");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }

                let content = if config.encrypt {
                    envelope::encode_text(line)?
                } else {
                    line.to_string()
                };
                let frame = ClientFrame::Chat {
                    username: config.username.clone(),
                    content,
                    encrypted: config.encrypt,
                };
                sink.send(WsMessage::Text(frame.to_json()?)).await?;
            }
        }
    }

    let _ = sink.close().await;
    reader.abort();
    Ok(())
}

fn print_frame(frame: ServerFrame) {
    match frame {
        ServerFrame::History { messages } => {
            if !messages.is_empty() {
                println!("--- last {} messages ---", messages.len());
            }
            for message in messages {
                print_message(&message);
            }
        }
        ServerFrame::Message { message } => print_message(&message),
        ServerFrame::Error { message } => println!("! {}", message),
    }
}

fn print_message(message: &Message) {
    let content = if message.encrypted {
        envelope::decode_text(&message.content)
    } else {
        message.content.clone()
    };
    let lock = if message.encrypted { "🔒" } else { "  " };
    println!(
        "[{}] {} {}: {}",
        format_time(message.timestamp),
        lock,
        message.username,
        content
    );
}

fn format_time(epoch_ms: i64) -> String {
    Local
        .timestamp_millis_opt(epoch_ms)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

fn api_request(
    config: &ClientConfig,
    method: reqwest::Method,
    path: &str,
) -> reqwest::RequestBuilder {
    let url = format!("{}{}", config.server_url.trim_end_matches('/'), path);
    let mut builder = reqwest::Client::new().request(method, url);
    if let Some(key) = &config.api_key {
        builder = builder.bearer_auth(key);
    }
    builder
}

/// Turn a non-success response into an error carrying the server's message
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body["message"].as_str().unwrap_or("no details");
    Err(anyhow!("server returned {}: {}", status, message))
}

async fn upload(config: &ClientConfig, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;

    let data = envelope::encode(&bytes)?;
    let response = api_request(config, reqwest::Method::POST, "/api/files")
        .json(&json!({ "name": name, "data": data }))
        .send()
        .await?;
    let share: FileShare = check(response).await?.json().await?;

    println!("Uploaded {} ({} bytes) as {}", share.name, bytes.len(), share.id);
    Ok(())
}

async fn download(config: &ClientConfig, id: &str, out: &Path) -> Result<()> {
    let response = api_request(config, reqwest::Method::GET, &format!("/api/files/{}", id))
        .send()
        .await?;
    let body: Value = check(response).await?.json().await?;
    let data = body["data"]
        .as_str()
        .ok_or_else(|| anyhow!("response carried no file data"))?;

    let bytes = envelope::try_decode(data).context("file could not be decrypted")?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;

    println!("Saved {} bytes to {}", bytes.len(), out.display());
    Ok(())
}
