use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use clipbridge_client::{
    SessionConfig, SharedProgress, TRANSFER_TIMEOUT, TransferEngine, UploadField,
    config::{config_path, load_config, load_config_from_path, save_config_to_path},
};
use clipbridge_core::{OriginTag, PayloadBlob, ViewId};
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "clipbridge", about = "Clipboard content transfer between editing sessions")]
struct ClientArgs {
    /// Session config file; defaults to config.json in the config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-request timeout, overriding the session config.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the session config used by `origin` and `endpoint`.
    Init {
        webserver: String,
        doc: String,
        server_id: String,
        #[arg(long, default_value_t = 0)]
        view_id: ViewId,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "")]
        service_root: String,
        #[arg(long)]
        mobile: bool,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Fetch clipboard content from an endpoint URL.
    Download {
        url: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Post a file to an endpoint URL.
    Upload {
        url: String,
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = FieldArg::File)]
        field: FieldArg,
    },
    /// Move clipboard content from one endpoint to another.
    Relay { source: String, destination: String },
    /// Build a payload blob from `mime=path` parts.
    Pack {
        #[arg(required = true)]
        parts: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the parts of a payload blob, or print one of them.
    Unpack {
        input: PathBuf,
        #[arg(long)]
        mime: Option<String>,
    },
    /// Decode an origin tag, or print this session's tag.
    Origin {
        #[arg(long)]
        decode: Option<String>,
        #[arg(long, default_value = "")]
        key: String,
    },
    /// Print this session's clipboard endpoint URL.
    Endpoint {
        #[arg(long, default_value = "")]
        key: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FieldArg {
    File,
    Data,
}

impl From<FieldArg> for UploadField {
    fn from(field: FieldArg) -> Self {
        match field {
            FieldArg::File => UploadField::File,
            FieldArg::Data => UploadField::Data,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = ClientArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ClientArgs) -> Result<(), String> {
    match args.command {
        Command::Init {
            ref webserver,
            ref doc,
            ref server_id,
            view_id,
            ref user,
            ref service_root,
            mobile,
            ref lang,
        } => {
            let mut cfg = SessionConfig::new(
                webserver.as_str(),
                doc.as_str(),
                server_id.as_str(),
                view_id,
                user.as_str(),
            );
            cfg.service_root = service_root.clone();
            cfg.mobile = mobile;
            if let Some(lang) = lang {
                cfg.lang = lang.clone();
            }
            if let Some(ms) = args.timeout_ms {
                cfg.transfer_timeout_ms = ms;
            }
            let path = args.config.clone().unwrap_or_else(config_path);
            save_config_to_path(&path, &cfg)?;
            info!(path = %path.display(), "session config saved");
            Ok(())
        }
        Command::Download { ref url, ref out } => {
            let engine = engine_for(&args)?;
            let data = engine
                .download(url, progress_logger())
                .await
                .map_err(|err| err.to_string())?;
            info!(size = data.len(), "download done");
            write_output(out.as_deref(), &data)
        }
        Command::Upload {
            ref url,
            ref file,
            field,
        } => {
            let engine = engine_for(&args)?;
            let body = std::fs::read(file)
                .map_err(|err| format!("failed to read {}: {err}", file.display()))?;
            engine
                .upload(url, field.into(), Bytes::from(body), progress_logger())
                .await
                .map_err(|err| err.to_string())?;
            info!(url = %url, "upload done");
            Ok(())
        }
        Command::Relay {
            ref source,
            ref destination,
        } => {
            let engine = engine_for(&args)?;
            engine
                .relay(source, destination, progress_logger())
                .await
                .map_err(|err| err.to_string())?;
            info!("relay done");
            Ok(())
        }
        Command::Pack { ref parts, ref out } => {
            let mut blob = PayloadBlob::new();
            for entry in parts {
                let (mime, path) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("expected mime=path, got {entry}"))?;
                let data = std::fs::read(path)
                    .map_err(|err| format!("failed to read {path}: {err}"))?;
                blob.push(mime, data);
            }
            let encoded = blob.encode().map_err(|err| err.to_string())?;
            write_output(out.as_deref(), &encoded)
        }
        Command::Unpack {
            ref input,
            ref mime,
        } => {
            let raw = std::fs::read(input)
                .map_err(|err| format!("failed to read {}: {err}", input.display()))?;
            let blob = PayloadBlob::decode(Bytes::from(raw)).map_err(|err| err.to_string())?;
            match mime {
                Some(mime) => {
                    let part = blob
                        .get(mime)
                        .ok_or_else(|| format!("payload has no {mime} part"))?;
                    write_output(None, &part.data)
                }
                None => {
                    for part in blob.parts() {
                        println!("{}\t{}", part.mime, part.data.len());
                    }
                    Ok(())
                }
            }
        }
        Command::Origin {
            ref decode,
            ref key,
        } => {
            let tag = match decode {
                Some(encoded) => OriginTag::decode(encoded).map_err(|err| err.to_string())?,
                None => session_config(&args)?.origin(key),
            };
            let json = serde_json::to_string_pretty(&tag).map_err(|err| err.to_string())?;
            println!("{json}");
            println!("{}", tag.encode());
            Ok(())
        }
        Command::Endpoint { ref key } => {
            println!("{}", session_config(&args)?.origin(key).url());
            Ok(())
        }
    }
}

fn session_config(args: &ClientArgs) -> Result<SessionConfig, String> {
    let loaded = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => load_config()?,
    };
    loaded.ok_or_else(|| "no session config; run `clipbridge init` first".to_owned())
}

fn engine_for(args: &ClientArgs) -> Result<TransferEngine, String> {
    let timeout = match args.timeout_ms {
        Some(ms) => Duration::from_millis(ms),
        None => match &args.config {
            Some(path) => load_config_from_path(path)?
                .map(|cfg| cfg.transfer_timeout())
                .unwrap_or(TRANSFER_TIMEOUT),
            None => TRANSFER_TIMEOUT,
        },
    };
    debug!(?timeout, "transfer timeout");
    TransferEngine::with_timeout(timeout).map_err(|err| err.to_string())
}

fn progress_logger() -> SharedProgress {
    Arc::new(|fraction: f64| debug!(percent = (fraction * 100.0).round(), "transfer progress"))
}

fn write_output(path: Option<&Path>, data: &[u8]) -> Result<(), String> {
    match path {
        Some(path) => std::fs::write(path, data)
            .map_err(|err| format!("failed to write {}: {err}", path.display())),
        None => io::stdout()
            .write_all(data)
            .map_err(|err| format!("failed to write stdout: {err}")),
    }
}
