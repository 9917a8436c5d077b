use bytes::Bytes;
use clap::{Parser, Subcommand};
use memwire::{
    config::Config,
    connection::Connection,
    payload::Payload,
    request::{Operation, PartitionState},
    response::Response,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so clap's env fallbacks see variables
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Attempt to load config before initializing logs to pick up log_level from file
    let cfg_file_res = Config::load_from_file(cli.config.as_deref());
    let cfg_file = match &cfg_file_res {
        Ok(c) => c.clone(),
        Err(_) => Config::default(),
    };

    // Determine log filter precedence: CLI (--log-level / MEMWIRE_LOG_LEVEL)
    // > RUST_LOG (env) > memwire.toml log_level > default("info")
    let filter_spec = if let Some(ref lvl) = cli.log_level {
        lvl.clone()
    } else if let Ok(env_spec) = std::env::var("RUST_LOG") {
        env_spec
    } else if let Some(ref lvl) = cfg_file.log_level {
        lvl.clone()
    } else {
        "info".to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter_spec))
        .compact()
        .init();

    if let Err(e) = cfg_file_res.as_ref() {
        tracing::warn!(error = %format!("{e:?}"), "invalid config; using defaults");
    }

    let cfg = cfg_file.with_overrides(
        cli.server_addr.clone(),
        cli.bucket.clone(),
        cli.log_level.clone(),
        cli.mutation_tokens,
    );
    cfg.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut conn =
        Connection::connect(&cfg.server_addr, &cfg.bucket, cfg.mutation_tokens).await?;

    let decoded = match cli.command {
        Command::Get { key, partition } => {
            conn.call(partition, 0, Operation::Get { key: Bytes::from(key) })
                .await?
        }
        Command::Upsert {
            key,
            value,
            flags,
            expiry,
            partition,
        } => {
            conn.call(
                partition,
                0,
                Operation::Upsert {
                    key: Bytes::from(key),
                    flags,
                    expiry,
                    payload: Payload::new(Bytes::from(value)),
                },
            )
            .await?
        }
        Command::Remove {
            key,
            cas,
            partition,
        } => {
            conn.call(partition, cas, Operation::Remove { key: Bytes::from(key) })
                .await?
        }
        Command::Counter {
            key,
            delta,
            initial,
            expiry,
            partition,
        } => {
            conn.call(
                partition,
                0,
                Operation::Counter {
                    key: Bytes::from(key),
                    delta,
                    initial,
                    expiry,
                },
            )
            .await?
        }
        Command::Stat { key } => {
            conn.call(
                -1,
                0,
                Operation::Stat {
                    key: Bytes::from(key.unwrap_or_default()),
                },
            )
            .await?
        }
        Command::BucketConfig => conn.call(-1, 0, Operation::GetBucketConfig).await?,
        Command::Tokens => {
            conn.call(
                -1,
                0,
                Operation::GetAllMutationTokens {
                    state: PartitionState::Any,
                },
            )
            .await?
        }
        Command::Ping => conn.keepalive().await?,
    };

    print_response(&decoded.response);
    conn.close().await?;
    Ok(())
}

fn print_response(response: &Response) {
    let common = response.common();
    let mut out = serde_json::json!({
        "status": format!("{:?}", common.status),
        "code": common.code,
        "cas": common.cas,
    });
    match response {
        Response::Get { flags, content, .. } => {
            out["flags"] = (*flags).into();
            out["value"] = String::from_utf8_lossy(content).into_owned().into();
        }
        Response::GetBucketConfig { config, origin, .. } => {
            out["origin"] = origin.clone().into();
            out["config"] = String::from_utf8_lossy(config).into_owned().into();
        }
        Response::Store { token, .. } | Response::Remove { token, .. } => {
            if let Some(token) = token {
                out["mutation_token"] = serde_json::json!({
                    "partition": token.partition,
                    "partition_uuid": token.partition_uuid,
                    "sequence": token.sequence,
                });
            }
        }
        Response::Counter { value, .. } => {
            out["value"] = (*value).into();
        }
        Response::Stat { entries, .. } => {
            let map: serde_json::Map<_, _> = entries
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
                .collect();
            out["stats"] = map.into();
        }
        Response::GetAllMutationTokens { tokens, .. } => {
            out["tokens"] = tokens
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "partition": t.partition,
                        "sequence": t.sequence,
                    })
                })
                .collect::<Vec<_>>()
                .into();
        }
        _ => {}
    }
    println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
}

#[derive(Debug, Parser)]
#[command(
    name = "memwire",
    version,
    about = "Diagnostic client for the key/value binary protocol"
)]
struct Cli {
    /// Path to config TOML file
    #[arg(short = 'c', long = "config", env = "MEMWIRE_CONFIG")]
    config: Option<String>,

    /// Server data address (host:port)
    #[arg(long = "server-addr", env = "MEMWIRE_SERVER_ADDR")]
    server_addr: Option<String>,

    /// Bucket name
    #[arg(long = "bucket", env = "MEMWIRE_BUCKET")]
    bucket: Option<String>,

    /// Log level or filter spec (e.g., info or info,memwire=trace)
    #[arg(long = "log-level", env = "MEMWIRE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable/disable mutation-token extraction
    #[arg(long = "mutation-tokens", env = "MEMWIRE_MUTATION_TOKENS")]
    mutation_tokens: Option<bool>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a document
    Get {
        key: String,
        #[arg(long, default_value_t = 0)]
        partition: i16,
    },
    /// Store a document unconditionally
    Upsert {
        key: String,
        value: String,
        #[arg(long, default_value_t = 0)]
        flags: u32,
        #[arg(long, default_value_t = 0)]
        expiry: u32,
        #[arg(long, default_value_t = 0)]
        partition: i16,
    },
    /// Delete a document
    Remove {
        key: String,
        #[arg(long, default_value_t = 0)]
        cas: u64,
        #[arg(long, default_value_t = 0)]
        partition: i16,
    },
    /// Increment or decrement a numeric document
    Counter {
        key: String,
        delta: i64,
        #[arg(long, default_value_t = 0)]
        initial: u64,
        #[arg(long, default_value_t = 0)]
        expiry: u32,
        #[arg(long, default_value_t = 0)]
        partition: i16,
    },
    /// Stream a statistics group
    Stat { key: Option<String> },
    /// Fetch the raw bucket configuration
    BucketConfig,
    /// Fetch current mutation tokens for all partitions
    Tokens,
    /// Keep-alive round trip
    Ping,
}
