mod handlers;
mod schema;
mod server;

#[cfg(test)]
mod schema_test;
#[cfg(test)]
mod server_test;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spine_core::{Config, Spine};

use crate::schema::Schema;
use crate::server::{Bootstrap, ServeOptions};

#[derive(Parser)]
#[command(
    name = "spine",
    about = "Spine - transactional entity server with pessimistic locking",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Spine HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3200")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "SPINE_STORAGE")]
        storage: String,

        /// JSON schema file with the class models to serve
        #[arg(long, env = "SPINE_SCHEMA")]
        schema: Option<PathBuf>,

        /// JSON runtime configuration; the flags below override it
        #[arg(long, env = "SPINE_CONFIG")]
        config: Option<PathBuf>,

        /// Seconds a lock may sit idle before it is reclaimed
        #[arg(long, env = "SPINE_LOCK_TIMEOUT")]
        lock_timeout: Option<u64>,

        /// Default session timeout in seconds
        #[arg(long, env = "SPINE_SESSION_TIMEOUT")]
        session_timeout: Option<u64>,

        /// Largest session timeout a client may request, in seconds
        #[arg(long, env = "SPINE_MAX_SESSION_TIMEOUT")]
        max_session_timeout: Option<u64>,

        /// Seconds between sweeper passes
        #[arg(long, env = "SPINE_SWEEP_INTERVAL")]
        sweep_interval: Option<u64>,

        /// Number of object cache shards
        #[arg(long, env = "SPINE_CACHE_SHARDS")]
        cache_shards: Option<usize>,

        /// Superuser created at startup
        #[arg(long, env = "SPINE_ADMIN_USER", requires = "admin_password")]
        admin_user: Option<String>,

        #[arg(long, env = "SPINE_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: Option<String>,

        /// Requests served at once
        #[arg(long, default_value = "256")]
        max_concurrency: usize,
    },

    /// Print the IDL for the classes of a schema file
    Idl {
        /// JSON schema file
        schema: PathBuf,

        /// Overrides the module name given in the schema
        #[arg(long)]
        module: Option<String>,

        /// Include doc comments
        #[arg(long)]
        docs: bool,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            schema,
            config,
            lock_timeout,
            session_timeout,
            max_session_timeout,
            sweep_interval,
            cache_shards,
            admin_user,
            admin_password,
            max_concurrency,
        } => {
            let overrides = ConfigOverrides {
                lock_timeout,
                session_timeout,
                max_session_timeout,
                sweep_interval,
                cache_shards,
            };
            match prepare(schema, config, overrides) {
                Ok((schema, config)) => {
                    let bootstrap = admin_user
                        .zip(admin_password)
                        .map(|(username, password)| Bootstrap { username, password });
                    server::run(ServeOptions {
                        host,
                        port,
                        storage,
                        config,
                        schema,
                        bootstrap,
                        max_concurrency: max_concurrency.max(1),
                    })
                    .await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Idl { schema, module, docs } => print_idl(&schema, module, docs),
        Commands::Version => {
            println!("spine {}", env!("CARGO_PKG_VERSION"));
            println!("Transactional entity server with pessimistic locking");
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

struct ConfigOverrides {
    lock_timeout: Option<u64>,
    session_timeout: Option<u64>,
    max_session_timeout: Option<u64>,
    sweep_interval: Option<u64>,
    cache_shards: Option<usize>,
}

impl ConfigOverrides {
    fn apply(self, mut config: Config) -> Config {
        if let Some(secs) = self.lock_timeout {
            config = config.lock_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.session_timeout {
            config = config.session_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.max_session_timeout {
            config = config.max_session_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.sweep_interval {
            config = config.sweep_interval(Duration::from_secs(secs));
        }
        if let Some(shards) = self.cache_shards {
            config = config.cache_shards(shards);
        }
        config
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config, String> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
}

fn prepare(
    schema: Option<PathBuf>,
    config: Option<PathBuf>,
    overrides: ConfigOverrides,
) -> Result<(Option<Schema>, Config), String> {
    let config = overrides.apply(load_config(config)?);
    if config.sweep_interval.is_zero() {
        return Err("sweep interval must be at least one second".to_string());
    }
    if config.max_session_timeout < config.session_timeout {
        return Err("max session timeout is below the session timeout".to_string());
    }
    let schema = schema.map(Schema::load).transpose()?;
    Ok((schema, config))
}

fn print_idl(path: &Path, module: Option<String>, docs: bool) -> Result<(), String> {
    let schema = Schema::load(path)?;
    let (spine, _store) = Spine::in_memory(Config::default());
    schema.register(&spine)?;
    let module = module.unwrap_or(schema.module);
    print!("{}", spine.interface_idl(&module, docs));
    Ok(())
}
