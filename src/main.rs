use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use pie_tracker::bootstrap::{bootstrap, parse_seed_addresses};
use pie_tracker::config::{Config, ConfigDir, BOOTSTRAP_TIMEOUT};
use pie_tracker::identity::Certificate;
use pie_tracker::process::PidFile;
use pie_tracker::routing::Router;
use pie_tracker::storage::{BlobStore, Database};
use pie_tracker::transport::quic::QuicListener;
use pie_tracker::{Result, Tracker};

#[derive(Parser, Debug)]
#[command(version, about = "Tracker node of the Pie overlay")]
struct Cli {
    /// Log level, or any tracing filter directives
    #[arg(short = 'l', long = "log-level", default_value = "debug")]
    log_level: String,

    /// Directory of the config file, certificate, database and files
    ///
    /// Defaults to `<user config dir>/pie/tracker`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peer tracker addresses to bootstrap from, overriding the persisted ones
    #[arg(long = "tracker", value_name = "ADDRESSES")]
    trackers: Vec<String>,

    /// Keep logging to the terminal instead of the log file
    #[arg(long)]
    foreground: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_new(&cli.log_level) {
        Ok(filter) => filter,
        Err(error) => {
            eprintln!("Invalid log level {:?}: {error}", cli.log_level);
            return ExitCode::FAILURE;
        }
    };

    let output = LogOutput::default();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(output.clone())
        .with_ansi(cli.foreground)
        .init();

    match run(cli, output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, output: LogOutput) -> Result<()> {
    info!("Starting Pie tracker");

    let _pid_file = PidFile::acquire(&PidFile::default_path())?;

    let log_file = if cli.foreground {
        None
    } else {
        Some(open_log_file()?)
    };

    let root = cli
        .config
        .or_else(ConfigDir::default_root)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no user config directory"))?;
    let config_dir = ConfigDir::new(root);
    config_dir.create()?;

    let mut config = Config::load(&config_dir.config_file())?;
    let certificate = Certificate::load_or_generate(&config_dir.certificate(), &config_dir.key())?;
    let id = certificate.id();
    info!(%id, config = ?config_dir.root(), "Loaded identity");

    let database = Database::open(&config_dir.database())?;
    let blobs = BlobStore::create(config_dir.files()).await?;

    let listener = QuicListener::bind_any(config.port, &certificate)?;
    let router = Router::new(id, Arc::new(listener.dialer()));

    let tracker = Arc::new(
        Tracker::new(id, Arc::new(router), database, blobs)
            .with_record_binding(config.require_record_binding),
    );

    let shutdown = tracker.shutdown_token();
    ctrlc::set_handler(move || shutdown.cancel()).map_err(io::Error::other)?;

    bootstrap(&tracker, &parse_seed_addresses(&cli.trackers), BOOTSTRAP_TIMEOUT).await?;

    let local_addr = listener.local_addr()?;
    config.port = local_addr.port();
    config.save(&config_dir.config_file())?;

    info!(%local_addr, "Started Pie tracker");

    if let Some(file) = log_file {
        output.redirect(file);
    }

    tracker.run(&listener).await;
    listener.close().await;

    info!("Stopped Pie tracker");

    Ok(())
}

/// `<user cache dir>/pie/tracker/tracker.log`, truncated on every start.
fn open_log_file() -> Result<File> {
    let dir = dirs::cache_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no user cache directory"))?
        .join("pie")
        .join("tracker");
    std::fs::create_dir_all(&dir)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dir.join("tracker.log"))?;
    file.write_all(b"Pie Tracker Debug Log\nThis file will be cleared on every start\n\n")?;

    Ok(file)
}

#[derive(Debug, Clone, Default)]
/// Log writer going to stderr until redirected to a file.
struct LogOutput {
    file: Arc<Mutex<Option<File>>>,
}

impl LogOutput {
    fn redirect(&self, file: File) {
        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
    }
}

impl Write for LogOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(file) => file.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(file) => file.flush(),
            None => io::stderr().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogOutput {
    type Writer = LogOutput;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
