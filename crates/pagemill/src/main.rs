use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use pagemill::db::{chapter_repo, Database};
use pagemill::service::{self, IngestService};
use pagemill::{load_config, logging, PagemillError, UploadSource};

#[derive(Debug, Parser)]
#[command(name = "pagemill", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, global = true, default_value = "pagemill.json")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a chapter that pages can be ingested into.
    #[command(name = "create-chapter")]
    CreateChapter {
        id: String,
        #[arg(long)]
        title: Option<String>,
    },

    /// Ingest an archive, document or image into a chapter.
    #[command(alias = "i", name = "ingest")]
    Ingest {
        file: PathBuf,
        #[arg(long)]
        chapter: String,
        #[arg(long, default_value = "cli")]
        caller: String,
        /// Filename to present as the upload's name. Defaults to the file's own name.
        #[arg(long)]
        filename: Option<String>,
    },

    /// List the committed pages of a chapter.
    #[command(alias = "ls", name = "pages")]
    Pages { chapter: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.json_logs) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, PagemillError> {
    let config = load_config(&cli.config)?;

    match cli.cmd {
        Command::CreateChapter { id, title } => {
            let db = Database::open(&service::database_path(&config)?)?;
            let chapter = chapter_repo::insert_chapter(&db, &id, title.as_deref())?;
            println!("Created chapter {} ({})", chapter.id, chapter.status);
            Ok(ExitCode::SUCCESS)
        }
        Command::Ingest {
            file,
            chapter,
            caller,
            filename,
        } => {
            let declared = filename.unwrap_or_else(|| pagemill::sanitize::redact_path(&file));
            let service = IngestService::start(&config)?;
            let outcome = service.ingest(UploadSource::Path(file), &declared, &chapter, &caller);
            service.shutdown();

            let result = outcome?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Pages { chapter } => {
            let db = Database::open(&service::database_path(&config)?)?;
            match chapter_repo::find_chapter(&db, &chapter)? {
                Some(row) => println!("{} [{}] {} pages", row.id, row.status, row.page_count),
                None => {
                    println!("Chapter {} does not exist", chapter);
                    return Ok(ExitCode::FAILURE);
                }
            }
            for page in chapter_repo::list_pages(&db, &chapter)? {
                println!(
                    "{:>4}  {}  {}x{}  {}",
                    page.ordinal, page.storage_path, page.width, page.height, page.original_name
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
