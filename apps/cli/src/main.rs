mod console;

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use printbot_printing::{
    normalize_text, CommandDocumentPrinter, CommandRenderer, JobDispatcher, Margin,
    MonospaceMeasure, Orientation, PaperId, Paginator, PdfSpoolDevice, PrintDispatcher,
    PrintableArea,
};
use printbot_reaper::{FsRemover, ResourceReaper};
use printbot_session::{
    ConfigurationWizard, LocalFileDownloader, SessionRegistry, SubmissionRouter, Transport,
};
use printbot_settings::{BotSettings, SettingsStore};

use crate::console::{ConsoleTransport, EventPump};

const DEFAULT_SETTINGS_FILE: &str = "printbot.json";

#[derive(Parser)]
#[command(
    name = "printbot",
    about = "Chat-driven print bot with a console transport",
    author,
    version
)]
struct Cli {
    /// 設定檔路徑。 / Settings file (defaults to ./printbot.json).
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read JSON-lines chat events from stdin and answer on stdout.
    Serve,
    /// Show how a text file would be split into pages.
    Paginate(PaginateArgs),
    /// 管理設定檔。 / Manage the settings file.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Args)]
struct PaginateArgs {
    /// UTF-8 text file to paginate.
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Font size in points.
    #[arg(long, default_value_t = 12)]
    font_size: u32,

    #[arg(long, value_enum, default_value_t = OrientationChoice::Portrait)]
    orientation: OrientationChoice,

    /// Paper size; defaults to the configured paper.
    #[arg(long, value_enum)]
    paper: Option<PaperChoice>,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Write a settings file filled with defaults.
    Init(SettingsInitArgs),
}

#[derive(Args)]
struct SettingsInitArgs {
    #[arg(value_name = "FILE")]
    output: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    force: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OrientationChoice {
    Portrait,
    Landscape,
}

impl From<OrientationChoice> for Orientation {
    fn from(choice: OrientationChoice) -> Self {
        match choice {
            OrientationChoice::Portrait => Orientation::Portrait,
            OrientationChoice::Landscape => Orientation::Landscape,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PaperChoice {
    A4,
    Letter,
    Legal,
    A3,
}

impl From<PaperChoice> for PaperId {
    fn from(choice: PaperChoice) -> Self {
        match choice {
            PaperChoice::A4 => PaperId::A4,
            PaperChoice::Letter => PaperId::Letter,
            PaperChoice::Legal => PaperId::Legal,
            PaperChoice::A3 => PaperId::A3,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli { settings, command } = Cli::parse();
    let settings_path = settings.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    match command {
        Commands::Serve => serve(&load_settings(&settings_path)?),
        Commands::Paginate(args) => paginate(args, &load_settings(&settings_path)?),
        Commands::Settings(SettingsCommand::Init(args)) => init_settings(args),
    }
}

fn load_settings(path: &Path) -> Result<BotSettings> {
    let store = SettingsStore::load(path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    Ok(store.into_settings())
}

fn serve(settings: &BotSettings) -> Result<()> {
    let temp_dir = &settings.storage.temp_dir;
    fs::create_dir_all(temp_dir)
        .with_context(|| format!("failed to create temp directory {}", temp_dir.display()))?;

    let reaper = ResourceReaper::spawn(settings.retry_policy(), Arc::new(FsRemover))
        .context("failed to start the artifact reaper")?;
    let dispatcher = build_dispatcher(settings, reaper.clone());
    let registry = Arc::new(SessionRegistry::new(reaper));
    let wizard = ConfigurationWizard::new(registry, dispatcher)
        .with_font_sizes(settings.printing.font_sizes.clone());

    let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport::new(BufWriter::new(io::stdout())));
    let router = Arc::new(SubmissionRouter::new(
        wizard,
        Arc::clone(&transport),
        Arc::new(LocalFileDownloader),
        temp_dir.clone(),
    ));

    if settings.transport.authorized_users.is_empty() {
        log::warn!("No authorized users configured; every event will be rejected");
    }
    info!(
        "Serving on stdin/stdout; spooling to {}",
        settings.storage.spool_dir.display()
    );
    EventPump::new(
        router,
        transport,
        settings.transport.clone(),
        settings.idle_timeout(),
    )
    .run(io::stdin().lock())?;
    info!("Input closed; shutting down");
    Ok(())
}

fn build_dispatcher(settings: &BotSettings, reaper: ResourceReaper) -> Arc<dyn JobDispatcher> {
    let commands = &settings.commands;
    let mut device = PdfSpoolDevice::new(&settings.storage.spool_dir);
    if let Some(submit) = &commands.spool_submit {
        device = device.with_submit(submit.clone());
    }

    let temp_dir = settings.storage.temp_dir.clone();
    let renderer = match &commands.page_renderer {
        Some(command) => CommandRenderer::new(command.clone(), temp_dir),
        None => CommandRenderer::pdftoppm(temp_dir),
    };
    let documents = match &commands.native_printer {
        Some(command) => CommandDocumentPrinter::new(command.clone()),
        None => CommandDocumentPrinter::libreoffice(),
    };

    Arc::new(
        PrintDispatcher::new(device, settings.dispatch_options())
            .with_renderer(Arc::new(renderer))
            .with_document_printer(Arc::new(documents))
            .with_reaper(reaper),
    )
}

fn paginate(args: PaginateArgs, settings: &BotSettings) -> Result<()> {
    if args.font_size == 0 {
        bail!("font size must be at least 1 pt");
    }
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let text = normalize_text(&raw);

    let paper = args.paper.map(PaperId::from).unwrap_or(settings.printing.paper);
    let area = PrintableArea::from_paper(
        paper.size(),
        args.orientation.into(),
        Margin::uniform(settings.printing.margin_pt),
    );
    let measure = MonospaceMeasure::for_font_size(args.font_size as f32);
    let pagination = Paginator::new(&measure).paginate(&text, area);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (index, slice) in pagination.slices.iter().enumerate() {
        writeln!(out, "page {}: {}..{}", index + 1, slice.start, slice.end)?;
    }
    match pagination.halted_at {
        Some(offset) => writeln!(
            out,
            "halted at byte {offset}: text does not fit on a page"
        )?,
        None => writeln!(out, "{} page(s), {} byte(s)", pagination.page_count(), text.len())?,
    }
    Ok(())
}

fn init_settings(args: SettingsInitArgs) -> Result<()> {
    let store = SettingsStore::init(&args.output, args.force)?;
    println!("Wrote default settings to {}", store.path().display());
    Ok(())
}
