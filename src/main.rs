use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gitme::config::{load_config, Config};
use gitme::gemini::GeminiClient;
use gitme::github::{parse_repo_arg, CodeloadClient};
use gitme::history::{now_millis, GenerationRecord, HistoryStore};
use gitme::readme::{fetch_repo, generate_readme, unwrap_top_level_fence, FetchRequest, GenerateRequest};
use gitme::scanner::RepoSnapshot;
use gitme::server::run_stdio_server;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "gitme")]
#[command(version)]
#[command(about = "Draft a README.md for any GitHub repository with Gemini")]
struct Cli {
    /// Increase log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a repository archive, select its files and store the snapshot
    Fetch {
        /// GitHub repository URL
        url: String,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a README for a repository (fetching it first if needed)
    Generate(GenerateArgs),
    /// Inspect or edit the local history
    History {
        #[command(subcommand)]
        cmd: HistoryCommand,
    },
    /// Serve fetchRepo / generateReadme as line-delimited JSON-RPC on stdio
    Serve,
}

#[derive(Debug, Args)]
struct SelectionArgs {
    /// Per-file size ceiling in bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Maximum number of files to keep
    #[arg(long)]
    max_files: Option<usize>,

    /// Regex a path must match to be kept (repeatable or comma-separated)
    #[arg(long = "include", value_name = "REGEX", value_delimiter = ',')]
    include: Vec<String>,

    /// Regex that drops matching paths (repeatable or comma-separated); replaces the defaults
    #[arg(long = "exclude", value_name = "REGEX", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Do not apply the default exclude patterns
    #[arg(long)]
    no_default_excludes: bool,
}

impl SelectionArgs {
    /// Any selection flag given; a stored snapshot was taken with other settings.
    fn is_set(&self) -> bool {
        self.max_file_size.is_some()
            || self.max_files.is_some()
            || !self.include.is_empty()
            || !self.exclude.is_empty()
            || self.no_default_excludes
    }

    fn to_request(&self, url: String) -> FetchRequest {
        let exclude_patterns = if !self.exclude.is_empty() {
            Some(self.exclude.clone())
        } else if self.no_default_excludes {
            Some(vec![])
        } else {
            None
        };
        FetchRequest {
            url,
            max_file_size: self.max_file_size,
            max_files: self.max_files,
            include_patterns: (!self.include.is_empty()).then(|| self.include.clone()),
            exclude_patterns,
        }
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// GitHub repository URL or owner/repo
    target: String,

    /// Fetch a fresh snapshot even if one is stored
    #[arg(long)]
    refresh: bool,

    #[command(flatten)]
    selection: SelectionArgs,

    /// Model id (defaults to config, gemini-2.0-flash)
    #[arg(long)]
    model: Option<String>,

    /// Character budget for file excerpts
    #[arg(long)]
    max_chars: Option<usize>,

    /// Write the README here instead of stdout
    #[arg(long, short = 'o')]
    out: Option<PathBuf>,

    /// Echo the prompt sent to the model on stderr
    #[arg(long)]
    show_prompt: bool,

    /// Print the full generation result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    /// List stored repositories, most recent first
    List,
    /// Show one stored repository
    Show {
        repo: String,
        /// Print only the README (edited version if present, else the latest generation)
        #[arg(long)]
        readme: bool,
    },
    /// Forget one repository
    Remove { repo: String },
    /// Forget everything
    Clear,
    /// Store an edited README for a repository
    SaveEdit { repo: String, file: PathBuf },
}

fn setup_logging(verbose: u8) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => tracing_subscriber::EnvFilter::new("warn"),
        1 => tracing_subscriber::EnvFilter::new("info"),
        _ => tracing_subscriber::EnvFilter::new("debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(msg: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb.set_message(msg);
    Ok(pb)
}

fn fetch_and_store(cfg: &Config, store: &mut HistoryStore, req: &FetchRequest) -> Result<RepoSnapshot> {
    let pb = spinner(format!("downloading {}...", req.url))?;
    let fetcher = CodeloadClient::new(&cfg.archive);
    let snapshot = match fetch_repo(req, cfg, &fetcher) {
        Ok(s) => s,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };
    pb.finish_with_message(format!(
        "{}: {} files, {} bytes",
        snapshot.repo, snapshot.file_count, snapshot.total_size
    ));
    store.upsert_snapshot(snapshot.clone(), Some(req.url.clone()))?;
    Ok(snapshot)
}

fn print_snapshot(snapshot: &RepoSnapshot) {
    for f in &snapshot.files {
        let note = if f.content.is_none() { "  (binary)" } else { "" };
        println!("{:>9}  {}{}", f.size, f.path, note);
    }
    println!(
        "{} files, {} bytes total",
        snapshot.file_count, snapshot.total_size
    );
}

fn ago(ts: u64) -> String {
    let secs = now_millis().saturating_sub(ts) / 1000;
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn run_generate(cfg: &Config, store: &mut HistoryStore, args: GenerateArgs) -> Result<()> {
    let repo = parse_repo_arg(&args.target)?;
    let id = repo.identifier();

    let refresh = args.refresh || args.selection.is_set();
    if refresh && !args.refresh {
        tracing::info!(repo = %id, "selection flags given, fetching a fresh snapshot");
    }
    let stored = store
        .get_entry(&id)
        .filter(|_| !refresh)
        .map(|e| e.snapshot.snapshot.clone());
    let snapshot = match stored {
        Some(s) => {
            tracing::info!(repo = %id, files = s.file_count, "using stored snapshot");
            s
        }
        None => {
            let url = if args.target.contains("github.com") {
                args.target.clone()
            } else {
                format!("https://github.com/{id}")
            };
            fetch_and_store(cfg, store, &args.selection.to_request(url))?
        }
    };

    let generator = GeminiClient::from_config(&cfg.generation)?;
    let req = GenerateRequest {
        max_chars: args.max_chars,
        model: args.model.clone(),
        include_prompt: true,
        ..GenerateRequest::from_snapshot(&snapshot)
    };

    let model = req.model.clone().unwrap_or_else(|| cfg.generation.model.clone());
    let pb = spinner(format!("generating README with {model}..."))?;
    let out = match generate_readme(&req, cfg, &generator) {
        Ok(o) => o,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };
    pb.finish_with_message(format!(
        "used {} chars from {} files",
        out.used_chars, out.file_sample_count
    ));

    store.add_generation(&id, GenerationRecord::from_generated(&out, now_millis()))?;

    if args.show_prompt {
        if let Some(prompt) = out.prompt.as_deref() {
            eprintln!("{prompt}");
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let readme = unwrap_top_level_fence(&out.readme);
    match args.out {
        Some(path) => {
            std::fs::write(&path, readme).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {} bytes to {}", readme.len(), path.display());
        }
        None => println!("{readme}"),
    }
    Ok(())
}

fn run_history(store: &mut HistoryStore, cmd: HistoryCommand) -> Result<()> {
    match cmd {
        HistoryCommand::List => {
            let entries = store.list_entries();
            if entries.is_empty() {
                eprintln!("No history yet ({})", store.path().display());
            }
            for e in entries {
                println!(
                    "{:<40} {:>5} files {:>3} readmes  {}",
                    e.repo,
                    e.snapshot.snapshot.file_count,
                    e.generations.len(),
                    ago(e.updated_at)
                );
            }
        }
        HistoryCommand::Show { repo, readme } => {
            let id = parse_repo_arg(&repo)?.identifier();
            let Some(entry) = store.get_entry(&id) else {
                bail!("no history for {id}");
            };
            if readme {
                let text = entry
                    .edited_readme
                    .as_deref()
                    .or_else(|| entry.generations.first().map(|g| g.readme.as_str()))
                    .with_context(|| format!("no README generated for {id} yet"))?;
                println!("{}", unwrap_top_level_fence(text));
            } else {
                println!("{}", serde_json::to_string_pretty(entry)?);
            }
        }
        HistoryCommand::Remove { repo } => {
            let id = parse_repo_arg(&repo)?.identifier();
            if !store.remove_entry(&id)? {
                eprintln!("{id} was not in history");
            }
        }
        HistoryCommand::Clear => store.clear()?,
        HistoryCommand::SaveEdit { repo, file } => {
            let id = parse_repo_arg(&repo)?.identifier();
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            if !store.save_edited_readme(&id, &text)? {
                bail!("no history for {id}; fetch it first");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let cfg = load_config(&cwd);

    let mut store = HistoryStore::open(&cfg.history.resolved_path());

    match cli.cmd {
        Command::Serve => run_stdio_server(cfg)?,
        Command::Fetch { url, selection, json } => {
            let snapshot = fetch_and_store(&cfg, &mut store, &selection.to_request(url))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Command::Generate(args) => run_generate(&cfg, &mut store, args)?,
        Command::History { cmd } => run_history(&mut store, cmd)?,
    }

    Ok(())
}
