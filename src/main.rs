//! CLI entry point for `mboxquery`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use mboxquery::config::{self, Config};
use mboxquery::index::reader as index_reader;
use mboxquery::model::mail::IndexEntry;
use mboxquery::search::filter::{parse_date_bound, FilterConfig};
use mboxquery::IndexHandle;

#[derive(Parser)]
#[command(name = "mboxquery", version, about = "Index and query MBOX archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Force rebuild index even if one already exists
    #[arg(short, long, global = true)]
    force: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args)]
struct ArchiveArg {
    /// MBOX archive to open
    #[arg(value_name = "ARCHIVE", env = "MBOXQUERY_ARCHIVE")]
    archive: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Args)]
struct OutputArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
    /// Shorthand for `--output json`
    #[arg(long, conflicts_with = "output")]
    json: bool,
}

impl OutputArgs {
    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.output
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or refresh) the index and print statistics
    Index {
        #[command(flatten)]
        archive: ArchiveArg,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Search messages
    Search(SearchArgs),
    /// Print one message
    Show {
        id: u64,
        #[command(flatten)]
        archive: ArchiveArg,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Print the conversation a message belongs to
    Thread {
        id: u64,
        #[command(flatten)]
        archive: ArchiveArg,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// List the attachments of a message
    Attachments {
        id: u64,
        #[command(flatten)]
        archive: ArchiveArg,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Save attachments of a message to disk
    Extract {
        id: u64,
        #[command(flatten)]
        archive: ArchiveArg,
        /// Attachment number (1-based). All attachments when omitted.
        #[arg(short = 'n', long)]
        ordinal: Option<usize>,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    archive: ArchiveArg,
    /// Sender name or address contains TEXT
    #[arg(long, value_name = "TEXT")]
    from: Option<String>,
    /// Any recipient (To, Cc, Bcc) contains TEXT
    #[arg(long, value_name = "TEXT")]
    to: Option<String>,
    #[arg(long, value_name = "TEXT")]
    subject: Option<String>,
    /// Body contains TEXT (reads every candidate message)
    #[arg(long, value_name = "TEXT")]
    body: Option<String>,
    /// On or after DATE (YYYY-MM-DD, YYYY-MM, YYYY or RFC 3339)
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg)]
    after: Option<DateTime<Utc>>,
    /// Strictly before DATE
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg)]
    before: Option<DateTime<Utc>>,
    #[arg(long, conflicts_with = "no_attachment")]
    has_attachment: bool,
    #[arg(long)]
    no_attachment: bool,
    /// Maximum results (0 for all). Defaults to `query.default_limit`.
    #[arg(short = 'n', long)]
    limit: Option<usize>,
    /// Only print the number of matches
    #[arg(long)]
    count: bool,
    /// Do not print body previews
    #[arg(long)]
    no_body: bool,
    #[command(flatten)]
    out: OutputArgs,
}

impl SearchArgs {
    fn to_filter(&self, config: &Config) -> FilterConfig {
        let has_attachment = match (self.has_attachment, self.no_attachment) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let limit = match self.limit.unwrap_or(config.query.default_limit) {
            0 => None,
            n => Some(n),
        };
        FilterConfig {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            date_after: self.after,
            date_before: self.before,
            has_attachment,
            limit,
            count_only: self.count,
        }
    }
}

fn parse_date_arg(value: &str) -> Result<DateTime<Utc>, String> {
    parse_date_bound(value).map_err(|e| e.to_string())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);
    check_date_format(&mut config);

    let force = cli.force;

    match cli.command {
        Commands::Index { archive, out } => {
            cmd_index(&archive.archive, out.format(), force, &config)
        }
        Commands::Search(args) => cmd_search(&args, force, &config),
        Commands::Show { id, archive, out } => {
            cmd_show(&archive.archive, id, out.format(), force, &config)
        }
        Commands::Thread { id, archive, out } => {
            cmd_thread(&archive.archive, id, out.format(), force, &config)
        }
        Commands::Attachments { id, archive, out } => {
            cmd_attachments(&archive.archive, id, out.format(), force, &config)
        }
        Commands::Extract {
            id,
            archive,
            ordinal,
            output,
        } => cmd_extract(&archive.archive, id, ordinal, &output, force, &config),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = config::log_file_path(config);
    let log_dir = log_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mboxquery.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Replace an unusable `general.date_format` with the default.
fn check_date_format(config: &mut Config) {
    use chrono::format::{Item, StrftimeItems};

    if StrftimeItems::new(&config.general.date_format).any(|item| matches!(item, Item::Error)) {
        let fallback = config::GeneralConfig::default().date_format;
        tracing::warn!(
            format = %config.general.date_format,
            fallback = %fallback,
            "Invalid date_format in config, using default"
        );
        config.general.date_format = fallback;
    }
}

/// Open the archive's index, building it with a progress bar when needed.
fn open_handle(path: &Path, force: bool, config: &Config) -> anyhow::Result<IndexHandle> {
    if !path.exists() {
        anyhow::bail!("MBOX archive not found: {}", path.display());
    }
    let file_size = std::fs::metadata(path)
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();

    let pb = ProgressBar::new(file_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} Indexing [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let handle = IndexHandle::open_with_progress(
        path,
        config,
        force,
        Some(&|current: u64, total: u64| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();
    Ok(handle)
}

fn format_date(entry: &IndexEntry, config: &Config) -> String {
    entry
        .date
        .map(|d| d.format(&config.general.date_format).to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn sender(entry: &IndexEntry) -> &str {
    if entry.from.display_name.is_empty() {
        &entry.from.address
    } else {
        &entry.from.display_name
    }
}

/// Print `value` as JSON or YAML. Returns `false` for text output, which
/// each command renders itself.
fn print_structured<T: serde::Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<bool> {
    match format {
        OutputFormat::Text => return Ok(false),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(true)
}

/// Whitespace-collapsed start of a body.
struct Preview {
    text: String,
    /// Characters in the full decoded body.
    body_length: usize,
    truncated: bool,
}

fn preview(body: &str, max_chars: usize) -> Preview {
    let body_length = body.chars().count();
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        Preview {
            text: flat,
            body_length,
            truncated: false,
        }
    } else {
        Preview {
            text: format!("{}...", flat.chars().take(max_chars).collect::<String>()),
            body_length,
            truncated: true,
        }
    }
}

/// Index an MBOX file and print statistics.
fn cmd_index(path: &Path, format: OutputFormat, force: bool, config: &Config) -> anyhow::Result<()> {
    let start = Instant::now();
    let handle = open_handle(path, force, config)?;
    let elapsed = start.elapsed();

    let file_size = std::fs::metadata(path)?.len();
    let idx_size = handle.index_file_size();

    if format == OutputFormat::Text {
        print_stats_table(path, file_size, handle.entries(), elapsed, idx_size, config);
        Ok(())
    } else {
        print_stats_structured(path, file_size, handle.entries(), elapsed, idx_size, format)
    }
}

fn cmd_search(args: &SearchArgs, force: bool, config: &Config) -> anyhow::Result<()> {
    let filter = args.to_filter(config);
    let mut handle = open_handle(&args.archive.archive, force, config)?;

    let result = if filter.needs_fulltext() {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Searching bodies [{bar:40.cyan/blue}] {pos}/{len}")?
                .progress_chars("#>-"),
        );
        let result = handle.query_with_progress(
            &filter,
            Some(&|current: usize, total: usize| {
                pb.set_length(total as u64);
                pb.set_position(current as u64);
            }),
        )?;
        pb.finish_and_clear();
        result
    } else {
        handle.query(&filter)?
    };

    let format = args.out.format();
    if filter.count_only {
        let count = serde_json::json!({ "total_count": result.total_count });
        if !print_structured(&count, format)? {
            println!("{}", result.total_count);
        }
        return Ok(());
    }

    let with_body = !args.no_body;
    let mut previews = Vec::with_capacity(result.entries.len());
    for entry in &result.entries {
        if with_body {
            previews.push(Some(preview(
                &handle.get_body(entry.id)?,
                config.query.preview_chars,
            )));
        } else {
            previews.push(None);
        }
    }

    if format != OutputFormat::Text {
        let items: Vec<serde_json::Value> = result
            .entries
            .iter()
            .zip(&previews)
            .map(|(e, p)| -> serde_json::Result<serde_json::Value> {
                let mut value = serde_json::to_value(e)?;
                if let (Some(p), Some(obj)) = (p, value.as_object_mut()) {
                    obj.insert("preview".into(), serde_json::Value::String(p.text.clone()));
                    obj.insert("body_length".into(), serde_json::Value::from(p.body_length));
                }
                Ok(value)
            })
            .collect::<serde_json::Result<_>>()?;
        let output = serde_json::json!({
            "total_count": result.total_count,
            "result_count": items.len(),
            "results": items,
        });
        print_structured(&output, format)?;
        return Ok(());
    }

    println!();
    println!(
        "  {} result(s), showing {}",
        result.total_count,
        result.entries.len()
    );
    println!();
    if result.entries.is_empty() {
        return Ok(());
    }

    println!(
        "  {:>6} {:<17} {:<25} {:<40} {:>8}",
        "Id", "Date", "From", "Subject", "Size"
    );
    println!("  {}", "-".repeat(100));
    for (entry, p) in result.entries.iter().zip(&previews) {
        let from_trunc: String = sender(entry).chars().take(24).collect();
        let subj_trunc: String = entry.subject.chars().take(39).collect();
        println!(
            "  {:>6} {:<17} {:<25} {:<40} {:>8}",
            entry.id,
            format_date(entry, config),
            from_trunc,
            subj_trunc,
            format_size(entry.length, BINARY)
        );
        if let Some(p) = p.as_ref().filter(|p| !p.text.is_empty()) {
            if p.truncated {
                println!("         {} [{} chars total]", p.text, p.body_length);
            } else {
                println!("         {}", p.text);
            }
            println!();
        }
    }
    println!();
    Ok(())
}

fn cmd_show(
    path: &Path,
    id: u64,
    format: OutputFormat,
    force: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut handle = open_handle(path, force, config)?;
    let body = handle.get_body(id)?;
    let entry = handle.get_entry(id)?;

    if format != OutputFormat::Text {
        let mut value = serde_json::to_value(entry)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("body_length".into(), serde_json::Value::from(body.chars().count()));
            obj.insert("body".into(), serde_json::Value::String(body));
        }
        print_structured(&value, format)?;
        return Ok(());
    }

    let join = |list: &[mboxquery::model::address::EmailAddress]| {
        list.iter().map(|a| a.display()).collect::<Vec<_>>().join(", ")
    };
    println!("{:<12} {}", "From:", entry.from.display());
    if !entry.to.is_empty() {
        println!("{:<12} {}", "To:", join(&entry.to));
    }
    if !entry.cc.is_empty() {
        println!("{:<12} {}", "Cc:", join(&entry.cc));
    }
    println!("{:<12} {}", "Date:", format_date(entry, config));
    println!("{:<12} {}", "Subject:", entry.subject);
    println!("{:<12} {}", "Message-ID:", entry.message_id);
    println!("{:<12} {}", "Thread:", entry.thread_id);
    println!();
    println!("{body}");
    Ok(())
}

fn cmd_thread(
    path: &Path,
    id: u64,
    format: OutputFormat,
    force: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let handle = open_handle(path, force, config)?;
    let tree = handle.get_thread_tree(id)?;

    if print_structured(&tree, format)? {
        return Ok(());
    }

    println!();
    println!("  Thread {} ({} message(s))", tree.thread_id, tree.message_count());
    println!();
    for (entry, depth) in tree.flatten() {
        let marker = if entry.id == id { '*' } else { ' ' };
        println!(
            " {marker}{:>6}  {:<17} {}{} ({})",
            entry.id,
            format_date(entry, config),
            "  ".repeat(depth),
            entry.subject,
            sender(entry)
        );
    }
    println!();
    Ok(())
}

fn cmd_attachments(
    path: &Path,
    id: u64,
    format: OutputFormat,
    force: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut handle = open_handle(path, force, config)?;
    let attachments = handle.list_attachments(id)?;

    if print_structured(&attachments, format)? {
        return Ok(());
    }

    if attachments.is_empty() {
        println!("  Message {id} has no attachments.");
        return Ok(());
    }
    println!();
    println!("  {:>3} {:<40} {:<30} {:>10}", "#", "Filename", "Type", "Size");
    println!("  {}", "-".repeat(86));
    for att in &attachments {
        let name: String = att.filename.chars().take(39).collect();
        println!(
            "  {:>3} {:<40} {:<30} {:>10}",
            att.ordinal,
            name,
            att.content_type,
            format_size(att.size, BINARY)
        );
    }
    println!();
    Ok(())
}

fn cmd_extract(
    path: &Path,
    id: u64,
    ordinal: Option<usize>,
    output: &Path,
    force: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut handle = open_handle(path, force, config)?;
    let written = match ordinal {
        Some(n) => vec![handle.extract_attachment(id, n, output)?],
        None => handle.extract_all_attachments(id, output)?,
    };

    if written.is_empty() {
        println!("  Message {id} has no attachments.");
    }
    for path in &written {
        println!("  {}", path.display());
    }
    Ok(())
}

/// Print statistics in a human-readable table.
fn print_stats_table(
    path: &Path,
    file_size: u64,
    entries: &[IndexEntry],
    elapsed: std::time::Duration,
    idx_size: u64,
    config: &Config,
) {
    println!();
    println!("  {:<20} {}", "File", path.display());
    println!("  {:<20} {}", "File size", format_size(file_size, BINARY));
    println!("  {:<20} {}", "Messages", entries.len());
    println!("  {:<20} {}", "Threads", index_reader::thread_count(entries));

    if let Some((min, max)) = index_reader::date_range(entries) {
        println!(
            "  {:<20} {} to {}",
            "Date range",
            min.format(&config.general.date_format),
            max.format(&config.general.date_format)
        );
    }
    let undated = index_reader::count_undated(entries);
    if undated > 0 {
        println!("  {:<20} {}", "Undated", undated);
    }

    if idx_size > 0 {
        println!("  {:<20} {}", "Index size", format_size(idx_size, BINARY));
    }

    println!("  {:<20} {:.2?}", "Time", elapsed);

    let with_att = index_reader::count_with_attachments(entries);
    println!(
        "  {:<20} {} ({:.1}%)",
        "With attachments",
        with_att,
        if entries.is_empty() {
            0.0
        } else {
            with_att as f64 / entries.len() as f64 * 100.0
        }
    );

    let top = index_reader::top_senders(entries, 10);
    if !top.is_empty() {
        println!();
        println!("  Top senders:");
        for (sender, count) in &top {
            println!("    {count:>6}  {sender}");
        }
    }
    println!();
}

/// Print statistics as JSON or YAML.
fn print_stats_structured(
    path: &Path,
    file_size: u64,
    entries: &[IndexEntry],
    elapsed: std::time::Duration,
    idx_size: u64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let date_range = index_reader::date_range(entries).map(|(min, max)| {
        serde_json::json!({
            "oldest": min.to_rfc3339(),
            "newest": max.to_rfc3339(),
        })
    });

    let top_json: Vec<serde_json::Value> = index_reader::top_senders(entries, 10)
        .iter()
        .map(|(sender, count)| {
            serde_json::json!({
                "sender": sender,
                "count": count,
            })
        })
        .collect();

    let stats = serde_json::json!({
        "file": path.to_string_lossy(),
        "file_size": file_size,
        "message_count": entries.len(),
        "thread_count": index_reader::thread_count(entries),
        "undated": index_reader::count_undated(entries),
        "date_range": date_range,
        "index_size": idx_size,
        "indexing_time_ms": elapsed.as_millis(),
        "with_attachments": index_reader::count_with_attachments(entries),
        "top_senders": top_json,
    });

    print_structured(&stats, format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_flags() {
        let cli = Cli::try_parse_from(["mboxquery", "show", "3", "a.mbox", "--output", "yaml"])
            .unwrap();
        let Commands::Show { out, .. } = cli.command else {
            panic!("expected show");
        };
        assert!(out.format() == OutputFormat::Yaml);

        let cli = Cli::try_parse_from(["mboxquery", "thread", "1", "a.mbox", "--json"]).unwrap();
        let Commands::Thread { out, .. } = cli.command else {
            panic!("expected thread");
        };
        assert!(out.format() == OutputFormat::Json);

        assert!(Cli::try_parse_from([
            "mboxquery", "attachments", "1", "a.mbox", "--json", "--output", "text"
        ])
        .is_err());
    }

    #[test]
    fn test_preview_reports_full_length() {
        let short = preview("Hello\n  world", 20);
        assert_eq!(short.text, "Hello world");
        assert_eq!(short.body_length, 13);
        assert!(!short.truncated);

        let long = preview("café au lait, s'il vous plaît", 4);
        assert_eq!(long.text, "café...");
        assert_eq!(long.body_length, 29);
        assert!(long.truncated);
    }
}
