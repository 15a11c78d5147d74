use std::{
    fs,
    io::{self, Write},
    process::ExitCode,
};

use clap::Parser;
use docshelf::{
    Catalog,
    DataDir,
    Error,
    Library,
    Result,
    catalog::FileRecord,
    cli::{self, Cli, Command, ConfigAction},
    mcp,
    settings::SettingKey,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "DOCSHELF_LOG";

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var(LOG_ENV_VAR) {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), "{e}");
            if e.is_user_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    debug!(data_dir = %data_dir.root().display(), "using data directory");

    // Settings only need the catalog; everything else opens the library.
    if let Command::Config { action } = cli.command {
        let catalog = Catalog::open(&data_dir.catalog_db())?;
        return cmd_config(&catalog, action);
    }

    let library = Library::open(&data_dir)?;
    match cli.command {
        Command::Upload(args) => cmd_upload(&library, &args),
        Command::Search(args) => cmd_search(&library, &args),
        Command::Show(args) => cmd_show(&library, &args),
        Command::List(args) => cmd_list(&library, &args),
        Command::Rename(args) => {
            let new_name = library.handle_rename(args.id, &args.new_name)?;
            println!("Renamed #{} to {new_name}", args.id);
            Ok(())
        }
        Command::Delete(args) => {
            let report = library.handle_delete(args.id)?;
            println!("Deleted #{} {}", report.file.id, report.file.display_name);
            if !report.bytes_removed {
                eprintln!("warning: stored bytes were already missing");
            }
            Ok(())
        }
        Command::Download(args) => cmd_download(&library, &args),
        Command::Tags(args) => cmd_tags(&library, args.json),
        Command::Status(args) => cmd_status(&library, &data_dir, args.json),
        Command::Mcp => mcp::run_mcp(library),
        Command::Config { .. } | Command::Completions(_) => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_upload(library: &Library, args: &cli::UploadArgs) -> Result<()> {
    // Extract and tag in parallel, then store sequentially.
    let prepared: Vec<_> = args
        .paths
        .par_iter()
        .map(|path| {
            let bytes = fs::read(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::InvalidName(path.display().to_string()))?;
            library.prepare(&name, bytes)
        })
        .collect();

    let mut stored = Vec::new();
    let mut failures = 0usize;
    for (path, upload) in args.paths.iter().zip(prepared) {
        match upload.and_then(|upload| library.commit(upload)) {
            Ok(file) => {
                if !args.json {
                    println!("#{}\t{}", file.id, file.display_name);
                }
                stored.push(file);
            }
            Err(e) => {
                error!(path = %path.display(), code = e.code(), "{e}");
                failures += 1;
            }
        }
    }

    if args.json {
        print_json(&stored)?;
    }

    if failures > 0 {
        return Err(Error::Config(format!(
            "{failures} of {} uploads failed",
            args.paths.len()
        )));
    }
    Ok(())
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [docshelf::search::SearchHit],
}

fn cmd_search(library: &Library, args: &cli::SearchArgs) -> Result<()> {
    let hits = library.search(&args.query, args.limit())?;

    if args.json {
        return print_json(&SearchOutput {
            query: &args.query,
            result_count: hits.len(),
            results: &hits,
        });
    }

    if hits.is_empty() {
        println!("No results for '{}'", args.query);
        return Ok(());
    }
    for hit in &hits {
        println!(
            "{:>3}. #{}\t{}\t[{}]",
            hit.rank,
            hit.file.id,
            hit.file.display_name,
            hit.matched_tags.join(", ")
        );
    }
    Ok(())
}

fn cmd_show(library: &Library, args: &cli::ShowArgs) -> Result<()> {
    let details = library.handle_view(args.id)?;

    if args.json {
        return print_json(&details);
    }

    let file = &details.file;
    println!("id: {}", file.id);
    println!("name: {}", file.display_name);
    println!("location: {}", file.content_location);
    println!("sha256: {}", file.content_hash);
    if details.tags.is_empty() {
        println!("tags: (none)");
    } else {
        println!("tags: {}", details.tags.join(", "));
    }
    Ok(())
}

fn cmd_list(library: &Library, args: &cli::ListArgs) -> Result<()> {
    let matcher = match &args.pattern {
        Some(pattern) => Some(
            globset::Glob::new(pattern)
                .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))?
                .compile_matcher(),
        ),
        None => None,
    };

    let files: Vec<FileRecord> = library
        .list()?
        .into_iter()
        .filter(|f| {
            matcher.as_ref().is_none_or(|m| m.is_match(&f.display_name))
        })
        .collect();

    if args.json {
        return print_json(&files);
    }

    if files.is_empty() {
        println!("No files stored.");
    } else {
        for file in &files {
            println!("#{}\t{}", file.id, file.display_name);
        }
    }
    Ok(())
}

fn cmd_download(library: &Library, args: &cli::DownloadArgs) -> Result<()> {
    let mut download = library.handle_download(args.id)?;
    debug!(
        id = download.file.id,
        content_type = %download.content_type,
        "downloading"
    );

    match &args.output {
        Some(path) => {
            let mut out = fs::File::create(path)?;
            io::copy(&mut download.reader, &mut out)?;
            eprintln!(
                "Wrote {} to {}",
                download.file.display_name,
                path.display()
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut download.reader, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct TagOutput<'a> {
    name: &'a str,
    files: usize,
}

fn cmd_tags(library: &Library, json: bool) -> Result<()> {
    let tags = library.tags()?;

    if json {
        let out: Vec<_> = tags
            .iter()
            .map(|(tag, files)| TagOutput {
                name: &tag.name,
                files: *files,
            })
            .collect();
        return print_json(&out);
    }

    if tags.is_empty() {
        println!("No tags.");
    } else {
        for (tag, files) in &tags {
            println!("{}\t{files}", tag.name);
        }
    }
    Ok(())
}

fn cmd_status(library: &Library, data_dir: &DataDir, json: bool) -> Result<()> {
    let status = library.status()?;
    let config = library.extractor().config();

    if json {
        return print_json(&serde_json::json!({
            "data_dir": data_dir.root(),
            "files": status.files,
            "tags": status.tags,
            "ocr_command": config.ocr_command,
            "ocr_language": config.ocr_language,
            "doc_command": config.doc_command,
        }));
    }

    println!("Data directory: {}", data_dir.root().display());
    println!("Files: {}", status.files);
    println!("Tags: {}", status.tags);
    println!("OCR: {} ({})", config.ocr_command, config.ocr_language);
    println!("DOC converter: {}", config.doc_command);
    Ok(())
}

fn cmd_config(catalog: &Catalog, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let mut entries = Vec::new();
            for key in SettingKey::ALL {
                let (value, source) = key.resolve(catalog)?;
                entries.push((key, value, source));
            }

            if json {
                let out: serde_json::Map<_, _> = entries
                    .iter()
                    .map(|(key, value, source)| {
                        (
                            key.key().to_string(),
                            serde_json::json!({
                                "value": value,
                                "source": source.as_str(),
                            }),
                        )
                    })
                    .collect();
                print_json(&out)?;
            } else {
                for (key, value, source) in &entries {
                    println!("{key}\t{value}\t({})", source.as_str());
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let key: SettingKey = key.parse()?;
            catalog.set_setting(key.key(), &value)?;
            println!("Set {key} = {value}");
            if std::env::var_os(key.env_var()).is_some() {
                eprintln!(
                    "warning: {} is set and overrides the stored value",
                    key.env_var()
                );
            }
        }
        ConfigAction::Clear { key } => {
            let key: SettingKey = key.parse()?;
            if catalog.remove_setting(key.key())? {
                println!("Cleared {key} (default: {})", key.default_value());
            } else {
                println!("{key} was not set");
            }
        }
    }
    Ok(())
}
