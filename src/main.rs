use anyhow::{bail, Context, Result};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use pixsee::config::Config;
use pixsee::db::{PhotoStore, PhotoWithFaces};
use pixsee::faces::{DetectionPort, OnnxFaceDetector};
use pixsee::ingest::IngestionCoordinator;
use pixsee::logging;
use pixsee::media::{FsImageDecoder, FsMediaIndex, MediaQuery};
use pixsee::scanner::GalleryScanner;
use pixsee::tagging::TagEditor;

enum Command {
    Scan {
        batch_size: Option<NonZeroUsize>,
        root: Option<PathBuf>,
    },
    List {
        page: usize,
        json: bool,
    },
    Show {
        uri: String,
        json: bool,
    },
    Tag {
        uri: String,
        face_id: i64,
        tag: String,
    },
    Delete {
        uri: String,
    },
}

struct Cli {
    config_path: Option<PathBuf>,
    verbose: bool,
    command: Command,
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    eprintln!("Run `pixsee --help` for usage.");
    std::process::exit(1);
}

fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;
    let mut verbose = false;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("pixsee {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    usage_error("--config requires a path argument");
                }
            }
            "--verbose" | "-v" => verbose = true,
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let Some((name, params)) = rest.split_first() else {
        print_help();
        std::process::exit(1);
    };

    let command = match name.as_str() {
        "scan" => parse_scan(params),
        "list" => parse_list(params),
        "show" => {
            let json = params.iter().any(|p| p == "--json");
            let positional: Vec<_> = params.iter().filter(|p| *p != "--json").collect();
            match positional.as_slice() {
                [uri] => Command::Show {
                    uri: uri.to_string(),
                    json,
                },
                _ => usage_error("show takes exactly one URI"),
            }
        }
        "tag" => match params {
            [uri, face_id, tag] => Command::Tag {
                uri: uri.clone(),
                face_id: face_id
                    .parse()
                    .unwrap_or_else(|_| usage_error("FACE_ID must be an integer")),
                tag: tag.clone(),
            },
            _ => usage_error("tag takes URI, FACE_ID and TAG"),
        },
        "delete" => match params {
            [uri] => Command::Delete { uri: uri.clone() },
            _ => usage_error("delete takes exactly one URI"),
        },
        other => usage_error(&format!("unknown command: {}", other)),
    };

    Cli {
        config_path,
        verbose,
        command,
    }
}

fn parse_scan(params: &[String]) -> Command {
    let mut batch_size = None;
    let mut root = None;

    let mut i = 0;
    while i < params.len() {
        match params[i].as_str() {
            "--batch-size" | "-b" => {
                let value = params
                    .get(i + 1)
                    .and_then(|v| v.parse::<NonZeroUsize>().ok())
                    .unwrap_or_else(|| usage_error("--batch-size requires a positive integer"));
                batch_size = Some(value);
                i += 1;
            }
            "--root" | "-r" => {
                let value = params
                    .get(i + 1)
                    .unwrap_or_else(|| usage_error("--root requires a path argument"));
                root = Some(PathBuf::from(value));
                i += 1;
            }
            other => usage_error(&format!("unexpected scan argument: {}", other)),
        }
        i += 1;
    }

    Command::Scan { batch_size, root }
}

fn parse_list(params: &[String]) -> Command {
    let mut page = 0;
    let mut json = false;

    let mut i = 0;
    while i < params.len() {
        match params[i].as_str() {
            "--json" => json = true,
            "--page" | "-p" => {
                page = params
                    .get(i + 1)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_error("--page requires a page number"));
                i += 1;
            }
            other => usage_error(&format!("unexpected list argument: {}", other)),
        }
        i += 1;
    }

    Command::List { page, json }
}

fn print_help() {
    println!(
        r#"pixsee - find and tag faces in a local photo collection

USAGE:
    pixsee [OPTIONS] <COMMAND>

COMMANDS:
    scan [--batch-size N] [--root PATH]   Detect faces in photos not yet processed
    list [--page N] [--json]              List photos with faces, newest first
    show <URI> [--json]                   Show one photo and its faces
    tag <URI> <FACE_ID> <TAG>             Set the tag of one face
    delete <URI>                          Forget a photo and its faces

OPTIONS:
    --config, -c PATH   Path to config file
    --verbose, -v       Log to stderr
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PIXSEE_CONFIG       Path to config file (overrides default location)
    PIXSEE_LOG          Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/pixsee/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();

    let _ = logging::init(Some(Config::config_dir().join("logs")), cli.verbose);

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load()?,
    };

    let store = PhotoStore::open(&config.db_path)
        .with_context(|| format!("opening photo store at {}", config.db_path.display()))?;
    store.initialize().context("initializing photo store schema")?;

    match cli.command {
        Command::Scan { batch_size, root } => run_scan(&config, store, batch_size, root).await,
        Command::List { page, json } => run_list(&store, page, json),
        Command::Show { uri, json } => run_show(&store, &uri, json),
        Command::Tag { uri, face_id, tag } => {
            let updated = TagEditor::new(store).retag(&uri, face_id, &tag)?;
            print_aggregate(&updated);
            Ok(())
        }
        Command::Delete { uri } => {
            if !store.delete_by_uri(&uri)? {
                bail!("No photo stored for {}", uri);
            }
            println!("Deleted {}", uri);
            Ok(())
        }
    }
}

async fn run_scan(
    config: &Config,
    store: PhotoStore,
    batch_size: Option<NonZeroUsize>,
    root: Option<PathBuf>,
) -> Result<()> {
    let root = root.unwrap_or_else(|| config.scanner.media_root.clone());
    let batch_size = batch_size.unwrap_or(config.scanner.batch_size);

    let index = Arc::new(FsMediaIndex::new(&root, &config.scanner.image_extensions));
    let query = MediaQuery {
        path_contains: config.scanner.path_filter.clone(),
    };
    let scanner = GalleryScanner::new(index.clone(), store.clone(), query);

    let detection = config.detection.clone();
    let opened = tokio::task::spawn_blocking(move || OnnxFaceDetector::open(&detection))
        .await
        .context("face detector setup task failed")?;
    if let Err(e) = &opened {
        eprintln!("Warning: {}; photos will not be processed", e);
    }
    let port = DetectionPort::from_init(opened, config.detection.max_concurrency);

    let coordinator = IngestionCoordinator::new(
        scanner,
        port.clone(),
        store,
        Arc::new(FsImageDecoder),
        index,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                cancel.cancel();
            }
        });
    }

    let mut progress = coordinator.subscribe();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = *progress.borrow_and_update();
            if state.is_loading {
                eprint!("\rProcessed {} photos", state.processed_count);
            }
        }
    });

    println!("Scanning {}", root.display());
    let result = coordinator.run(batch_size, cancel).await;
    printer.abort();
    port.close();
    eprintln!();

    let report = result?;
    println!(
        "Processed {} photos in {} batches: {} with faces ({} faces), {} failed",
        report.processed, report.batches, report.persisted, report.faces_found, report.failed
    );
    if report.cancelled {
        println!("Scan cancelled; run again to continue.");
    }
    if let Some(reason) = report.scan_error {
        bail!("Scan stopped early: {}", reason);
    }
    Ok(())
}

fn run_list(store: &PhotoStore, page: usize, json: bool) -> Result<()> {
    let mut view = store.paged_view();
    let page = view.load(page)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page.items)?);
        return Ok(());
    }

    println!(
        "{} photos, {} faces",
        store.photo_count()?,
        store.face_count()?
    );
    if let Some(latest) = store.latest_date_added()? {
        println!("Most recent: {}", format_timestamp(latest));
    }
    println!();

    for item in &page.items {
        let tags: Vec<&str> = item.faces.iter().map(|f| f.tag.as_str()).collect();
        println!(
            "{}  {}  ({}x{})  {}",
            format_timestamp(item.photo.date_added),
            item.photo.uri,
            item.photo.width,
            item.photo.height,
            tags.join(", ")
        );
    }

    if let Some(next) = page.next {
        println!("\nMore: pixsee list --page {}", next);
    }
    Ok(())
}

fn run_show(store: &PhotoStore, uri: &str, json: bool) -> Result<()> {
    let Some(aggregate) = store.get_by_uri(uri)? else {
        bail!("No photo stored for {}", uri);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&aggregate)?);
    } else {
        print_aggregate(&aggregate);
    }
    Ok(())
}

fn print_aggregate(aggregate: &PhotoWithFaces) {
    let photo = &aggregate.photo;
    println!("{}", photo.uri);
    println!(
        "  added {}  {}x{}",
        format_timestamp(photo.date_added),
        photo.width,
        photo.height
    );
    for face in &aggregate.faces {
        let b = face.bbox;
        println!(
            "  face {:>5}  [{:.0}, {:.0}, {:.0}, {:.0}]  {}",
            face.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            b.left,
            b.top,
            b.right,
            b.bottom,
            face.tag
        );
    }
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| secs.to_string())
}
