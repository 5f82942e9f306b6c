use std::{
    io::Read,
    path::Path,
};

use clap::Parser;
use docvault::{
    ConfigDb,
    DataDir,
    DocumentService,
    Error,
    Result,
    SearchExecutor,
    document::UploadMetadata,
    executor::{DEFAULT_MIN_SIMILARITY, DEFAULT_SIMILAR_RESULTS},
    ingestion::{self, BatchMetadata},
    keywords,
    query::SortOrder,
    repository::MemoryRepository,
    resolver::PathResolver,
    search::{self, Filters, SearchQuery, SuggestField},
    settings::{self, Settings, keys},
    storage::StorageLayout,
    validate,
    walker,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, IndexAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCVAULT_LOG") {
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // Commands that need no data directory.
    match &cli.command {
        Command::Completions(args) => {
            args.generate();
            return Ok(());
        }
        Command::Keywords(args) => return cmd_keywords(args),
        _ => {}
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    if let Command::Config { action } = cli.command {
        return cmd_config(&config_db, &data_dir, action);
    }

    let service = open_service(&config_db, &data_dir)?;

    match cli.command {
        Command::Ingest(args) => cmd_ingest(&service, &args)?,
        Command::Search(args) => cmd_search(&service, &args)?,
        Command::Suggest(args) => {
            let field: SuggestField = args.field.parse()?;
            let suggestions = service.suggest(&args.text, field, args.size);
            if args.json {
                print_json(&suggestions)?;
            } else {
                for s in &suggestions {
                    println!("{s}");
                }
            }
        }
        Command::Similar(args) => {
            let id = validate::document_id(&args.id)?;
            let similar = service.find_similar(&id, args.min_score, args.size);
            if args.json {
                print_json(&similar)?;
            } else if similar.is_empty() {
                println!("No similar documents found.");
            } else {
                for (i, doc) in similar.iter().enumerate() {
                    search::print_document_line(i + 1, doc);
                }
            }
        }
        Command::Get(args) => {
            let id = validate::document_id(&args.id)?;
            let record = service.get(&id)?.ok_or_else(|| not_found(&args.id))?;
            if args.json {
                print_json(&record)?;
            } else {
                println!("id:          {}", record.id);
                println!("title:       {}", record.title);
                println!("file:        {} ({})", record.original_name, record.mimetype);
                println!("size:        {} bytes", record.size);
                println!("uploaded:    {}", record.upload_date.to_rfc3339());
                println!("employee:    {}", record.employee_uuid);
                println!("type:        {}", record.document_type);
                println!("category:    {}", record.category.as_deref().unwrap_or("-"));
                let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
                println!("tags:        {}", tags.join(", "));
                println!("stored as:   {}", record.relative_path);
                println!("keywords:    {}", record.keywords.join(", "));
            }
        }
        Command::Resolve(args) => {
            let id = validate::document_id(&args.id)?;
            let path = service.resolve_id(&id)?;
            if args.json {
                print_json(&serde_json::json!({ "id": id, "path": path }))?;
            } else {
                println!("{}", path.display());
            }
        }
        Command::Delete(args) => {
            let id = validate::document_id(&args.id)?;
            let deleted = service.delete(&id)?;
            if args.json {
                print_json(&serde_json::json!({ "id": id, "deleted": deleted }))?;
            } else if deleted {
                println!("Deleted document {id}");
            } else {
                println!("No document with id {id}");
            }
        }
        Command::Reindex(args) => {
            let id = validate::document_id(&args.id)?;
            service.load_from_index()?;
            let record = service.reindex(&id)?;
            println!("Reindexed '{}' #{}", record.title, record.id.short());
        }
        Command::Recent(args) => {
            service.load_from_index()?;
            let records = service.recent(args.limit)?;
            if args.json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("No documents.");
            } else {
                for r in &records {
                    println!(
                        "{}  {}  {}  #{}",
                        r.upload_date.format("%Y-%m-%d %H:%M"),
                        r.document_type,
                        r.title,
                        r.id.short()
                    );
                }
            }
        }
        Command::Stats(args) => {
            service.load_from_index()?;
            let stats = service.stats()?;
            if args.json {
                print_json(&stats)?;
            } else {
                println!("Documents: {}", stats.total_documents);
                println!("Total size: {} bytes", stats.total_size);
                println!("Average size: {} bytes", stats.average_size);
                println!("Categories:");
                for (category, count) in &stats.categories {
                    println!("  {category}: {count}");
                }
                println!("Mime types:");
                for (mimetype, count) in &stats.mime_types {
                    println!("  {mimetype}: {count}");
                }
            }
        }
        Command::Index { action } => cmd_index(service.executor(), action)?,
        Command::Keywords(_) | Command::Completions(_) | Command::Config { .. } => {}
    }

    Ok(())
}

fn open_service(config_db: &ConfigDb, data_dir: &DataDir) -> Result<DocumentService> {
    let settings = Settings::load(config_db, data_dir)?;
    let backend = settings.open_backend(data_dir)?;
    Ok(DocumentService::new(
        Box::new(MemoryRepository::new()),
        SearchExecutor::new(backend),
        PathResolver::on_disk(StorageLayout::new(&settings.storage_root)),
    ))
}

fn not_found(id: &str) -> Error {
    Error::NotFound {
        kind: "document",
        name: id.to_string(),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_keywords(args: &cli::KeywordsArgs) -> Result<()> {
    let text = match args.file.as_deref() {
        Some(path) if path != Path::new("-") => {
            String::from_utf8_lossy(&std::fs::read(path)?).into_owned()
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    if args.scores {
        let scored: Vec<_> = keywords::score_terms(&text)
            .into_iter()
            .take(keywords::MAX_KEYWORDS)
            .collect();
        if args.json {
            print_json(&scored)?;
        } else {
            for t in &scored {
                println!("{:>8.3}  {:>3}  {}", t.score, t.frequency, t.term);
            }
        }
        return Ok(());
    }

    let extracted = DocumentService::ingest_keywords(&text);
    if args.json {
        print_json(&extracted)?;
    } else {
        for kw in &extracted {
            println!("{kw}");
        }
    }
    Ok(())
}

fn cmd_ingest(service: &DocumentService, args: &cli::IngestArgs) -> Result<()> {
    let tags = match args.tags.as_deref() {
        Some(tags) => validate::tags(tags)?,
        None => Vec::new(),
    };

    let records = if args.path.is_file() {
        let bytes = std::fs::read(&args.path)?;
        let mimetype = mime_guess::from_path(&args.path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let meta = UploadMetadata {
            original_name: args
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mimetype,
            title: args.title.clone(),
            description: args.description.clone(),
            tags,
            category: args.category.clone(),
            employee_uuid: args.employee.clone(),
            employee_name: args.employee_name.clone(),
            employee_cedula: args.cedula.clone(),
            document_type: args.document_type.clone(),
        };
        vec![service.ingest(meta, bytes)?]
    } else {
        let files = walker::discover_files(&args.path)?;
        eprintln!("Found {} file(s)", files.len());
        let batch = BatchMetadata {
            employee_uuid: args.employee.clone(),
            employee_name: args.employee_name.clone(),
            employee_cedula: args.cedula.clone(),
            document_type: args.document_type.clone(),
            category: args.category.clone(),
            tags,
        };
        let report = ingestion::ingest_files(service, &files, &batch)?;
        for (path, reason) in &report.skipped {
            eprintln!("Skipped {}: {reason}", path.display());
        }
        report.ingested
    };

    if args.json {
        print_json(&records)?;
    } else {
        for r in &records {
            println!(
                "Ingested '{}' #{} -> {} ({} keywords)",
                r.title,
                r.id.short(),
                r.relative_path,
                r.keywords.len()
            );
        }
    }
    Ok(())
}

fn cmd_search(service: &DocumentService, args: &cli::SearchArgs) -> Result<()> {
    let date_from = args.date_from.as_deref().map(validate::date).transpose()?;
    let date_to = args.date_to.as_deref().map(validate::date).transpose()?;
    validate::date_range(date_from, date_to)?;

    let query = SearchQuery {
        text: args.query.clone(),
        content: args.content.clone(),
        keywords: args.keywords.clone(),
        filters: Filters {
            category: args.category.clone(),
            document_type: args.document_type.clone(),
            employee_uuid: args.employee.clone(),
            file_type: args.file_type.clone(),
            tags: args.tags.clone(),
            year: args.year,
            date_from,
            date_to,
        },
        size: args.size,
        from: args.from,
        sort: args.sort.parse()?,
        order: if args.asc { SortOrder::Asc } else { SortOrder::Desc },
        fuzzy: args.fuzzy,
        boost: args.boost,
        highlight: args.highlight,
    };

    let result = service.search(&query);
    if args.json {
        return print_json(&result);
    }

    search::format_human(&result);
    if args.facets {
        for (name, buckets) in &result.facets {
            println!("\n{name}:");
            for bucket in buckets {
                println!("  {:>5}  {}", bucket.count, bucket.key);
            }
        }
    }
    Ok(())
}

fn cmd_index(executor: &SearchExecutor, action: IndexAction) -> Result<()> {
    match action {
        IndexAction::Status(args) => {
            let index = executor.backend().index_name().to_string();
            let status = match executor.ping() {
                Ok(info) => {
                    let documents = executor.doc_count().ok();
                    serde_json::json!({
                        "index": index,
                        "reachable": true,
                        "cluster": info.name,
                        "version": info.version,
                        "documents": documents,
                    })
                }
                Err(e) => serde_json::json!({
                    "index": index,
                    "reachable": false,
                    "error": e.to_string(),
                }),
            };
            if args.json {
                print_json(&status)?;
            } else if status["reachable"] == true {
                println!("Index: {index}");
                println!(
                    "Cluster: {} ({})",
                    status["cluster"].as_str().unwrap_or_default(),
                    status["version"].as_str().unwrap_or_default()
                );
                match status["documents"].as_u64() {
                    Some(n) => println!("Documents: {n}"),
                    None => println!("Documents: unknown (index missing?)"),
                }
            } else {
                println!("Index: {index}");
                println!("Unreachable: {}", status["error"].as_str().unwrap_or_default());
            }
        }
        IndexAction::Create => {
            let index = executor.backend().index_name().to_string();
            if executor.ensure_index()? {
                println!("Created index {index}");
            } else {
                println!("Index {index} already exists");
            }
        }
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, data_dir: &DataDir, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            if !keys::is_known(&key) {
                return Err(Error::Config(format!("unknown setting {key:?}")));
            }
            match config_db.get(&key)? {
                Some(value) => println!("{value}"),
                None => println!("{}", effective_value(config_db, data_dir, &key)?),
            }
        }
        ConfigAction::Set { key, value } => {
            settings::validate_setting(&key, &value)?;
            config_db.set(&key, value.trim())?;
            println!("Set {key}");
        }
        ConfigAction::Unset { key } => {
            if config_db.remove(&key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigAction::List(args) => {
            let mut stored = config_db.snapshot()?;
            let mut entries = Vec::new();
            for key in keys::ALL {
                let stored = stored.remove(key);
                let is_default = stored.is_none();
                let mut value = match stored {
                    Some(v) => v,
                    None => effective_value(config_db, data_dir, key)?,
                };
                if keys::is_secret(key) && !value.is_empty() {
                    value = "********".to_string();
                }
                entries.push((key, value, is_default));
            }
            if args.json {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v, _)| (k.to_string(), serde_json::Value::from(v.as_str())))
                    .collect();
                print_json(&map)?;
            } else {
                for (key, value, is_default) in &entries {
                    let marker = if *is_default { "  (default)" } else { "" };
                    println!("{key} = {value}{marker}");
                }
            }
        }
    }
    Ok(())
}

/// The value a key resolves to when it is not stored.
fn effective_value(config_db: &ConfigDb, data_dir: &DataDir, key: &str) -> Result<String> {
    let settings = Settings::load(config_db, data_dir)?;
    Ok(match key {
        keys::BACKEND => settings.backend.to_string(),
        keys::STORAGE_ROOT => settings.storage_root.display().to_string(),
        keys::ES_URL => settings.elastic.url,
        keys::ES_INDEX => settings.elastic.index,
        keys::ES_USERNAME => settings.elastic.username.unwrap_or_default(),
        keys::ES_PASSWORD => settings.elastic.password.unwrap_or_default(),
        keys::ES_TIMEOUT_SECS => settings.elastic.timeout.as_secs().to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_listed_for_every_key() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let db = ConfigDb::open(&data_dir.config_db()).unwrap();
        for key in keys::ALL {
            let value = effective_value(&db, &data_dir, key).unwrap();
            let optional = [keys::ES_USERNAME, keys::ES_PASSWORD].contains(&key);
            assert_eq!(value.is_empty(), optional, "{key}");
        }
    }

    #[test]
    fn similarity_defaults_match_cli() {
        use clap::Parser;
        let cli = Cli::parse_from(["docvault", "similar", "x"]);
        let Command::Similar(args) = cli.command else {
            panic!("expected similar command");
        };
        assert_eq!(args.min_score, DEFAULT_MIN_SIMILARITY);
        assert_eq!(args.size, DEFAULT_SIMILAR_RESULTS);
    }
}
