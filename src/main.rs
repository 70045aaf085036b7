//! Headless driver for the loglens engine: load a file, run one search,
//! print the matched lines. Exists so the engine can be exercised end to
//! end without a UI.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Arg, ArgAction, Command};
use tokio::sync::mpsc;

use loglens::{
    EngineConfig, FilteredLogData, LineNumber, LoadStatus, LogData, SearchPattern, SearchStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("loglens")
        .version(loglens::VERSION)
        .about("Search a (possibly huge) log file with the loglens engine")
        .arg(Arg::new("file").required(true).help("Log file to load"))
        .arg(Arg::new("pattern").required(true).help("Search pattern"))
        .arg(
            Arg::new("ignore-case")
                .short('i')
                .long("ignore-case")
                .action(ArgAction::SetTrue)
                .help("Case-insensitive matching"),
        )
        .arg(
            Arg::new("invert")
                .short('v')
                .long("invert-match")
                .action(ArgAction::SetTrue)
                .help("Select non-matching lines"),
        )
        .arg(
            Arg::new("fixed-strings")
                .short('F')
                .long("fixed-strings")
                .action(ArgAction::SetTrue)
                .help("Treat the pattern as literal text"),
        )
        .arg(
            Arg::new("boolean")
                .short('b')
                .long("boolean")
                .action(ArgAction::SetTrue)
                .help("Interpret the pattern as a boolean combination of quoted sub-patterns"),
        )
        .arg(
            Arg::new("encoding")
                .long("encoding")
                .value_name("LABEL")
                .help("Display encoding (default: auto-detected)"),
        )
        .arg(
            Arg::new("prefilter")
                .long("prefilter")
                .value_name("REGEX")
                .help("Strip every match of REGEX from lines before display and search"),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Matcher threads (0 = derive from hardware)"),
        )
        .get_matches();

    let config = EngineConfig {
        search_pool_size: matches.get_one::<usize>("jobs").copied().unwrap_or(0),
        prefilter_regex: matches
            .get_one::<String>("prefilter")
            .cloned()
            .unwrap_or_default(),
        ..Default::default()
    };

    let log_data = Arc::new(LogData::new(config));

    let (load_tx, mut load_rx) = mpsc::unbounded_channel();
    log_data.on_load_finished(move |status| {
        let _ = load_tx.send(status);
    });

    let file = matches.get_one::<String>("file").expect("required arg");
    log_data.load(file).await?;
    match load_rx.recv().await {
        Some(LoadStatus::Successful) => {}
        Some(status) => bail!("loading failed: {:?}", status),
        None => bail!("engine stopped before loading finished"),
    }

    if let Some(encoding) = matches.get_one::<String>("encoding") {
        log_data.set_display_encoding(encoding)?;
    }

    let filtered = FilteredLogData::new(Arc::clone(&log_data));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    filtered.on_search_finished(move |status| {
        let _ = done_tx.send(status);
    });

    let pattern = SearchPattern {
        pattern: matches
            .get_one::<String>("pattern")
            .expect("required arg")
            .clone(),
        case_sensitive: !matches.get_flag("ignore-case"),
        inverse: matches.get_flag("invert"),
        boolean_combine: matches.get_flag("boolean"),
        plain_text: matches.get_flag("fixed-strings"),
    };

    let line_count = log_data.line_count();
    filtered
        .run_search(
            pattern,
            LineNumber::new(0),
            LineNumber::new(line_count.get()),
        )
        .await?;

    match done_rx.recv().await {
        Some(SearchStatus::Complete) => {}
        Some(status) => bail!("search did not complete: {:?}", status),
        None => bail!("engine stopped before the search finished"),
    }

    for index in 0..filtered.match_count().get() {
        if let Some(line) = filtered.matched_line(index) {
            println!("{}:{}", line.get() + 1, log_data.line_string(line)?);
        }
    }

    Ok(())
}
