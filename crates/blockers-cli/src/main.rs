//! Blockers CLI
//!
//! Query the blockers engine against on-disk rule data and build HTTPS
//! rule databases.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::info;

use blockers_core::{
    BlockersWorker, EngineConfig, Referrer, ReferrerPolicy, RequestType, SqliteRuleStore,
};

#[derive(Parser)]
#[command(name = "blockers-cli")]
#[command(about = "Tracking protection, ad block, HTTPS upgrade and referrer tools")]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Rule data directory (overrides the configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Browser locale used to select regional lists (overrides the configuration)
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether tracking protection blocks a host
    CheckTp {
        /// Host of the page making the request
        #[arg(long)]
        base: String,

        /// Host being requested
        #[arg(long)]
        host: String,

        /// Extra hosts to exempt from blocking
        #[arg(long)]
        allow: Vec<String>,
    },

    /// Check whether ad block blocks a request
    CheckAd {
        /// URL of the tab making the request
        #[arg(long)]
        tab: String,

        /// Requested URL
        #[arg(long)]
        url: String,

        /// Resource type (script, image, sub_frame, ...)
        #[arg(long = "type", default_value = "other")]
        request_type: String,

        /// Also consult regional lists
        #[arg(long)]
        regional: bool,
    },

    /// Look up the HTTPS upgrade of a URL
    Https {
        #[arg(long)]
        url: String,

        #[arg(long, default_value_t = 1)]
        request_id: u64,

        /// Repeat the lookup to exercise the cache and loop guard
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        /// Answer from the rewrite cache only
        #[arg(long)]
        cache_only: bool,
    },

    /// Decide whether a request's referrer is overridden
    Referrer {
        /// Origin of the tab
        #[arg(long)]
        tab: String,

        /// Requested URL
        #[arg(long)]
        target: String,

        /// Current referrer
        #[arg(long)]
        referrer: String,

        #[arg(long, default_value = "default")]
        policy: String,

        #[arg(long)]
        shields_down: bool,

        #[arg(long)]
        referrers_disabled: bool,
    },

    /// Build an HTTPS rule database from JSON (host pattern -> rulesets)
    ImportHttpse {
        #[arg(short, long)]
        input: String,

        #[arg(short, long)]
        output: String,
    },

    /// Initialize every rule family and report which are ready
    Status,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    Builder::from_env(Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::ImportHttpse { ref input, ref output } => cmd_import_httpse(input, output),
        Commands::Referrer {
            ref tab,
            ref target,
            ref referrer,
            ref policy,
            shields_down,
            referrers_disabled,
        } => cmd_referrer(tab, target, referrer, policy, !shields_down, !referrers_disabled),
        _ => build_worker(&cli).and_then(|worker| run_query(&worker, &cli.command)),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn build_worker(cli: &Cli) -> Result<BlockersWorker, String> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(locale) = &cli.locale {
        config.locale = locale.clone();
    }
    BlockersWorker::new(config).map_err(|e| e.to_string())
}

fn run_query(worker: &BlockersWorker, command: &Commands) -> Result<(), String> {
    match command {
        Commands::CheckTp { base, host, allow } => cmd_check_tp(worker, base, host, allow),
        Commands::CheckAd {
            tab,
            url,
            request_type,
            regional,
        } => cmd_check_ad(worker, tab, url, request_type, *regional),
        Commands::Https {
            url,
            request_id,
            repeat,
            cache_only,
        } => cmd_https(worker, url, *request_id, *repeat, *cache_only),
        Commands::Status => cmd_status(worker),
        Commands::Referrer { .. } | Commands::ImportHttpse { .. } => Ok(()),
    }
}

fn cmd_check_tp(worker: &BlockersWorker, base: &str, host: &str, allow: &[String]) -> Result<(), String> {
    if !worker.init_tp() {
        return Err("Tracking protection data could not be loaded".to_string());
    }
    for extra in allow {
        worker.add_tp_allow_host(extra);
    }

    let blocked = worker.should_tp_block_url(base, host);
    println!("{}", if blocked { "block" } else { "allow" });
    Ok(())
}

fn cmd_check_ad(
    worker: &BlockersWorker,
    tab: &str,
    url: &str,
    request_type: &str,
    regional: bool,
) -> Result<(), String> {
    if !worker.init_ad_block() {
        return Err("Ad block data could not be loaded".to_string());
    }
    if regional && !worker.init_ad_block_regional() {
        eprintln!("Warning: no regional list loaded for locale '{}'", worker.config().locale);
    }

    let blocked = worker.should_ad_block_url(tab, url, RequestType::from_str(request_type), regional);
    println!("{}", if blocked { "block" } else { "allow" });
    Ok(())
}

fn cmd_https(
    worker: &BlockersWorker,
    url: &str,
    request_id: u64,
    repeat: u32,
    cache_only: bool,
) -> Result<(), String> {
    if !worker.init_httpse() {
        return Err("HTTPS rule database could not be opened".to_string());
    }

    for i in 1..=repeat.max(1) {
        let result = if cache_only {
            worker.get_https_url_from_cache_only(url, request_id)
        } else {
            worker.get_https_url(url, request_id)
        };
        match result {
            Some(rewritten) => println!("{i}: {rewritten}"),
            None => println!("{i}: no rule"),
        }
    }
    println!("Redirects recorded for request {}: {}", request_id, worker.https_redirects(request_id));
    Ok(())
}

fn cmd_referrer(
    tab: &str,
    target: &str,
    referrer: &str,
    policy: &str,
    shields_up: bool,
    allow_referrers: bool,
) -> Result<(), String> {
    let parse = |s: &str| url::Url::parse(s).map_err(|e| format!("Invalid URL '{s}': {e}"));
    let tab = parse(tab)?;
    let target = parse(target)?;
    let original = if referrer.is_empty() { None } else { Some(parse(referrer)?) };
    let policy = ReferrerPolicy::from_str(policy).ok_or_else(|| format!("Unknown referrer policy '{policy}'"))?;

    let new_referrer = original.clone().unwrap_or_else(|| tab.clone());
    let mut output = Referrer::default();
    let overridden = BlockersWorker::should_set_referrer(
        allow_referrers,
        shields_up,
        original.as_ref(),
        &tab,
        &target,
        &new_referrer,
        policy,
        &mut output,
    );

    if overridden {
        match output.url {
            Some(url) => println!("override: {url}"),
            None => println!("override: no referrer"),
        }
    } else {
        println!("no override");
    }
    Ok(())
}

fn cmd_import_httpse(input: &str, output: &str) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|e| format!("Failed to read {input}: {e}"))?;
    let rules: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&text).map_err(|e| format!("Failed to parse {input}: {e}"))?;

    let mut entries = Vec::with_capacity(rules.len());
    for (host, rulesets) in rules {
        if !rulesets.is_array() {
            return Err(format!("Rules for '{host}' must be an array of rulesets"));
        }
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        entries.push((host, rulesets.to_string()));
    }

    let mut store = SqliteRuleStore::create(Path::new(output)).map_err(|e| e.to_string())?;
    let written = store.import(entries).map_err(|e| e.to_string())?;
    info!("Wrote {} entries to {}", written, output);
    println!("Imported {written} host entries into {output}");
    Ok(())
}

fn cmd_status(worker: &BlockersWorker) -> Result<(), String> {
    let families = [
        ("tracking-protection", worker.init_tp()),
        ("ad-block", worker.init_ad_block()),
        ("ad-block-regional", worker.init_ad_block_regional()),
        ("httpse", worker.init_httpse()),
    ];

    println!("Data directory: {}", worker.config().data_dir.display());
    println!("Locale: {}", worker.config().locale);
    for (name, ready) in families {
        println!("  {:<20} {}", name, if ready { "ready" } else { "unavailable" });
    }
    Ok(())
}
