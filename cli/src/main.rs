use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use std::io::Write;
use std::process;

use webscanner_core::{
    ingest_forms_json, read_lines, ConsoleSink, Form, ScanConfig, ScanEngine, ScanStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "webscanner",
    version,
    about = "Crawler and differential XSS/SQLi scanner",
    override_usage = "webscanner <target>  <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Quick scan:                     webscanner http://target.com
  Verbose mode:                   webscanner http://target.com -v
  Deeper crawl, more workers:     webscanner http://target.com --max-pages 50 -c 10
  With proxy (Burp):              webscanner http://target.com --proxy http://127.0.0.1:8080
  Authenticated:                  webscanner http://target.com --bearer TOKEN --cookie \"sess=abc\"
  Extra forms + sqlmap:           webscanner http://target.com --forms forms.json --sqlmap --sqlmap-arg=--level=5
  Scan from file:                 webscanner -l targets.txt
  Dry-run test:                   webscanner http://target.com --dry-run"
)]
pub struct Args {
    #[arg(required_unless_present_any = ["list", "config"])]
    pub target: Option<String>,

    #[arg(short = 'l', long = "list", help = "File containing target URLs (one per line)")]
    pub list: Option<String>,

    #[arg(long, help = "JSON scan configuration file")]
    pub config: Option<String>,

    #[arg(long, help = "JSON file with extra forms to probe")]
    pub forms: Option<String>,

    #[arg(long, help = "Maximum pages to crawl (1-50)")]
    pub max_pages: Option<usize>,

    #[arg(short = 'c', long, help = "Crawl workers and in-flight requests (1-32)")]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Concurrent XSS/SQLi probes")]
    pub probe_concurrency: Option<usize>,

    #[arg(long, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(short = 'p', long, help = "Extra XSS templates from a file (one per line, must contain {MARK})")]
    pub payloads: Option<String>,

    #[arg(short = 'o', long, help = "Directory for JSON reports")]
    pub output_dir: Option<String>,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    pub proxy: Option<String>,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"X-Api-Key: abc\")")]
    pub headers: Vec<String>,

    #[arg(long = "cookie", help = "Cookie sent with every request (name=value)")]
    pub cookies: Vec<String>,

    #[arg(long, help = "Bearer token for the Authorization header")]
    pub bearer: Option<String>,

    #[arg(long, help = "Run sqlmap in a container after the built-in probes")]
    pub sqlmap: bool,

    #[arg(long, help = "sqlmap container image")]
    pub sqlmap_image: Option<String>,

    #[arg(long = "sqlmap-arg", allow_hyphen_values = true, help = "Extra sqlmap switch (allow-listed)")]
    pub sqlmap_args: Vec<String>,

    #[arg(long, help = "Browser harness command used to confirm XSS execution")]
    pub dom_confirm: Option<String>,

    #[arg(long, help = "Skip the port scan")]
    pub skip_ports: bool,

    #[arg(long, help = "Skip the security header check")]
    pub skip_headers: bool,

    #[arg(short = 'v', long, default_value_t = false, help = "Show the whole process (Verbose Mode)")]
    pub verbose: bool,

    #[arg(long, help = "Simulate scan without sending real requests")]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);
    print_banner();

    match run(args).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {:#}", e).red());
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let config = build_config(&args)?;
    let targets = collect_targets(&args, &config)?;

    if targets.is_empty() {
        eprint!("{}\r\n", "[!] No targets specified. Provide a URL or use -l <file>.".red());
        Args::command().print_help().ok();
        return Ok(1);
    }

    if config.dry_run {
        for target in &targets {
            println!("[DRY RUN] Would scan target: {}", target);
        }
        return Ok(0);
    }

    let forms = match &args.forms {
        Some(path) => load_forms(path)?,
        None => Vec::new(),
    };

    let engine = ScanEngine::new(config, ScanStore::default(), ConsoleSink::new_ref())?.with_forms(forms);
    print_scan_config(engine.config(), targets.len());

    let total = targets.len();
    let mut failed = 0;
    for (i, target) in targets.iter().enumerate() {
        if total > 1 {
            print!(
                "\r\n{}\r\n",
                format!("━━━ Target {}/{}: {} ━━━", i + 1, total, target).bright_white().bold()
            );
            std::io::stdout().flush().ok();
        }
        match engine.run(target).await {
            Ok(outcome) => {
                print!("{}\r\n", format!("[+] Scan id: {}", outcome.scan_id).green());
            }
            Err(e) => {
                eprint!("{}\r\n", format!("[!] {}: {:#}", target, e).red());
                failed += 1;
            }
        }
    }

    Ok(if failed > 0 { 1 } else { 0 })
}

/// Defaults, then the config file, then `WEBSCANNER_*` variables, then flags.
fn build_config(args: &Args) -> anyhow::Result<ScanConfig> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::from_file(path).with_context(|| format!("failed to load config '{}'", path))?,
        None => ScanConfig::default(),
    };
    config.apply_env()?;

    if let Some(v) = args.max_pages { config.max_pages = v; }
    if let Some(v) = args.concurrency { config.concurrency = v; }
    if let Some(v) = args.probe_concurrency { config.probe_concurrency = v; }
    if let Some(v) = args.timeout { config.timeout = v; }
    if let Some(v) = &args.payloads { config.payloads = v.clone(); }
    if let Some(v) = &args.output_dir { config.output_dir = v.clone(); }
    if let Some(v) = &args.proxy { config.proxy = v.clone(); }
    if let Some(v) = &args.bearer { config.bearer_token = Some(v.clone()); }
    if let Some(v) = &args.sqlmap_image { config.sqlmap_image = v.clone(); }
    if let Some(v) = &args.dom_confirm { config.dom_confirm = v.clone(); }
    if !args.headers.is_empty() {
        config.headers = join_list(&config.headers, &args.headers);
    }
    if !args.cookies.is_empty() {
        config.cookies = join_list(&config.cookies, &args.cookies);
    }
    if !args.sqlmap_args.is_empty() {
        config.sqlmap_args = args.sqlmap_args.clone();
    }
    config.run_sqlmap |= args.sqlmap;
    config.skip_ports |= args.skip_ports;
    config.skip_headers |= args.skip_headers;
    config.verbose |= args.verbose;
    config.dry_run |= args.dry_run;

    config.validate()?;
    Ok(config)
}

fn join_list(existing: &str, extra: &[String]) -> String {
    std::iter::once(existing)
        .chain(extra.iter().map(String::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn collect_targets(args: &Args, config: &ScanConfig) -> anyhow::Result<Vec<String>> {
    let mut targets = Vec::new();

    let list = args.list.as_deref().or((!config.list_file.is_empty()).then_some(config.list_file.as_str()));
    if let Some(list_path) = list {
        let lines = read_lines(list_path).with_context(|| format!("failed to read '{}'", list_path))?;
        print!(
            "{}\r\n",
            format!("[+] Loaded {} target(s) from {}", lines.len(), list_path).green().bold()
        );
        std::io::stdout().flush().ok();
        targets.extend(lines);
    }

    match &args.target {
        Some(t) => targets.push(t.clone()),
        None if !config.target.is_empty() => targets.push(config.target.clone()),
        None => {}
    }
    Ok(targets)
}

fn load_forms(path: &str) -> anyhow::Result<Vec<Form>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read forms file '{}'", path))?;
    let forms = ingest_forms_json(&raw).with_context(|| format!("invalid forms file '{}'", path))?;
    print!("{}\r\n", format!("[+] Loaded {} extra form(s) from {}", forms.len(), path).green());
    Ok(forms)
}

fn print_banner() {
    let banner = r#"
  _      __    __
 | | /| / /__ / /  ___ ____ ___ ____  ___  ___ ____
 | |/ |/ / -_) _ \(_-</ __/ _ `/ _ \/ _ \/ -_) __/
 |__/|__/\__/_.__/___/\__/\_,_/_//_/_//_/\__/_/
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_scan_config(config: &ScanConfig, targets: usize) {
    let on_off = |b: bool| if b { "ON" } else { "OFF" };

    print!("{}\r\n", format!("[+] Targets:     {}", targets).green().bold());
    print!("{}\r\n", format!("[+] Max pages:   {}", config.max_pages).blue());
    print!("{}\r\n", format!("[+] Concurrency: {} crawl / {} probe", config.concurrency, config.probe_concurrency).blue());
    print!("{}\r\n", format!("[+] Timeout:     {}s", config.timeout).blue());
    print!("{}\r\n", format!("[+] Output dir:  {}", config.output_dir).blue());
    print!("{}\r\n", format!("[+] Verbose:     {}", on_off(config.verbose)).magenta());
    print!("{}\r\n", format!("[+] sqlmap:      {}", on_off(config.run_sqlmap)).magenta());
    if let Some(proxy) = config.proxy_ref() {
        print!("{}\r\n", format!("[+] Proxy:       {}", proxy).yellow());
    }
    let headers = config.header_list();
    if !headers.is_empty() {
        print!("{}\r\n", format!("[+] Headers:     {} custom", headers.len()).yellow());
    }
    if !config.dom_confirm.is_empty() {
        print!("{}\r\n", "[+] DOM confirm: enabled".yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}
