use clap::Parser;
use sponsor_catcher::{
    BookingResult, Config, EokaSession, Event, EventSink, Orchestrator, Params, RunState,
    SmtpNotifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sponsor-catcher")]
#[command(about = "Watch a sold-out sponsorship and book it when it becomes available")]
#[command(version)]
struct Cli {
    /// Booking config file
    config: PathBuf,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Poll until the item is available (overrides config)
    #[arg(long)]
    monitor: bool,

    /// Seconds between availability checks (overrides config)
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,

    /// Click "Submit Your Order" instead of stopping in front of it
    #[arg(long)]
    submit: bool,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> sponsor_catcher::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // CLI values win over the environment.
    let params = Params::from_args(&cli.params)?.with_env();
    let mut config = Config::load_with_params(&cli.config, &params)?;

    if cli.headless {
        config.browser.headless = true;
    }
    if cli.monitor {
        config.monitoring.enabled = true;
    }
    if let Some(interval) = cli.interval {
        if interval == 0 {
            return Err(sponsor_catcher::Error::Config(
                "--interval must be greater than 0".into(),
            ));
        }
        config.monitoring.interval_seconds = interval;
    }
    if cli.submit {
        config.auto_submit = true;
    }

    if cli.check {
        print_summary(&config);
        return Ok(());
    }

    if !cli.quiet && !cli.json {
        println!("Running: {}", config.name);
    }

    let (events, mut rx) = EventSink::channel();
    let json = cli.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let session = EokaSession::launch(&config.browser).await?;

    let mut orchestrator = Orchestrator::new(config.run_config(), events);
    if let Some(ref notify) = config.notify {
        orchestrator = orchestrator.with_notifier(Arc::new(SmtpNotifier::new(notify.clone())));
    }
    let run = orchestrator.start(session);

    let handle = run.handle();
    let stopper = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping (a booking attempt in progress is allowed to finish)...");
            handle.cancel();
        }
    });

    let (state, session) = run.finish().await?;
    stopper.abort();
    // Let queued events (and a pending availability alert) drain.
    let _ = tokio::time::timeout(Duration::from_secs(5), printer).await;

    if !cli.json {
        print_result(&state);
    }

    if keeps_browser_open(&state) {
        wait_for_user().await;
    }
    session.close().await?;

    if matches!(state, RunState::Aborted(_)) {
        std::process::exit(1);
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("Config valid: {}", config.name);
    println!("  Catalog: {}", config.site.catalog_url);
    println!("  Keyword: {}", config.search_keyword);
    if config.monitoring.enabled {
        println!(
            "  Monitoring: every {}s",
            config.monitoring.interval_seconds
        );
    } else {
        println!("  Monitoring: off (book immediately)");
    }
    println!(
        "  Submit: {}",
        if config.auto_submit {
            "automatic"
        } else {
            "manual"
        }
    );
    if !config.params.is_empty() {
        println!("  Parameters: {}", config.params.len());
        for (name, def) in &config.params {
            let req = if def.required { " (required)" } else { "" };
            let desc = def.description.as_deref().unwrap_or("");
            println!("    - {}{}: {}", name, req, desc);
        }
    }
    if let Some(ref notify) = config.notify {
        println!("  Notify: {}", notify.to);
    }
    if let Some(path) = config.on_failure.as_ref().and_then(|f| f.screenshot.as_deref()) {
        println!("  Failure screenshot: {}", path);
    }
}

fn print_event(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("could not encode event: {}", e),
        }
    } else {
        println!("{}", event);
    }
}

fn print_result(state: &RunState) {
    println!();
    match state {
        RunState::Done(BookingResult::Success) => println!("✓ Order submitted"),
        RunState::Done(BookingResult::StoppedBeforeSubmit) => {
            println!("✓ Ready to submit");
            println!("  Review the order in the browser and click \"Submit Your Order\".");
        }
        RunState::Aborted(reason) => {
            println!("✗ Aborted");
            println!("  Reason: {}", reason);
        }
        other => println!("  State: {}", other),
    }
}

/// The browser stays up after a stop at submit or a failed booking so the page can be inspected.
fn keeps_browser_open(state: &RunState) -> bool {
    matches!(
        state,
        RunState::Done(BookingResult::StoppedBeforeSubmit)
            | RunState::Aborted(sponsor_catcher::AbortReason::Booking { .. })
    )
}

async fn wait_for_user() {
    eprintln!("Press Enter (or Ctrl-C) to close the browser.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        _ = lines.next_line() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}
