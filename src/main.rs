use anyhow::{Context, Result};
use loopdeck::ui::{HELP, Reply, Shell};
use loopdeck::{FsStorage, Session, SessionConfig};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_DATA_DIR: &str = "./loopdeck-data";

fn print_help() {
    println!("Loopdeck - multi-track practice player");
    println!();
    println!("USAGE:");
    println!("    loopdeck [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    --debug               Enable debug logging");
    println!("    --data-dir <dir>      Where pieces and audio are stored (default {})", DEFAULT_DATA_DIR);
    println!("    --config <file>       Session limits and timing (TOML)");
    println!();
    println!("DESCRIPTION:");
    println!("    Keeps up to 8 tracks in sync for practice: shared transport,");
    println!("    marker-bounded loops, mute/solo mixing and take recording.");
    println!("    Pieces are saved automatically after every change.");
    println!();
    println!("{}", HELP);
    println!();
    println!("EXAMPLES:");
    println!("    loopdeck                          # Default data directory");
    println!("    loopdeck --data-dir ~/practice    # Custom data directory");
}

struct Options {
    debug: bool,
    data_dir: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Option<Options>> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(None);
    }

    let mut options = Options {
        debug: false,
        data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        config: None,
    };
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" => options.debug = true,
            "--data-dir" => {
                let dir = iter.next().context("--data-dir needs a directory")?;
                options.data_dir = PathBuf::from(dir);
            }
            "--config" => {
                let file = iter.next().context("--config needs a file")?;
                options.config = Some(PathBuf::from(file));
            }
            other => anyhow::bail!("unknown option '{}', see --help", other),
        }
    }
    Ok(Some(options))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(options) = parse_args(&args)? else {
        print_help();
        return Ok(());
    };

    let default_filter = if options.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = match &options.config {
        Some(path) => SessionConfig::load(path),
        None => SessionConfig::default(),
    };
    let storage = FsStorage::open(&options.data_dir)
        .with_context(|| format!("opening data directory {:?}", options.data_dir))?;
    let session = Session::open(Arc::new(storage), config).context("restoring session")?;

    println!("Loopdeck ({:?}), type 'help' for commands.", options.data_dir);
    let mut shell = Shell::new(session);
    run(&mut shell)?;

    shell.session().flush().context("saving pending changes")?;
    println!("Loopdeck stopped.");
    Ok(())
}

fn run(shell: &mut Shell) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        match shell.execute(&line) {
            Ok(Reply::Quit) => break,
            Ok(Reply::Text(text)) if text.is_empty() => {}
            Ok(Reply::Text(text)) => println!("{}", text),
            Err(e) => println!("error: {:#}", e),
        }
        print!("> ");
        stdout.flush()?;
    }
    Ok(())
}
