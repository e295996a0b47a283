use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use session_core::{
    extract_session_cookie, BootstrapOptions, Config, DirResources, NoResources, PersistFormat,
    ResourceLoader, Session,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const MAX_PAGE_BYTES: u64 = 32 * 1024 * 1024;
const MAX_PARAM_SETS: usize = 10_000;

#[derive(Parser)]
#[command(name = "session", about = "Bootstrap and inspect messaging client sessions")]
struct Args {
    /// Log filter, e.g. `debug` or `session_core=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// TOML or YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Replay a saved page and persist the resulting session")]
    Bootstrap {
        #[arg(long)]
        page: PathBuf,
        /// Login page to take the `datr` cookie from.
        #[arg(long)]
        login: Option<PathBuf>,
        /// Directory holding downloaded resource scripts.
        #[arg(long)]
        resources: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    #[command(about = "Print request parameter sets for a saved session")]
    Params {
        #[arg(value_name = "STATE")]
        state: PathBuf,
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Extra form field as `key=value`; repeatable.
        #[arg(long = "extra", value_name = "KEY=VALUE")]
        extra: Vec<String>,
    },
    #[command(about = "Encode or decode __dyn tokens")]
    Dyn {
        #[command(subcommand)]
        command: DynCommand,
    },
}

#[derive(Subcommand)]
enum DynCommand {
    Encode {
        #[arg(value_name = "POSITION")]
        positions: Vec<u32>,
    },
    Decode {
        token: String,
        #[arg(long)]
        highest: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Binary,
}

impl From<FormatArg> for PersistFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => PersistFormat::Json,
            FormatArg::Binary => PersistFormat::Binary,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Some(
            Config::load(path).with_context(|| format!("failed to load config {}", path.display()))?,
        ),
        None => None,
    };
    init_logging(
        args.log_level
            .as_deref()
            .or_else(|| config.as_ref().and_then(Config::log_level)),
    );

    let mut options = BootstrapOptions::default();
    if let Some(config) = &config {
        config.apply(&mut options);
    }

    match args.command {
        Command::Bootstrap {
            page,
            login,
            resources,
            out,
            format,
        } => run_bootstrap(
            &page,
            login.as_deref(),
            resources.as_deref(),
            out.as_deref(),
            format.map(PersistFormat::from),
            &options,
        ),
        Command::Params { state, count, extra } => {
            run_params(&state, count, &extra, &options, &mut io::stdout().lock())
        }
        Command::Dyn { command } => match command {
            DynCommand::Encode { positions } => {
                let bitmap = positions.into_iter().collect();
                println!("{}", dyn_codec::encode(&bitmap));
                Ok(())
            }
            DynCommand::Decode { token, highest } => {
                let bitmap = dyn_codec::decode(&token, highest)
                    .with_context(|| format!("failed to decode {token}"))?;
                println!("{}", serde_json::to_string(&bitmap)?);
                Ok(())
            }
        },
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_bootstrap(
    page: &Path,
    login: Option<&Path>,
    resources: Option<&Path>,
    out: Option<&Path>,
    format: Option<PersistFormat>,
    options: &BootstrapOptions,
) -> Result<()> {
    let session = Session::new();
    if let Some(login) = login {
        let html = read_page(login)?;
        let cookie = extract_session_cookie(&html, options).context("login page replay failed")?;
        debug!(domain = %cookie.domain, "session cookie extracted");
        session.add_cookie(cookie);
    }
    let html = read_page(page)?;
    let loader: Box<dyn ResourceLoader> = match resources {
        Some(dir) => Box::new(DirResources::new(dir)),
        None => Box::new(NoResources),
    };
    session
        .bootstrap(&html, loader.as_ref(), options)
        .with_context(|| format!("bootstrap of {} failed", page.display()))?;

    match out {
        Some(out) => {
            let format = format.unwrap_or_else(|| PersistFormat::from_path(out));
            session
                .save(out, format)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), "session saved");
        }
        None => match format {
            Some(PersistFormat::Binary) => io::stdout()
                .write_all(&session.to_binary())
                .context("failed to write session to stdout")?,
            _ => println!("{}", session.to_json()?),
        },
    }
    Ok(())
}

/// Prints `count` parameter sets, then writes the advanced counter back so
/// the next run continues where this one stopped.
fn run_params(
    state: &Path,
    count: usize,
    extra: &[String],
    options: &BootstrapOptions,
    out: &mut impl Write,
) -> Result<()> {
    if count > MAX_PARAM_SETS {
        return Err(anyhow!("--count exceeds {MAX_PARAM_SETS}"));
    }
    let extra = extra.iter().map(|pair| parse_pair(pair)).collect::<Result<Vec<_>>>()?;
    let session = Session::new();
    session
        .restore_file_with(state, &options.auth_token_param)
        .with_context(|| format!("failed to load {}", state.display()))?;

    let sets = (0..count)
        .map(|_| session.request_params(extra.iter().cloned()))
        .collect::<Result<Vec<_>, _>>()?;
    // Persist before printing so a failed save never hands out a value twice.
    session
        .save(state, PersistFormat::from_path(state))
        .with_context(|| format!("failed to write {}", state.display()))?;
    debug!(request = session.request_count(), "request counter saved");
    for params in &sets {
        writeln!(out, "{}", serde_json::to_string(params)?)?;
    }
    Ok(())
}

fn parse_pair(pair: &str) -> Result<(String, String)> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {pair:?}"))?;
    if key.is_empty() {
        return Err(anyhow!("empty key in {pair:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn read_page(path: &Path) -> Result<String> {
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if meta.len() > MAX_PAGE_BYTES {
        return Err(anyhow!("{} exceeds {} bytes", path.display(), MAX_PAGE_BYTES));
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "session",
            "dyn",
            "decode",
            "Jc",
            "--highest",
            "8",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.command {
            Command::Dyn {
                command: DynCommand::Decode { token, highest },
            } => {
                assert_eq!(token, "Jc");
                assert_eq!(highest, 8);
            }
            _ => panic!("expected dyn decode"),
        }
    }

    #[test]
    fn bootstrap_requires_page() {
        assert!(Args::try_parse_from(["session", "bootstrap"]).is_err());
        let args = Args::try_parse_from([
            "session",
            "bootstrap",
            "--page",
            "home.html",
            "--format",
            "binary",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Bootstrap {
                format: Some(FormatArg::Binary),
                ..
            }
        ));
    }

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    const STATE: &str = r#"{"user_id":"1","name":"","short_name":"","token":"A","sprinkle_name":"jazoest",
        "sprinkle_value":"265","dyn_token":"g","revision":3822019,"site_data":{"__hs":"h"},
        "document_ids":{},"resources":{},"features":[],"cookies":[],"request":0}"#;

    fn params_lines(path: &Path, count: usize, extra: &[String]) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        run_params(path, count, extra, &BootstrapOptions::default(), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn requests(lines: &[serde_json::Value]) -> Vec<&str> {
        lines.iter().map(|params| params["__req"].as_str().unwrap()).collect()
    }

    #[test]
    fn params_reads_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, STATE).unwrap();
        let lines = params_lines(&path, 2, &["doc_id=5".to_string()]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["doc_id"], "5");
        assert_eq!(lines[0]["fb_dtsg"], "A");
        let mut sink = Vec::new();
        assert!(run_params(&path, MAX_PARAM_SETS + 1, &[], &BootstrapOptions::default(), &mut sink).is_err());
    }

    #[test]
    fn params_counter_survives_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("state.json");
        fs::write(&json, STATE).unwrap();
        assert_eq!(requests(&params_lines(&json, 2, &[])), vec!["1", "2"]);
        assert_eq!(requests(&params_lines(&json, 2, &[])), vec!["3", "4"]);
        assert!(fs::read_to_string(&json).unwrap().trim_start().starts_with('{'));

        // Binary state is written back as binary.
        let binary = dir.path().join("state.bin");
        Session::load(&json).unwrap().save(&binary, PersistFormat::Binary).unwrap();
        assert_eq!(requests(&params_lines(&binary, 1, &[])), vec!["5"]);
        assert_eq!(&fs::read(&binary).unwrap()[..4], b"SSN\0");
        assert_eq!(Session::load(&binary).unwrap().request_count(), 5);
    }

    #[test]
    fn params_reject_incomplete_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, STATE.replace(r#""user_id":"1""#, r#""user_id":"""#)).unwrap();
        let mut out = Vec::new();
        let err = run_params(&path, 1, &[], &BootstrapOptions::default(), &mut out).unwrap_err();
        assert!(format!("{err:#}").contains("user data"), "{err:#}");
        assert!(out.is_empty());
    }
}
