//!
//! ironparadise CLI
//! ----------------
//! Resolves the current gym identity against Supabase (or a seeded in-memory
//! backend with `--demo`) and reports what each route would show.

use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use ironparadise::audit::ActivitySink;
use ironparadise::config::GymConfig;
use ironparadise::guard::Decision;
use ironparadise::identity::{IdentityProvider, ProfileStore, ResolvedIdentity, Role, SessionResolver};
use ironparadise::memory::{MemoryIdentityProvider, MemoryProfileStore};
use ironparadise::routes::{RouteOutcome, RouteTable};
use ironparadise::supabase::SupabaseClient;

const DEMO_PASSWORD: &str = "ironparadise";
const COMMANDS: [&str; 5] = ["whoami", "route", "sign-in", "sign-up", "sign-out"];

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--demo] [--email <e> --password <p>] whoami\n  {program} [--demo] [--email <e> --password <p>] route <path>...\n  {program} [--demo] --email <e> --password <p> sign-in\n  {program} [--demo] --email <e> --password <p> --name <full name> sign-up\n  {program} [--demo] sign-out\n\nFlags:\n  --demo                   Use an in-memory backend seeded with admin@, member@ and user@ironparadise.gym\n                           (password: {DEMO_PASSWORD})\n  --email <e>              Sign in with this e-mail before running the command\n  --password <p>           Password for --email\n  --name <n>               Full name for sign-up\n  -h, --help               Show this help\n\nEnvironment:\n  SUPABASE_URL, SUPABASE_ANON_KEY          required unless --demo\n  IRONPARADISE_RESOLVE_TIMEOUT_MS          session check timeout (default 5000)\n  IRONPARADISE_SESSION_FILE                persist the session between runs\n  RUST_LOG                                 log filter (default info)"
    );
}

#[derive(Debug, Default)]
struct Args {
    demo: bool,
    email: Option<String>,
    password: Option<String>,
    name: Option<String>,
    command: Vec<String>,
}

fn parse_args(raw: &[String]) -> Result<Option<Args>> {
    let mut args = Args::default();
    let mut it = raw.iter();
    while let Some(a) = it.next() {
        match a.as_str() {
            "-h" | "--help" => return Ok(None),
            "--demo" => args.demo = true,
            "--email" => args.email = Some(it.next().cloned().ok_or_else(|| anyhow!("--email needs a value"))?),
            "--password" => args.password = Some(it.next().cloned().ok_or_else(|| anyhow!("--password needs a value"))?),
            "--name" => args.name = Some(it.next().cloned().ok_or_else(|| anyhow!("--name needs a value"))?),
            other => args.command.push(other.to_string()),
        }
    }
    let Some(command) = args.command.first() else {
        return Ok(None);
    };
    if !COMMANDS.contains(&command.as_str()) {
        return Err(anyhow!("unknown command '{}'", command));
    }
    Ok(Some(args))
}

fn demo_backend() -> (Arc<MemoryIdentityProvider>, Arc<MemoryProfileStore>) {
    let provider = Arc::new(MemoryIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileStore::new());
    for role in Role::ALL {
        let email = format!("{}@ironparadise.gym", role);
        let id = provider.add_account(&email, DEMO_PASSWORD);
        profiles.insert_for(&id, &email, role);
    }
    (provider, profiles)
}

fn build_resolver(args: &Args) -> Result<SessionResolver> {
    if args.demo {
        let (provider, profiles) = demo_backend();
        let provider: Arc<dyn IdentityProvider> = provider;
        let profiles: Arc<dyn ProfileStore> = profiles;
        return Ok(SessionResolver::new(provider, profiles));
    }
    let cfg = GymConfig::from_env().context("loading Supabase configuration")?;
    cfg.log_summary();
    let client = Arc::new(SupabaseClient::new(&cfg)?);
    let provider: Arc<dyn IdentityProvider> = client.clone();
    let profiles: Arc<dyn ProfileStore> = client.clone();
    let audit: Arc<dyn ActivitySink> = client;
    Ok(SessionResolver::builder(provider, profiles).timeout(cfg.resolve_timeout).audit(audit).build())
}

fn describe_identity(state: &ResolvedIdentity) -> String {
    match &state.profile {
        Some(p) => format!("{} <{}> role={}", p.display_name(), p.email, p.role),
        None => "not signed in".to_string(),
    }
}

fn describe_outcome(path: &str, outcome: &RouteOutcome) -> String {
    match outcome {
        RouteOutcome::NotFound => format!("{path}: not found"),
        RouteOutcome::Alias(to) => format!("{path}: redirect to {to}"),
        RouteOutcome::Guarded(Decision::Loading) => format!("{path}: loading"),
        RouteOutcome::Guarded(Decision::RedirectToSignIn) => format!("{path}: redirect to sign-in"),
        RouteOutcome::Guarded(Decision::RedirectToRoleHome(to)) => format!("{path}: redirect to {to}"),
        RouteOutcome::Guarded(Decision::AccessDenied(d)) => format!("{path}: access denied. {} (dashboard: {})", d.message(), d.home),
        RouteOutcome::Guarded(Decision::Render(screen)) => format!("{path}: shows {screen}"),
    }
}

async fn run(args: Args) -> Result<()> {
    let resolver = build_resolver(&args)?;
    resolver.start();
    let state = resolver.settled().await;
    info!(target: "cli", identity = %describe_identity(&state), "session resolved");

    let command = args.command[0].as_str();
    let (email, password) = (args.email.as_deref(), args.password.as_deref());
    if command == "sign-in" && (email.is_none() || password.is_none()) {
        return Err(anyhow!("sign-in requires --email and --password"));
    }

    if command == "sign-up" {
        let (Some(email), Some(password)) = (email, password) else {
            return Err(anyhow!("sign-up requires --email and --password"));
        };
        let name = args.name.as_deref().ok_or_else(|| anyhow!("sign-up requires --name"))?;
        resolver.sign_up(email, password, name).await.map_err(|e| anyhow!("{}", e.user_message()))?;
        println!("account created for {email}; confirm the e-mail, then sign in");
        return Ok(());
    }

    if let (Some(email), Some(password)) = (email, password) {
        let profile = resolver.sign_in(email, password).await.map_err(|e| anyhow!("{}", e.user_message()))?;
        println!("signed in as {} ({})", profile.display_name(), profile.role);
    }

    match command {
        "sign-in" | "whoami" => println!("{}", describe_identity(&resolver.current())),
        "sign-out" => {
            resolver.sign_out().await?;
            println!("signed out");
        }
        "route" => {
            let table = RouteTable::gym();
            let paths = &args.command[1..];
            if paths.is_empty() {
                return Err(anyhow!("route requires at least one path"));
            }
            let state = resolver.current();
            for path in paths {
                let (landed, outcome) = table.navigate(path, &state);
                if landed == *path {
                    println!("{}", describe_outcome(path, &outcome));
                } else {
                    println!("{path} -> {}", describe_outcome(&landed, &outcome));
                }
            }
        }
        other => return Err(anyhow!("unknown command '{}'", other)),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let raw: Vec<String> = env::args().collect();
    let program = raw.first().cloned().unwrap_or_else(|| "ironparadise".to_string());
    match parse_args(&raw[1.min(raw.len())..])? {
        Some(args) => run(args).await,
        None => {
            print_usage(&program);
            Ok(())
        }
    }
}
