use clap::Parser;

/// Compile a card search query and print its plan as JSON.
#[derive(Debug, clap::Parser)]
#[command(name = "grimoire-search")]
struct Args {
    /// Query text. Multiple arguments are joined with spaces, so quoting
    /// the whole query is optional.
    query: Vec<String>,

    /// Pretty-print the plan.
    #[clap(long)]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    tracing::debug!(?args, "parsed arguments");

    let query = args.query.join(" ");
    let engine = search_lang::Engine::cards();

    match engine.compile(&query) {
        Ok(plan) => {
            let out = if args.pretty {
                serde_json::to_string_pretty(&plan)?
            } else {
                serde_json::to_string(&plan)?
            };
            println!("{out}");
            Ok(())
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env("GRIMOIRE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
