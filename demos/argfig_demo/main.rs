//! # argfig demo application
//!
//! A small service front-end that shows how the pieces fit together. It is
//! not a real app; it exists to exercise argfig by hand.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example argfig_demo -- --help
//! cargo run --example argfig_demo -- -p 9001
//! DEMO_POWER_LEVEL=42 cargo run --example argfig_demo
//! cargo run --example argfig_demo -- --config ./demo.toml set port 8443
//! cargo run --example argfig_demo -- --config ./demo.toml --watch
//! RUST_LOG=argfig=debug cargo run --example argfig_demo -- --watch
//! ```
//!
//! With `--watch`, edit the TOML file in another terminal and the new values
//! are printed as they are applied. Values given on the command line keep
//! winning over the file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use argfig::{ArgfigError, Backend, FileBackend, Key, Options, Parser, Rule};

fn print_opts(opts: &Options) {
    for (key, value) in opts.flatten() {
        let source = Key::parse(&key);
        let source = opts.group(&source.group).source(&source.name);
        println!("  {key} = {value} ({source:?})");
    }
}

fn backend_for(path: &str) -> Result<FileBackend, ArgfigError> {
    if path.is_empty() {
        FileBackend::platform("argfig-demo", "demo.toml")
    } else {
        Ok(FileBackend::new(PathBuf::from(path)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config_path = Arc::new(Mutex::new(String::new()));
    let set_path = Arc::clone(&config_path);
    let mut parser = Parser::builder()
        .name("argfig-demo")
        .description("Prints its resolved configuration, optionally following a TOML file.")
        .env_prefix("DEMO_")
        .build();

    parser
        .add(
            Rule::option("--power-level")
                .alias("-p")
                .is_int()
                .env("POWER_LEVEL")
                .default("10000")
                .help("How strong the demo feels"),
        )?
        .add(
            Rule::option("--config")
                .alias("-c")
                .value_name("FILE")
                .store_string(&config_path)
                .help("TOML file to read (defaults to the platform config dir)"),
        )?
        .add(Rule::option("--watch").is_true().help("Follow the config file for changes"))?
        .add(Rule::option("--verbose").alias("-v").count().help("Repeat for more noise"))?
        .add(Rule::config("port").is_int().default("8080"))?
        .add(Rule::config("host").default("localhost"))?
        .add(Rule::config("url").in_group("database").env("DATABASE_URL"))?
        .add(Rule::config_group("endpoints"))?
        .add(
            Rule::command("set", move |sub, args| {
                sub.add(Rule::argument("key").required())?;
                sub.add(Rule::argument("value").required())?;
                let opts = sub.parse(args)?;
                let path = set_path.lock().map(|p| p.clone()).unwrap_or_default();
                let backend = backend_for(&path)?;
                let key = Key::parse(&opts.string("key"));
                let value = opts.string("value");
                let runtime = tokio::runtime::Handle::current();
                tokio::task::block_in_place(|| runtime.block_on(backend.set(&key, &value)))?;
                println!("{key} = {value} written to {}", backend.path().display());
                Ok(0)
            })
            .help("Write KEY VALUE into the config file"),
        )?;

    let argv: Vec<String> = std::env::args().skip(1).collect();
    parser.parse_simple(&argv);

    if parser.matched_command().is_some() {
        std::process::exit(parser.run_command()?);
    }

    let path = config_path.lock().map(|p| p.clone()).unwrap_or_default();
    let backend = Arc::new(backend_for(&path)?);
    let opts = match parser.from_backend(backend.as_ref()).await {
        Ok(opts) => opts,
        Err(ArgfigError::Unresolved { errors, partial }) => {
            for e in errors {
                eprintln!("warning: {e}");
            }
            partial
        }
        Err(e) => return Err(e.into()),
    };
    println!("Resolved configuration (verbosity {}):", opts.int("verbose"));
    print_opts(&opts);

    if !opts.bool("watch") {
        return Ok(());
    }

    let parser = Arc::new(parser);
    let shared = Arc::clone(&parser);
    let handle = parser
        .watch(backend.clone(), move |event| match event {
            Ok(change) => match shared.apply_change(&change) {
                Ok(opts) => {
                    println!("{} changed:", change.key);
                    print_opts(&opts);
                }
                Err(e) => eprintln!("warning: {e}"),
            },
            Err(e) => eprintln!("watch error: {e}"),
        })
        .await;

    println!("Watching {} (Ctrl-C to stop)", backend.path().display());
    tokio::signal::ctrl_c().await?;
    handle.cancel().await;
    backend.close().await?;
    Ok(())
}
