use std::{
    error::Error,
    io::{self, BufRead, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use clap::Parser;
use log::{debug, warn};
use opo::{Client, ClientOptions, Dictionary, Message, wire::json};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host name or address
    host: String,
    /// Server port
    port: u16,
    /// Seconds to wait for each response
    #[arg(long, default_value = "2", value_parser = parse_seconds)]
    timeout: Duration,
    /// Most queries allowed in flight at once
    #[arg(long, default_value_t = opo::client::DEFAULT_PENDING_MAX)]
    pending_max: usize,
    /// Comma separated dictionary words shared with the server
    #[arg(long, value_delimiter = ',')]
    words: Vec<String>,
    /// Deliver responses in arrival order through one shared handler
    #[arg(long)]
    stream: bool,
    /// Send each query this many times
    #[arg(long, default_value_t = 1)]
    repeat: usize,
    /// A single JSON query; queries are read from stdin, one per line, if absent
    #[arg(long)]
    query: Option<String>,
}

fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let timeout = cli.timeout;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    let dict = if cli.words.is_empty() {
        None
    } else {
        Some(Arc::new(Dictionary::new(&cli.words)?))
    };

    let mut options = ClientOptions::default()
        .timeout(timeout)
        .pending_max(cli.pending_max)
        .on_status(|connected, kind, message| match kind {
            Some(kind) => eprintln!("[{kind}] {message}"),
            None => debug!("connected={connected}: {message}"),
        });
    if !cli.words.is_empty() {
        options = options.words(cli.words.iter().cloned());
    }
    if cli.stream {
        let dict = dict.clone();
        options = options.on_stream(move |_, msg| print_response(&msg, dict.as_deref()));
    }

    let client = Client::connect(&cli.host, cli.port, options)?;

    match &cli.query {
        Some(query) => run(&client, &cli, &stop, query, dict.as_deref(), timeout)?,
        None => {
            for line in io::stdin().lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = run(&client, &cli, &stop, &line, dict.as_deref(), timeout) {
                    eprintln!("query error: {e}");
                }
            }
        }
    }

    client.close();
    Ok(())
}

/// Sends one query `--repeat` times and waits for every response.
fn run(
    client: &Client,
    cli: &Cli,
    stop: &AtomicBool,
    query: &str,
    dict: Option<&Dictionary>,
    timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    let doc: serde_json::Value = serde_json::from_str(query)?;
    let template = json::to_message(&doc, dict)?;

    let shared_dict = client.dictionary().cloned();
    let start = Instant::now();
    let mut sent = 0;
    let mut done = 0;
    while sent < cli.repeat && !stop.load(Ordering::SeqCst) {
        let mut msg = template.clone();
        let callback = if cli.stream {
            None
        } else {
            let dict = shared_dict.clone();
            Some(Box::new(move |_: u64, response: Message| {
                print_response(&response, dict.as_deref())
            }) as opo::QueryCallback)
        };
        match client.query(&mut msg, callback) {
            Ok(_) => sent += 1,
            Err(e) if e.kind() == opo::ErrorKind::Busy => {
                done += client.process(0, Duration::ZERO);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        done += client.process(0, Duration::ZERO);
    }

    while done < sent {
        let got = client.process(sent - done, timeout);
        if got == 0 {
            warn!("{} responses missing after {timeout:?}", sent - done);
            break;
        }
        done += got;
    }

    if cli.repeat > 1 {
        eprintln!("{done} responses in {:?}", start.elapsed());
    }
    Ok(())
}

fn print_response(msg: &Message, dict: Option<&Dictionary>) {
    match json::from_message(msg, dict) {
        Ok(doc) => {
            let mut stdout = io::stdout().lock();
            if writeln!(stdout, "{doc}").is_err() {
                warn!("stdout closed");
            }
        }
        Err(e) => eprintln!("bad response {}: {e}", msg.id()),
    }
}
