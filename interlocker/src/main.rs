use interlocker::railway::algorithm;
use interlocker::railway::controller::Config;
use interlocker::railway::registry::RouteRegistry;
use interlocker::*;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

/// Interlocker -- grants, releases and supervises train routes
#[derive(StructOpt, Debug)]
#[structopt(name = "interlocker")]
struct Opt {
    /// Verbose mode (-v, -vv)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,

    /// Interlocking table: topology, entry signals and routes
    #[structopt(parse(from_os_str))]
    table: PathBuf,

    /// Scenario file, one action per line
    #[structopt(parse(from_os_str))]
    scenario: PathBuf,

    /// Interlocking algorithm: default | blocking
    #[structopt(short = "a", long = "algorithm", default_value = "default")]
    algorithm: String,

    /// Poll period of drives in milliseconds
    #[structopt(short = "p", long = "poll-ms", default_value = "10")]
    poll_ms: u64,

    /// Number of trains that can be grabbed at once
    #[structopt(short = "m", long = "max-trains", default_value = "32")]
    max_trains: usize,

    /// Output JSON history file
    #[structopt(short = "j", long = "json", parse(from_os_str))]
    json: Option<PathBuf>,
}

fn run(opt: &Opt) -> AppResult<()> {
    let table = get_table(&opt.table)?;
    if opt.verbose >= 2 {
        println!("Routes:");
        for x in &table.routes {
            println!("  - {:?}", x);
        }
    }

    let scenario = get_scenario(&opt.scenario)?;
    if opt.verbose >= 1 {
        println!("Scenario:");
        for x in &scenario.actions {
            println!("  - {:?}", x);
        }
        println!("");
    }

    if algorithm::by_name(&opt.algorithm).is_none() {
        return Err(failure::err_msg(format!("unknown algorithm \"{}\", expected one of {:?}",
                                            opt.algorithm,
                                            algorithm::ALGORITHMS)));
    }
    let config = Config {
        algorithm: opt.algorithm.clone(),
        poll_step: Duration::from_millis(opt.poll_ms),
        max_grabbed_trains: opt.max_trains,
    };

    let history = run_scenario(table.clone(), &scenario, config)?;

    println!("# Interlocking history:");
    for x in &history.events {
        println!("> {:?}", x);
    }

    if let Some(ref json) = opt.json {
        use std::fs::File;
        use std::io::BufWriter;
        let registry = RouteRegistry::new(table)?;
        let file = File::create(json)?;
        let mut writer = BufWriter::new(&file);
        output::json::json_history(&registry, &history, &mut writer)?;
    }

    Ok(())
}

pub fn main() {
    let opt = Opt::from_args();
    let level = match opt.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&opt) {
        Ok(()) => {}
        Err(e) => {
            println!("Error:\n{}", e.as_fail());
            std::process::exit(1);
        }
    }
}
