use std::time::{Duration, Instant};

use anyhow::Result;
use chunkscan::{
    logger,
    port::{self, DEFAULT_PORT_LIST},
    report::Summary,
    scan::{ScanConfig, Scanner},
};
use clap::{
    arg, crate_authors, crate_name, crate_version, value_parser, ArgAction, ArgMatches, Command,
};
use pad::PadStr;

struct ParsedArgs {
    verbosity: u8,
    ports: Vec<i64>,
    config: ScanConfig,
    target: String,
}

fn parse_args(matches: ArgMatches) -> Result<ParsedArgs> {
    let verbosity = matches.get_count("debug");

    let raw_ports = matches.get_one::<String>("ports").unwrap();
    let ports = port::parse_list(raw_ports)?;

    let config = ScanConfig {
        interval: Duration::from_millis(*matches.get_one::<u64>("interval").unwrap()),
        chunk_lower: *matches.get_one::<i64>("chunk-min").unwrap(),
        chunk_upper: *matches.get_one::<i64>("chunk-max").unwrap(),
        highest_port: *matches.get_one::<u16>("highest-port").unwrap(),
    };

    let target = matches.get_one::<String>("target").unwrap().to_owned();

    Ok(ParsedArgs {
        verbosity,
        ports,
        config,
        target,
    })
}

fn print_results(target: &str, summary: Summary, elapsed: Duration) {
    let mut out = String::from("RESULTS\n=======\n");
    out.push_str(&format!(
        "{} seems to have {} open, {} closed, {} filtered, and {} unknown ports.\n",
        target, summary.open, summary.closed, summary.filtered, summary.unknown
    ));
    out.push_str(&format!(
        "Scan Duration: {:.4}s\n\n",
        elapsed.as_secs_f32()
    ));

    if summary.detailed.is_empty() {
        out.push_str("Didn't find any open or closed port.\n");
    } else {
        out.push_str("PORT    STATUS\n");

        summary.detailed.iter().for_each(|(port, state)| {
            out.push_str(&format!(
                "{}{}\n",
                port.to_string().pad_to_width(8),
                state
            ))
        });
    }

    print!("{}", out);
}

fn main() -> Result<()> {
    let arg_matches = Command::new(crate_name!())
        .about(
            "TCP connect port scanner.\n\
            Ports are probed in small paced chunks, most common ports first.",
        )
        .version(crate_version!())
        .arg_required_else_help(true)
        .author(crate_authors!())
        .args([
            // Miscellaneous arguments.
            arg!(-d --debug "Turns on debugging information (twice for tracing)")
                .action(ArgAction::Count),
            arg!(-p --ports <PORTS> "Hyphen and/or comma separated port list, e.g. 1,2-8,9,10-20")
                .default_value(DEFAULT_PORT_LIST),
            arg!([target] "Address or hostname to scan").required(true),
        ])
        .args([
            // Pacing.
            arg!(--interval <MS> "Time budget of each chunk poll in milliseconds")
                .value_parser(value_parser!(u64))
                .default_value("110"),
            arg!(--"chunk-min" <N> "Lower bound on the chunk size")
                .value_parser(value_parser!(i64))
                .default_value("10"),
            arg!(--"chunk-max" <N> "Upper bound on the chunk size")
                .value_parser(value_parser!(i64))
                .default_value("20"),
            arg!(--"highest-port" <PORT> "Highest port considered valid")
                .value_parser(value_parser!(u16))
                .default_value("65335"),
        ])
        .get_matches();

    // Extract arguments.
    let parsed = parse_args(arg_matches)?;

    // Set debug if desired.
    logger::init(parsed.verbosity);

    // Resolve target before anything is probed.
    let mut scanner = Scanner::new(&parsed.target, parsed.ports)?.config(parsed.config);

    println!(
        "Starting port scan of host {} ({}).\n",
        parsed.target,
        scanner.address()
    );

    let now = Instant::now();
    let results = scanner.run_with_config()?;
    let elapsed = now.elapsed();

    print_results(&parsed.target, Summary::without_filtered(results), elapsed);

    Ok(())
}
