use clap::{value_parser, Arg, ArgMatches, Command};
use colored::*;
use log::{error, info, warn};

use livecircuit::cli::{CliArgs, Scenario};
use livecircuit::output::Trace;
use livecircuit::simulator::Simulator;

fn main() {
    env_logger::init();

    let matches = create_cli().get_matches();

    if let Err(e) = run_application(&matches) {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn create_cli() -> Command {
    Command::new("livecircuit")
        .version(livecircuit::VERSION)
        .about(livecircuit::DESCRIPTION)
        .arg(
            Arg::new("input")
                .help("Scenario file (.json) with the circuit and solver settings")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file for the per-step trace"),
        )
        .arg(
            Arg::new("dt")
                .long("dt")
                .value_name("TIME")
                .default_value("16ms")
                .help("Length of one outer step, e.g. 16ms"),
        )
        .arg(
            Arg::new("steps")
                .short('n')
                .long("steps")
                .value_name("N")
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of outer steps to run"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("Increase verbosity level"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .default_value("csv")
                .value_parser(["csv", "json"])
                .help("Output format"),
        )
}

fn run_application(matches: &ArgMatches) -> anyhow::Result<()> {
    let args = CliArgs::from_matches(matches)?;

    info!("{}", "Starting livecircuit".green().bold());
    info!("Scenario: {}", args.input_file.bright_blue());

    let scenario = Scenario::load(&args.input_file)?;
    if args.verbose_level > 0 {
        scenario.circuit.print_summary();
    }

    let title = if scenario.title.is_empty() { args.input_file.clone() } else { scenario.title.clone() };
    let mut simulator = Simulator::with_config(scenario.circuit, scenario.config)?;
    let mut trace = Trace::new(title);

    if args.dt == 0.0 {
        warn!("zero step length: every step reports instantaneous values only");
    }
    info!("Running {} steps of {}s", args.steps, args.dt);

    for _ in 0..args.steps {
        let results = simulator.step(args.dt);
        trace.record(simulator.time(), simulator.circuit(), &results);
    }

    if let Some(output_file) = args.output_file {
        trace.export(&output_file, args.output_format)?;
        info!("Results exported to: {}", output_file.bright_green());
    } else {
        trace.print_summary();
    }

    info!("{}", "Simulation completed successfully!".green().bold());
    Ok(())
}
