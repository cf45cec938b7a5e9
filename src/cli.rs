use std::path::PathBuf;

use clap::{ArgGroup, ArgMatches, arg, command, value_parser};

fn source_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(arg!(-i --input <INPUT> "Fork program (inline)"))
        .arg(
            arg!(-f --file <INPUT> "Source file to process")
                .value_parser(value_parser!(PathBuf)),
        )
        .group(
            ArgGroup::new("input-source")
                .args(["input", "file"])
                .required(true)
                .multiple(false),
        )
}

pub(crate) fn cli() -> ArgMatches {
    command!()
        .subcommand(
            source_args(command!("transpile").about("Transpile a fork program to C-style code"))
                .arg(
                    arg!(--limit <LINES> "Stop the simulation after this many lines")
                        .value_parser(value_parser!(i64)),
                )
                .arg(arg!(--tree "Also print the process tree")),
        )
        .subcommand(
            source_args(command!("graph").about("Export the process tree as CSV or dot"))
                .arg(arg!(--dot "Emit Graphviz dot instead of CSV")),
        )
        .subcommand(
            source_args(command!("quiz").about("Generate answer options for the print ordering"))
                .arg(arg!(--"exit-disambig" "Force options that disambiguate exit behavior"))
                .arg(arg!(--seed <SEED> "Random seed").value_parser(value_parser!(u64))),
        )
        .subcommand(source_args(
            command!("timeline").about("Plan the 2-D execution timeline"),
        ))
        .subcommand(
            command!("gen")
                .about("Synthesize a random fork program")
                .arg(
                    arg!(--forks <COUNT> "Number of forks")
                        .value_parser(value_parser!(usize))
                        .default_value("2"),
                )
                .arg(
                    arg!(--prints <COUNT> "Number of prints")
                        .value_parser(value_parser!(usize))
                        .default_value("4"),
                )
                .arg(arg!(--nest "Allow nested forks"))
                .arg(arg!(--exit "Insert an exiting process"))
                .arg(arg!(--"has-else" "Generate two-armed forks"))
                .arg(arg!(--simple "Use the fork/wait/exit synchronization template"))
                .arg(arg!(--preset "Pick from the curated beginner patterns"))
                .arg(arg!(--seed <SEED> "Random seed").value_parser(value_parser!(u64))),
        )
        .get_matches()
}
