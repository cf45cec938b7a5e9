mod cli;

use clap::ArgMatches;
use forksim::{
    Error, ProcessGraph, Simulation, SynthesisParams, Synthesizer, Timeline, answer_pool,
    extract_constraints, simulate, simulate_partial, tree_csv,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let matches = cli::cli();

    match matches.subcommand() {
        Some(("transpile", sub)) => {
            let sim = build(sub)?;
            print!("{}", sim.listing);
            if sub.get_flag("tree") {
                println!("{}", sim.tree.render_ascii());
            }
        }
        Some(("graph", sub)) => {
            let sim = build(sub)?;
            if sub.get_flag("dot") {
                let graph = ProcessGraph::from_simulation(&sim);
                print!("{}", graph.to_dot());
            } else {
                let (csv, labels) = tree_csv(&sim.tree);
                println!("{csv}");
                for label in labels {
                    println!("{label}");
                }
            }
        }
        Some(("quiz", sub)) => {
            let constraints = extract_constraints(&source(sub)?)?;
            let mut rng = seeded_rng(sub);
            let disambig = sub.get_flag("exit-disambig");
            let (pool, order) = answer_pool(&constraints, &mut rng, disambig);
            for key in order {
                let verdict = if pool[&key] { "invalid" } else { "valid" };
                println!("{key}: {verdict}");
            }
        }
        Some(("timeline", sub)) => {
            let constraints = extract_constraints(&source(sub)?)?;
            let timeline = Timeline::plan(&constraints);
            for (i, node) in timeline.nodes().iter().enumerate() {
                println!("node {i} ({}, {}) {}", node.x, node.y, node.label());
            }
            for link in timeline.links() {
                let style = if link.dashed { "dashed" } else { "solid" };
                let label = link.label.unwrap_or_default();
                println!("link {} -> {} {style} {label}", link.source, link.target);
            }
        }
        Some(("gen", sub)) => {
            let mut synth = match sub.get_one::<u64>("seed") {
                Some(&seed) => Synthesizer::with_seed(seed),
                None => Synthesizer::new(),
            };
            let forks = *sub.get_one::<usize>("forks").unwrap_or(&2);
            let prints = *sub.get_one::<usize>("prints").unwrap_or(&4);
            let code = if sub.get_flag("preset") {
                synth.simple_wait_preset()
            } else if sub.get_flag("simple") {
                synth.synthesize_simple_wait(forks, prints)
            } else {
                synth.synthesize(SynthesisParams {
                    num_forks: forks,
                    num_prints: prints,
                    has_nest: sub.get_flag("nest"),
                    has_exit: sub.get_flag("exit"),
                    has_else: sub.get_flag("has-else"),
                })
            };
            println!("{code}");
        }
        _ => {
            eprintln!("No subcommand given, try --help");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn source(sub: &ArgMatches) -> Result<String, Error> {
    if let Some(inline) = sub.get_one::<String>("input") {
        return Ok(inline.clone());
    }
    let path = sub
        .get_one::<std::path::PathBuf>("file")
        .ok_or(Error::InvalidParams)?;
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

fn build(sub: &ArgMatches) -> Result<Simulation, Error> {
    let input = source(sub)?;
    match sub.try_get_one::<i64>("limit") {
        Ok(Some(&limit)) => simulate_partial(&input, limit),
        _ => simulate(&input),
    }
}

fn seeded_rng(sub: &ArgMatches) -> fastrand::Rng {
    match sub.get_one::<u64>("seed") {
        Some(&seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    }
}
