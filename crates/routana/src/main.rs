use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use routana_core::{
    AnalysisReport, AnalysisSpec, ProbabilityMode, SelfCongestionMode, StructsMode, UserOptions,
};

/// FPGA routing architecture evaluation without benchmarks.
///
/// Paths are enumerated inside a small test area to get a sense of the
/// congestion patterns the routing architecture is susceptible to; those
/// congestion patterns then drive reachability analysis over many source/sink
/// pairs.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Routing-structs dump file to analyze
    #[arg(long = "rr_structs_file")]
    rr_structs_file: PathBuf,

    /// Expected contents of the structs file
    #[arg(long = "rr_structs_mode", value_enum, default_value_t = StructsModeArg::Vpr)]
    rr_structs_mode: StructsModeArg,

    /// Worker threads for enumeration and probability analysis
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Maximum connection length considered during enumeration
    #[arg(long = "max_connection_length", default_value_t = 3)]
    max_connection_length: usize,

    /// Restrict probability analysis to the core region of the grid (y/n)
    #[arg(long = "analyze_core", value_parser = parse_yn, default_value = "y")]
    analyze_core: bool,

    /// Treat channel nodes as having this fixed demand (disables
    /// self-congestion bookkeeping)
    #[arg(long = "use_routing_node_demand")]
    use_routing_node_demand: Option<f64>,

    /// Usage probability of each output pin
    #[arg(long = "opin_demand", default_value_t = 0.6)]
    opin_demand: f64,

    /// Scaling factor applied to accumulated demand
    #[arg(long = "demand_multiplier", default_value_t = 1.0)]
    demand_multiplier: f64,

    /// How to discount a connection's own enumerated demand
    #[arg(long = "self_congestion", value_enum, default_value_t = SelfCongestionArg::None)]
    self_congestion: SelfCongestionArg,

    /// Estimator used during the probability pass
    #[arg(long = "probability_mode", value_enum, default_value_t = ProbabilityModeArg::Propagate)]
    probability_mode: ProbabilityModeArg,

    /// Seed for work-list sampling
    #[arg(long, default_value_t = 3)]
    seed: u64,

    /// Disable graphics (accepted for compatibility; this build has none)
    #[arg(long)]
    nodisp: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StructsModeArg {
    #[value(name = "VPR", alias = "vpr")]
    Vpr,
    #[value(name = "simple")]
    Simple,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SelfCongestionArg {
    #[value(name = "none")]
    None,
    #[value(name = "radius")]
    Radius,
    #[value(name = "path_dependence")]
    PathDependence,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProbabilityModeArg {
    #[value(name = "propagate")]
    Propagate,
    #[value(name = "cutline")]
    Cutline,
    #[value(name = "cutline_simple")]
    CutlineSimple,
    #[value(name = "cutline_recursive")]
    CutlineRecursive,
    #[value(name = "reliability_polynomial")]
    ReliabilityPolynomial,
}

fn parse_yn(arg: &str) -> Result<bool, String> {
    match arg {
        "y" => Ok(true),
        "n" => Ok(false),
        other => Err(format!("expected 'y' or 'n', got '{other}'")),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let structs_mode = match args.rr_structs_mode {
        StructsModeArg::Vpr => StructsMode::Vpr,
        StructsModeArg::Simple => StructsMode::Simple,
    };
    if structs_mode == StructsMode::Simple && !args.nodisp {
        anyhow::bail!("simple structs mode requires --nodisp (this build has no display)");
    }
    let opts = UserOptions::builder()
        .structs_mode(structs_mode)
        .threads(args.threads)
        .max_connection_length(args.max_connection_length)
        .analyze_core(args.analyze_core)
        .use_routing_node_demand(args.use_routing_node_demand)
        .opin_probability(args.opin_demand)
        .demand_multiplier(args.demand_multiplier)
        .self_congestion(match args.self_congestion {
            SelfCongestionArg::None => SelfCongestionMode::None,
            SelfCongestionArg::Radius => SelfCongestionMode::Radius,
            SelfCongestionArg::PathDependence => SelfCongestionMode::PathDependence,
        })
        .probability_mode(match args.probability_mode {
            ProbabilityModeArg::Propagate => ProbabilityMode::Propagate,
            ProbabilityModeArg::Cutline => ProbabilityMode::Cutline,
            ProbabilityModeArg::CutlineSimple => ProbabilityMode::CutlineSimple,
            ProbabilityModeArg::CutlineRecursive => ProbabilityMode::CutlineRecursive,
            ProbabilityModeArg::ReliabilityPolynomial => ProbabilityMode::ReliabilityPolynomial,
        })
        .seed(args.seed)
        .build();
    opts.validate().context("invalid options")?;

    let start = std::time::Instant::now();
    let (arch, graph) = routana_core::load(&args.rr_structs_file, opts.structs_mode)
        .with_context(|| format!("failed to load {}", args.rr_structs_file.display()))?;

    let spec = AnalysisSpec::builder()
        .graph(graph)
        .arch(arch)
        .opts(opts)
        .build();
    let report = routana_core::run(spec)?;

    match report {
        AnalysisReport::Fpga(report) => {
            println!("desired conns: {}", report.desired_conns);
            println!("enumerated: {}", report.enumerated_conns);
            println!("fraction enumerated: {}", report.fraction_enumerated());
            println!("Total demand: {}", report.total_demand);
            println!("Total squared demand: {}", report.squared_demand);
            println!("Normalized demand: {}", report.normalized_demand);
            println!("Driver metric: {:.4}", report.driver_metric);
            println!("Fanout metric: {:.4}", report.fanout_metric);
            println!("Routability metric: {:.4}", report.routability_metric);
        }
        AnalysisReport::Simple(report) => {
            println!("Node paths:");
            for (node, paths) in &report.node_paths {
                println!("{node}: {paths} paths");
            }
            println!("Connection probability: {}", report.connection_probability);
        }
    }
    log::info!("analysis took {:.2?}", start.elapsed());
    Ok(())
}
