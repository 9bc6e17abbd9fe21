use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use prefix_scan::validate::{check_matrix_conv, check_scan};
use prefix_scan::{ComputeContext, HostContext, MatrixConv, PrefixScan, Summable};
use rand::{Rng, SeedableRng};
use rand_hc::Hc128Rng;
use std::iter;
use std::time::Instant;

/// Matrix and mask sides of the convolution checks.
const CONV_CASES: [(usize, usize); 5] = [(1024, 3), (1024, 9), (1, 9), (31, 9), (1023, 9)];

#[derive(Debug, Parser)]
#[command(
    name = "scan_harness",
    version,
    about = "Runs device scans and convolutions and checks them against the host"
)]
struct Cli {
    /// Device to run the kernels on
    #[arg(long, value_enum, default_value_t = Backend::Host, global = true)]
    backend: Backend,
    /// Worker threads of the host device (0 = one per core)
    #[arg(long, default_value_t = 0, global = true)]
    threads: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Host,
    Cuda,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Element {
    I32,
    F32,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sweep array lengths and block sizes
    Scan(ScanArgs),
    /// Run the masked convolution table
    Conv(ConvArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// First array length
    #[arg(long, default_value_t = 1)]
    min_len: usize,
    /// Lengths stay below this
    #[arg(long, default_value_t = 1 << 20)]
    max_len: usize,
    /// Next length is `len * growth + 1`
    #[arg(long, default_value_t = 1.01)]
    growth: f64,
    /// First block size; block sizes double from here
    #[arg(long, default_value_t = 4)]
    min_block: usize,
    /// Block sizes stay below this
    #[arg(long, default_value_t = 1024)]
    max_block: usize,
    /// Skip runs whose first level has more than this many blocks
    #[arg(long, default_value_t = 100)]
    max_blocks: usize,
    /// Input values are drawn from `0..max_value`
    #[arg(long, default_value_t = 10)]
    max_value: u32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, value_enum, default_value_t = Element::I32)]
    element: Element,
}

#[derive(Debug, Args)]
struct ConvArgs {
    /// Side of the square work group
    #[arg(long, default_value_t = 1)]
    local: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.backend {
        Backend::Host => {
            let ctx = HostContext::builder().threads(cli.threads).build()?;
            info!("using host device with {} threads", ctx.threads());
            run(&ctx, &cli.command)
        }
        Backend::Cuda => run_cuda(&cli.command),
    }
}

#[cfg(feature = "cuda")]
fn run_cuda(command: &Command) -> Result<()> {
    let ctx = prefix_scan::CudaContext::new()?;
    run(&ctx, command)
}

#[cfg(not(feature = "cuda"))]
fn run_cuda(_command: &Command) -> Result<()> {
    bail!("scan_harness was built without the `cuda` feature")
}

fn run<C: ComputeContext>(ctx: &C, command: &Command) -> Result<()> {
    match command {
        Command::Scan(args) => {
            if args.max_value == 0 || args.growth < 1.0 {
                bail!("--max-value must be positive and --growth at least 1");
            }
            let max_value = args.max_value;
            match args.element {
                Element::I32 => scan_sweep(ctx, args, |rng| rng.gen_range(0..max_value) as i32),
                // Whole numbers keep every partial sum exact in f32.
                Element::F32 => scan_sweep(ctx, args, |rng| rng.gen_range(0..max_value) as f32),
            }
        }
        Command::Conv(args) => conv_table(ctx, args),
    }
}

fn scan_sweep<C, T, F>(ctx: &C, args: &ScanArgs, sample: F) -> Result<()>
where
    C: ComputeContext,
    T: Summable,
    F: Fn(&mut Hc128Rng) -> T,
{
    let mut rng = Hc128Rng::seed_from_u64(args.seed);
    let now = Instant::now();
    let mut percentile = 0.0;
    let mut runs = 0;

    let mut len = args.min_len.max(1);
    while len < args.max_len {
        let block_sizes = iter::successors(Some(args.min_block.max(1)), |b| Some(b * 2))
            .take_while(|&b| b < args.max_block);
        for block_size in block_sizes {
            // Harness policy only; the scan itself takes any length.
            if len / block_size > args.max_blocks {
                continue;
            }

            let input = (0..len).map(|_| sample(&mut rng)).collect::<Vec<T>>();
            let output = PrefixScan::new(ctx, block_size)?.scan(&input)?;
            if let Err(e) = check_scan(&input, &output) {
                bail!("{}\n block_size = {}\n test_array_size = {}", e, block_size, len);
            }
            runs += 1;

            let local_percentile = len as f64 / args.max_len as f64 * 100.0;
            if local_percentile - percentile > 1.0 {
                percentile = local_percentile;
                info!("{:.0}%", percentile);
            }
        }
        len = (len as f64 * args.growth) as usize + 1;
    }

    info!("{} scans of {} matched the host", runs, T::TYPE_NAME);
    println!("Total time: {:.2} sec", now.elapsed().as_secs_f64());
    Ok(())
}

fn conv_table<C: ComputeContext>(ctx: &C, args: &ConvArgs) -> Result<()> {
    let max_n = CONV_CASES.iter().map(|&(n, _)| n).max().unwrap_or(0);
    let max_m = CONV_CASES.iter().map(|&(_, m)| m).max().unwrap_or(0);
    let mut input = vec![0.0f32; max_n * max_n];
    let mut mask = vec![0.0f32; max_m * max_m];
    let conv = MatrixConv::new(ctx).local_size((args.local, args.local));

    // Ones accumulate across cases, as the buffers are reused.
    for (i, &(n, m)) in CONV_CASES.iter().enumerate() {
        input[..n].fill(1.0);
        mask[..m].fill(1.0);

        let output = conv.convolve(&input, &mask, n, m)?;
        check_matrix_conv(&input[..n * n], &mask[..m * m], &output, n, m)
            .map_err(|e| anyhow!("test {} failed; N = {} M = {}: {}", i, n, m, e))?;
        info!("test {} passed; N = {} M = {}", i, n, m);
    }

    println!("all tests passed");
    Ok(())
}
