use clap::Parser;
use training::util::{init_tracing, run_export, ExportArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = ExportArgs::parse();
    run_export(args)
}
