//! `planctl`: the sibling control CLI. Issues out-of-band commands to a
//! running `plancton` daemon purely by creating or removing sentinel files
//! in the shared run directory — there is no IPC beyond filesystem
//! presence.

use std::process::ExitCode;

use clap::Parser;
use plancton::config::{PlanctlArgs, PlanctlCommand};
use plancton::control::mode;

fn main() -> ExitCode {
    let args = PlanctlArgs::parse();
    let rundir = &args.rundir;

    let result = match args.command {
        PlanctlCommand::Drain { stop: false } => mode::drain(rundir),
        PlanctlCommand::Drain { stop: true } => mode::drain_stop(rundir),
        PlanctlCommand::Resume => mode::resume(rundir),
        PlanctlCommand::Kill => mode::force_stop(rundir),
        PlanctlCommand::Status => {
            println!("drain:      {}", mode::is_draining(rundir));
            println!("drain-stop: {}", mode::is_drain_stop(rundir));
            println!("force-stop: {}", mode::is_force_stop(rundir));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
