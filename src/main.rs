//! OCF resource agent for a PostgreSQL streaming-replication pair.
//!
//! The cluster manager runs the binary with a single action (`start`,
//! `stop`, `monitor`, `promote`, `demote`, `notify`, `status`, `meta-data` or
//! `methods`) and reads the outcome from the exit status. Configuration comes
//! from the `OCF_RESKEY_*` environment variables described by `meta-data`.

use std::process::ExitCode;

fn main() -> ExitCode {
    pg_ha_agent::run_from_env(std::env::args_os()).into()
}
