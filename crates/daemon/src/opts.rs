// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line contract: `cmd [-H|-h] [-d] [-p <pid_file>]`.
//!
//! Unknown flags are ignored so wrapper scripts can pass extra options
//! through to the application.

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "drover",
    disable_help_flag = true,
    disable_version_flag = true,
    ignore_errors = true
)]
pub struct Opts {
    /// Print usage and exit.
    #[arg(short = 'h', short_alias = 'H', long = "help")]
    pub help: bool,

    /// Detach from the terminal and run in the background.
    #[arg(short = 'd', long = "daemon")]
    pub daemonize: bool,

    /// Write the parent pid to this file; removed again at shutdown.
    #[arg(short = 'p', long = "pid-file", value_name = "pid_file")]
    pub pid_file: Option<PathBuf>,
}

impl Opts {
    /// Parse from the process arguments.
    pub fn from_env() -> Self {
        Self::parse()
    }

    /// Parse from an explicit argv (index 0 is the program name).
    pub fn from_argv<I, T>(argv: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::parse_from(argv)
    }

    /// Usage text printed for `-h`/`-H`.
    pub fn usage(program: &str) -> String {
        format!(
            "usage: {program} [-H|-h] [-d] [-p <pid_file>]\n\
             \n\
               -h, -H          print this help and exit\n\
               -d              detach and run as a background daemon\n\
               -p <pid_file>   write the parent pid to <pid_file>\n"
        )
    }
}

#[cfg(test)]
#[path = "opts_tests.rs"]
mod tests;
