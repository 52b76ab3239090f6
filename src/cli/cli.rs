use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::application::data::LogLevel;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Capture directory trees into packages and install or remove them")]
pub struct Cli {
    #[clap(long, short, default_value = "warn", value_enum, global = true)]
    pub log_level: LogLevel,

    /// Config file to read instead of /etc/spm.yaml
    #[clap(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Capture paths into a package archive
    #[command(visible_alias = "b")]
    Build {
        #[clap(required = true)]
        paths: Vec<PathBuf>,
        #[clap(long, short, default_value = "package.spk")]
        output: PathBuf,
        /// Absolute directory the paths are installed under
        #[clap(long, short, default_value = "/")]
        prefix: PathBuf,
    },
    /// Write a package archive onto a destination and record it
    #[command(visible_alias = "i")]
    Install {
        package: PathBuf,
        #[clap(long, short)]
        dest: Option<PathBuf>,
        /// Name to record the package under, defaults to the archive's stem
        #[clap(long, short)]
        name: Option<String>,
    },
    /// Remove an installed package
    #[command(visible_alias = "r")]
    Remove { name: String },
    /// Print the tree stored in a package archive
    Show { package: PathBuf },
    /// List installed packages
    #[command(visible_alias = "ls")]
    List,
}
