use std::path::{Path, PathBuf};

use compio::fs;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::application::RuntimeConfig;
use crate::cli::{Cli, Command};
use crate::config::{Config, ConfigError};
use crate::ext::{BestEffortPathExt, normalize_path};
use crate::filetree::{
    self, BuildError, CodecError, MaterializeError, PruneError, Tree, human_size, materialize,
    prune,
};
use crate::ledger::{Ledger, LedgerError, LedgerRecord, PackageName, PackageNameError};

pub struct Application;

impl Application {
    pub async fn run(cli: Cli) -> Result<(), ApplicationError> {
        let config = Config::read(cli.config.as_deref())
            .await
            .context(ConfigSnafu)?;
        debug!("Loaded config: {:?}", config);

        Self::execute(&config.into(), cli.command).await
    }

    pub async fn execute(
        runtime_config: &RuntimeConfig,
        command: Command,
    ) -> Result<(), ApplicationError> {
        let ledger = Ledger::new(&runtime_config.ledger_dir);

        match command {
            Command::Build {
                paths,
                output,
                prefix,
            } => Self::build(&paths, &output, &prefix).await,
            Command::Install {
                package,
                dest,
                name,
            } => {
                let destination = dest.unwrap_or_else(|| runtime_config.destination.clone());
                let name = match name {
                    Some(name) => PackageName::new(name),
                    None => PackageName::from_archive_path(&package),
                }
                .context(PackageNameSnafu)?;
                Self::install(&ledger, &package, &destination, &name).await
            }
            Command::Remove { name } => {
                let name = PackageName::new(name).context(PackageNameSnafu)?;
                Self::remove(&ledger, &name).await
            }
            Command::Show { package } => {
                let tree = Self::read_archive(&package).await?;
                println!("{tree}");
                println!(
                    "{} files, {}",
                    tree.file_count(),
                    human_size(tree.total_size())
                );
                Ok(())
            }
            Command::List => Self::list(&ledger).await,
        }
    }

    async fn build(paths: &[PathBuf], output: &Path, prefix: &Path) -> Result<(), ApplicationError> {
        let tree = filetree::build(paths, prefix).context(BuildSnafu)?;
        println!("{tree}");

        let bytes = filetree::encode(&tree).context(ArchiveSnafu { path: output })?;
        fs::write(output, bytes)
            .await
            .0
            .context(WriteArchiveSnafu { path: output })?;

        println!("Wrote tree to {}", output.display());
        Ok(())
    }

    async fn install(
        ledger: &Ledger,
        package: &Path,
        destination: &Path,
        name: &PackageName,
    ) -> Result<(), ApplicationError> {
        println!("Reading tree from {}", package.display());
        let tree = Self::read_archive(package).await?;
        println!("{tree}");

        let destination = &Self::resolve_destination(destination)?;
        let destination_str = destination
            .to_str()
            .context(NonUtf8DestinationSnafu { path: destination })?;
        let record = LedgerRecord {
            destination: destination_str.to_string(),
            tree,
        };

        // Recorded before copying so that a partial install can still be removed
        ledger.write(name, &record).await.context(LedgerSnafu)?;

        fs::create_dir_all(destination)
            .await
            .context(DestinationSnafu { path: destination })?;
        materialize(&record.tree, destination).context(MaterializeSnafu)?;

        info!("Installed '{}' into {}", name, destination.display());
        println!("Transferred tree to {}", destination.display());
        Ok(())
    }

    /// Records outlive the working directory, so destinations are kept absolute.
    fn resolve_destination(destination: &Path) -> Result<PathBuf, ApplicationError> {
        let absolute =
            std::path::absolute(destination).context(DestinationSnafu { path: destination })?;
        Ok(normalize_path(&absolute))
    }

    async fn remove(ledger: &Ledger, name: &PackageName) -> Result<(), ApplicationError> {
        let record = ledger.read(name).await.context(LedgerSnafu)?;
        println!("{}", record.tree);

        let destination = Path::new(&record.destination);
        prune(&record.tree, destination).context(PruneSnafu)?;
        println!("Removed tree from {}", destination.display());

        ledger.remove(name).await.context(LedgerSnafu)?;
        info!("Removed '{}'", name);
        Ok(())
    }

    async fn list(ledger: &Ledger) -> Result<(), ApplicationError> {
        let names = ledger.list().await.context(LedgerSnafu)?;
        if names.is_empty() {
            println!("No packages installed in {}", ledger.dir().display());
        }

        for name in names {
            let record = ledger.read(&name).await.context(LedgerSnafu)?;
            println!("{}\t{}", name, record.destination);
        }
        Ok(())
    }

    async fn read_archive(package: &Path) -> Result<Tree, ApplicationError> {
        let bytes = fs::read(package)
            .await
            .context(ReadArchiveSnafu { path: package })?;
        filetree::decode(&bytes).context(ArchiveSnafu { path: package })
    }
}

#[derive(Debug, Snafu)]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered during configuration stage"))]
    ConfigError { source: ConfigError },
    #[snafu(display("Invalid package name"))]
    PackageNameError { source: PackageNameError },
    #[snafu(display("Failed to build the package tree"))]
    BuildError { source: BuildError },
    #[snafu(display("Failed to read package {}", path.best_effort_path_display()))]
    ReadArchiveError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write package {}", path.best_effort_path_display()))]
    WriteArchiveError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Package {} is malformed", path.best_effort_path_display()))]
    ArchiveError { path: PathBuf, source: CodecError },
    #[snafu(display("Install ledger failure"))]
    LedgerError { source: LedgerError },
    #[snafu(display("Destination {} is not valid UTF-8", path.display()))]
    NonUtf8DestinationError { path: PathBuf },
    #[snafu(display("Failed to prepare destination {}", path.best_effort_path_display()))]
    DestinationError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to install the package tree"))]
    MaterializeError { source: MaterializeError },
    #[snafu(display("Failed to remove the package tree"))]
    PruneError { source: PruneError },
}
