//! Records of installed packages: which tree went to which destination.

mod ledger;
mod package_name;

pub use ledger::{Ledger, LedgerError, LedgerRecord};
pub use package_name::{PackageName, PackageNameError};
