//! Live authorization state.
//!
//! - [`AuthorizationTable`]: the entries the listener authenticates against
//! - [`Reconciler`]: keeps the table in line with the persisted directory

mod reconciler;
mod table;

pub use reconciler::{FsProvisioner, HomeProvisioner, ReconcileError, ReconcileResult, Reconciler};
pub use table::{
    bootstrap_home, AuthorizationEntry, AuthorizationTable, Authorizer, EntryOrigin,
    ANONYMOUS_USERNAME, ROOT_USERNAME,
};
