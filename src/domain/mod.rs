//! Print-shop domain types shared by the registry, router and dispatcher.

mod dossier;
mod role;

pub use dossier::{Dossier, DossierStatus};
pub use role::{Machine, UserRole};
