//! Core trait definitions

mod router;

pub use router::LocalRouter;
