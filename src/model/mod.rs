pub mod candidate;
pub mod selection;

pub use candidate::{Candidate, TypeFilter};
pub use selection::{Selection, sample};
