pub mod check;
pub mod search;

pub use check::check;
pub use search::search;
