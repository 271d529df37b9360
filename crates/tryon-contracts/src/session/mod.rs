mod history;
mod summary;

pub use history::SessionHistory;
pub use summary::{write_summary, SessionSummary};
