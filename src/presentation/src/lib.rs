pub mod report;

pub use report::{format_decision_report, format_event};
