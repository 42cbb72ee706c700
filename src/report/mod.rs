pub mod builder;
pub mod notifier;

pub use builder::{PageKind, ReportBuilder, ReportEntry, ReportPage, DEFAULT_PAGE_CAPACITY};
pub use notifier::{
    deliver_in_order, AnyNotifier, MemoryNotifier, Notifier, StdoutNotifier, WebhookNotifier,
};
