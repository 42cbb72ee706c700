//! Turn analysis results into size-bounded report pages
//!
//! Low-influence entries come first, then close competitors, both in the
//! order the analyzer produced them. Only page 1 carries the title and
//! description; continuation pages keep just the severity.

use crate::analysis::{AnalysisResult, CompetitorEntry, LowInfluenceEntry};
use serde::Serialize;

/// Default maximum entries per page
pub const DEFAULT_PAGE_CAPACITY: usize = 25;

pub const REPORT_FOOTER: &str = "Elite BGS Monitor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageKind {
    Report,
    AllClear,
    TickAnnouncement,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReportEntry {
    LowInfluence(LowInfluenceEntry),
    CloseCompetitor(CompetitorEntry),
}

impl ReportEntry {
    pub fn heading(&self) -> String {
        match self {
            ReportEntry::LowInfluence(e) => format!("Low influence: {}", e.system_name),
            ReportEntry::CloseCompetitor(e) => format!("Close competitor: {}", e.system_name),
        }
    }

    pub fn body(&self) -> String {
        match self {
            ReportEntry::LowInfluence(e) => match &e.conflict_summary {
                Some(summary) => format!("{}% influence, {}", display_pct(e.influence_pct), summary),
                None => format!("{}% influence", display_pct(e.influence_pct)),
            },
            ReportEntry::CloseCompetitor(e) => format!(
                "{}% vs {} at {}%",
                display_pct(e.own_influence_pct),
                e.rival_name,
                display_pct(e.rival_influence_pct)
            ),
        }
    }
}

/// Percentages are rounded only here, for display
pub fn display_pct(pct: f64) -> String {
    format!("{:.2}", pct)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPage {
    pub kind: PageKind,
    /// Page 1 only
    pub title: Option<String>,
    /// Page 1 only
    pub description: Option<String>,
    /// Presentation hint; set when any reportable conflict was found
    pub severity: bool,
    pub entries: Vec<ReportEntry>,
}

impl ReportPage {
    fn continuation(kind: PageKind, severity: bool) -> Self {
        Self {
            kind,
            title: None,
            description: None,
            severity,
            entries: Vec::new(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut s = String::new();
        if let Some(title) = &self.title {
            s.push_str(&format!("== {} ==\n", title));
        }
        if let Some(description) = &self.description {
            s.push_str(description);
            s.push('\n');
        }
        for entry in &self.entries {
            s.push_str(&format!("- {}: {}\n", entry.heading(), entry.body()));
        }
        s.push_str(&format!("-- {}", REPORT_FOOTER));
        s
    }
}

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    page_capacity: usize,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_CAPACITY)
    }
}

impl ReportBuilder {
    /// A zero capacity is treated as one entry per page
    pub fn new(page_capacity: usize) -> Self {
        Self {
            page_capacity: page_capacity.max(1),
        }
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    /// Paginate one faction's result. Never returns an empty list: a result
    /// without entries becomes a single all-clear page.
    pub fn build(&self, result: &AnalysisResult) -> Vec<ReportPage> {
        if result.is_all_clear() {
            return vec![ReportPage {
                kind: PageKind::AllClear,
                title: Some(format!("BGS Report: {}", result.faction_name)),
                description: Some(
                    "All clear. Every controlled system is stable and no rival is close.".into(),
                ),
                severity: false,
                entries: Vec::new(),
            }];
        }

        let severity = result.has_reportable_conflict;
        let entries = result
            .low_influence_systems
            .iter()
            .cloned()
            .map(ReportEntry::LowInfluence)
            .chain(
                result
                    .close_competitor_systems
                    .iter()
                    .cloned()
                    .map(ReportEntry::CloseCompetitor),
            );

        let mut pages = Vec::new();
        let mut current = ReportPage {
            kind: PageKind::Report,
            title: Some(format!("BGS Report: {}", result.faction_name)),
            description: Some(format!(
                "{} system(s) with low influence, {} system(s) with a close competitor.",
                result.low_influence_systems.len(),
                result.close_competitor_systems.len()
            )),
            severity,
            entries: Vec::new(),
        };

        for entry in entries {
            if current.entries.len() == self.page_capacity {
                let next = ReportPage::continuation(PageKind::Report, severity);
                pages.push(std::mem::replace(&mut current, next));
            }
            current.entries.push(entry);
        }
        pages.push(current);
        pages
    }

    /// Announcement for a newly observed tick
    pub fn tick_page(&self, token: &str) -> ReportPage {
        ReportPage {
            kind: PageKind::TickAnnouncement,
            title: Some("Tick Just Happened!".into()),
            description: Some(format!(
                "Tick just happened at {}.\nAnother day, another opportunity to shape the Galaxy!",
                token
            )),
            severity: false,
            entries: Vec::new(),
        }
    }

    pub fn maintenance_page(&self, active: bool) -> ReportPage {
        let (title, description) = if active {
            (
                "Maintenance Mode Active",
                "Some services may be temporarily unavailable or display inaccurate data.",
            )
        } else {
            (
                "Maintenance Completed",
                "All systems operational again. Thank you for your patience!",
            )
        };
        ReportPage {
            kind: PageKind::Maintenance,
            title: Some(title.into()),
            description: Some(description.into()),
            severity: active,
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(low: usize, close: usize, conflict: bool) -> AnalysisResult {
        let mut result = AnalysisResult::new("Torval Mining Ltd");
        for i in 0..low {
            result.low_influence_systems.push(LowInfluenceEntry {
                system_name: format!("Low {}", i),
                influence_pct: 30.0,
                conflict_summary: None,
            });
        }
        for i in 0..close {
            result.close_competitor_systems.push(CompetitorEntry {
                system_name: format!("Close {}", i),
                own_influence_pct: 60.0,
                rival_name: "Rival Co".into(),
                rival_influence_pct: 45.0,
            });
        }
        result.has_reportable_conflict = conflict;
        result
    }

    #[test]
    fn test_all_clear_single_page() {
        let pages = ReportBuilder::default().build(&result_with(0, 0, false));
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].kind, PageKind::AllClear);
        assert!(pages[0].entries.is_empty());
    }

    #[test]
    fn test_exactly_full_page_does_not_spill() {
        let pages = ReportBuilder::default().build(&result_with(20, 5, false));
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].entries.len(), 25);
    }

    #[test]
    fn test_overflow_and_header_only_on_first_page() {
        let pages = ReportBuilder::default().build(&result_with(20, 10, true));
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].entries.len(), 25);
        assert_eq!(pages[1].entries.len(), 5);
        assert!(pages[0].title.is_some());
        assert!(pages[1].title.is_none());
        assert!(pages[1].description.is_none());
        assert!(pages.iter().all(|p| p.severity));
    }

    #[test]
    fn test_low_influence_before_competitors() {
        let pages = ReportBuilder::new(2).build(&result_with(3, 2, false));
        let kinds: Vec<bool> = pages
            .iter()
            .flat_map(|p| p.entries.iter())
            .map(|e| matches!(e, ReportEntry::LowInfluence(_)))
            .collect();
        assert_eq!(kinds, vec![true, true, true, false, false]);
        assert_eq!(pages.len(), 3);
    }

    #[test]
    fn test_entry_text_rounds_for_display() {
        let entry = ReportEntry::LowInfluence(LowInfluenceEntry {
            system_name: "Bast".into(),
            influence_pct: 35.004,
            conflict_summary: Some("War with Rival Co".into()),
        });
        assert_eq!(entry.body(), "35.00% influence, War with Rival Co");

        let entry = ReportEntry::CloseCompetitor(CompetitorEntry {
            system_name: "Sol".into(),
            own_influence_pct: 60.0,
            rival_name: "Other Faction".into(),
            rival_influence_pct: 45.0,
        });
        assert_eq!(entry.body(), "60.00% vs Other Faction at 45.00%");
    }

    #[test]
    fn test_tick_and_maintenance_pages() {
        let builder = ReportBuilder::default();
        let page = builder.tick_page("2025-01-02T00:00:00Z");
        assert!(page.render_text().contains("2025-01-02T00:00:00Z"));
        assert_eq!(builder.maintenance_page(true).title.as_deref(), Some("Maintenance Mode Active"));
        assert_eq!(builder.maintenance_page(false).title.as_deref(), Some("Maintenance Completed"));
    }
}
