//! Text summary builder for CLI output.
//!
//! Formats stage outcomes and report pages as human-readable lines.

use crate::model::{ExportFormat, ExportedFile, GeneratedFile, IngestSummary, StudentPage};
use crate::orchestrator::Stage;
use crate::query::QuerySpec;
use crate::stopwatch::TimerState;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn generated(file: &GeneratedFile, elapsed: &TimerState) -> TextSummary {
    TextSummary {
        lines: vec![
            format!("Excel file generated in {}!", elapsed.display_text),
            format!("File: {}", file.file_path),
        ],
    }
}

pub(crate) fn converted(file: &GeneratedFile, elapsed: &TimerState) -> TextSummary {
    TextSummary {
        lines: vec![
            format!("CSV file created in {}!", elapsed.display_text),
            format!("File: {}", file.file_path),
        ],
    }
}

pub(crate) fn ingested(summary: &IngestSummary, elapsed: &TimerState) -> TextSummary {
    TextSummary {
        lines: vec![format!(
            "Inserted {} records in {}!",
            group_thousands(summary.inserted_count),
            elapsed.display_text
        )],
    }
}

pub(crate) fn exporting(format: ExportFormat) -> String {
    format!("Exporting to {}...", format.as_path_segment().to_uppercase())
}

pub(crate) fn exported(file: &ExportedFile, elapsed: &TimerState) -> TextSummary {
    TextSummary {
        lines: vec![
            format!("Exported in {}!", elapsed.display_text),
            format!("Saved: {} ({} bytes)", file.path.display(), file.bytes_written),
        ],
    }
}

/// A failed request, with how long it ran when it got that far.
pub(crate) fn failed(stage: Stage, message: &str, elapsed: Option<&TimerState>) -> String {
    match elapsed {
        Some(t) => format!("{stage}: {message} (after {})", t.display_text),
        None => format!("{stage}: {message}"),
    }
}

const HEADERS: [&str; 6] = ["ID", "First Name", "Last Name", "DOB", "Class", "Score"];

/// Aligned student table followed by the paging footer.
pub(crate) fn report(page: &StudentPage, spec: &QuerySpec) -> TextSummary {
    let rows: Vec<[String; 6]> = page
        .records
        .iter()
        .map(|s| {
            [
                s.student_id.to_string(),
                s.first_name.clone(),
                s.last_name.clone(),
                s.dob.clone(),
                s.student_class.clone(),
                format!("{:.2}", s.score),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 3);
    if rows.is_empty() {
        lines.push("No students found".to_string());
    } else {
        lines.push(table_line(HEADERS.iter().copied(), &widths));
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        for row in &rows {
            lines.push(table_line(row.iter().map(String::as_str), &widths));
        }
    }
    lines.push(format!(
        "Showing page {} ({} per page) of {} records",
        spec.page_index,
        spec.page_size,
        group_thousands(page.total_count)
    ));
    TextSummary { lines }
}

fn table_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:<w$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

/// `1234567` -> `1,234,567`
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Student;
    use std::num::NonZeroU32;

    fn timer(text: &str) -> TimerState {
        TimerState {
            running: false,
            elapsed_ms: 0.0,
            display_text: text.to_string(),
        }
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn stage_success_lines() {
        let file = GeneratedFile {
            file_path: "/data/students.xlsx".into(),
        };
        assert_eq!(
            generated(&file, &timer("1.234s")).lines[0],
            "Excel file generated in 1.234s!"
        );
        assert_eq!(
            converted(&file, &timer("52ms")).lines[0],
            "CSV file created in 52ms!"
        );
        let summary = IngestSummary {
            inserted_count: 1000,
        };
        assert_eq!(
            ingested(&summary, &timer("3.100s")).lines,
            vec!["Inserted 1,000 records in 3.100s!".to_string()]
        );
        assert_eq!(exporting(ExportFormat::Pdf), "Exporting to PDF...");
    }

    #[test]
    fn failure_line_mentions_stage_and_elapsed() {
        assert_eq!(
            failed(Stage::Convert, "Invalid Excel file", Some(&timer("80ms"))),
            "process: Invalid Excel file (after 80ms)"
        );
        assert_eq!(
            failed(Stage::Ingest, "Please select a CSV file first", None),
            "upload: Please select a CSV file first"
        );
    }

    #[test]
    fn report_table_is_aligned() {
        let page = StudentPage {
            records: vec![
                Student {
                    student_id: 7,
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    dob: "2002-05-01".into(),
                    student_class: "Class1".into(),
                    score: 88.5,
                },
                Student {
                    student_id: 1042,
                    first_name: "Al".into(),
                    last_name: "Turing".into(),
                    dob: "2003-01-15".into(),
                    student_class: "Class4".into(),
                    score: 61.0,
                },
            ],
            total_count: 2500,
            total_pages: 250,
            size: 10,
            number: 3,
        };
        let spec = QuerySpec::new(3, NonZeroU32::new(10).unwrap(), None, None);
        let lines = report(&page, &spec).lines;

        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[0],
            "ID    First Name  Last Name  DOB         Class   Score"
        );
        assert_eq!(
            lines[2],
            "7     Ada         Lovelace   2002-05-01  Class1  88.50"
        );
        assert_eq!(lines[4], "Showing page 3 (10 per page) of 2,500 records");
    }

    #[test]
    fn empty_report_still_shows_footer() {
        let page = StudentPage {
            records: Vec::new(),
            total_count: 0,
            total_pages: 0,
            size: 10,
            number: 0,
        };
        let lines = report(&page, &QuerySpec::default()).lines;
        assert_eq!(
            lines,
            vec![
                "No students found".to_string(),
                "Showing page 0 (10 per page) of 0 records".to_string(),
            ]
        );
    }
}
