//! Annotator throughput statistics
//!
//! Builds the weekly/monthly/in-process summary tables served on the
//! statistics tabs. Each report returns (column definitions, data rows) in
//! the shape the table renderer expects from a binding function.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use wfm_common::Result;

use crate::db::content::ContentDb;
use crate::db::row::{field, DataRow};
use crate::db::status::StatusDb;

const WEEK_DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Column/row table pair produced by a binding function
pub type BoundTable = (Vec<DataRow>, Vec<DataRow>);

/// Statistics report builder, registered as a render-engine helper
pub struct StatsReporter {
    content_db: ContentDb,
    today: NaiveDate,
    annotators: Vec<String>,
}

impl StatsReporter {
    pub async fn new(status_db: &StatusDb, content_db: ContentDb) -> Result<Self> {
        let annotators = status_db
            .get_active_annotators()
            .await?
            .iter()
            .map(|row| field(row, "initials").to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self {
            content_db,
            today: Utc::now().date_naive(),
            annotators,
        })
    }

    /// Entries processed per annotator per day over the last week
    pub async fn weekly_status(&self) -> Result<BoundTable> {
        let mut table = StatsTable::new(&self.annotators);
        let mut day = self.today - Duration::days(6);
        for _ in 0..7 {
            let initials = self.content_db.daily_stats_list(&day.to_string()).await?;
            let label = format!("{} ({})", WEEK_DAYS[day.weekday() as usize], short_date(day));
            table.add_count_column(&label, &initials);
            day = day + Duration::days(1);
        }
        table.add_total_column();
        table.add_average_column(5.0);
        Ok(table.finish())
    }

    /// Entries processed per annotator per week over the last month
    pub async fn monthly_stats(&self) -> Result<BoundTable> {
        let mut week_start = self.today;
        let weekday = week_start.weekday() as i64;
        if weekday > 0 {
            week_start = week_start - Duration::days(weekday);
        }

        let mut ranges = Vec::new();
        for i in 0..3 {
            let start = week_start - Duration::days(21 - i * 7);
            ranges.push((start, start + Duration::days(6)));
        }
        ranges.push((week_start, self.today));

        let mut table = StatsTable::new(&self.annotators);
        for (start, end) in ranges {
            let initials = self
                .content_db
                .range_stats_list(&start.to_string(), &end.to_string())
                .await?;
            let label = format!(
                "{}({}) - {}({})",
                WEEK_DAYS[start.weekday() as usize],
                short_date(start),
                WEEK_DAYS[end.weekday() as usize],
                short_date(end)
            );
            table.add_count_column(&label, &initials);
        }
        table.add_total_column();
        table.add_average_column(4.0);
        Ok(table.finish())
    }

    /// Current entry counts per annotator per in-process status code
    pub async fn process_stats(&self) -> Result<BoundTable> {
        let rows = self.content_db.in_process_stats_list().await?;
        let mut by_status: HashMap<String, Vec<String>> = HashMap::new();
        for row in &rows {
            by_status
                .entry(field(row, "status_code").to_string())
                .or_default()
                .push(field(row, "rcsb_annotator").to_string());
        }

        let mut table = StatsTable::new(&self.annotators);
        for status in ["WAIT", "PROC", "AUTH", "POLC", "REPL"] {
            let initials = by_status.get(status).cloned().unwrap_or_default();
            table.add_count_column(status, &initials);
        }
        table.add_total_column();
        Ok(table.finish())
    }
}

fn short_date(date: NaiveDate) -> String {
    format!("{:02}/{:02}", date.month(), date.day())
}

/// Accumulator for per-annotator count tables with Total/Average columns
struct StatsTable {
    annotators: Vec<String>,
    columns: Vec<DataRow>,
    data: Vec<(String, DataRow)>,
    totals: HashMap<String, u64>,
    index: usize,
}

impl StatsTable {
    fn new(annotators: &[String]) -> Self {
        let mut columns = Vec::new();
        columns.push(column_def("0", "Annotator"));
        let mut data = Vec::new();
        for initials in annotators {
            let mut row = DataRow::new();
            row.insert("0".to_string(), initials.clone());
            data.push((initials.clone(), row));
        }
        let mut total_row = DataRow::new();
        total_row.insert("0".to_string(), "total".to_string());
        data.push(("total".to_string(), total_row));
        Self {
            annotators: annotators.to_vec(),
            columns,
            data,
            totals: HashMap::new(),
            index: 1,
        }
    }

    fn add_count_column(&mut self, label: &str, initials: &[String]) {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for a in &self.annotators {
            counts.insert(a, 0);
        }
        let mut total = 0;
        for i in initials {
            if let Some(count) = counts.get_mut(i.as_str()) {
                *count += 1;
                total += 1;
            }
        }

        let field_name = self.index.to_string();
        for (key, row) in &mut self.data {
            let value = if key == "total" {
                total
            } else {
                *counts.get(key.as_str()).unwrap_or(&0)
            };
            row.insert(field_name.clone(), value.to_string());
            *self.totals.entry(key.clone()).or_insert(0) += value;
        }
        self.columns.push(column_def(&field_name, label));
        self.index += 1;
    }

    fn add_total_column(&mut self) {
        let field_name = self.index.to_string();
        for (key, row) in &mut self.data {
            let total = self.totals.get(key).copied().unwrap_or(0);
            row.insert(field_name.clone(), total.to_string());
        }
        self.columns.push(column_def(&field_name, "Total"));
        self.index += 1;
    }

    fn add_average_column(&mut self, denominator: f64) {
        let field_name = self.index.to_string();
        for (key, row) in &mut self.data {
            let total = self.totals.get(key).copied().unwrap_or(0);
            row.insert(
                field_name.clone(),
                format!("{:.2}", total as f64 / denominator),
            );
        }
        self.columns.push(column_def(&field_name, "Average"));
        self.index += 1;
    }

    fn finish(self) -> BoundTable {
        (self.columns, self.data.into_iter().map(|(_, row)| row).collect())
    }
}

fn column_def(field_name: &str, label: &str) -> DataRow {
    let mut def = DataRow::new();
    def.insert("data-field".to_string(), field_name.to_string());
    def.insert("label".to_string(), label.to_string());
    def
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_table_shape() {
        let annotators = vec!["AB".to_string(), "CD".to_string()];
        let mut table = StatsTable::new(&annotators);
        table.add_count_column(
            "Mon (01/05)",
            &["AB".to_string(), "AB".to_string(), "ZZ".to_string()],
        );
        table.add_total_column();
        table.add_average_column(5.0);
        let (columns, rows) = table.finish();

        assert_eq!(columns.len(), 4);
        assert_eq!(columns[1].get("label").unwrap(), "Mon (01/05)");
        // AB row: two counted entries; ZZ is not an active annotator
        assert_eq!(rows[0].get("0").unwrap(), "AB");
        assert_eq!(rows[0].get("1").unwrap(), "2");
        assert_eq!(rows[0].get("2").unwrap(), "2");
        assert_eq!(rows[0].get("3").unwrap(), "0.40");
        // total row counts only active annotators
        assert_eq!(rows[2].get("0").unwrap(), "total");
        assert_eq!(rows[2].get("1").unwrap(), "2");
    }
}
