//! Entry summary, replacement history, file report, and level page data
//!
//! Assembles the data rows the corresponding page templates bind against.
//! Every function degrades to whatever data is available; an entry with no
//! audit history still renders its summary block.

use chrono::NaiveDate;

use crate::db::row::{field, DataRow};
use crate::render::content::url_encode;
use crate::render::page::{process_public_ids, PageRenderer};
use crate::render::workflow::{format_timestamp, WorkflowDepictor};

/// Deposition record for the request's entry, with normalized public ids
pub async fn entry_data(renderer: &mut PageRenderer) -> DataRow {
    let dep_id = renderer.request().get("identifier").to_string();
    let Ok(Some(mut row)) = renderer.status_db().get_dep_info(&dep_id).await else {
        return DataRow::new();
    };
    let ext_map = renderer.pdb_ext_id_map(std::slice::from_ref(&row)).await;
    process_public_ids(&mut row, &ext_map);
    row
}

/// Populate the entry summary page: deposition info, contact authors,
/// audit history, and the timestamp log
pub async fn summary_page(renderer: &mut PageRenderer) {
    let entry = entry_data(renderer).await;
    renderer.set_row("summary_tmplt", entry);

    let dep_id = renderer.request().get("identifier").to_string();

    let contacts = renderer
        .content_db()
        .contact_authors(&dep_id)
        .await
        .unwrap_or_default();
    if !contacts.is_empty() {
        renderer.set_rows("contact_table_row_tmplt", contacts);
    }

    let history = renderer
        .content_db()
        .audit_history(&dep_id)
        .await
        .unwrap_or_default();
    if !history.is_empty() {
        let rows: Vec<DataRow> = history.iter().map(audit_history_row).collect();
        renderer.set_rows("audit_history_table_row_tmplt", rows);
    }

    let timestamps = renderer
        .status_db()
        .get_timestamp_info(&dep_id)
        .await
        .unwrap_or_default();
    if !timestamps.is_empty() {
        let rows: Vec<DataRow> = timestamps
            .into_iter()
            .map(|mut row| {
                let mtime = field(&row, "mtime").to_string();
                if !mtime.is_empty() {
                    row.insert("mtime".to_string(), format_timestamp(&mtime));
                }
                row
            })
            .collect();
        renderer.set_rows("timestamp_table_row_tmplt", rows);
    }
}

/// Populate the author-initiated replacement history page
pub async fn replacement_page(renderer: &mut PageRenderer) {
    let counts = renderer
        .content_db()
        .replace_counts()
        .await
        .unwrap_or_default();
    if counts.is_empty() {
        return;
    }
    let rows: Vec<DataRow> = counts
        .iter()
        .map(|source| {
            let mut row = DataRow::new();
            row.insert(
                "ORCID".to_string(),
                field(source, "identifier_orcid").to_string(),
            );
            row.insert(
                "numreplace".to_string(),
                field(source, "numreplace").to_string(),
            );
            row.insert("name".to_string(), field(source, "name").to_string());
            row
        })
        .collect();
    renderer.set_rows("replace_count_table_row_tmplt", rows);
}

/// Populate the all-files report: archive, deposit, and instance listings
pub async fn all_file_page(renderer: &mut PageRenderer) {
    let mut entry = entry_data(renderer).await;
    let dep_id = renderer.request().get("identifier").to_string();
    let archive = renderer.site().archive_path.join(&dep_id);
    let deposit = renderer.site().deposit_path.join(&dep_id);

    entry.insert("archive".to_string(), render_file_list(&archive, false));
    entry.insert("deposit".to_string(), render_file_list(&deposit, false));
    entry.insert(
        "wf_instance".to_string(),
        render_file_list(&archive.join("wf-instance"), true),
    );
    renderer.set_row("allfile_tmplt", entry);
}

/// Populate a level-2/level-3 entry page: last instance record, method
/// request values, and (level 3) the workflow task detail
pub async fn level_page_setting(renderer: &mut PageRenderer, page_tmplt: &str) {
    let mut entry = entry_data(renderer).await;
    let dep_id = renderer.request().get("identifier").to_string();

    let last_instance = match renderer.status_db().get_last_instance(&dep_id).await {
        Ok(Some(mut row)) => {
            let ext_map = renderer.pdb_ext_id_map(std::slice::from_ref(&row)).await;
            process_public_ids(&mut row, &ext_map);
            row
        }
        _ => DataRow::new(),
    };

    let method = field(&last_instance, "dep_exp_method").to_string();
    if !method.is_empty() {
        renderer.request_mut().set("method", method.clone());
        renderer.request_mut().set("urlmethod", url_encode(&method));
    }

    if page_tmplt == "level3_tmplt" {
        let class_id = renderer.request().get("classID").to_string();
        if let Some(depictor) = WorkflowDepictor::load(renderer, &class_id).await {
            let workflow_data = depictor.level3_setting(renderer).await;
            for (key, value) in workflow_data {
                entry.insert(key, value);
            }
        }
    }

    renderer.set_row(page_tmplt, entry);
    renderer.set_row("entry_tmplt", last_instance);
}

/// Render the level-2 workflow fragment for the entry's Annotate class
pub async fn level2_workflow(renderer: &mut PageRenderer) -> String {
    let dep_id = renderer.request().get("identifier").to_string();
    renderer.request_mut().set("classID", "Annotate");
    if let Ok(Some(instance)) = renderer.status_db().get_last_instance(&dep_id).await {
        for (request_key, item) in [("instance", "wf_inst_id"), ("classID", "wf_class_id")] {
            let value = field(&instance, item).to_string();
            if !value.is_empty() {
                renderer.request_mut().set(request_key, value);
            }
        }
    }
    let class_id = renderer.request().get("classID").to_string();
    let Some(depictor) = WorkflowDepictor::load(renderer, &class_id).await else {
        return String::new();
    };
    depictor.level2_setting(renderer).await;
    renderer.render_page("workflow_tmplt", None).await
}

fn audit_history_row(source: &DataRow) -> DataRow {
    let mut row = DataRow::new();
    for item in ["public_version", "date", "file_version", "description"] {
        row.insert(item.to_string(), String::new());
    }
    if source.contains_key("major_revision") && source.contains_key("minor_revision") {
        row.insert(
            "public_version".to_string(),
            format!(
                "{}.{}",
                field(source, "major_revision"),
                field(source, "minor_revision")
            ),
        );
    }
    let date = field(source, "revision_date");
    if !date.is_empty() {
        let formatted = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(|d| d.format("%b. %d, %Y").to_string())
            .unwrap_or_else(|_| date.to_string());
        row.insert("date".to_string(), formatted);
    }
    if !field(source, "internal_version").is_empty() {
        row.insert(
            "file_version".to_string(),
            format!("V{}", field(source, "internal_version")),
        );
    }
    if !field(source, "description").is_empty() {
        row.insert(
            "description".to_string(),
            field(source, "description").to_string(),
        );
    }
    row
}

/// Sorted `<li>` listing of a directory's files, optionally recursing one
/// level into instance subdirectories
fn render_file_list(dir: &std::path::Path, recurse: bool) -> String {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return String::new();
    };
    let mut names: Vec<String> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() {
            if recurse {
                let nested = render_file_list(&entry.path(), false);
                if !nested.is_empty() {
                    names.push(format!("<li>{}</li>\n<ul>\n{}\n</ul>", name, nested));
                }
            }
            continue;
        }
        names.push(format!("<li>{}</li>", name));
    }
    names.sort();
    names.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_row_formatting() {
        let mut source = DataRow::new();
        source.insert("major_revision".to_string(), "2".to_string());
        source.insert("minor_revision".to_string(), "1".to_string());
        source.insert("revision_date".to_string(), "2024-03-15".to_string());
        source.insert("internal_version".to_string(), "7".to_string());
        let row = audit_history_row(&source);
        assert_eq!(field(&row, "public_version"), "2.1");
        assert_eq!(field(&row, "date"), "Mar. 15, 2024");
        assert_eq!(field(&row, "file_version"), "V7");
        assert_eq!(field(&row, "description"), "");
    }
}
