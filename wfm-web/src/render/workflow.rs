//! Workflow progress depiction
//!
//! Draws the level-2 module box grid (one box per sub-workflow class, seven
//! per row) and the level-3 task box grid (four per row) from a workflow
//! definition and the status database's instance/task records.

use chrono::DateTime;
use std::collections::HashMap;

use crate::db::row::{field, DataRow};
use crate::render::content::url_encode;
use crate::render::page::{substitute, PageRenderer};
use crate::workflow::{load_workflow_xml, WorkflowDefinition};

const MAX_BOX: usize = 7;
const MAX_BOX_TASK: usize = 4;

/// Module classes launched through their own UI
const UI_CLASSES: [&str; 4] = ["TransMod", "LigMod", "SeqMod", "AnnMod"];

/// Renders workflow progress boxes for one workflow class
pub struct WorkflowDepictor {
    definition: WorkflowDefinition,
    class_title: String,
}

impl WorkflowDepictor {
    /// Load the workflow definition bound to a class id
    pub async fn load(renderer: &PageRenderer, class_id: &str) -> Option<Self> {
        let class_info = renderer
            .status_db()
            .get_wf_class(class_id)
            .await
            .ok()
            .flatten()?;
        let definition = load_workflow_xml(
            &renderer.site().workflow_xml_path,
            field(&class_info, "class_file"),
        )
        .ok()?;
        Some(Self {
            definition,
            class_title: field(&class_info, "title").to_string(),
        })
    }

    /// Populate the level-2 workflow view: metadata row, module box grids,
    /// and the executed-instance grid
    pub async fn level2_setting(&self, renderer: &mut PageRenderer) {
        let mut meta: DataRow = self.definition.meta.clone().into_iter().collect();
        if let Some(entry) = self.definition.tasks.first() {
            meta.insert("wf_entry_id".to_string(), entry.task_id.clone());
            meta.insert("wf_entry_name".to_string(), entry.name.clone());
        }
        if let Some(exit) = self.definition.tasks.last() {
            meta.insert("wf_exit_id".to_string(), exit.task_id.clone());
            meta.insert("wf_exit_name".to_string(), exit.name.clone());
        }
        renderer.set_row("workflow_tmplt", meta);

        self.depict_module_boxes(renderer).await;
        self.depict_run_instances(renderer).await;
    }

    /// Level-3 page data: metadata, current instance state, task boxes
    pub async fn level3_setting(&self, renderer: &mut PageRenderer) -> DataRow {
        let mut data: DataRow = self.definition.meta.clone().into_iter().collect();
        data.insert("title".to_string(), self.class_title.clone());

        let dep_id = renderer.request().get("identifier").to_string();
        let class_id = renderer.request().get("classID").to_string();
        if let Ok(Some(instance)) = renderer
            .status_db()
            .get_last_wf_instance(&dep_id, &class_id)
            .await
        {
            if !field(&instance, "inst_status").is_empty() {
                data.insert(
                    "inst_status".to_string(),
                    field(&instance, "inst_status").to_string(),
                );
            }
            if !field(&instance, "status_timestamp").is_empty() {
                data.insert(
                    "status_timestamp".to_string(),
                    format_timestamp(field(&instance, "status_timestamp")),
                );
            }
        }

        data.insert("task_info".to_string(), self.depict_task_boxes(renderer).await);
        data
    }

    async fn depict_module_boxes(&self, renderer: &mut PageRenderer) {
        let workflow_module_tmplt = renderer.page_template("workflow_module_tmplt");
        let notdone_module_tmplt = renderer.page_template("notdone_module_tmplt");
        let single_module_tmplt = renderer.page_template("single_module_tmplt");
        let single_module_ui_tmplt = renderer.page_template("single_module_UI_tmplt");
        let interface_tmplt = renderer.page_template("interface_tmplt");
        let dep_id = renderer.request().get("identifier").to_string();
        let group_id = renderer.request().get("group_id").to_string();

        let mut work_module = "<tr>\n".to_string();
        let mut single_module = "<tr>\n".to_string();
        let mut count = 0;
        let inner: &[crate::workflow::WorkflowTask] = if self.definition.tasks.len() > 2 {
            &self.definition.tasks[1..self.definition.tasks.len() - 1]
        } else {
            &[]
        };
        for task in inner {
            if task.class_id.is_empty() {
                continue;
            }
            if count == MAX_BOX {
                count = 0;
                work_module.push_str("</tr>\n<tr>\n");
                single_module.push_str("</tr>\n<tr>\n");
            }

            let mut params = request_params(renderer);
            params.insert("classID".to_string(), task.class_id.clone());
            params.insert("taskID".to_string(), task.task_id.clone());
            params.insert("name".to_string(), task.name.clone());
            params.insert("inst_status".to_string(), "notdone".to_string());
            params.insert("instance".to_string(), String::new());

            if let Ok(Some(instance)) = renderer
                .status_db()
                .get_last_wf_instance(&dep_id, &task.class_id)
                .await
            {
                if !field(&instance, "inst_status").is_empty() {
                    params.insert(
                        "inst_status".to_string(),
                        field(&instance, "inst_status").to_string(),
                    );
                }
                params.insert(
                    "instance".to_string(),
                    field(&instance, "wf_inst_id").to_string(),
                );
            }

            let run_with_ui = if UI_CLASSES.contains(&task.class_id.as_str())
                || (task.class_id == "ValMod" && group_id.starts_with("G_"))
            {
                substitute(&single_module_ui_tmplt, &params)
            } else {
                String::new()
            };
            params.insert("run_with_ui".to_string(), run_with_ui);

            params.insert("open_interface".to_string(), String::new());
            if params["inst_status"] == "notdone" {
                work_module.push_str(&substitute(&notdone_module_tmplt, &params));
            } else {
                if params["inst_status"] == "waiting" {
                    params.insert(
                        "base_url".to_string(),
                        renderer.site().module_url(&task.class_id).to_string(),
                    );
                    params.insert("style".to_string(), String::new());
                    let interface = substitute(&interface_tmplt, &params);
                    params.insert("open_interface".to_string(), format!("{}<br/>", interface));
                }
                work_module.push_str(&substitute(&workflow_module_tmplt, &params));
            }
            single_module.push_str(&substitute(&single_module_tmplt, &params));
            count += 1;
        }
        work_module.push_str("</tr>\n");
        single_module.push_str("</tr>\n");

        renderer.set_text("sub_workflow_module", work_module);
        renderer.set_text("single_workflow_module", single_module);
    }

    async fn depict_run_instances(&self, renderer: &mut PageRenderer) {
        let dep_id = renderer.request().get("identifier").to_string();
        let instances = renderer
            .status_db()
            .get_all_wf_instances(&dep_id)
            .await
            .unwrap_or_default();
        if instances.is_empty() {
            return;
        }
        let run_module_tmplt = renderer.page_template("run_module_tmplt");

        let mut contents = "<tr>\n".to_string();
        let mut count = 0;
        let mut has_value = false;
        for instance in &instances {
            if field(instance, "inst_status") == "aborted" {
                continue;
            }
            has_value = true;
            if count == MAX_BOX {
                count = 0;
                contents.push_str("</tr>\n<tr>\n");
            }
            let mut params = request_params(renderer);
            params.insert(
                "inst_status".to_string(),
                field(instance, "inst_status").to_string(),
            );
            params.insert(
                "instance".to_string(),
                field(instance, "wf_inst_id").to_string(),
            );
            params.insert(
                "classID".to_string(),
                field(instance, "wf_class_id").to_string(),
            );
            params.insert(
                "status_timestamp".to_string(),
                format_timestamp(field(instance, "status_timestamp")),
            );
            contents.push_str(&substitute(&run_module_tmplt, &params));
            count += 1;
        }
        if !has_value {
            return;
        }
        contents.push_str("</tr>\n");
        renderer.set_text("run_workflow_module", contents);
    }

    async fn depict_task_boxes(&self, renderer: &mut PageRenderer) -> String {
        let dep_id = renderer.request().get("identifier").to_string();
        let instance_id = renderer.request().get("instance").to_string();
        let class_id = renderer.request().get("classID").to_string();
        let tasks = renderer
            .status_db()
            .get_wf_tasks(&dep_id, &instance_id, &class_id)
            .await
            .unwrap_or_default();
        if tasks.is_empty() {
            return String::new();
        }
        let task_tmplt = renderer.page_template("task_tmplt");
        let interface_tmplt = renderer.page_template("interface_tmplt");

        let mut contents = "<tr>\n".to_string();
        let mut count = 0;
        for task_row in &tasks {
            if count == MAX_BOX_TASK {
                count = 0;
                contents.push_str("</tr>\n<tr>\n");
            }
            let mut params = request_params(renderer);
            params.insert(
                "wf_task_id".to_string(),
                field(task_row, "wf_task_id").to_string(),
            );
            params.insert(
                "task_status".to_string(),
                field(task_row, "task_status").to_string(),
            );
            params.insert(
                "task_type".to_string(),
                field(task_row, "task_type").to_string(),
            );
            params.insert(
                "status_timestamp".to_string(),
                format_timestamp(field(task_row, "status_timestamp")),
            );
            for item in ["name", "description", "reference"] {
                params.insert(item.to_string(), String::new());
            }
            if let Some(task) = self.definition.task(field(task_row, "wf_task_id")) {
                params.insert("name".to_string(), task.name.clone());
                params.insert("description".to_string(), task.description.clone());
                params.insert("reference".to_string(), task.reference.clone());
            }
            if params["task_status"] == "waiting" {
                params.insert(
                    "base_url".to_string(),
                    renderer.site().module_url(&class_id).to_string(),
                );
                params.insert(
                    "style".to_string(),
                    "style =\"color:black;display:block;\"".to_string(),
                );
                let interface = substitute(&interface_tmplt, &params);
                params.insert("open_interface".to_string(), interface);
            } else {
                params.insert("open_interface".to_string(), String::new());
            }
            contents.push_str(&substitute(&task_tmplt, &params));
            count += 1;
        }
        contents.push_str("</tr>\n");
        contents
    }
}

/// Common request-derived template parameters for workflow boxes
fn request_params(renderer: &PageRenderer) -> HashMap<String, String> {
    let request = renderer.request();
    let mut params = HashMap::new();
    for item in [
        "identifier",
        "sessionid",
        "annotator",
        "method",
        "urlmethod",
        "instance",
        "classID",
    ] {
        params.insert(item.to_string(), request.get(item).to_string());
    }
    if !params["method"].is_empty() && params["urlmethod"].is_empty() {
        let encoded = url_encode(&params["method"]);
        params.insert("urlmethod".to_string(), encoded);
    }
    params
}

/// Render an epoch-seconds timestamp string as local date/time text
pub(crate) fn format_timestamp(value: &str) -> String {
    let Ok(epoch) = value.parse::<i64>() else {
        return value.to_string();
    };
    match DateTime::from_timestamp(epoch, 0) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp("0"), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp("not-a-number"), "not-a-number");
        assert_eq!(format_timestamp(""), "");
    }
}
