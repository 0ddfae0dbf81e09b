//! Workflow definition XML loading
//!
//! A workflow class is described by a task-graph XML file: version metadata,
//! an entry point, an ordered task list, and an exit point. Tasks carry
//! routing attributes and one child element naming their kind (process,
//! decision, manual, or a nested sub-workflow reference). The rendering
//! layer consumes the graph read-only to draw workflow progress boxes.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use wfm_common::{Error, Result};

/// One node of the workflow task graph
#[derive(Debug, Clone, Default)]
pub struct WorkflowTask {
    pub task_id: String,
    pub name: String,
    pub next_task: String,
    pub breakpoint: String,
    pub reference: String,
    pub exception_id: String,
    /// `Entry-point`, `Exit-point`, `process`, `decision`, `manual`, `workflow`
    pub task_type: String,
    pub description: String,
    /// Sub-workflow definition file (task_type `workflow` only)
    pub file: String,
    /// Sub-workflow class id (task_type `workflow` only)
    pub class_id: String,
}

/// A loaded workflow definition
#[derive(Debug, Clone, Default)]
pub struct WorkflowDefinition {
    /// version element attributes: author, major, date, id, name
    pub meta: HashMap<String, String>,
    /// Entry point, tasks in document order, exit point
    pub tasks: Vec<WorkflowTask>,
}

impl WorkflowDefinition {
    pub fn task(&self, task_id: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

/// Load a workflow definition file from the workflow XML directory
pub fn load_workflow_xml(dir: &Path, file: &str) -> Result<WorkflowDefinition> {
    if file.is_empty() {
        return Err(Error::NotFound("No workflow definition file".to_string()));
    }
    let path = dir.join(file);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| Error::NotFound(format!("Workflow XML {}: {}", path.display(), e)))?;
    parse_workflow_xml(&text)
}

/// Parse a workflow definition document
pub fn parse_workflow_xml(text: &str) -> Result<WorkflowDefinition> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut definition = WorkflowDefinition::default();
    let mut entry: Option<WorkflowTask> = None;
    let mut tasks: Vec<WorkflowTask> = Vec::new();
    let mut exit: Option<WorkflowTask> = None;
    let mut current: Option<WorkflowTask> = None;
    let mut in_description = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"wf:version" => read_version(&e, &mut definition),
                b"wf:entryPoint" => {
                    let mut task = task_from_attributes(&e);
                    task.task_type = "Entry-point".to_string();
                    current = Some(task);
                }
                b"wf:exitPoint" => {
                    let mut task = task_from_attributes(&e);
                    task.task_type = "Exit-point".to_string();
                    current = Some(task);
                }
                b"wf:task" => current = Some(task_from_attributes(&e)),
                b"wf:description" => in_description = true,
                other => read_task_child(other, &e, &mut current),
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"wf:version" => read_version(&e, &mut definition),
                b"wf:entryPoint" => {
                    let mut task = task_from_attributes(&e);
                    task.task_type = "Entry-point".to_string();
                    entry = Some(task);
                }
                b"wf:exitPoint" => {
                    let mut task = task_from_attributes(&e);
                    task.task_type = "Exit-point".to_string();
                    exit = Some(task);
                }
                b"wf:task" => tasks.push(task_from_attributes(&e)),
                other => read_task_child(other, &e, &mut current),
            },
            Ok(Event::Text(t)) => {
                if in_description {
                    if let Some(task) = current.as_mut() {
                        task.description =
                            t.xml_content().map(|s| s.into_owned()).unwrap_or_default();
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"wf:description" => in_description = false,
                b"wf:entryPoint" => entry = current.take(),
                b"wf:exitPoint" => exit = current.take(),
                b"wf:task" => {
                    if let Some(task) = current.take() {
                        tasks.push(task);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::Parse(format!("Workflow XML: {}", e))),
        }
    }

    let Some(entry) = entry else {
        return Err(Error::Parse("Workflow XML: missing entry point".to_string()));
    };
    let Some(exit) = exit else {
        return Err(Error::Parse("Workflow XML: missing exit point".to_string()));
    };
    definition.tasks.push(entry);
    definition.tasks.extend(tasks);
    definition.tasks.push(exit);
    Ok(definition)
}

fn read_version(element: &BytesStart<'_>, definition: &mut WorkflowDefinition) {
    for item in ["author", "major", "date", "id", "name"] {
        definition
            .meta
            .insert(item.to_string(), attribute(element, item));
    }
}

fn read_task_child(name: &[u8], element: &BytesStart<'_>, current: &mut Option<WorkflowTask>) {
    let Some(task) = current.as_mut() else {
        return;
    };
    match name {
        b"wf:workflow" => {
            task.task_type = "workflow".to_string();
            task.file = attribute(element, "file");
            task.class_id = attribute(element, "classID");
        }
        b"wf:process" => task.task_type = "process".to_string(),
        b"wf:decision" => task.task_type = "decision".to_string(),
        b"wf:manual" => task.task_type = "manual".to_string(),
        _ => {}
    }
}

fn task_from_attributes(element: &BytesStart<'_>) -> WorkflowTask {
    WorkflowTask {
        task_id: attribute(element, "taskID"),
        name: attribute(element, "name"),
        next_task: attribute(element, "nextTask"),
        breakpoint: attribute(element, "breakpoint"),
        reference: attribute(element, "reference"),
        exception_id: attribute(element, "exceptionID"),
        ..WorkflowTask::default()
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> String {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW_XML: &str = r#"<?xml version="1.0"?>
<wf:workflow xmlns:wf="http://example.org/wf">
  <wf:version author="annotation" major="4" date="2016-03-01" id="Annotate" name="Annotation pipeline"/>
  <wf:entryPoint taskID="T_0" name="start" nextTask="T_1"/>
  <wf:task taskID="T_1" name="upload" nextTask="T_2">
    <wf:description>Accept the uploaded model</wf:description>
    <wf:process/>
  </wf:task>
  <wf:task taskID="T_2" name="annotate" nextTask="T_3" reference="annotation">
    <wf:workflow file="AnnMod.xml" classID="AnnMod"/>
  </wf:task>
  <wf:task taskID="T_3" name="review" nextTask="T_9">
    <wf:manual/>
  </wf:task>
  <wf:exitPoint taskID="T_9" name="end"/>
</wf:workflow>
"#;

    #[test]
    fn parse_full_graph() {
        let definition = parse_workflow_xml(WORKFLOW_XML).unwrap();
        assert_eq!(definition.meta.get("id").unwrap(), "Annotate");
        assert_eq!(definition.tasks.len(), 5);
        assert_eq!(definition.tasks[0].task_type, "Entry-point");
        assert_eq!(definition.tasks[0].task_id, "T_0");
        assert_eq!(definition.tasks[1].task_type, "process");
        assert_eq!(definition.tasks[1].description, "Accept the uploaded model");
        assert_eq!(definition.tasks[2].task_type, "workflow");
        assert_eq!(definition.tasks[2].class_id, "AnnMod");
        assert_eq!(definition.tasks[3].task_type, "manual");
        assert_eq!(definition.tasks[4].task_type, "Exit-point");
    }

    #[test]
    fn task_lookup_by_id() {
        let definition = parse_workflow_xml(WORKFLOW_XML).unwrap();
        assert_eq!(definition.task("T_2").unwrap().name, "annotate");
        assert!(definition.task("T_99").is_none());
    }

    #[test]
    fn missing_entry_point_is_fatal() {
        let broken = WORKFLOW_XML.replace("<wf:entryPoint taskID=\"T_0\" name=\"start\" nextTask=\"T_1\"/>", "");
        assert!(parse_workflow_xml(&broken).is_err());
    }
}
