//! Rendering engine integration tests
//!
//! Covers the engine's contract properties: idempotent rendering, the
//! total-function guarantee, repeat-page queue exhaustion, and the
//! end-to-end table materialization scenario.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use wfm_common::{RequestValues, SessionStore, SiteConfig};
use wfm_web::db::row::{field, DataRow};
use wfm_web::db::{ContentDb, StatusDb};
use wfm_web::render::content::{RuntimeTable, TABLE_CONTENT_MAP_KEY};
use wfm_web::render::{cif, ConfigSchema, PageRenderer, TableContentBuilder, TableContentMap};

const PAGE_CONFIG: &str = r#"data_render_test
loop_
_page_template.id
_page_template.type
_page_template.page
_page_template.repeat
greeting_tmplt inline 'Hello %(user)s from %(site_name)s' no
row_tmplt inline '<td>%(dep_id)s</td>' yes
outer_tmplt inline '<div>%(inner)s</div>' no
commun_tmplt inline '%(commun_image)s for %(dep_set_id)s' no
commun_image_tmplt inline '<img src="%(image)s" alt="%(alt)s" />' no
loop_
_page_template_alias.id
_page_template_alias.page_id
welcome_tmplt greeting_tmplt
loop_
_page_template_parameter.page_id
_page_template_parameter.variable
_page_template_parameter.type
_page_template_parameter.value
_page_template_parameter.preprocess
greeting_tmplt user sessionInfo username N
greeting_tmplt site_name constant 'Main Archive' N
row_tmplt dep_id dataInfo dep_set_id N
outer_tmplt inner page_template row_tmplt N
loop_
_table_data_field_binding.id
_table_data_field_binding.type
_table_data_field_binding.value
display_ids dataInfo display_ids
abbrv_method dataInfo abbrv_method
communication function communication
"#;

fn schema() -> ConfigSchema {
    let data = cif::parse(PAGE_CONFIG).unwrap();
    ConfigSchema::from_cif(&data).unwrap()
}

fn site_config(session_root: &std::path::Path) -> Arc<SiteConfig> {
    Arc::new(SiteConfig {
        site_id: "RCSB".to_string(),
        listen: String::new(),
        template_path: session_root.to_path_buf(),
        session_path: session_root.to_path_buf(),
        status_db_path: Default::default(),
        content_db_path: Default::default(),
        archive_path: session_root.to_path_buf(),
        deposit_path: session_root.to_path_buf(),
        workflow_xml_path: session_root.to_path_buf(),
        urls: Default::default(),
        tools: Default::default(),
        ftp: Default::default(),
    })
}

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Should open in-memory database")
}

async fn renderer(session_root: &std::path::Path, request: RequestValues) -> PageRenderer {
    PageRenderer::new(
        schema(),
        site_config(session_root),
        request,
        StatusDb::new(memory_pool().await),
        ContentDb::new(memory_pool().await),
    )
}

fn row(pairs: &[(&str, &str)]) -> DataRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Rendering contract properties
// =============================================================================

#[tokio::test]
async fn rendering_is_idempotent_without_queue_consumption() {
    let dir = tempfile::tempdir().unwrap();
    let mut request = RequestValues::new();
    request.set("username", "annotator1");
    let mut page = renderer(dir.path(), request).await;

    let first = page.render_page("greeting_tmplt", None).await;
    let second = page.render_page("greeting_tmplt", None).await;
    assert_eq!(first, "Hello annotator1 from Main Archive");
    assert_eq!(first, second);
}

#[tokio::test]
async fn unknown_page_renders_empty_never_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = renderer(dir.path(), RequestValues::new()).await;
    assert_eq!(page.render_page("no_such_tmplt", None).await, "");
}

#[tokio::test]
async fn alias_resolves_to_canonical_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut request = RequestValues::new();
    request.set("username", "annotator1");
    let mut page = renderer(dir.path(), request).await;
    let text = page.render_page("welcome_tmplt", None).await;
    assert_eq!(text, "Hello annotator1 from Main Archive");
}

#[tokio::test]
async fn repeat_page_consumes_exactly_its_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = renderer(dir.path(), RequestValues::new()).await;
    page.set_rows(
        "row_tmplt",
        vec![
            row(&[("dep_set_id", "D_1")]),
            row(&[("dep_set_id", "D_2")]),
            row(&[("dep_set_id", "D_3")]),
        ],
    );

    let text = page.render_page("row_tmplt", None).await;
    assert_eq!(text, "<td>D_1</td>\n<td>D_2</td>\n<td>D_3</td>");

    // Queue exhausted: a further render is a single pass over the
    // data_for_all fallback
    page.set_row("data_for_all", row(&[("dep_set_id", "D_9")]));
    let fallback = page.render_page("row_tmplt", None).await;
    assert_eq!(fallback, "<td>D_9</td>");
}

#[tokio::test]
async fn exhausted_repeat_page_without_fallback_renders_empty_binding() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = renderer(dir.path(), RequestValues::new()).await;
    let text = page.render_page("row_tmplt", None).await;
    assert_eq!(text, "<td></td>");
}

#[tokio::test]
async fn nested_page_expands_recursively() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = renderer(dir.path(), RequestValues::new()).await;
    page.set_row("row_tmplt", row(&[("dep_set_id", "D_7")]));
    let text = page.render_page("outer_tmplt", None).await;
    assert_eq!(text, "<div><td>D_7</td></div>");
}

#[tokio::test]
async fn extra_params_substitute_before_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let mut request = RequestValues::new();
    request.set("username", "annotator1");
    let mut page = renderer(dir.path(), request).await;
    let mut extra = HashMap::new();
    extra.insert("user".to_string(), "override".to_string());
    let text = page.render_page("greeting_tmplt", Some(extra)).await;
    // The literal pre-substitution wins over the structured binding
    assert_eq!(text, "Hello override from Main Archive");
}

// =============================================================================
// End-to-end table materialization
// =============================================================================

#[tokio::test]
async fn materialize_table_derives_methods_and_icons() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::create(dir.path()).unwrap();

    let status_pool = memory_pool().await;
    sqlx::query(
        "create table test_entries (dep_set_id text, method text, dep_notify text)",
    )
    .execute(&status_pool)
    .await
    .unwrap();
    sqlx::query(
        "insert into test_entries values
         ('D_1', 'X-RAY DIFFRACTION', 'N'),
         ('D_2', 'SOLUTION NMR', '')",
    )
    .execute(&status_pool)
    .await
    .unwrap();
    sqlx::query("create table group_deposition_information (dep_set_id text, group_id text)")
        .execute(&status_pool)
        .await
        .unwrap();

    let mut table_map = TableContentMap::new();
    table_map.insert(
        "id_1_proc".to_string(),
        RuntimeTable {
            tab_count_id: "id_1".to_string(),
            cache_key: "table_content_1".to_string(),
            data_fields: vec![
                "display_ids".to_string(),
                "abbrv_method".to_string(),
                "communication".to_string(),
            ],
            sql: Some("select dep_set_id, method, dep_notify from test_entries".to_string()),
            ..RuntimeTable::default()
        },
    );
    store.save(TABLE_CONTENT_MAP_KEY, &table_map).unwrap();

    let page = PageRenderer::new(
        schema(),
        site_config(dir.path()),
        RequestValues::new(),
        StatusDb::new(status_pool),
        ContentDb::new(memory_pool().await),
    );
    let mut builder = TableContentBuilder::new(page, store.clone());
    builder.build("id_1_proc").await;

    let rows: Vec<DataRow> = store.load("table_content_1").unwrap().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(field(&rows[0], "display_ids"), "D_1");
    assert_eq!(field(&rows[0], "abbrv_method"), "X-RAY");
    assert_eq!(field(&rows[1], "display_ids"), "D_2");
    assert_eq!(field(&rows[1], "abbrv_method"), "NMR");

    // Only the N-flagged row carries the new-communication icon
    assert!(field(&rows[0], "communication").contains("wfm_new.png"));
    assert!(!field(&rows[1], "communication").contains("wfm_new.png"));
    assert!(field(&rows[1], "communication").contains("wfm_comm.png"));
}

#[tokio::test]
async fn materialize_counts_status_codes() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::create(dir.path()).unwrap();

    let status_pool = memory_pool().await;
    sqlx::query("create table test_entries (dep_set_id text, dep_status_code text)")
        .execute(&status_pool)
        .await
        .unwrap();
    sqlx::query(
        "insert into test_entries values ('D_1', 'PROC'), ('D_2', 'PROC'), ('D_3', 'AUTH')",
    )
    .execute(&status_pool)
    .await
    .unwrap();
    sqlx::query("create table group_deposition_information (dep_set_id text, group_id text)")
        .execute(&status_pool)
        .await
        .unwrap();

    let mut entry_count = HashMap::new();
    entry_count.insert(
        "status_count".to_string(),
        vec![
            "num_entries".to_string(),
            "PROC".to_string(),
            "AUTH".to_string(),
        ],
    );
    let mut table_map = TableContentMap::new();
    table_map.insert(
        "id_1_proc".to_string(),
        RuntimeTable {
            tab_count_id: "id_1".to_string(),
            cache_key: "table_content_1".to_string(),
            data_fields: vec!["display_ids".to_string()],
            sql: Some("select dep_set_id, dep_status_code from test_entries".to_string()),
            entry_count,
            ..RuntimeTable::default()
        },
    );
    store.save(TABLE_CONTENT_MAP_KEY, &table_map).unwrap();

    let page = PageRenderer::new(
        schema(),
        site_config(dir.path()),
        RequestValues::new(),
        StatusDb::new(status_pool),
        ContentDb::new(memory_pool().await),
    );
    let mut builder = TableContentBuilder::new(page, store.clone());
    let counts = builder.build("all").await;

    assert_eq!(counts.get("status_count_num_entries_id_1"), Some(&3));
    assert_eq!(counts.get("status_count_PROC_id_1"), Some(&2));
    assert_eq!(counts.get("status_count_AUTH_id_1"), Some(&1));
}
