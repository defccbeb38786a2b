//! Orchestrator behaviour against a scripted backend

use ouro_channel::ChannelError;
use ouro_core::{
    Command, OrchestratorError, OrchestratorState, Severity, INVALID_JSON_ALERT,
    WRONG_FORMAT_ALERT,
};
use ouro_options::{slice_options, EntryValue};
use ouro_test_utils::{layer_description, path, Harness, LAYER_FILE};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

const VIZ: &str = "/create_slice_visualization/";
const SLICE: &str = "/slice/";
const DELETE: &str = "/delete/";
const STREAM: &str = "/slice_status_stream/";
const SAVED: &str = "/work/sample-slice-options.json";

fn saved_options(harness: &Harness) -> Value {
    let text = harness.files.get(Path::new(SAVED)).expect("options file written");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn layer_file_edit_populates_layers_and_requests_visualization() {
    let mut harness = Harness::new();
    harness.files.insert(LAYER_FILE, layer_description());

    let ticket = harness
        .orchestrator
        .edit(&path("neuroglancer_json"), &json!(LAYER_FILE))
        .await
        .unwrap();

    assert!(ticket.is_some());
    assert_eq!(harness.orchestrator.state(), OrchestratorState::AwaitingVisualization);
    assert!(harness.orchestrator.is_new_visualization());

    let tree = harness.orchestrator.tree();
    let image = tree.get(&path("neuroglancer_image_layer")).unwrap();
    assert_eq!(image.options(), Some(&["em".to_string(), "em_highres".to_string()][..]));
    assert_eq!(image.value(), &EntryValue::from("em"));
    let annotation = tree.get(&path("neuroglancer_annotation_layer")).unwrap();
    assert_eq!(annotation.value(), &EntryValue::from("axon_path"));

    harness.transport.wait_for(VIZ, 1).await;
    assert_eq!(harness.transport.requests_to(VIZ)[0].payload, json!({"options": SAVED}));

    let saved = saved_options(&harness);
    assert_eq!(saved["output_file_folder"], "/work");
    assert_eq!(saved["neuroglancer_json"], LAYER_FILE);
    assert_eq!(saved["bounding_box_params"]["max_depth"], 10);
    let text = harness.files.get(Path::new(SAVED)).unwrap();
    assert!(text.starts_with("{\n    \"output_file_folder\""));
}

#[tokio::test]
async fn unreadable_layer_file_alerts_and_requests_nothing() {
    let mut harness = Harness::new();
    harness.files.insert(LAYER_FILE, "{\"position\": [0, 0, 0]}");

    let ticket = harness
        .orchestrator
        .edit(&path("neuroglancer_json"), &json!(LAYER_FILE))
        .await
        .unwrap();

    assert!(ticket.is_none());
    assert_eq!(harness.alerts.alerts()[0].severity, Severity::Error);
    assert!(harness.transport.calls().is_empty());
}

#[tokio::test]
async fn non_trigger_empty_and_incomplete_edits_issue_nothing() {
    let mut harness = Harness::new();

    // Not in the trigger set
    let ticket = harness.orchestrator.edit(&path("output_file_name"), &json!("run2")).await.unwrap();
    assert!(ticket.is_none());

    // Empty value
    let ticket = harness.orchestrator.edit(&path("neuroglancer_json"), &json!("")).await.unwrap();
    assert!(ticket.is_none());

    // Trigger field, but the layer file is still unset so nothing is saved
    let ticket = harness
        .orchestrator
        .edit(&path("slice_width"), &json!(64))
        .await
        .unwrap();
    assert!(ticket.is_none());

    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);
    assert!(harness.files.paths().is_empty());
    assert!(harness.transport.calls().is_empty());
}

#[tokio::test]
async fn unknown_path_is_an_error() {
    let mut harness = Harness::new();

    let err = harness
        .orchestrator
        .edit(&path("bounding_box_params.nope"), &json!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Options(_)));
}

#[tokio::test]
async fn trigger_edits_are_ignored_while_streaming() {
    let mut harness = Harness::with_layer_file().await;
    harness.transport.reply(VIZ, Ok(json!({"task_id": "V1"})));
    let stream = harness.transport.stream(STREAM);

    let ticket = harness.orchestrator.edit(&path("slice_width"), &json!(64)).await.unwrap();
    assert!(ticket.is_some());
    assert!(!harness.orchestrator.is_new_visualization());
    harness.step().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::VisualizationStreaming);

    stream.unbounded_send(Ok(json!({"progress": [["Load", 0.5]]}))).unwrap();
    harness.step().await;
    assert_eq!(harness.orchestrator.progress().fraction("Load"), Some(0.5));

    let ticket = harness.orchestrator.edit(&path("slice_height"), &json!(100)).await.unwrap();
    assert!(ticket.is_none());
    assert_eq!(harness.transport.requests_to(VIZ).len(), 2);

    stream.unbounded_send(Ok(json!({"progress": [["Load", 1.0]], "done": true}))).unwrap();
    harness.step().await;
    harness.step().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);

    let ticket = harness.orchestrator.edit(&path("slice_height"), &json!(90)).await.unwrap();
    assert!(ticket.is_some());
}

#[tokio::test]
async fn late_response_to_superseded_edit_is_discarded() {
    let mut harness = Harness::with_layer_file().await;
    let first_reply = harness.transport.gate(VIZ);
    harness.transport.reply(VIZ, Ok(json!({"rects": [2]})));

    let first = harness
        .orchestrator
        .edit(&path("slice_width"), &json!(10))
        .await
        .unwrap()
        .unwrap();
    harness.transport.wait_for(VIZ, 2).await;
    let second = harness
        .orchestrator
        .edit(&path("slice_width"), &json!(20))
        .await
        .unwrap()
        .unwrap();
    harness.transport.wait_for(VIZ, 3).await;

    harness.step().await;
    assert_eq!(harness.orchestrator.visualization(), Some(&json!({"rects": [2]})));
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);

    first_reply.send(Ok(json!({"rects": [1]}))).unwrap();
    let late = harness.next_event().await;
    assert_eq!(late.ticket(), &first);
    harness.orchestrator.handle_event(late).unwrap();

    assert!(!harness.orchestrator.channel().is_current(&first));
    assert!(harness.orchestrator.channel().is_current(&second));
    assert_eq!(harness.orchestrator.visualization(), Some(&json!({"rects": [2]})));
    assert_eq!(saved_options(&harness)["slice_width"], 20);
}

#[tokio::test]
async fn unparsed_number_is_persisted_as_null_and_kept() {
    let mut harness = Harness::with_layer_file().await;

    harness
        .orchestrator
        .edit(&path("slice_width"), &json!("12abc"))
        .await
        .unwrap()
        .unwrap();
    harness.transport.wait_for(VIZ, 2).await;

    let saved = saved_options(&harness);
    assert_eq!(saved["slice_width"], Value::Null);

    // Writing the persisted document back leaves the width as it was
    let changes = harness.orchestrator.tree().clone().set_value(&saved);
    assert!(changes.iter().all(|change| change.name() != "slice_width"));
    let width = harness.orchestrator.tree().get(&path("slice_width")).unwrap();
    assert!(width.value().as_f64().is_some_and(f64::is_nan));
}

#[tokio::test]
async fn visualization_failure_alerts_and_returns_to_idle() {
    let mut harness = Harness::with_layer_file().await;
    harness
        .transport
        .reply(VIZ, Err(ChannelError::backend(422, "bad bounding box")));

    harness.orchestrator.edit(&path("max_depth"), &json!(3)).await.unwrap();
    harness.step().await;

    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);
    assert_eq!(harness.alerts.messages(), vec!["bad bounding box"]);
}

#[tokio::test]
async fn submission_deletes_prior_job_before_new_slice() {
    let mut harness = Harness::with_layer_file().await;

    // First job J1, whose status stream ends immediately
    harness.transport.reply(SLICE, Ok(json!({"task_id": "J1"})));
    harness.orchestrator.submit().await.unwrap().unwrap();
    harness.step().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::SliceStreaming);
    harness.drain().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);

    // Second submission: the delete is held back until checked
    let release_delete = harness.transport.gate(DELETE);
    harness.transport.reply(SLICE, Ok(json!({"task_id": "J2"})));
    let transport = harness.transport.clone();
    let check = async move {
        transport.wait_for(DELETE, 1).await;
        assert_eq!(transport.requests_to(SLICE).len(), 1);
        release_delete.send(Ok(json!({"deleted": "J1"}))).unwrap();
    };
    let (submitted, ()) = tokio::join!(harness.orchestrator.submit(), check);
    assert!(submitted.unwrap().is_some());

    harness.transport.wait_for(SLICE, 2).await;
    let keys: Vec<String> = harness
        .transport
        .calls()
        .into_iter()
        .filter(|c| !c.is_stream())
        .map(|c| c.key)
        .collect();
    assert_eq!(keys, vec![VIZ, SLICE, DELETE, SLICE]);
    assert_eq!(
        harness.transport.requests_to(DELETE)[0].payload,
        json!({"task_id": "J1"})
    );

    harness.step().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::SliceStreaming);
    harness.transport.wait_for(STREAM, 2).await;
    let streams: Vec<Value> = harness
        .transport
        .calls()
        .into_iter()
        .filter(|c| c.is_stream())
        .map(|c| c.payload)
        .collect();
    assert_eq!(streams, vec![json!({"task_id": "J1"}), json!({"task_id": "J2"})]);
}

#[tokio::test]
async fn first_submission_skips_delete() {
    let mut harness = Harness::with_layer_file().await;

    harness.orchestrator.submit().await.unwrap().unwrap();
    harness.transport.wait_for(SLICE, 1).await;

    assert!(harness.transport.requests_to(DELETE).is_empty());
    assert_eq!(harness.transport.requests_to(SLICE)[0].payload, json!({"options": SAVED}));
    assert_eq!(harness.orchestrator.state(), OrchestratorState::AwaitingSlice);
}

#[tokio::test]
async fn resubmission_waits_for_the_pending_job() {
    let mut harness = Harness::with_layer_file().await;
    let release_slice = harness.transport.gate(SLICE);

    harness.orchestrator.submit().await.unwrap().unwrap();
    harness.transport.wait_for(SLICE, 1).await;

    let err = harness.orchestrator.submit().await.unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::InvalidTransition {
            from: OrchestratorState::AwaitingSlice,
            to: OrchestratorState::AwaitingSlice,
        }
    );
    assert_eq!(harness.transport.requests_to(SLICE).len(), 1);

    // Once J1 is known it is the job a later submission deletes
    release_slice.send(Ok(json!({"task_id": "J1"}))).unwrap();
    harness.step().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::SliceStreaming);
    harness.drain().await;

    harness.orchestrator.submit().await.unwrap().unwrap();
    harness.transport.wait_for(SLICE, 2).await;
    assert_eq!(
        harness.transport.requests_to(DELETE)[0].payload,
        json!({"task_id": "J1"})
    );
}

#[tokio::test]
async fn submission_requires_connection() {
    let mut harness = Harness::with_layer_file().await;
    harness.transport.set_connected(false);

    assert!(harness.orchestrator.submit().await.unwrap().is_none());
    assert!(harness.transport.requests_to(SLICE).is_empty());
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn current_job_from_backend_is_deleted_on_submit() {
    let mut harness = Harness::with_layer_file().await;
    harness.transport.reply(SLICE, Ok(json!({"task_id": "J0"})));

    let job = harness.orchestrator.fetch_current_job().await.unwrap();
    assert_eq!(job, Some(json!({"task_id": "J0"})));

    harness.orchestrator.submit().await.unwrap();
    assert_eq!(
        harness.transport.requests_to(DELETE)[0].payload,
        json!({"task_id": "J0"})
    );
}

#[tokio::test]
async fn invalid_options_files_leave_tree_unchanged() {
    let mut harness = Harness::new();
    let before = harness.orchestrator.tree().to_object();

    harness.files.insert("/work/bad.json", "{not json");
    let err = harness
        .orchestrator
        .load_options_file(Path::new("/work/bad.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidJson(_)));

    harness.files.insert(
        "/work/partial.json",
        json!({"slice_width": 10, "bounding_box_params": {"max_depth": 2}}).to_string(),
    );
    let err = harness
        .orchestrator
        .load_options_file(Path::new("/work/partial.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::WrongFormat(_)));

    assert_eq!(harness.orchestrator.tree().to_object(), before);
    assert_eq!(
        harness.alerts.messages(),
        vec![INVALID_JSON_ALERT, WRONG_FORMAT_ALERT]
    );
    assert!(harness.transport.calls().is_empty());
}

#[tokio::test]
async fn valid_options_file_loads_and_reprocesses_layer_file() {
    let mut harness = Harness::new();
    harness.files.insert(LAYER_FILE, layer_description());

    let mut job = slice_options().unwrap();
    job.set_value(&json!({
        "slice_width": 64,
        "neuroglancer_json": LAYER_FILE,
        "neuroglancer_image_layer": "em_highres",
        "bounding_box_params": {"use_adaptive_slicing": true}
    }));
    harness.files.insert("/work/job.json", job.to_object().to_string());

    let changes = harness
        .orchestrator
        .load_options_file(Path::new("/work/job.json"))
        .await
        .unwrap();
    assert_eq!(changes.len(), 4);

    let tree = harness.orchestrator.tree();
    assert_eq!(tree.get(&path("slice_width")).unwrap().value(), &EntryValue::Number(64.0));
    assert_eq!(
        tree.get(&path("bounding_box_params.use_adaptive_slicing")).unwrap().value(),
        &EntryValue::Bool(true)
    );
    let image = tree.get(&path("neuroglancer_image_layer")).unwrap();
    assert_eq!(image.value(), &EntryValue::from("em_highres"));
    assert_eq!(image.options().map(<[String]>::len), Some(2));

    assert_eq!(harness.orchestrator.state(), OrchestratorState::AwaitingVisualization);
    assert!(harness.orchestrator.is_new_visualization());
    harness.transport.wait_for(VIZ, 1).await;
}

#[tokio::test]
async fn progress_tracks_latest_report_and_bounding_box_step() {
    let mut harness = Harness::with_layer_file().await;

    // No visualization yet: bounding-box progress stays at zero
    harness.transport.reply(VIZ, Ok(json!({"rects": [[0, 0, 1, 1]]})));
    harness.orchestrator.edit(&path("slice_width"), &json!(80)).await.unwrap();
    assert_eq!(harness.orchestrator.bounding_box_progress(), 0.0);
    harness.step().await;
    assert!(harness.orchestrator.visualization().is_some());

    harness.transport.reply(SLICE, Ok(json!({"task_id": "J1"})));
    let stream = harness.transport.stream(STREAM);
    harness.orchestrator.submit().await.unwrap();
    harness.step().await;

    stream
        .unbounded_send(Ok(json!({"progress": [["SliceParallelPipelineStep", 0.4], ["Load", 1.0]]})))
        .unwrap();
    harness.step().await;
    assert_eq!(harness.orchestrator.bounding_box_progress(), 0.4);

    stream
        .unbounded_send(Ok(json!([{"step_name": "SliceParallelPipelineStep", "fraction": 0.2}])))
        .unwrap();
    harness.step().await;
    assert_eq!(harness.orchestrator.bounding_box_progress(), 0.2);
    assert_eq!(harness.orchestrator.progress().fraction("Load"), Some(1.0));

    stream
        .unbounded_send(Ok(json!({"error": {"status": 500, "message": "worker crashed"}})))
        .unwrap();
    harness.step().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);
    assert_eq!(harness.alerts.messages(), vec!["worker crashed"]);
}

#[tokio::test]
async fn run_until_idle_follows_a_job_to_completion() {
    let mut harness = Harness::with_layer_file().await;
    harness.transport.reply(SLICE, Ok(json!({"task_id": "J1"})));
    harness.transport.scripted_stream(
        STREAM,
        [
            json!({"step_name": "Load", "fraction": 0.5}),
            json!({"progress": [["Load", 1.0], ["Slice", 1.0]], "done": true}),
        ],
    );

    harness.orchestrator.submit().await.unwrap();
    let mut observed = Vec::new();
    harness
        .orchestrator
        .run_until_idle(&mut harness.events, |o| observed.push(o.state()))
        .await
        .unwrap();

    assert_eq!(observed.first(), Some(&OrchestratorState::SliceStreaming));
    assert_eq!(observed.last(), Some(&OrchestratorState::Idle));
    assert_eq!(harness.orchestrator.progress().len(), 2);
}

#[tokio::test]
async fn run_loop_executes_commands_until_shutdown() {
    let Harness {
        mut orchestrator,
        events,
        transport,
        files,
        ..
    } = Harness::new();
    files.insert(LAYER_FILE, layer_description());
    transport.reply(VIZ, Ok(json!({"rects": [1]})));

    let (commands, rx) = mpsc::channel(8);
    let drive = async {
        commands
            .send(Command::Edit {
                path: path("neuroglancer_json"),
                value: json!(LAYER_FILE),
            })
            .await
            .unwrap();
        transport.wait_for(VIZ, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        commands.send(Command::Shutdown).await.unwrap();
    };
    tokio::join!(orchestrator.run(events, rx), drive);

    assert_eq!(orchestrator.visualization(), Some(&json!({"rects": [1]})));
    assert_eq!(orchestrator.state(), OrchestratorState::Idle);
}
