use async_trait::async_trait;
use scenevault_store::{Vault, VaultConfig};
use scenevault_tasks::{
    CancellationToken, CreateTask, HandlerRegistry, LogSeverity, Task, TaskContext, TaskError,
    TaskHandler, TaskPage, TaskScheduler, TaskStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, task: &Task, _cancel: &CancellationToken, _ctx: &TaskContext) -> scenevault_tasks::Result<Value> {
        Ok(task.data.clone())
    }
}

/// Runs until cancelled.
struct BlockHandler;

#[async_trait]
impl TaskHandler for BlockHandler {
    async fn handle(&self, task: &Task, cancel: &CancellationToken, _ctx: &TaskContext) -> scenevault_tasks::Result<Value> {
        cancel.cancelled().await;
        Err(TaskError::Aborted { task_id: task.id })
    }
}

struct PanicHandler;

#[async_trait]
impl TaskHandler for PanicHandler {
    async fn handle(&self, _task: &Task, _cancel: &CancellationToken, _ctx: &TaskContext) -> scenevault_tasks::Result<Value> {
        panic!("handler exploded")
    }
}

struct ChattyHandler;

#[async_trait]
impl TaskHandler for ChattyHandler {
    async fn handle(&self, _task: &Task, _cancel: &CancellationToken, ctx: &TaskContext) -> scenevault_tasks::Result<Value> {
        ctx.logger().info("converting model").await;
        ctx.logger().warn("texture too large").await;
        Ok(json!("done"))
    }
}

/// Finishes when a permit is released, whether or not it was cancelled.
struct GateHandler {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl TaskHandler for GateHandler {
    async fn handle(&self, _task: &Task, _cancel: &CancellationToken, _ctx: &TaskContext) -> scenevault_tasks::Result<Value> {
        let permit = self.gate.acquire().await.unwrap();
        permit.forget();
        Ok(json!("opened"))
    }
}

struct Fixture {
    _dir: TempDir,
    scheduler: TaskScheduler,
    scene_id: i64,
    gate: Arc<Semaphore>,
}

async fn setup() -> Fixture {
    let dir = TempDir::new().unwrap();
    let vault = Vault::open(&VaultConfig::new(dir.path())).await.unwrap();
    let scene_id = vault.create_scene("tasks", Some(1)).await.unwrap();

    let gate = Arc::new(Semaphore::new(0));
    let mut registry = HandlerRegistry::with_control_handlers();
    registry
        .register("echo", EchoHandler)
        .register("block", BlockHandler)
        .register("panic", PanicHandler)
        .register("chatty", ChattyHandler)
        .register("gate", GateHandler { gate: gate.clone() });

    Fixture {
        _dir: dir,
        scheduler: TaskScheduler::new(vault, registry),
        scene_id,
        gate,
    }
}

fn echo(value: Value) -> CreateTask {
    CreateTask::new("echo", value)
}

async fn wait_until_running(scheduler: &TaskScheduler, task_id: i64) {
    for _ in 0..200 {
        if scheduler.is_running(task_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task #{} never started", task_id);
}

#[tokio::test]
async fn test_unknown_type_rejected_at_creation() {
    let f = setup().await;
    let err = f
        .scheduler
        .create(f.scene_id, CreateTask::new("extractZip", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::UnknownType(t) if t == "extractZip"));
}

#[tokio::test]
async fn test_created_task_is_pending_until_run() {
    let f = setup().await;
    let task = f
        .scheduler
        .create(f.scene_id, echo(json!({"n": 1})).user(3))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.user_id, Some(3));
    assert_eq!(task.output, None);

    f.scheduler.run_until_idle().await.unwrap();
    let task = f.scheduler.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.output, Some(json!({"n": 1})));
}

#[tokio::test]
async fn test_delay_outputs_value() {
    let f = setup().await;
    f.scheduler.start();
    let task = f
        .scheduler
        .create(f.scene_id, CreateTask::new("delay", json!({"time": 5, "value": "late"})))
        .await
        .unwrap();
    assert_eq!(f.scheduler.wait(task.id).await.unwrap(), json!("late"));
}

#[tokio::test]
async fn test_after_edges_order_execution() {
    let f = setup().await;
    let a = f.scheduler.create(f.scene_id, echo(json!("a"))).await.unwrap();
    let b = f
        .scheduler
        .create(f.scene_id, CreateTask::new("groupOutputs", Value::Null).after([a.id]))
        .await
        .unwrap();
    assert_eq!(b.after, vec![a.id]);

    f.scheduler.run_until_idle().await.unwrap();
    let b = f.scheduler.get_task(b.id).await.unwrap();
    assert_eq!(b.status, TaskStatus::Success);
    assert_eq!(b.output, Some(json!(["a"])));
}

#[tokio::test]
async fn test_shape_indices_follow_source_order() {
    let f = setup().await;
    let first = f.scheduler.create(f.scene_id, echo(json!({"uri": "a.glb"}))).await.unwrap();
    let second = f.scheduler.create(f.scene_id, echo(json!({"uri": "b.glb"}))).await.unwrap();
    let shaped = f
        .scheduler
        .create(
            f.scene_id,
            CreateTask::new("groupOutputs", json!({"model": "$[0].uri", "preview": "$[1].uri"}))
                .after([second.id, first.id]),
        )
        .await
        .unwrap();

    f.scheduler.run_until_idle().await.unwrap();
    let shaped = f.scheduler.get_task(shaped.id).await.unwrap();
    assert_eq!(shaped.output, Some(json!({"model": "a.glb", "preview": "b.glb"})));
}

#[tokio::test]
async fn test_cycles_rejected() {
    let f = setup().await;
    let a = f.scheduler.create(f.scene_id, echo(json!(1))).await.unwrap();
    let b = f
        .scheduler
        .create(f.scene_id, echo(json!(2)).after([a.id]))
        .await
        .unwrap();
    let c = f
        .scheduler
        .create(f.scene_id, echo(json!(3)).after([b.id]))
        .await
        .unwrap();

    let queue = f.scheduler.queue();
    assert!(matches!(
        queue.add_relation(c.id, a.id).await.unwrap_err(),
        TaskError::Cycle { .. }
    ));
    assert!(matches!(
        queue.add_relation(a.id, a.id).await.unwrap_err(),
        TaskError::Cycle { .. }
    ));
    // a redundant edge in the same direction is fine
    queue.add_relation(a.id, c.id).await.unwrap();
}

#[tokio::test]
async fn test_wait_propagates_error() {
    let f = setup().await;
    f.scheduler.start();
    let task = f
        .scheduler
        .create(f.scene_id, CreateTask::new("error", json!({"message": "boom"})))
        .await
        .unwrap();

    let err = f.scheduler.wait(task.id).await.unwrap_err();
    assert_eq!(err.to_string(), format!("In task #{}: boom", task.id));
    assert!(!err.is_aborted());

    let logs = f
        .scheduler
        .task_logs(task.id, TaskPage::default())
        .await
        .unwrap();
    let last = logs.last().unwrap();
    assert_eq!(last.severity, LogSeverity::Error);
    assert_eq!(last.message, "boom");
}

#[tokio::test]
async fn test_reduce_after_failed_task_fails_with_its_message() {
    let f = setup().await;
    let a = f
        .scheduler
        .create(f.scene_id, CreateTask::new("error", json!({"message": "boom"})))
        .await
        .unwrap();
    let reduce = f
        .scheduler
        .create(
            f.scene_id,
            CreateTask::new("reduce", json!({"tasks": [{"type": "echo", "data": 1}]})).after([a.id]),
        )
        .await
        .unwrap();

    f.scheduler.run_until_idle().await.unwrap();

    let reduce = f.scheduler.get_task(reduce.id).await.unwrap();
    assert_eq!(reduce.status, TaskStatus::Error);
    assert!(reduce.error.as_deref().unwrap().contains("boom"));

    let err = f.scheduler.wait(reduce.id).await.unwrap_err();
    assert!(err.to_string().contains("boom"), "{}", err);
}

#[tokio::test]
async fn test_failure_propagates_down_after_chain() {
    let f = setup().await;
    let a = f
        .scheduler
        .create(f.scene_id, CreateTask::new("error", json!({"message": "bad mesh"})))
        .await
        .unwrap();
    let b = f.scheduler.create(f.scene_id, echo(json!(1)).after([a.id])).await.unwrap();
    let c = f.scheduler.create(f.scene_id, echo(json!(2)).after([b.id])).await.unwrap();

    f.scheduler.run_until_idle().await.unwrap();

    let c = f.scheduler.get_task(c.id).await.unwrap();
    assert_eq!(c.status, TaskStatus::Error);
    assert!(c.output.is_none());
    assert!(c.error.unwrap().contains("bad mesh"));
}

#[tokio::test]
async fn test_reduce_collects_child_outputs() {
    let f = setup().await;
    let reduce = f
        .scheduler
        .create(
            f.scene_id,
            CreateTask::new(
                "reduce",
                json!({"tasks": [{"type": "echo", "data": "x"}, {"type": "delay", "data": {"time": 1, "value": "y"}}]}),
            ),
        )
        .await
        .unwrap();

    f.scheduler.run_until_idle().await.unwrap();

    let collector_id = f.scheduler.wait(reduce.id).await.unwrap().as_i64().unwrap();
    let collector = f.scheduler.get_task(collector_id).await.unwrap();
    assert_eq!(collector.task_type, "afterReduce");
    assert_eq!(collector.parent, Some(reduce.id));
    assert_eq!(collector.output, Some(json!(["x", "y"])));
}

#[tokio::test]
async fn test_for_each_waits_on_children() {
    let f = setup().await;
    let parent = f
        .scheduler
        .create(
            f.scene_id,
            CreateTask::new("forEach", json!({"children": [{"type": "echo", "data": 1}, {"type": "echo", "data": 2}]})),
        )
        .await
        .unwrap();

    f.scheduler.run_until_idle().await.unwrap();

    let trees = f
        .scheduler
        .list_scene_tasks(f.scene_id, TaskPage::default())
        .await
        .unwrap();
    assert_eq!(trees.len(), 1);
    let root = &trees[0];
    assert_eq!(root.task.id, parent.id);
    assert_eq!(root.task.status, TaskStatus::Success);
    assert_eq!(root.children.len(), 2);
    assert!(root.children.iter().all(|c| c.task.status == TaskStatus::Success));
}

#[tokio::test]
async fn test_for_each_fails_when_child_fails() {
    let f = setup().await;
    let parent = f
        .scheduler
        .create(
            f.scene_id,
            CreateTask::new(
                "forEach",
                json!({"children": [{"type": "echo"}, {"type": "error", "data": {"message": "corrupt zip"}}]}),
            ),
        )
        .await
        .unwrap();

    f.scheduler.run_until_idle().await.unwrap();

    let parent = f.scheduler.get_task(parent.id).await.unwrap();
    assert_eq!(parent.status, TaskStatus::Error);
    assert!(parent.error.unwrap().contains("corrupt zip"));
}

#[tokio::test]
async fn test_group_shapes_member_outputs() {
    let f = setup().await;
    f.scheduler.start();
    let api = f.scheduler.api(f.scene_id, Some(1));

    let group = api
        .group(json!({"model": "$[0]", "size": "$[1].bytes", "kind": "scene"}), |api| async move {
            let model = api.create(echo(json!("chair.glb"))).await?;
            let stats = api.create(echo(json!({"bytes": 2048}))).await?;
            Ok(vec![model.id, stats.id])
        })
        .await
        .unwrap();
    assert_eq!(group.task_type, "groupOutputs");

    let output = f.scheduler.wait(group.id).await.unwrap();
    assert_eq!(output, json!({"model": "chair.glb", "size": 2048, "kind": "scene"}));
}

#[tokio::test]
async fn test_group_fails_when_work_fails() {
    let f = setup().await;
    let api = f.scheduler.api(f.scene_id, None);

    let err = api
        .group(Value::Null, |api| async move {
            api.create(CreateTask::new("nope", Value::Null)).await?;
            Ok(vec![])
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::UnknownType(_)));

    let trees = f
        .scheduler
        .list_all_tasks(TaskPage::default())
        .await
        .unwrap();
    assert_eq!(trees.len(), 1);
    assert_eq!(trees[0].task.status, TaskStatus::Error);
}

#[tokio::test]
async fn test_delete_missing_task_returns_false() {
    let f = setup().await;
    assert!(!f.scheduler.delete_task(424242).await.unwrap());
}

#[tokio::test]
async fn test_delete_removes_subtree() {
    let f = setup().await;
    let root = f
        .scheduler
        .create(f.scene_id, CreateTask::new("group", Value::Null))
        .await
        .unwrap();
    let child = f
        .scheduler
        .create(f.scene_id, echo(json!(1)).parent(root.id))
        .await
        .unwrap();
    let grandchild = f
        .scheduler
        .create(f.scene_id, echo(json!(2)).parent(child.id))
        .await
        .unwrap();

    assert!(f.scheduler.delete_task(root.id).await.unwrap());
    for id in [root.id, child.id, grandchild.id] {
        assert!(matches!(
            f.scheduler.get_task(id).await.unwrap_err(),
            TaskError::NotFound(_)
        ));
    }
}

#[tokio::test]
async fn test_list_own_tasks_returns_user_trees() {
    let f = setup().await;
    let root = f
        .scheduler
        .create(f.scene_id, CreateTask::new("group", Value::Null).user(7))
        .await
        .unwrap();
    f.scheduler
        .create(f.scene_id, echo(json!(1)).parent(root.id).user(7))
        .await
        .unwrap();
    f.scheduler
        .create(f.scene_id, echo(json!(2)).user(8))
        .await
        .unwrap();

    let own = f
        .scheduler
        .list_own_tasks(7, TaskPage::default())
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].task.id, root.id);
    assert_eq!(own[0].scene_name.as_deref(), Some("tasks"));
    assert_eq!(own[0].subtree_size(), 2);
    assert!(own[0].children[0].scene_name.is_none());

    let page = TaskPage { offset: 0, limit: 0 };
    assert!(matches!(
        f.scheduler.list_own_tasks(7, page).await.unwrap_err(),
        TaskError::BadRequest(_)
    ));
}

#[tokio::test]
async fn test_cancel_running_task_marks_it_aborted() {
    let f = setup().await;
    f.scheduler.start();
    let task = f
        .scheduler
        .create(f.scene_id, CreateTask::new("block", Value::Null))
        .await
        .unwrap();
    wait_until_running(&f.scheduler, task.id).await;

    assert!(f.scheduler.cancel(task.id).await.unwrap());
    let err = f.scheduler.wait(task.id).await.unwrap_err();
    assert!(err.is_aborted());

    let task = f.scheduler.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.aborted);
}

#[tokio::test]
async fn test_cancel_interrupts_delay() {
    let f = setup().await;
    f.scheduler.start();
    let task = f
        .scheduler
        .create(f.scene_id, CreateTask::new("delay", json!({"time": 60_000})))
        .await
        .unwrap();
    wait_until_running(&f.scheduler, task.id).await;

    f.scheduler.cancel(task.id).await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), f.scheduler.wait(task.id))
        .await
        .expect("delay ignored cancellation")
        .unwrap_err();
    assert!(err.is_aborted());
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let f = setup().await;
    let task = f.scheduler.create(f.scene_id, echo(json!(1))).await.unwrap();

    assert!(f.scheduler.cancel(task.id).await.unwrap());
    let task = f.scheduler.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.aborted);

    // terminal tasks have nothing left to cancel
    assert!(!f.scheduler.cancel(task.id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_completion_keeps_result() {
    let f = setup().await;
    f.scheduler.start();
    let mut ids = Vec::new();
    for _ in 0..20 {
        let task = f
            .scheduler
            .create(f.scene_id, CreateTask::new("gate", Value::Null))
            .await
            .unwrap();
        ids.push(task.id);
    }
    for id in &ids {
        wait_until_running(&f.scheduler, *id).await;
    }

    // each handler ignores its token, so every task must end in success
    for id in &ids {
        f.gate.add_permits(1);
        f.scheduler.cancel(*id).await.unwrap();
    }
    for id in ids {
        assert_eq!(f.scheduler.wait(id).await.unwrap(), json!("opened"));
        assert!(!f.scheduler.get_task(id).await.unwrap().aborted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_until_idle_waits_for_dependents() {
    let f = setup().await;
    for round in 0..10 {
        let mut sources = Vec::new();
        for i in 0..3 {
            let task = f.scheduler.create(f.scene_id, echo(json!(round * 10 + i))).await.unwrap();
            sources.push(task.id);
        }
        let collect = f
            .scheduler
            .create(f.scene_id, CreateTask::new("groupOutputs", Value::Null).after(sources))
            .await
            .unwrap();

        f.scheduler.run_until_idle().await.unwrap();

        let collect = f.scheduler.get_task(collect.id).await.unwrap();
        assert_eq!(collect.status, TaskStatus::Success, "round {}", round);
        assert_eq!(
            collect.output,
            Some(json!([round * 10, round * 10 + 1, round * 10 + 2]))
        );
    }
}

#[tokio::test]
async fn test_panicking_handler_fails_task() {
    let f = setup().await;
    let task = f
        .scheduler
        .create(f.scene_id, CreateTask::new("panic", Value::Null))
        .await
        .unwrap();

    f.scheduler.run_until_idle().await.unwrap();

    let task = f.scheduler.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.error.unwrap().contains("panicked"));
}

#[tokio::test]
async fn test_handler_logs_are_persisted() {
    let f = setup().await;
    let task = f
        .scheduler
        .create(f.scene_id, CreateTask::new("chatty", Value::Null))
        .await
        .unwrap();

    f.scheduler.run_until_idle().await.unwrap();

    let logs = f
        .scheduler
        .task_logs(task.id, TaskPage::default())
        .await
        .unwrap();
    let lines: Vec<_> = logs.iter().map(|l| (l.severity, l.message.as_str())).collect();
    assert_eq!(
        lines,
        vec![
            (LogSeverity::Info, "converting model"),
            (LogSeverity::Warn, "texture too large"),
        ]
    );
}

#[tokio::test]
async fn test_removing_scene_removes_its_tasks() {
    let f = setup().await;
    let task = f.scheduler.create(f.scene_id, echo(json!(1))).await.unwrap();

    f.scheduler.vault().remove_scene(f.scene_id).await.unwrap();
    assert!(matches!(
        f.scheduler.get_task(task.id).await.unwrap_err(),
        TaskError::NotFound(_)
    ));
}
